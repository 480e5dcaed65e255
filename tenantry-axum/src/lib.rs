//! Axum integration for tenantry.
//!
//! [`TenantLayer`] runs a [`TenantContextResolver`] for every request, stores
//! the resulting [`TenantContext`] in the request extensions and scopes it as
//! the task-local context while the inner service runs. Handlers read it back
//! with the [`CurrentTenant`] extractor, or through
//! [`current_tenant`](tenantry_core::tenant::current_tenant).
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, routing::get, extract::State};
//! use tenantry_axum::{CurrentTenant, TenantError, TenantLayer};
//! use tenantry_core::config::{ResolutionStrategy, ResolverConfig};
//! use tenantry_core::pool::TenantPoolManager;
//! use tenantry_core::tenant::TenantContextResolver;
//! use tenantry_postgres::PostgresBackend;
//!
//! type Pool = TenantPoolManager<PostgresBackend>;
//!
//! async fn whoami(
//!     State(pool): State<Pool>,
//!     CurrentTenant(ctx): CurrentTenant,
//! ) -> Result<String, TenantError> {
//!     let conn = pool.get_connection_for_context(&ctx).await?;
//!     Ok(conn.schema().to_string())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = PostgresBackend::from_url("postgresql://localhost/app").unwrap();
//!     let pool = TenantPoolManager::builder(backend).build().unwrap();
//!     let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Subdomain));
//!
//!     let app = Router::new()
//!         .route("/whoami", get(whoami))
//!         .layer(TenantLayer::new(resolver))
//!         .with_state(pool);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json,
    extract::{FromRequestParts, OptionalFromRequestParts},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use http::{Request, StatusCode, header::AUTHORIZATION, request::Parts};
use serde_json::json;
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use tenantry_core::tenant::{RequestInfo, TenantContext, TenantContextResolver, with_context};
use tenantry_core::{ErrorCode, TenancyError};

/// Build a [`RequestInfo`] from request parts.
///
/// Header names are lower-cased; values that are not visible ASCII are
/// skipped. The host comes from the URI authority when present and from the
/// `Host` header otherwise; the bearer token from `Authorization`.
pub fn request_info_from_parts(parts: &Parts) -> RequestInfo {
    let mut info = RequestInfo::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            info.insert_header(name.as_str(), value);
        }
    }
    if let Some(authority) = parts.uri.authority() {
        info = info.with_host(authority.as_str());
    }
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        });
    if let Some(token) = token {
        info = info.with_bearer_token(token.trim());
    }
    info
}

/// Tower layer that resolves the tenant for every request.
#[derive(Clone)]
pub struct TenantLayer {
    resolver: Arc<TenantContextResolver>,
}

impl TenantLayer {
    /// Create a layer around a resolver.
    pub fn new(resolver: TenantContextResolver) -> Self {
        Self::from_shared(Arc::new(resolver))
    }

    /// Create a layer around a shared resolver.
    pub fn from_shared(resolver: Arc<TenantContextResolver>) -> Self {
        Self { resolver }
    }

    /// The resolver in use.
    pub fn resolver(&self) -> &TenantContextResolver {
        &self.resolver
    }
}

impl<S> Layer<S> for TenantLayer {
    type Service = TenantService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantService {
            inner,
            resolver: self.resolver.clone(),
        }
    }
}

/// Service produced by [`TenantLayer`].
#[derive(Clone)]
pub struct TenantService<S> {
    inner: S,
    resolver: Arc<TenantContextResolver>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for TenantService<S>
where
    S: Service<Request<ReqBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The clone is not ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let resolver = self.resolver.clone();

        let (parts, body) = request.into_parts();
        let info = request_info_from_parts(&parts);
        let mut request = Request::from_parts(parts, body);

        Box::pin(async move {
            let ctx = resolver.resolve(&info).await;
            debug!(
                tenant_id = ctx.tenant_id().map(|id| id.as_str()).unwrap_or(""),
                path = %request.uri().path(),
                "Tenant context resolved"
            );
            request.extensions_mut().insert(ctx.clone());
            with_context(ctx, inner.call(request)).await
        })
    }
}

/// The tenant bound to the current request.
///
/// Rejects with `400 Bad Request` when the request resolved to no tenant.
/// Use `Option<CurrentTenant>` for routes that also serve anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTenant(pub TenantContext);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = TenantError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<TenantContext>() {
            Some(ctx) if ctx.has_tenant() => Ok(CurrentTenant(ctx.clone())),
            Some(_) => Err(TenancyError::no_context().into()),
            None => Err(TenancyError::no_context()
                .with_help("Add TenantLayer to the router")
                .into()),
        }
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = TenantError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TenantContext>()
            .filter(|ctx| ctx.has_tenant())
            .cloned()
            .map(CurrentTenant))
    }
}

/// A [`TenancyError`] rendered as an HTTP response.
#[derive(Debug, Clone)]
pub struct TenantError(pub TenancyError);

impl From<TenancyError> for TenantError {
    fn from(err: TenancyError) -> Self {
        Self(err)
    }
}

impl TenantError {
    /// The status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self.0.code {
            ErrorCode::TenantNotFound => StatusCode::NOT_FOUND,
            ErrorCode::NoTenantContext | ErrorCode::ResolutionFailed => StatusCode::BAD_REQUEST,
            ErrorCode::ValidationFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::ConnectionCreateFailed
            | ErrorCode::ConnectionDestroyFailed
            | ErrorCode::CloseFailed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidConfiguration | ErrorCode::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.0.code.code(),
            "message": self.0.message,
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        CurrentTenant, TenantError, TenantLayer, TenantService, request_info_from_parts,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use pretty_assertions::assert_eq;
    use tenantry_core::config::{ResolutionStrategy, ResolverConfig};
    use tenantry_core::tenant::task_local::current_schema;
    use tower::ServiceExt;

    fn app() -> Router {
        let resolver =
            TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Header));

        Router::new()
            .route(
                "/schema",
                get(|CurrentTenant(ctx): CurrentTenant| async move {
                    ctx.schema_name().map(|s| s.to_string()).unwrap_or_default()
                }),
            )
            .route(
                "/task-local",
                get(|| async { current_schema().map(|s| s.into_inner()).unwrap_or_default() }),
            )
            .route(
                "/optional",
                get(|tenant: Option<CurrentTenant>| async move {
                    if tenant.is_some() { "tenant" } else { "anonymous" }
                }),
            )
            .layer(TenantLayer::new(resolver))
    }

    async fn get_body(app: Router, uri: &str, tenant: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri(uri);
        if let Some(tenant) = tenant {
            request = request.header("X-Tenant-Id", tenant);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_extractor_sees_resolved_tenant() {
        let (status, body) = get_body(app(), "/schema", Some("acme")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "tenant_acme");
    }

    #[tokio::test]
    async fn test_task_local_is_scoped_for_handler() {
        let (status, body) = get_body(app(), "/task-local", Some("globex")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "tenant_globex");
    }

    #[tokio::test]
    async fn test_missing_tenant_is_rejected() {
        let (status, body) = get_body(app(), "/schema", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("T2001"));
    }

    #[tokio::test]
    async fn test_optional_extractor() {
        assert_eq!(get_body(app(), "/optional", None).await.1, "anonymous");
        assert_eq!(get_body(app(), "/optional", Some("acme")).await.1, "tenant");
    }

    #[test]
    fn test_request_info_from_parts() {
        let (parts, _) = Request::builder()
            .uri("https://acme.example.com/path")
            .header("X-Tenant-Id", "acme")
            .header("Authorization", "Bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();

        let info = request_info_from_parts(&parts);
        assert_eq!(info.header("x-tenant-id"), Some("acme"));
        assert_eq!(info.host(), Some("acme.example.com"));
        assert_eq!(info.bearer_token(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_host_header_used_without_authority() {
        let (parts, _) = Request::builder()
            .uri("/path")
            .header("Host", "globex.example.com:8080")
            .body(())
            .unwrap()
            .into_parts();

        assert_eq!(
            request_info_from_parts(&parts).host(),
            Some("globex.example.com:8080")
        );
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            TenantError::from(TenancyError::tenant_not_found("tenant_x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TenantError::from(TenancyError::connection_create("tenant_x", "refused")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TenantError::from(TenancyError::validation_failed("timeout")).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
