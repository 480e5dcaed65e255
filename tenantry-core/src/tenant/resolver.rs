//! Identifying the tenant a request belongs to.
//!
//! Exactly one [`ResolutionStrategy`] is active per resolver. Resolution never
//! fails: any error is logged and the request proceeds with the default
//! tenant, or unbound if there is none.
//!
//! ```rust
//! use tenantry_core::config::{ResolutionStrategy, ResolverConfig};
//! use tenantry_core::tenant::{RequestInfo, TenantContextResolver};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Subdomain));
//!
//! let ctx = resolver.resolve(&RequestInfo::new().with_host("acme.example.com")).await;
//! assert_eq!(ctx.schema_name().unwrap().as_str(), "tenant_acme");
//!
//! let ctx = resolver.resolve(&RequestInfo::new().with_host("example.com")).await;
//! assert!(!ctx.has_tenant());
//! # }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::context::{TenantContext, TenantId};
use super::naming::{DefaultSchemaNaming, SchemaNamingStrategy};
use super::request::RequestInfo;
use super::task_local;
use crate::config::{ResolutionStrategy, ResolverConfig};
use crate::error::{TenancyError, TenancyResult};

/// A host-supplied tenant extraction function.
pub type CustomResolverFn =
    Arc<dyn Fn(RequestInfo) -> BoxFuture<'static, TenancyResult<Option<String>>> + Send + Sync>;

/// Resolves a [`TenantContext`] for each inbound request.
#[derive(Clone)]
pub struct TenantContextResolver {
    config: ResolverConfig,
    naming: Arc<dyn SchemaNamingStrategy>,
    custom: Option<CustomResolverFn>,
}

impl TenantContextResolver {
    /// Create a resolver using the default naming strategy.
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            naming: Arc::new(DefaultSchemaNaming),
            custom: None,
        }
    }

    /// Use a different schema naming strategy.
    pub fn with_naming(mut self, naming: Arc<dyn SchemaNamingStrategy>) -> Self {
        self.naming = naming;
        self
    }

    /// Supply the function used by [`ResolutionStrategy::Custom`].
    pub fn with_custom_resolver<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TenancyResult<Option<String>>> + Send + 'static,
    {
        self.custom = Some(Arc::new(move |request| f(request).boxed()));
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The naming strategy in use.
    pub fn naming(&self) -> &Arc<dyn SchemaNamingStrategy> {
        &self.naming
    }

    /// Resolve the context for a request.
    ///
    /// Runs the active strategy, falls back to the default tenant, and
    /// returns an empty context if neither yields an identifier.
    pub async fn resolve(&self, request: &RequestInfo) -> TenantContext {
        match self.resolve_tenant_id(request).await {
            Some(tenant_id) => {
                let schema = self.naming.schema_name(&tenant_id);
                debug!(tenant_id = %tenant_id, schema = %schema, "Resolved tenant");
                TenantContext::new(tenant_id, schema)
            }
            None => {
                debug!(strategy = %self.config.strategy, "No tenant resolved");
                TenantContext::empty()
            }
        }
    }

    /// Resolve a request and run `f` with the result as the task-local context.
    pub async fn scope<F, T>(&self, request: &RequestInfo, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let ctx = self.resolve(request).await;
        task_local::with_context(ctx, f).await
    }

    /// The tenant identifier for a request, after the default-tenant fallback.
    pub async fn resolve_tenant_id(&self, request: &RequestInfo) -> Option<TenantId> {
        let extracted = match self.extract(request).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    strategy = %self.config.strategy,
                    error = %e,
                    "Tenant resolution failed"
                );
                None
            }
        };

        extracted
            .as_deref()
            .and_then(non_empty)
            .or_else(|| self.config.default_tenant.as_deref().and_then(non_empty))
            .map(TenantId::new)
    }

    async fn extract(&self, request: &RequestInfo) -> TenancyResult<Option<String>> {
        match self.config.strategy {
            ResolutionStrategy::Header => {
                Ok(extract_header(request, &self.config.header_name).map(String::from))
            }
            ResolutionStrategy::Subdomain => Ok(request
                .host()
                .and_then(|host| extract_subdomain(host, self.config.subdomain_position))
                .map(String::from)),
            ResolutionStrategy::TokenClaim => match request.bearer_token() {
                Some(token) => extract_claim(token, &self.config.claim_name),
                None => Ok(None),
            },
            ResolutionStrategy::Custom => self.run_custom(request).await,
        }
    }

    async fn run_custom(&self, request: &RequestInfo) -> TenancyResult<Option<String>> {
        let custom = self.custom.as_ref().ok_or_else(|| {
            TenancyError::resolution_failed("custom strategy selected but no resolver function set")
        })?;

        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| custom(request.clone())))
            .map_err(|_| TenancyError::resolution_failed("custom resolver panicked"))?;

        AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .map_err(|_| TenancyError::resolution_failed("custom resolver panicked"))?
    }
}

impl std::fmt::Debug for TenantContextResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContextResolver")
            .field("config", &self.config)
            .field("has_custom_resolver", &self.custom.is_some())
            .finish()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Read a header, trimmed. Empty values count as absent.
pub fn extract_header<'a>(request: &'a RequestInfo, header_name: &str) -> Option<&'a str> {
    request.header(header_name).and_then(non_empty)
}

/// Pick a subdomain label from a host.
///
/// The port is ignored and the last two labels are treated as the domain and
/// its suffix. `position` indexes what remains, from the left.
pub fn extract_subdomain(host: &str, position: usize) -> Option<&str> {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return None;
    }
    labels[..labels.len() - 2]
        .get(position)
        .copied()
        .and_then(non_empty)
}

/// Read a claim from an unverified bearer token.
///
/// The signature is not checked: this identifies the tenant, it does not
/// authenticate the caller. String and numeric claims are accepted.
pub fn extract_claim(token: &str, claim_name: &str) -> TenancyResult<Option<String>> {
    let token = token.trim();
    let token = token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token);

    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| TenancyError::resolution_failed("bearer token is not a JWT"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| {
            TenancyError::resolution_failed(format!("token payload is not base64url: {}", e))
        })?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        TenancyError::resolution_failed(format!("token payload is not JSON: {}", e))
    })?;

    match claims.get(claim_name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(TenancyError::resolution_failed(format!(
            "claim '{}' has unsupported type: {}",
            claim_name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::naming::CustomSchemaNaming;

    fn token(payload: &str) -> String {
        format!("Bearer eyJhbGciOiJub25lIn0.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    fn resolver(config: ResolverConfig) -> TenantContextResolver {
        TenantContextResolver::new(config)
    }

    #[tokio::test]
    async fn test_header_strategy() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Header));
        let ctx = r
            .resolve(&RequestInfo::new().with_header("X-Tenant-Id", "  acme "))
            .await;

        assert_eq!(ctx.tenant_id().unwrap().as_str(), "acme");
        assert_eq!(ctx.schema_name().unwrap().as_str(), "tenant_acme");
    }

    #[tokio::test]
    async fn test_header_empty_uses_default() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Header).default_tenant("public"));
        let ctx = r
            .resolve(&RequestInfo::new().with_header("x-tenant-id", ""))
            .await;

        assert_eq!(ctx.tenant_id().unwrap().as_str(), "public");
        assert_eq!(ctx.schema_name().unwrap().as_str(), "public");
    }

    #[tokio::test]
    async fn test_custom_header_name() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Header).header_name("x-org"));
        let ctx = r.resolve(&RequestInfo::new().with_header("X-Org", "globex")).await;
        assert_eq!(ctx.tenant_id().unwrap().as_str(), "globex");
    }

    #[test]
    fn test_subdomain_extraction() {
        assert_eq!(extract_subdomain("acme.example.com", 0), Some("acme"));
        assert_eq!(extract_subdomain("acme.example.com:8080", 0), Some("acme"));
        assert_eq!(extract_subdomain("eu.acme.example.com", 1), Some("acme"));
        assert_eq!(extract_subdomain("example.com", 0), None);
        assert_eq!(extract_subdomain("localhost", 0), None);
        assert_eq!(extract_subdomain("acme.example.com", 1), None);
    }

    #[tokio::test]
    async fn test_subdomain_without_default_stays_unbound() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Subdomain));
        let ctx = r.resolve(&RequestInfo::new().with_host("example.com")).await;
        assert!(!ctx.has_tenant());
    }

    #[test]
    fn test_claim_extraction() {
        let t = token(r#"{"tid":"acme","sub":"u1"}"#);
        assert_eq!(extract_claim(&t, "tid").unwrap(), Some("acme".to_string()));
        assert_eq!(extract_claim(&t, "missing").unwrap(), None);

        let numeric = token(r#"{"tid":42}"#);
        assert_eq!(extract_claim(&numeric, "tid").unwrap(), Some("42".to_string()));
    }

    #[test]
    fn test_claim_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"tid":"abc"}"#);
        let t = format!("h.{}.s", payload);
        assert!(t.contains('='));
        assert_eq!(extract_claim(&t, "tid").unwrap(), Some("abc".to_string()));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(extract_claim("not-a-jwt", "tid").is_err());
        assert!(extract_claim("a.!!!.c", "tid").is_err());
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(extract_claim(&not_json, "tid").is_err());
        assert!(extract_claim(&token(r#"{"tid":["a"]}"#), "tid").is_err());
    }

    #[tokio::test]
    async fn test_token_strategy() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::TokenClaim).claim_name("tid"));

        let ctx = r
            .resolve(&RequestInfo::new().with_bearer_token(token(r#"{"tid":"acme"}"#)))
            .await;
        assert_eq!(ctx.tenant_id().unwrap().as_str(), "acme");

        let ctx = r
            .resolve(&RequestInfo::new().with_bearer_token("garbage"))
            .await;
        assert!(!ctx.has_tenant());
    }

    #[tokio::test]
    async fn test_malformed_token_falls_back_to_default() {
        let r = resolver(
            ResolverConfig::new(ResolutionStrategy::TokenClaim)
                .claim_name("tid")
                .default_tenant("default"),
        );
        let ctx = r
            .resolve(&RequestInfo::new().with_bearer_token("Bearer x.y"))
            .await;
        assert_eq!(ctx.schema_name().unwrap().as_str(), "default");
    }

    #[tokio::test]
    async fn test_custom_strategy() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Custom))
            .with_custom_resolver(|req: RequestInfo| async move {
                Ok(req.header("x-org-code").map(|v| v.to_uppercase()))
            });

        let ctx = r
            .resolve(&RequestInfo::new().with_header("x-org-code", "acme"))
            .await;
        assert_eq!(ctx.tenant_id().unwrap().as_str(), "ACME");
        assert_eq!(ctx.schema_name().unwrap().as_str(), "tenant_acme");
    }

    #[tokio::test]
    async fn test_custom_strategy_without_function() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Custom).default_tenant("public"));
        let ctx = r.resolve(&RequestInfo::new()).await;
        assert_eq!(ctx.tenant_id().unwrap().as_str(), "public");
    }

    #[tokio::test]
    async fn test_custom_errors_and_panics_are_swallowed() {
        let failing = resolver(ResolverConfig::new(ResolutionStrategy::Custom))
            .with_custom_resolver(|_| async { Err(TenancyError::internal("boom")) });
        assert!(!failing.resolve(&RequestInfo::new()).await.has_tenant());

        let panicking = resolver(ResolverConfig::new(ResolutionStrategy::Custom))
            .with_custom_resolver(|req: RequestInfo| async move {
                if req.header("x-tenant-id").is_none() {
                    panic!("resolver bug");
                }
                Ok(None)
            });
        assert!(!panicking.resolve(&RequestInfo::new()).await.has_tenant());
    }

    #[tokio::test]
    async fn test_custom_naming() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Header))
            .with_naming(Arc::new(CustomSchemaNaming::new(|id| format!("org_{}", id))));
        let ctx = r.resolve(&RequestInfo::new().with_header("x-tenant-id", "acme")).await;
        assert_eq!(ctx.schema_name().unwrap().as_str(), "org_acme");
    }

    #[tokio::test]
    async fn test_scope_publishes_context() {
        let r = resolver(ResolverConfig::new(ResolutionStrategy::Header));
        let request = RequestInfo::new().with_header("x-tenant-id", "acme");

        let schema = r.scope(&request, async { task_local::current_schema() }).await;
        assert_eq!(schema.unwrap().as_str(), "tenant_acme");
    }
}
