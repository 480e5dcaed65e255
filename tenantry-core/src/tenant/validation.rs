//! Tenant validation strategies.
//!
//! The pool manager consults a [`TenantValidator`] before creating a
//! connection and to learn which entities a tenant has enabled. Three
//! implementations ship with the crate:
//!
//! - [`LocalTenantValidator`] reads a [`TenantStore`] directly.
//! - [`RemoteTenantValidator`] asks a tenant service over HTTP.
//! - [`CustomTenantValidator`] delegates to host-supplied async functions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::record::{TenantRecord, TenantStore};
use crate::error::{TenancyError, TenancyResult};

/// Checks whether tenants exist and reads their records.
#[async_trait]
pub trait TenantValidator: Send + Sync {
    /// Whether an active, non-deleted tenant exists for `code`.
    async fn validate_tenant_exists(&self, code: &str) -> TenancyResult<bool> {
        Ok(self
            .find_by_code(code)
            .await?
            .is_some_and(|record| record.is_active()))
    }

    /// Find a non-deleted tenant record by code.
    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>>;
}

/// Validates against a local tenant store.
#[derive(Clone)]
pub struct LocalTenantValidator {
    store: Arc<dyn TenantStore>,
}

impl LocalTenantValidator {
    /// Create a validator over a store.
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for LocalTenantValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTenantValidator").finish()
    }
}

#[async_trait]
impl TenantValidator for LocalTenantValidator {
    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>> {
        Ok(self
            .store
            .find_by_code(code)
            .await?
            .filter(|record| !record.is_deleted()))
    }
}

/// Validates by asking a remote tenant service.
///
/// Issues `GET {base_url}/tenants/{key}`. A `404` means the tenant does not
/// exist; any other non-success status is a [`ValidationFailed`] error.
///
/// The pool manager looks tenants up by schema name. By default that name is
/// sent as is; a service keyed by tenant code needs
/// [`with_schema_prefix`](Self::with_schema_prefix) or
/// [`with_key_mapping`](Self::with_key_mapping) to turn it back into a code.
///
/// [`ValidationFailed`]: crate::ErrorCode::ValidationFailed
#[derive(Clone)]
pub struct RemoteTenantValidator {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
    key_mapping: Option<KeyMapping>,
}

type KeyMapping = Arc<dyn Fn(&str) -> String + Send + Sync>;

impl std::fmt::Debug for RemoteTenantValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTenantValidator")
            .field("base_url", &self.base_url.as_str())
            .field("has_bearer_token", &self.bearer_token.is_some())
            .field("has_key_mapping", &self.key_mapping.is_some())
            .finish()
    }
}

impl RemoteTenantValidator {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a validator for the service at `base_url`.
    pub fn new(base_url: &str) -> TenancyResult<Self> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    /// Create a validator with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> TenancyResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TenancyError::config(format!("invalid tenant service URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TenancyError::config(format!(
                "tenant service URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TenancyError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            bearer_token: None,
            key_mapping: None,
        })
    }

    /// Authenticate requests with a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Map lookup keys before they are sent to the service.
    pub fn with_key_mapping<F>(mut self, mapping: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.key_mapping = Some(Arc::new(mapping));
        self
    }

    /// Strip a schema prefix from lookup keys, so `tenant_acme` is sent as
    /// `acme`. Keys without the prefix are sent unchanged.
    ///
    /// Pair with [`DefaultSchemaNaming::PREFIX`] when tenant codes are already
    /// lower-case and alphanumeric.
    ///
    /// [`DefaultSchemaNaming::PREFIX`]: crate::tenant::DefaultSchemaNaming::PREFIX
    pub fn with_schema_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with_key_mapping(move |key| {
            key.strip_prefix(prefix.as_str()).unwrap_or(key).to_string()
        })
    }

    /// The code sent to the service for a lookup key.
    pub fn tenant_code(&self, key: &str) -> String {
        match &self.key_mapping {
            Some(mapping) => mapping(key),
            None => key.to_string(),
        }
    }

    /// The URL queried for a lookup key.
    pub fn tenant_url(&self, key: &str) -> TenancyResult<Url> {
        let code = self.tenant_code(key);
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TenancyError::internal("tenant service URL cannot be a base"))?
            .pop_if_empty()
            .extend(["tenants", code.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl TenantValidator for RemoteTenantValidator {
    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>> {
        let url = self.tenant_url(code)?;
        debug!(url = %url, "Looking up tenant remotely");

        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            TenancyError::validation_failed(e.to_string())
                .with_tenant(code)
                .with_source(e)
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record: TenantRecord = response.json().await.map_err(|e| {
                    TenancyError::validation_failed(format!("malformed tenant record: {}", e))
                        .with_tenant(code)
                        .with_source(e)
                })?;
                Ok(Some(record).filter(|r| !r.is_deleted()))
            }
            status => Err(TenancyError::validation_failed(format!(
                "tenant service answered {}",
                status
            ))
            .with_tenant(code)),
        }
    }
}

/// Boxed future returned by custom validation functions.
pub type ValidatorFuture<T> = Pin<Box<dyn Future<Output = TenancyResult<T>> + Send>>;

type FindFn = Arc<dyn Fn(String) -> ValidatorFuture<Option<TenantRecord>> + Send + Sync>;
type ExistsFn = Arc<dyn Fn(String) -> ValidatorFuture<bool> + Send + Sync>;

/// A validator using host-supplied callbacks.
///
/// When used by the pool manager, the callbacks receive schema names.
#[derive(Clone)]
pub struct CustomTenantValidator {
    find_fn: FindFn,
    exists_fn: Option<ExistsFn>,
}

impl CustomTenantValidator {
    /// Create a validator from a lookup callback. Existence is derived from it.
    pub fn new<F, Fut>(find: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TenancyResult<Option<TenantRecord>>> + Send + 'static,
    {
        Self {
            find_fn: Arc::new(move |code| Box::pin(find(code))),
            exists_fn: None,
        }
    }

    /// Use a dedicated existence check instead of deriving it from lookups.
    pub fn with_exists<F, Fut>(mut self, exists: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TenancyResult<bool>> + Send + 'static,
    {
        self.exists_fn = Some(Arc::new(move |code| Box::pin(exists(code))));
        self
    }
}

impl std::fmt::Debug for CustomTenantValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomTenantValidator")
            .field("has_exists_fn", &self.exists_fn.is_some())
            .finish()
    }
}

#[async_trait]
impl TenantValidator for CustomTenantValidator {
    async fn validate_tenant_exists(&self, code: &str) -> TenancyResult<bool> {
        match &self.exists_fn {
            Some(exists) => exists(code.to_string()).await,
            None => Ok(self
                .find_by_code(code)
                .await?
                .is_some_and(|record| record.is_active())),
        }
    }

    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>> {
        (self.find_fn)(code.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::record::{InMemoryTenantStore, TenantStatus};
    use chrono::Utc;

    fn store() -> Arc<InMemoryTenantStore> {
        let store = InMemoryTenantStore::new();
        store.insert(TenantRecord::new("1", "acme"));
        store.insert(TenantRecord::new("2", "globex").with_status(TenantStatus::Inactive));
        store.insert(TenantRecord::new("3", "initech").deleted(Utc::now()));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_local_validator() {
        let validator = LocalTenantValidator::new(store());

        assert!(validator.validate_tenant_exists("acme").await.unwrap());
        assert!(!validator.validate_tenant_exists("globex").await.unwrap());
        assert!(!validator.validate_tenant_exists("initech").await.unwrap());
        assert!(!validator.validate_tenant_exists("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_validator_hides_deleted_records() {
        let validator = LocalTenantValidator::new(store());

        assert!(validator.find_by_code("globex").await.unwrap().is_some());
        assert!(validator.find_by_code("initech").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_validator_derives_existence() {
        let validator = CustomTenantValidator::new(|code| async move {
            Ok((code == "acme").then(|| TenantRecord::new("1", code)))
        });

        assert!(validator.validate_tenant_exists("acme").await.unwrap());
        assert!(!validator.validate_tenant_exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_validator_with_exists() {
        let validator = CustomTenantValidator::new(|_| async { Ok(None) })
            .with_exists(|code| async move { Ok(code.starts_with("tenant_")) });

        assert!(validator.validate_tenant_exists("tenant_acme").await.unwrap());
        assert!(!validator.validate_tenant_exists("acme").await.unwrap());
    }

    #[test]
    fn test_remote_url_building() {
        let validator = RemoteTenantValidator::new("http://tenants.internal/api/").unwrap();
        let url = validator.tenant_url("acme corp").unwrap();
        assert_eq!(url.as_str(), "http://tenants.internal/api/tenants/acme%20corp");

        let validator = RemoteTenantValidator::new("http://tenants.internal").unwrap();
        let url = validator.tenant_url("acme").unwrap();
        assert_eq!(url.as_str(), "http://tenants.internal/tenants/acme");
    }

    #[test]
    fn test_remote_schema_prefix() {
        let validator = RemoteTenantValidator::new("http://tenants.internal")
            .unwrap()
            .with_schema_prefix("tenant_");
        assert_eq!(validator.tenant_code("tenant_acme"), "acme");
        assert_eq!(validator.tenant_code("acme"), "acme");
        assert_eq!(
            validator.tenant_url("tenant_acme").unwrap().as_str(),
            "http://tenants.internal/tenants/acme"
        );
    }

    /// Serve a small tenant service on an ephemeral port.
    async fn tenant_service() -> String {
        use axum::extract::Path;
        use axum::http::{HeaderMap, StatusCode as HttpStatus};
        use axum::response::{IntoResponse, Response};
        use axum::routing::get;
        use axum::{Json, Router};

        async fn lookup(Path(code): Path<String>, headers: HeaderMap) -> Response {
            if headers
                .get("authorization")
                .is_some_and(|v| v.as_bytes() != b"Bearer secret")
            {
                return HttpStatus::UNAUTHORIZED.into_response();
            }
            match code.as_str() {
                "acme" => Json(TenantRecord::new("1", "acme").with_entities(["billing"]))
                    .into_response(),
                "globex" => {
                    let record = TenantRecord::new("2", "globex").with_status(TenantStatus::Suspended);
                    Json(record).into_response()
                }
                "initech" => Json(TenantRecord::new("3", "initech").deleted(Utc::now()))
                    .into_response(),
                "broken" => HttpStatus::INTERNAL_SERVER_ERROR.into_response(),
                "garbled" => "not json".into_response(),
                _ => HttpStatus::NOT_FOUND.into_response(),
            }
        }

        let app = Router::new().route("/api/tenants/{code}", get(lookup));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_remote_find_by_code() {
        let base = tenant_service().await;
        let validator = RemoteTenantValidator::new(&base)
            .unwrap()
            .with_schema_prefix("tenant_");

        let acme = validator.find_by_code("tenant_acme").await.unwrap().unwrap();
        assert_eq!(acme.code, "acme");
        assert_eq!(acme.enabled_entities, Some(vec!["billing".to_string()]));

        assert!(validator.find_by_code("tenant_globex").await.unwrap().is_some());
        assert!(validator.find_by_code("tenant_initech").await.unwrap().is_none());
        assert!(validator.find_by_code("tenant_unknown").await.unwrap().is_none());

        assert!(validator.validate_tenant_exists("tenant_acme").await.unwrap());
        assert!(!validator.validate_tenant_exists("tenant_globex").await.unwrap());
        assert!(!validator.validate_tenant_exists("tenant_initech").await.unwrap());
        assert!(!validator.validate_tenant_exists("tenant_unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_validator_gates_pool() {
        use crate::pool::TenantPoolManager;
        use crate::testing::MemoryBackend;
        use crate::tenant::DefaultSchemaNaming;

        let base = tenant_service().await;
        let validator = RemoteTenantValidator::new(&base)
            .unwrap()
            .with_schema_prefix(DefaultSchemaNaming::PREFIX);
        let pool = TenantPoolManager::builder(MemoryBackend::new())
            .validator(validator)
            .config(crate::config::PoolConfig::new().enable_cleanup(false))
            .build()
            .unwrap();

        let conn = pool.get_connection_for_schema("tenant_acme").await.unwrap();
        assert_eq!(conn.schema().as_str(), "tenant_acme");

        let err = pool.get_connection_for_schema("tenant_globex").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remote_service_errors() {
        let base = tenant_service().await;
        let validator = RemoteTenantValidator::new(&base).unwrap();

        for code in ["broken", "garbled"] {
            let err = validator.find_by_code(code).await.unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::ValidationFailed, "code {}", code);
            assert_eq!(err.context.tenant_id.as_deref(), Some(code));
        }

        let unauthorized = RemoteTenantValidator::new(&base)
            .unwrap()
            .with_bearer_token("wrong");
        assert!(unauthorized.find_by_code("acme").await.is_err());

        let authorized = RemoteTenantValidator::new(&base)
            .unwrap()
            .with_bearer_token("secret");
        assert!(authorized.find_by_code("acme").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remote_unreachable_service() {
        let validator =
            RemoteTenantValidator::with_timeout("http://127.0.0.1:1", Duration::from_millis(500))
                .unwrap();
        let err = validator.find_by_code("acme").await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ValidationFailed);
    }

    #[test]
    fn test_remote_rejects_bad_url() {
        assert!(RemoteTenantValidator::new("not a url").is_err());
        assert!(RemoteTenantValidator::new("mailto:ops@example.com").is_err());
    }
}
