//! Integration tests for tenant context resolution.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pretty_assertions::assert_eq;
use serde_json::json;
use tenantry::TenancyError;
use tenantry::config::{ResolutionStrategy, ResolverConfig};
use tenantry::tenant::{CustomSchemaNaming, RequestInfo, TenantContextResolver};

fn token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

async fn schema_for(resolver: &TenantContextResolver, request: &RequestInfo) -> Option<String> {
    resolver
        .resolve(request)
        .await
        .schema_name()
        .map(|s| s.to_string())
}

#[tokio::test]
async fn test_header_strategy() {
    let resolver = TenantContextResolver::new(
        ResolverConfig::new(ResolutionStrategy::Header).header_name("X-Org"),
    );

    let request = RequestInfo::new().with_header("x-org", " Initech ");
    let ctx = resolver.resolve(&request).await;
    assert_eq!(ctx.tenant_id().map(|id| id.as_str()), Some("Initech"));
    assert_eq!(ctx.schema_name().map(|s| s.as_str()), Some("tenant_initech"));

    let blank = RequestInfo::new().with_header("x-org", "   ");
    assert_eq!(schema_for(&resolver, &blank).await, None);
}

#[tokio::test]
async fn test_subdomain_strategy() {
    let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Subdomain));

    let cases = [
        ("acme.example.com", Some("tenant_acme")),
        ("acme.eu.example.com:8443", Some("tenant_acme")),
        ("example.com", None),
        ("localhost", None),
    ];
    for (host, expected) in cases {
        let request = RequestInfo::new().with_host(host);
        assert_eq!(
            schema_for(&resolver, &request).await.as_deref(),
            expected,
            "host {host}"
        );
    }

    let second = TenantContextResolver::new(
        ResolverConfig::new(ResolutionStrategy::Subdomain).subdomain_position(1),
    );
    let request = RequestInfo::new().with_header("Host", "api.globex.example.com");
    assert_eq!(
        schema_for(&second, &request).await.as_deref(),
        Some("tenant_globex")
    );
}

#[tokio::test]
async fn test_token_claim_strategy() {
    let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::TokenClaim));

    let request =
        RequestInfo::new().with_bearer_token(token(json!({ "sub": "u1", "tenantId": "acme" })));
    assert_eq!(
        schema_for(&resolver, &request).await.as_deref(),
        Some("tenant_acme")
    );

    let numeric = RequestInfo::new().with_header(
        "Authorization",
        format!("Bearer {}", token(json!({ "tenantId": 42 }))),
    );
    assert_eq!(
        schema_for(&resolver, &numeric).await.as_deref(),
        Some("tenant_42")
    );
}

#[tokio::test]
async fn test_malformed_token_resolves_nothing() {
    let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::TokenClaim));

    for bad in ["not-a-token", "a.%%%.c", "a.b"] {
        let request = RequestInfo::new().with_bearer_token(bad);
        assert!(!resolver.resolve(&request).await.has_tenant(), "token {bad}");
    }
}

#[tokio::test]
async fn test_default_tenant_fallback() {
    let resolver = TenantContextResolver::new(
        ResolverConfig::new(ResolutionStrategy::TokenClaim).default_tenant("public"),
    );

    let ctx = resolver.resolve(&RequestInfo::new()).await;
    assert_eq!(ctx.schema_name().map(|s| s.as_str()), Some("public"));

    let request = RequestInfo::new().with_bearer_token("garbage");
    assert_eq!(
        schema_for(&resolver, &request).await.as_deref(),
        Some("public")
    );
}

#[tokio::test]
async fn test_custom_strategy() {
    let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Custom))
        .with_custom_resolver(|request: RequestInfo| async move {
            match request.header("x-api-key") {
                Some("key-1") => Ok(Some("acme".to_string())),
                Some(_) => Err(TenancyError::resolution_failed("unknown api key")),
                None => Ok(None),
            }
        });

    let known = RequestInfo::new().with_header("X-Api-Key", "key-1");
    assert_eq!(
        schema_for(&resolver, &known).await.as_deref(),
        Some("tenant_acme")
    );

    let unknown = RequestInfo::new().with_header("X-Api-Key", "key-2");
    assert!(!resolver.resolve(&unknown).await.has_tenant());
}

#[tokio::test]
async fn test_custom_strategy_without_function() {
    let resolver = TenantContextResolver::new(
        ResolverConfig::new(ResolutionStrategy::Custom).default_tenant("fallback"),
    );
    assert_eq!(
        schema_for(&resolver, &RequestInfo::new()).await.as_deref(),
        Some("tenant_fallback")
    );
}

#[tokio::test]
async fn test_custom_naming() {
    let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Header))
        .with_naming(Arc::new(CustomSchemaNaming::new(|id| {
            format!("org_{}", id.to_uppercase())
        })));

    let request = RequestInfo::new().with_header("x-tenant-id", "acme");
    assert_eq!(
        schema_for(&resolver, &request).await.as_deref(),
        Some("org_ACME")
    );
}
