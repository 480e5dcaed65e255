//! A framework-neutral view of an inbound request.

use std::collections::HashMap;

/// The parts of a request the resolver looks at.
///
/// Header names are stored lower-cased. Framework integrations build this
/// from their native request type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    headers: HashMap<String, String>,
    host: Option<String>,
    bearer_token: Option<String>,
}

impl RequestInfo {
    /// Create an empty request view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Later values for the same name replace earlier ones.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Add a header in place.
    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the bearer token (with or without the `Bearer ` prefix).
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Look up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(value) => Some(value.as_str()),
            None => self
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
        }
    }

    /// All headers, keyed by lower-cased name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The request host, falling back to the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().or_else(|| self.header("host"))
    }

    /// The bearer token, falling back to the `Authorization` header.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token
            .as_deref()
            .or_else(|| self.header("authorization"))
    }
}
