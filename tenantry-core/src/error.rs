//! Error types for tenant resolution and connection pooling.
//!
//! Every error carries an [`ErrorCode`] for programmatic handling, a message,
//! and an [`ErrorContext`] describing what was being attempted.
//!
//! # Error Codes
//!
//! Error codes follow the pattern `T{category}{number}`:
//! - 1xxx: Tenant lookup errors (not found, validation transport)
//! - 2xxx: Context errors (no tenant bound, resolution failed)
//! - 3xxx: Backend errors (create, destroy, close)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use tenantry_core::{ErrorCode, TenancyError};
//!
//! let err = TenancyError::tenant_not_found("tenant_acme");
//! assert_eq!(err.code, ErrorCode::TenantNotFound);
//! assert!(err.is_not_found());
//! assert!(err.to_string().contains("tenant_acme"));
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Shared, clonable error source.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Tenant lookup errors (1xxx)
    /// No active tenant exists for the requested schema (T1001).
    TenantNotFound = 1001,
    /// The tenant validation strategy failed to answer (T1002).
    ValidationFailed = 1002,

    // Context errors (2xxx)
    /// A tenant-scoped connection was requested without a bound context (T2001).
    NoTenantContext = 2001,
    /// The tenant could not be identified from the request (T2002).
    ResolutionFailed = 2002,

    // Backend errors (3xxx)
    /// The backend failed to create a connection (T3001).
    ConnectionCreateFailed = 3001,
    /// The backend failed to destroy a connection (T3002).
    ConnectionDestroyFailed = 3002,
    /// One or more connections failed to close during shutdown (T3003).
    CloseFailed = 3003,

    // Configuration errors (7xxx)
    /// Invalid configuration (T7001).
    InvalidConfiguration = 7001,

    // Internal errors (9xxx)
    /// Internal error (T9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1001").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantNotFound => "Tenant not found",
            Self::ValidationFailed => "Tenant validation failed",
            Self::NoTenantContext => "No tenant context",
            Self::ResolutionFailed => "Tenant resolution failed",
            Self::ConnectionCreateFailed => "Connection creation failed",
            Self::ConnectionDestroyFailed => "Connection destruction failed",
            Self::CloseFailed => "Pool close failed",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The schema involved.
    pub schema: Option<String>,
    /// The tenant identifier involved.
    pub tenant_id: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur while resolving tenants or managing their connections.
#[derive(Error, Debug, Clone)]
pub struct TenancyError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<SharedSource>,
}

impl fmt::Display for TenancyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl TenancyError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.context.schema = Some(schema.into());
        self
    }

    /// Set the tenant identifier.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.context.tenant_id = Some(tenant_id.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// The requested schema has no corresponding active tenant.
    pub fn tenant_not_found(schema: impl Into<String>) -> Self {
        let schema = schema.into();
        Self::new(
            ErrorCode::TenantNotFound,
            format!("No active tenant found for schema '{}'", schema),
        )
        .with_schema(&schema)
        .with_suggestion("Check that the tenant exists, is active and is not soft-deleted")
    }

    /// The tenant validation strategy could not answer.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            format!("Tenant validation failed: {}", message.into()),
        )
    }

    /// A tenant-scoped connection was requested with no tenant bound.
    pub fn no_context() -> Self {
        Self::new(
            ErrorCode::NoTenantContext,
            "No tenant context is bound to the current task",
        )
        .with_suggestion("Run the request through the tenant resolver before asking for a tenant connection")
        .with_help("Use get_connection_for_schema() to target a schema explicitly")
    }

    /// The tenant could not be identified from a request.
    pub fn resolution_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResolutionFailed,
            format!("Tenant resolution failed: {}", message.into()),
        )
    }

    /// The backend failed to create a connection.
    pub fn connection_create(schema: impl Into<String>, message: impl Into<String>) -> Self {
        let schema = schema.into();
        Self::new(
            ErrorCode::ConnectionCreateFailed,
            format!("Failed to create connection for schema '{}': {}", schema, message.into()),
        )
        .with_schema(&schema)
        .with_suggestion("Check that the database server is running and the schema exists")
    }

    /// The backend failed to destroy a connection.
    pub fn connection_destroy(schema: impl Into<String>, message: impl Into<String>) -> Self {
        let schema = schema.into();
        Self::new(
            ErrorCode::ConnectionDestroyFailed,
            format!("Failed to destroy connection for schema '{}': {}", schema, message.into()),
        )
        .with_schema(&schema)
    }

    /// One or more connections failed to close.
    pub fn close_failed(failures: &[TenancyError]) -> Self {
        let schemas: Vec<&str> = failures
            .iter()
            .filter_map(|e| e.context.schema.as_deref())
            .collect();
        let mut err = Self::new(
            ErrorCode::CloseFailed,
            format!(
                "{} connection(s) failed to close: {}",
                failures.len(),
                schemas.join(", ")
            ),
        )
        .with_context("close_all");
        if let Some(first) = failures.first() {
            err.source = Some(Arc::new(first.clone()));
        }
        err
    }

    /// Invalid configuration.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidConfiguration,
            format!("Invalid configuration: {}", message.into()),
        )
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Internal,
            format!("Internal error: {}", message.into()),
        )
    }

    // ============== Error Checks ==============

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::TenantNotFound
    }

    /// Check if this is a missing context error.
    pub fn is_no_context(&self) -> bool {
        self.code == ErrorCode::NoTenantContext
    }

    /// Check if this error came from the connection backend.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionCreateFailed
                | ErrorCode::ConnectionDestroyFailed
                | ErrorCode::CloseFailed
        )
    }

    /// Display the full error with context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = format!("Error [{}]: {}\n", self.code.code(), self.message);

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  -> While: {}\n", op));
        }
        if let Some(ref schema) = self.context.schema {
            output.push_str(&format!("  -> Schema: {}\n", schema));
        }
        if let Some(ref tenant) = self.context.tenant_id {
            output.push_str(&format!("  -> Tenant: {}\n", tenant));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output
    }
}

impl From<serde_json::Error> for TenancyError {
    fn from(err: serde_json::Error) -> Self {
        Self::resolution_failed(err.to_string()).with_source(err)
    }
}
