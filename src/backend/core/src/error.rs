//! Error handling for the authorization core.
//!
//! Every denial class is its own variant so callers can pattern-match on the
//! failure instead of inspecting messages. All authorization failures are
//! final for the current request: only collaborator failures
//! ([`AuthzError::Repository`]) are reported as retryable.
//!
//! # Usage
//!
//! ```rust,ignore
//! use orgauth_core::error::{AuthzError, ErrorCode};
//!
//! match guard.assert_org_access(&input).await {
//!     Ok(context) => handle(context),
//!     Err(AuthzError::RbacDenied { reason }) => deny(reason),
//!     Err(err) => {
//!         err.log();
//!         return Err(err);
//!     }
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be forwarded to clients by whatever
/// transport fronts the authorization core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity (4000-4099)
    Unauthenticated,
    InvalidIdentity,

    // Membership (4100-4199)
    MembershipNotFound,
    MembershipInactive,

    // Authorization (4200-4299)
    RbacDenied,
    TenantConstraint,
    AbacDenied,
    SecurityPolicyDenied,
    MfaRequired,
    RecordNotFound,
    CrossTenantAccess,

    // Policy data (4300-4399)
    PolicyValidation,
    UnknownSelector,

    // Collaborators (2000-2099)
    RepositoryError,

    // Configuration (5000-5099)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::Unauthenticated => 4000,
            Self::InvalidIdentity => 4001,

            Self::MembershipNotFound => 4100,
            Self::MembershipInactive => 4101,

            Self::RbacDenied => 4200,
            Self::TenantConstraint => 4201,
            Self::AbacDenied => 4202,
            Self::SecurityPolicyDenied => 4203,
            Self::MfaRequired => 4204,
            Self::RecordNotFound => 4205,
            Self::CrossTenantAccess => 4206,

            Self::PolicyValidation => 4300,
            Self::UnknownSelector => 4301,

            Self::RepositoryError => 2000,

            Self::ConfigurationError => 5000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "repository",
            4000..=4099 => "authentication",
            4100..=4199 => "membership",
            4200..=4299 => "authorization",
            4300..=4399 => "policy_data",
            5000..=5099 => "configuration",
            _ => "unknown",
        }
    }

    /// Check if this error is retryable.
    ///
    /// Authorization decisions do not change on retry; only a failed
    /// collaborator call may succeed the second time.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RepositoryError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected denials and bad input
    Low,
    /// Denials that usually indicate misconfiguration or probing
    Medium,
    /// Tenant isolation violations and rejected policy writes
    High,
    /// Collaborator outages and invalid deployments
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthenticated
            | ErrorCode::RbacDenied
            | ErrorCode::AbacDenied
            | ErrorCode::MfaRequired
            | ErrorCode::RecordNotFound => Self::Low,

            ErrorCode::InvalidIdentity
            | ErrorCode::MembershipNotFound
            | ErrorCode::MembershipInactive
            | ErrorCode::TenantConstraint
            | ErrorCode::SecurityPolicyDenied => Self::Medium,

            ErrorCode::CrossTenantAccess
            | ErrorCode::PolicyValidation
            | ErrorCode::UnknownSelector => Self::High,

            ErrorCode::RepositoryError | ErrorCode::ConfigurationError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("orgId and userId are required for guard evaluation")]
    Unauthenticated,

    #[error("invalid {field} identifier supplied by {source_hint}")]
    InvalidIdentity {
        field: &'static str,
        source_hint: String,
    },

    #[error("membership not found for the requested organization")]
    MembershipNotFound,

    #[error("membership is not active for the requested organization (status: {status})")]
    MembershipInactive { status: String },

    #[error("RBAC check failed: {reason}")]
    RbacDenied { reason: String },

    #[error("tenant constraint failed: {reason}")]
    TenantConstraint { reason: String },

    #[error("ABAC denial for action {action} on resource {resource_type}")]
    AbacDenied {
        action: String,
        resource_type: String,
    },

    #[error("access denied by security policy for operation \"{operation}\" on {resource_type} {resource_id}")]
    SecurityPolicyDenied {
        operation: String,
        resource_type: String,
        resource_id: String,
    },

    #[error("MFA verification required by security policy {policy_id}")]
    MfaRequired { policy_id: String },

    #[error("invalid policy at index {index}: {reason}")]
    PolicyValidation { index: usize, reason: String },

    #[error("ABAC policy \"{policy_id}\" contains unknown {kind} selector \"{selector}\"")]
    UnknownSelector {
        policy_id: String,
        kind: &'static str,
        selector: String,
    },

    #[error("record not found")]
    RecordNotFound,

    #[error("cross-tenant access detected")]
    CrossTenantAccess,

    #[error("{operation} failed")]
    Repository {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuthzError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn rbac(reason: impl Into<String>) -> Self {
        Self::RbacDenied {
            reason: reason.into(),
        }
    }

    pub fn tenant_constraint(reason: impl Into<String>) -> Self {
        Self::TenantConstraint {
            reason: reason.into(),
        }
    }

    pub fn abac(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::AbacDenied {
            action: action.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Wrap a collaborator failure.
    pub fn repository<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Repository {
            operation,
            source: Box::new(source),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::InvalidIdentity { .. } => ErrorCode::InvalidIdentity,
            Self::MembershipNotFound => ErrorCode::MembershipNotFound,
            Self::MembershipInactive { .. } => ErrorCode::MembershipInactive,
            Self::RbacDenied { .. } => ErrorCode::RbacDenied,
            Self::TenantConstraint { .. } => ErrorCode::TenantConstraint,
            Self::AbacDenied { .. } => ErrorCode::AbacDenied,
            Self::SecurityPolicyDenied { .. } => ErrorCode::SecurityPolicyDenied,
            Self::MfaRequired { .. } => ErrorCode::MfaRequired,
            Self::PolicyValidation { .. } => ErrorCode::PolicyValidation,
            Self::UnknownSelector { .. } => ErrorCode::UnknownSelector,
            Self::RecordNotFound => ErrorCode::RecordNotFound,
            Self::CrossTenantAccess => ErrorCode::CrossTenantAccess,
            Self::Repository { .. } => ErrorCode::RepositoryError,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code())
    }

    /// True for every variant that represents a deny decision rather than a
    /// fault in the authorization machinery itself.
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Repository { .. } | Self::Configuration(_))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity and count it.
    pub fn log(&self) {
        let code = self.code();
        let category = code.category();

        counter!(
            "authz_errors_total",
            "code" => code.to_string(),
            "category" => category,
        )
        .increment(1);

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    error = %self,
                    source = ?std::error::Error::source(self),
                    "Authorization core failure"
                );
            }
            ErrorSeverity::High => {
                error!(error_code = %code, category = category, error = %self, "Authorization violation");
            }
            ErrorSeverity::Medium => {
                warn!(error_code = %code, category = category, error = %self, "Authorization denied");
            }
            ErrorSeverity::Low => {
                tracing::debug!(error_code = %code, category = category, error = %self, "Authorization denied");
            }
        }
    }
}

impl From<config::ConfigError> for AuthzError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
