//! Unit failures and their classification
//!
//! A provider unit reports failure through [`UnitError`]. The collector maps
//! each error to a [`FailureClass`] and decides whether the run continues.
//! Vendor errors are classified by their structured code only, never by
//! matching on message text.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Maximum length of an upstream message kept in warnings and logs
const MAX_MESSAGE_LENGTH: usize = 200;

/// Vendor codes meaning the capability does not exist for this
/// account, region or partition
const ENVIRONMENT_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "AuthorizationError",
    "EndpointConnectionError",
    "InvalidAction",
    "OptInRequired",
    "SubscriptionRequiredException",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
    "UnsupportedOperation",
];

/// Vendor codes for transient or malformed upstream responses
const UPSTREAM_SHAPE_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "InvalidParameterValue",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
    "ValidationException",
];

/// How the collector treats a unit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Capability missing here; skipped, informational
    Environment,
    /// Unexpected upstream response; skipped with a warning
    UpstreamShape,
    /// Anything else; aborts the run
    Unclassified,
}

impl FailureClass {
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureClass::Unclassified)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureClass::Environment => "not available",
            FailureClass::UpstreamShape => "unexpected response",
            FailureClass::Unclassified => "unclassified",
        };
        f.write_str(label)
    }
}

/// Error returned by [`ProviderUnit::produce_nodes`](super::ProviderUnit::produce_nodes)
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("service {service} is not available: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("upstream error {code}: {message}")]
    Upstream { code: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UnitError {
    pub fn upstream(code: impl Into<String>, message: impl Into<String>) -> Self {
        UnitError::Upstream {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            UnitError::Unavailable { .. } => FailureClass::Environment,
            UnitError::UnexpectedResponse(_) => FailureClass::UpstreamShape,
            UnitError::Upstream { code, .. } => classify_code(code),
            UnitError::Other(_) => FailureClass::Unclassified,
        }
    }

    /// Single-line, truncated description safe to surface to users
    pub fn describe(&self) -> String {
        sanitize(&self.to_string())
    }
}

/// Classify a vendor error code by exact match
pub fn classify_code(code: &str) -> FailureClass {
    if ENVIRONMENT_CODES.contains(&code) {
        FailureClass::Environment
    } else if UPSTREAM_SHAPE_CODES.contains(&code) {
        FailureClass::UpstreamShape
    } else {
        FailureClass::Unclassified
    }
}

fn sanitize(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    let total = cleaned.chars().count();
    if total > MAX_MESSAGE_LENGTH {
        let head: String = cleaned.chars().take(MAX_MESSAGE_LENGTH).collect();
        format!("{}... [truncated, {} chars total]", head, total)
    } else {
        cleaned
    }
}

/// Registration problems
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unit {unit} is registered twice in domain {domain}")]
    DuplicateUnit { domain: String, unit: String },

    #[error("unknown domain {0}")]
    UnknownDomain(String),
}

/// Error returned by a collection run
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("unit {unit} failed: {source}")]
    Fatal {
        unit: String,
        #[source]
        source: UnitError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
