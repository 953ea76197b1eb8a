//! Outcome model shared by every gateway and mediation operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a mediation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Misconfiguration or internal error. Never retried automatically.
    General,

    /// Transient connectivity problem during attestation.
    Network,

    /// Explicit denial by the attestation service.
    Rejection,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Network => "network",
            Self::Rejection => "rejection",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic details attached to a rejection.
///
/// Both fields are empty strings when detailed rejection messaging is not
/// enabled for the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionInfo {
    /// Attestation response code.
    pub arc: String,

    /// Comma separated rejection reasons.
    pub reasons: String,
}

/// A failed mediation operation.
///
/// Only [`Failure::rejection`] attaches [`RejectionInfo`], so a rejection
/// always carries its ARC and reasons and no other kind ever does.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    kind: FailureKind,
    message: String,
    rejection: Option<RejectionInfo>,
}

impl Failure {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::General,
            message: message.into(),
            rejection: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
            rejection: None,
        }
    }

    pub fn rejection(
        message: impl Into<String>,
        arc: impl Into<String>,
        reasons: impl Into<String>,
    ) -> Self {
        Self {
            kind: FailureKind::Rejection,
            message: message.into(),
            rejection: Some(RejectionInfo {
                arc: arc.into(),
                reasons: reasons.into(),
            }),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn rejection_info(&self) -> Option<&RejectionInfo> {
        self.rejection.as_ref()
    }

    pub fn rejection_arc(&self) -> Option<&str> {
        self.rejection.as_ref().map(|r| r.arc.as_str())
    }

    pub fn rejection_reasons(&self) -> Option<&str> {
        self.rejection.as_ref().map(|r| r.reasons.as_str())
    }

    /// Whether the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Network)
    }

    /// Prefix the message with the operation context, keeping kind and
    /// rejection details.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}

/// Result type for mediation operations.
///
/// The default success payload is an optional string: a token, secure
/// string, signature or device id, or nothing.
pub type MediationResult<T = Option<String>> = Result<T, Failure>;
