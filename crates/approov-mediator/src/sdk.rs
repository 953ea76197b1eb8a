//! Capability interface over the attestation SDK.
//!
//! The SDK itself (attestation protocol, cryptography, token caching) is
//! opaque. The gateway consumes it only through [`AttestationSdk`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::SdkError;

/// Status of an SDK fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenFetchStatus {
    Success,
    NoNetwork,
    PoorNetwork,
    MitmDetected,
    Rejected,
    NoApproovService,
    BadUrl,
    UnknownUrl,
    UnprotectedUrl,
    NoNetworkPermission,
    MissingLibDependency,
    InternalError,
    UnknownKey,
    BadKey,
    BadPayload,
    Disabled,
}

impl TokenFetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoNetwork => "NO_NETWORK",
            Self::PoorNetwork => "POOR_NETWORK",
            Self::MitmDetected => "MITM_DETECTED",
            Self::Rejected => "REJECTED",
            Self::NoApproovService => "NO_APPROOV_SERVICE",
            Self::BadUrl => "BAD_URL",
            Self::UnknownUrl => "UNKNOWN_URL",
            Self::UnprotectedUrl => "UNPROTECTED_URL",
            Self::NoNetworkPermission => "NO_NETWORK_PERMISSION",
            Self::MissingLibDependency => "MISSING_LIB_DEPENDENCY",
            Self::InternalError => "INTERNAL_ERROR",
            Self::UnknownKey => "UNKNOWN_KEY",
            Self::BadKey => "BAD_KEY",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::Disabled => "DISABLED",
        }
    }

    /// Statuses caused by network conditions, where a retry may succeed.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NoNetwork | Self::PoorNetwork | Self::MitmDetected)
    }
}

impl fmt::Display for TokenFetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an SDK fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenFetchResult {
    pub status: TokenFetchStatus,

    /// Attestation token or custom JWT; empty when none was issued.
    pub token: String,

    /// Secure string value for secure string fetches.
    pub secure_string: Option<String>,

    /// Attestation response code for rejections, empty if not enabled.
    pub arc: String,

    /// Rejection reasons, empty if not enabled.
    pub rejection_reasons: String,

    /// Set when the fetch delivered a new dynamic configuration.
    pub config_changed: bool,

    /// A form of the token that is safe to log.
    pub loggable_token: String,
}

impl TokenFetchResult {
    pub fn new(status: TokenFetchStatus) -> Self {
        Self {
            status,
            token: String::new(),
            secure_string: None,
            arc: String::new(),
            rejection_reasons: String::new(),
            config_changed: false,
            loggable_token: String::new(),
        }
    }

    pub fn success_token(token: impl Into<String>) -> Self {
        Self::new(TokenFetchStatus::Success).with_token(token)
    }

    pub fn success_secure_string(value: impl Into<String>) -> Self {
        Self::new(TokenFetchStatus::Success).with_secure_string(value)
    }

    pub fn rejected(arc: impl Into<String>, reasons: impl Into<String>) -> Self {
        let mut result = Self::new(TokenFetchStatus::Rejected);
        result.arc = arc.into();
        result.rejection_reasons = reasons.into();
        result
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_secure_string(mut self, value: impl Into<String>) -> Self {
        self.secure_string = Some(value.into());
        self
    }

    pub fn with_loggable_token(mut self, loggable: impl Into<String>) -> Self {
        self.loggable_token = loggable.into();
        self
    }

    pub fn with_config_changed(mut self) -> Self {
        self.config_changed = true;
        self
    }
}

// Hand-written so tokens and secure strings never end up in debug output.
impl fmt::Debug for TokenFetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFetchResult")
            .field("status", &self.status)
            .field("loggable_token", &self.loggable_token)
            .field("has_secure_string", &self.secure_string.is_some())
            .field("arc", &self.arc)
            .field("rejection_reasons", &self.rejection_reasons)
            .field("config_changed", &self.config_changed)
            .finish()
    }
}

/// Pins keyed by host; `"*"` holds managed trust root pins.
pub type PinMap = HashMap<String, Vec<String>>;

/// Attestation SDK capability.
///
/// Fetch methods may block on network I/O inside the SDK. Implementations
/// must be usable from many request flows at once.
#[async_trait]
pub trait AttestationSdk: Send + Sync {
    /// Initialize with the initial configuration and any stored update.
    fn initialize(
        &self,
        initial_config: &str,
        update_config: Option<&str>,
        comment: Option<&str>,
    ) -> Result<(), SdkError>;

    /// Record a property identifying the integration.
    fn set_user_property(&self, property: &str) -> Result<(), SdkError>;

    /// Fetch an attestation token for the given URL.
    async fn fetch_token(&self, url: &str) -> Result<TokenFetchResult, SdkError>;

    /// Fetch a secure string, optionally defining a new value first.
    async fn fetch_secure_string(
        &self,
        key: &str,
        new_def: Option<&str>,
    ) -> Result<TokenFetchResult, SdkError>;

    /// Fetch a custom JWT carrying the marshaled JSON payload claims.
    async fn fetch_custom_jwt(&self, payload: &str) -> Result<TokenFetchResult, SdkError>;

    /// Sign a message with the account message signing key.
    fn get_message_signature(&self, message: &str) -> Result<Option<String>, SdkError>;

    fn get_device_id(&self) -> Result<String, SdkError>;

    /// Set the base64 SHA-256 hash carried in the `pay` claim of new tokens.
    fn set_data_hash_in_token(&self, hash: &str) -> Result<(), SdkError>;

    /// Current dynamic configuration, clearing the changed state.
    fn fetch_config(&self) -> Option<String>;

    fn get_pins(&self, pin_type: &str) -> Result<PinMap, SdkError>;
}
