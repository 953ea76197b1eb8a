//! Attestation gateway.
//!
//! Public API over the attestation SDK. Every operation returns a
//! [`MediationResult`]; native SDK errors and statuses are translated in
//! `call.rs` and nowhere else.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::MediationConfig;
use crate::result::{Failure, MediationResult};
use crate::sdk::{AttestationSdk, TokenFetchStatus};
use crate::types::GatewayConfig;

mod call;
mod helpers;
mod pins;

pub use pins::PinSet;

/// URL used when warming up a token.
const PREFETCH_URL: &str = "approov.io";

/// Key used by precheck; it is not expected to exist.
const PRECHECK_KEY: &str = "precheck-dummy-key";

/// Pin type requested from the SDK.
const PIN_TYPE: &str = "public-key-sha256";

/// Outcome of a token fetch made on behalf of an outbound request.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum TokenDecision {
    /// A token was issued.
    Token(String),

    /// The attestation service does not require a token for this URL.
    NotRequired(TokenFetchStatus),
}

struct Inner {
    sdk: Arc<dyn AttestationSdk>,
    settings: GatewayConfig,
    config: Arc<MediationConfig>,
    // Configuration string the SDK was initialized with.
    initial_config: Mutex<Option<String>>,
    // Last data hash handed to the SDK.
    data_hash: Mutex<Option<String>>,
    // Held from setting a request's data hash until its token is fetched.
    token_binding: tokio::sync::Mutex<()>,
}

/// Gateway over the attestation SDK.
///
/// Cheap to clone; clones share the SDK, the configuration store and the
/// initialization state.
#[derive(Clone)]
pub struct AttestationGateway {
    inner: Arc<Inner>,
}

impl fmt::Debug for AttestationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationGateway")
            .field("settings", &self.inner.settings)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl AttestationGateway {
    pub fn new(sdk: Arc<dyn AttestationSdk>, settings: GatewayConfig) -> Self {
        Self::with_config(sdk, settings, Arc::new(MediationConfig::new()))
    }

    pub fn with_config(
        sdk: Arc<dyn AttestationSdk>,
        settings: GatewayConfig,
        config: Arc<MediationConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sdk,
                settings,
                config,
                initial_config: Mutex::new(None),
                data_hash: Mutex::new(None),
                token_binding: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The shared mediation configuration store.
    pub fn config(&self) -> &Arc<MediationConfig> {
        &self.inner.config
    }

    pub fn settings(&self) -> &GatewayConfig {
        &self.inner.settings
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.initial_config).is_some()
    }

    /// Initialize the SDK.
    ///
    /// An empty config enables the gateway without initializing the SDK.
    /// Repeating the call with the same config succeeds; a different config
    /// is rejected and leaves the current state untouched.
    pub fn initialize(&self, config: &str) -> MediationResult {
        let mut initial = lock(&self.inner.initial_config);
        if let Some(existing) = initial.as_deref() {
            if existing != config {
                return Err(Failure::general(
                    "attempt to reinitialize with a different config",
                ));
            }
            debug!("already initialized");
            return Ok(None);
        }

        if !config.is_empty() {
            let update =
                helpers::read_update_config(self.inner.settings.update_config_path.as_deref());
            self.inner
                .sdk
                .initialize(config, update.as_deref(), None)
                .map_err(|e| Failure::general(format!("initialization failed {}", e)))?;
        }

        if let Err(e) = self
            .inner
            .sdk
            .set_user_property(&self.inner.settings.user_property)
        {
            warn!(error = %e, "could not set user property");
        }

        *initial = Some(config.to_string());
        debug!("initialized");
        Ok(None)
    }

    pub(crate) fn ensure_initialized(&self, op: &str) -> MediationResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Failure::general(format!("{}: not initialized", op)))
        }
    }

    /// Start a token fetch in the background so later fetches can use
    /// cached results.
    ///
    /// Returns once the fetch is scheduled; its outcome is only logged.
    pub fn prefetch(&self) -> MediationResult {
        self.ensure_initialized("prefetch")?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Failure::general("prefetch: no async runtime available"))?;

        let gateway = self.clone();
        runtime.spawn(async move {
            match gateway.run_prefetch().await {
                Ok(()) => debug!("prefetch completed"),
                Err(failure) => debug!(
                    kind = %failure.kind(),
                    message = failure.message(),
                    "prefetch did not complete"
                ),
            }
        });
        Ok(None)
    }

    async fn run_prefetch(&self) -> MediationResult<()> {
        let sdk = &self.inner.sdk;
        let result = self
            .fetch_with_policy("prefetch", || sdk.fetch_token(PREFETCH_URL))
            .await?;
        call::expect_status(
            "prefetch",
            &result,
            &[TokenFetchStatus::Success, TokenFetchStatus::UnknownUrl],
        )
    }

    /// Check whether the app would pass attestation, without obtaining a
    /// usable token.
    pub async fn precheck(&self) -> MediationResult {
        self.ensure_initialized("precheck")?;
        let sdk = &self.inner.sdk;
        let result = self
            .fetch_with_policy("precheck", || sdk.fetch_secure_string(PRECHECK_KEY, None))
            .await?;
        call::expect_status(
            "precheck",
            &result,
            &[TokenFetchStatus::Success, TokenFetchStatus::UnknownKey],
        )?;
        Ok(None)
    }

    pub fn get_device_id(&self) -> MediationResult {
        self.ensure_initialized("getDeviceID")?;
        let device_id = self
            .inner
            .sdk
            .get_device_id()
            .map_err(|e| Failure::general(format!("getDeviceID {}", e)))?;
        debug!(device_id = %device_id, "getDeviceID");
        Ok(Some(device_id))
    }

    /// Bind a hash of `data` into subsequently fetched tokens.
    ///
    /// Only the base64 SHA-256 hash leaves this process. Setting the same
    /// data again does not force a new token.
    pub fn set_data_hash_in_token(&self, data: &str) -> MediationResult {
        self.ensure_initialized("setDataHashInToken")?;
        let hash = helpers::data_hash(data);

        let mut current = lock(&self.inner.data_hash);
        if current.as_deref() == Some(hash.as_str()) {
            debug!("setDataHashInToken: unchanged");
            return Ok(None);
        }

        self.inner
            .sdk
            .set_data_hash_in_token(&hash)
            .map_err(|e| Failure::general(format!("setDataHashInToken {}", e)))?;
        *current = Some(hash);
        debug!("setDataHashInToken");
        Ok(None)
    }

    /// Fetch an attestation token for `url`.
    pub async fn fetch_token(&self, url: &str) -> MediationResult {
        self.ensure_initialized("fetchToken")?;
        let sdk = &self.inner.sdk;
        let result = self
            .fetch_with_policy("fetchToken", || sdk.fetch_token(url))
            .await?;
        debug!(url, token = %result.loggable_token, status = %result.status, "fetchToken");
        call::expect_status("fetchToken", &result, &[TokenFetchStatus::Success])?;
        Ok(Some(result.token))
    }

    /// Sign `message` with the account message signing key.
    pub fn get_message_signature(&self, message: &str) -> MediationResult {
        self.ensure_initialized("getMessageSignature")?;
        let signature = self
            .inner
            .sdk
            .get_message_signature(message)
            .map_err(|e| Failure::general(format!("getMessageSignature {}", e)))?;
        debug!("getMessageSignature");
        match signature {
            Some(signature) => Ok(Some(signature)),
            None => Err(Failure::general("no signature available")),
        }
    }

    /// Fetch the secure string for `key`.
    ///
    /// With `new_def` the value is defined (or, when empty, removed) first.
    /// An unknown key is a success without a value. The returned value
    /// should not be cached by the caller.
    pub async fn fetch_secure_string(&self, key: &str, new_def: Option<&str>) -> MediationResult {
        self.ensure_initialized("fetchSecureString")?;
        let kind = if new_def.is_some() {
            "definition"
        } else {
            "lookup"
        };
        let op = format!("fetchSecureString {} for {}", kind, key);

        let sdk = &self.inner.sdk;
        let result = self
            .fetch_with_policy(&op, || sdk.fetch_secure_string(key, new_def))
            .await?;
        debug!(key, kind, status = %result.status, "fetchSecureString");
        call::expect_status(
            &op,
            &result,
            &[TokenFetchStatus::Success, TokenFetchStatus::UnknownKey],
        )?;
        Ok(result.secure_string)
    }

    /// Fetch a custom JWT for the marshaled JSON claims in `payload`.
    pub async fn fetch_custom_jwt(&self, payload: &str) -> MediationResult {
        self.ensure_initialized("fetchCustomJWT")?;
        let sdk = &self.inner.sdk;
        let result = self
            .fetch_with_policy("fetchCustomJWT", || sdk.fetch_custom_jwt(payload))
            .await?;
        debug!(status = %result.status, "fetchCustomJWT");
        call::expect_status("fetchCustomJWT", &result, &[TokenFetchStatus::Success])?;
        Ok(Some(result.token))
    }

    /// Current public-key pins for `host`.
    pub fn pins_for_host(&self, host: &str) -> MediationResult<PinSet> {
        self.ensure_initialized("getPins")?;
        let all = self
            .inner
            .sdk
            .get_pins(PIN_TYPE)
            .map_err(|e| Failure::general(format!("getPins {}", e)))?;
        Ok(PinSet::for_host(&all, host))
    }

    /// Token fetch for an outbound request, keeping the statuses that mean
    /// no token is required.
    ///
    /// `binding` is `Some` when a binding header is configured and carries
    /// the request's value for it, if present. The data hash is then set
    /// and the token fetched without another bound request in between.
    pub(crate) async fn request_token(
        &self,
        url: &str,
        binding: Option<Option<String>>,
    ) -> MediationResult<TokenDecision> {
        let _bound = match binding {
            Some(value) => {
                let guard = self.inner.token_binding.lock().await;
                if let Some(value) = value {
                    self.set_data_hash_in_token(&value)?;
                }
                Some(guard)
            }
            None => None,
        };

        let op = "token fetch";
        let sdk = &self.inner.sdk;
        let result = self.fetch_with_policy(op, || sdk.fetch_token(url)).await?;
        debug!(url, token = %result.loggable_token, status = %result.status, "token for request");

        match result.status {
            TokenFetchStatus::Success => Ok(TokenDecision::Token(result.token)),
            TokenFetchStatus::NoApproovService
            | TokenFetchStatus::UnknownUrl
            | TokenFetchStatus::UnprotectedUrl => Ok(TokenDecision::NotRequired(result.status)),
            _ => Err(call::status_failure(op, &result)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
