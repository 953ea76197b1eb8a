//! Scripted attestation SDK for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approov_mediator::{
    AttestationGateway, AttestationSdk, GatewayConfig, PinMap, SdkError, TokenFetchResult,
    TokenFetchStatus,
};
use async_trait::async_trait;

pub const INITIAL_CONFIG: &str = "test-initial-config";

#[derive(Default)]
struct State {
    // Queued token results, consumed first; then `token`.
    queued_tokens: VecDeque<TokenFetchResult>,
    token: Option<TokenFetchResult>,
    secure_strings: HashMap<String, TokenFetchResult>,
    custom_jwt: Option<TokenFetchResult>,
    signature: Option<String>,
    device_id: String,
    pins: PinMap,
    dynamic_config: Option<String>,
    fetch_delay: Option<Duration>,
    init_error: Option<SdkError>,

    initialized_with: Vec<(String, Option<String>)>,
    token_urls: Vec<String>,
    secure_string_keys: Vec<(String, Option<String>)>,
    data_hashes: Vec<String>,
    user_properties: Vec<String>,
    // Data hashes set and tokens issued, in order.
    events: Vec<String>,
}

/// Fake SDK whose responses are set up per test and whose calls are
/// recorded.
#[derive(Default)]
pub struct FakeSdk {
    state: Mutex<State>,
}

impl FakeSdk {
    pub fn new() -> Arc<Self> {
        let sdk = Self::default();
        sdk.state().device_id = "device-1234".to_string();
        Arc::new(sdk)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_token(&self, result: TokenFetchResult) {
        self.state().token = Some(result);
    }

    pub fn push_token(&self, result: TokenFetchResult) {
        self.state().queued_tokens.push_back(result);
    }

    pub fn set_secure_string(&self, key: &str, result: TokenFetchResult) {
        self.state().secure_strings.insert(key.to_string(), result);
    }

    pub fn set_custom_jwt(&self, result: TokenFetchResult) {
        self.state().custom_jwt = Some(result);
    }

    pub fn set_signature(&self, signature: Option<&str>) {
        self.state().signature = signature.map(str::to_string);
    }

    pub fn set_pins(&self, pins: PinMap) {
        self.state().pins = pins;
    }

    pub fn set_dynamic_config(&self, config: &str) {
        self.state().dynamic_config = Some(config.to_string());
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = Some(delay);
    }

    pub fn fail_initialize(&self, error: SdkError) {
        self.state().init_error = Some(error);
    }

    pub fn initialized_with(&self) -> Vec<(String, Option<String>)> {
        self.state().initialized_with.clone()
    }

    pub fn token_urls(&self) -> Vec<String> {
        self.state().token_urls.clone()
    }

    pub fn token_fetches(&self) -> usize {
        self.state().token_urls.len()
    }

    pub fn secure_string_keys(&self) -> Vec<(String, Option<String>)> {
        self.state().secure_string_keys.clone()
    }

    pub fn secure_string_fetches(&self) -> usize {
        self.state().secure_string_keys.len()
    }

    pub fn data_hashes(&self) -> Vec<String> {
        self.state().data_hashes.clone()
    }

    pub fn user_properties(&self) -> Vec<String> {
        self.state().user_properties.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    fn delay(&self) -> Option<Duration> {
        self.state().fetch_delay
    }
}

#[async_trait]
impl AttestationSdk for FakeSdk {
    fn initialize(
        &self,
        initial_config: &str,
        update_config: Option<&str>,
        _comment: Option<&str>,
    ) -> Result<(), SdkError> {
        let mut state = self.state();
        if let Some(error) = state.init_error.clone() {
            return Err(error);
        }
        state
            .initialized_with
            .push((initial_config.to_string(), update_config.map(str::to_string)));
        Ok(())
    }

    fn set_user_property(&self, property: &str) -> Result<(), SdkError> {
        self.state().user_properties.push(property.to_string());
        Ok(())
    }

    async fn fetch_token(&self, url: &str) -> Result<TokenFetchResult, SdkError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.token_urls.push(url.to_string());
        state.events.push(format!("token {}", url));
        let result = state
            .queued_tokens
            .pop_front()
            .or_else(|| state.token.clone())
            .unwrap_or_else(|| TokenFetchResult::new(TokenFetchStatus::UnknownUrl));
        Ok(result)
    }

    async fn fetch_secure_string(
        &self,
        key: &str,
        new_def: Option<&str>,
    ) -> Result<TokenFetchResult, SdkError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state
            .secure_string_keys
            .push((key.to_string(), new_def.map(str::to_string)));
        if let Some(definition) = new_def {
            let result = if definition.is_empty() {
                TokenFetchResult::new(TokenFetchStatus::UnknownKey)
            } else {
                TokenFetchResult::success_secure_string(definition)
            };
            state.secure_strings.insert(key.to_string(), result);
        }
        Ok(state
            .secure_strings
            .get(key)
            .cloned()
            .unwrap_or_else(|| TokenFetchResult::new(TokenFetchStatus::UnknownKey)))
    }

    async fn fetch_custom_jwt(&self, _payload: &str) -> Result<TokenFetchResult, SdkError> {
        Ok(self
            .state()
            .custom_jwt
            .clone()
            .unwrap_or_else(|| TokenFetchResult::new(TokenFetchStatus::BadPayload)))
    }

    fn get_message_signature(&self, _message: &str) -> Result<Option<String>, SdkError> {
        Ok(self.state().signature.clone())
    }

    fn get_device_id(&self) -> Result<String, SdkError> {
        Ok(self.state().device_id.clone())
    }

    fn set_data_hash_in_token(&self, hash: &str) -> Result<(), SdkError> {
        let mut state = self.state();
        state.data_hashes.push(hash.to_string());
        state.events.push(format!("hash {}", hash));
        Ok(())
    }

    fn fetch_config(&self) -> Option<String> {
        self.state().dynamic_config.clone()
    }

    fn get_pins(&self, _pin_type: &str) -> Result<PinMap, SdkError> {
        Ok(self.state().pins.clone())
    }
}

/// Settings without retries or backoff, so failures surface immediately.
pub fn fast_settings() -> GatewayConfig {
    GatewayConfig::default()
        .with_max_retries(0)
        .with_retry_backoff(Duration::ZERO)
}

/// Gateway over `sdk`, not yet initialized.
pub fn gateway(sdk: &Arc<FakeSdk>) -> AttestationGateway {
    AttestationGateway::new(sdk.clone(), fast_settings())
}

/// Gateway over `sdk`, initialized with [`INITIAL_CONFIG`].
pub fn initialized_gateway(sdk: &Arc<FakeSdk>) -> AttestationGateway {
    let gateway = gateway(sdk);
    gateway.initialize(INITIAL_CONFIG).unwrap();
    gateway
}
