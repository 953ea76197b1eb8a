//! Mediation configuration store.
//!
//! Shared by the gateway, the mediator and application code. Each group of
//! related fields sits behind its own lock; request flows work from a
//! [`ConfigSnapshot`] so no lock is held while a fetch is in flight.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::result::{Failure, MediationResult};

/// Header carrying the attestation token unless reconfigured.
pub const DEFAULT_TOKEN_HEADER: &str = "Approov-Token";

#[derive(Debug, Clone)]
struct HeaderRules {
    token_header: String,
    token_prefix: String,
    binding_header: Option<String>,
}

impl Default for HeaderRules {
    fn default() -> Self {
        Self {
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            token_prefix: String::new(),
            binding_header: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SubstitutionRules {
    // lowercase header name -> required prefix
    headers: BTreeMap<String, String>,
    query_params: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
struct ExclusionRules {
    // source pattern -> compiled pattern
    patterns: BTreeMap<String, Regex>,
}

/// Serializable seed for a [`MediationConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediationSettings {
    pub token_header: String,
    pub token_prefix: String,
    pub binding_header: Option<String>,
    pub substitution_headers: BTreeMap<String, String>,
    pub substitution_query_params: Vec<String>,
    pub exclusion_url_regexes: Vec<String>,
    pub proceed_on_network_fail: bool,
}

impl Default for MediationSettings {
    fn default() -> Self {
        Self {
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            token_prefix: String::new(),
            binding_header: None,
            substitution_headers: BTreeMap::new(),
            substitution_query_params: Vec::new(),
            exclusion_url_regexes: Vec::new(),
            proceed_on_network_fail: false,
        }
    }
}

/// Process-wide mediation settings, mutable at any time.
///
/// All mutators are idempotent: re-adding an entry replaces it and removing
/// an absent entry does nothing.
#[derive(Debug, Default)]
pub struct MediationConfig {
    headers: RwLock<HeaderRules>,
    substitutions: RwLock<SubstitutionRules>,
    exclusions: RwLock<ExclusionRules>,
    proceed_on_network_fail: AtomicBool,
}

impl MediationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from settings, compiling every exclusion pattern.
    pub fn from_settings(settings: &MediationSettings) -> MediationResult<Self> {
        let config = Self::new();
        config.set_token_header(&settings.token_header, &settings.token_prefix);
        if let Some(binding) = &settings.binding_header {
            config.set_binding_header(binding);
        }
        for (header, prefix) in &settings.substitution_headers {
            config.add_substitution_header(header, Some(prefix));
        }
        for key in &settings.substitution_query_params {
            config.add_substitution_query_param(key);
        }
        for pattern in &settings.exclusion_url_regexes {
            config.add_exclusion_url_regex(pattern)?;
        }
        config.set_proceed_on_network_fail(settings.proceed_on_network_fail);
        Ok(config)
    }

    /// Parse settings from YAML (JSON is accepted too).
    pub fn from_yaml(source: &str) -> MediationResult<Self> {
        let settings: MediationSettings = serde_yaml::from_str(source)
            .map_err(|e| Failure::general(format!("invalid mediation settings: {}", e)))?;
        Self::from_settings(&settings)
    }

    /// Let requests proceed without a token when attestation cannot reach
    /// the network. Use with care: the request may then be sent before any
    /// dynamic pins have been received.
    pub fn set_proceed_on_network_fail(&self, proceed: bool) {
        debug!(proceed, "setProceedOnNetworkFail");
        self.proceed_on_network_fail.store(proceed, Ordering::SeqCst);
    }

    pub fn proceed_on_network_fail(&self) -> bool {
        self.proceed_on_network_fail.load(Ordering::SeqCst)
    }

    /// Set the header the token is placed on and any value prefix, such as
    /// `"Bearer "`.
    pub fn set_token_header(&self, header: &str, prefix: &str) {
        debug!(header, prefix, "setTokenHeader");
        let mut rules = write(&self.headers);
        rules.token_header = header.to_string();
        rules.token_prefix = prefix.to_string();
    }

    /// Set the header whose value is hashed into tokens.
    pub fn set_binding_header(&self, header: &str) {
        debug!(header, "setBindingHeader");
        write(&self.headers).binding_header = Some(header.to_string());
    }

    pub fn clear_binding_header(&self) {
        debug!("clearBindingHeader");
        write(&self.headers).binding_header = None;
    }

    /// Mark a header for secure string substitution. Header names are
    /// matched case-insensitively.
    pub fn add_substitution_header(&self, header: &str, required_prefix: Option<&str>) {
        let prefix = required_prefix.unwrap_or_default();
        debug!(header, prefix, "addSubstitutionHeader");
        write(&self.substitutions)
            .headers
            .insert(header.to_ascii_lowercase(), prefix.to_string());
    }

    pub fn remove_substitution_header(&self, header: &str) {
        debug!(header, "removeSubstitutionHeader");
        write(&self.substitutions)
            .headers
            .remove(&header.to_ascii_lowercase());
    }

    pub fn add_substitution_query_param(&self, key: &str) {
        debug!(key, "addSubstitutionQueryParam");
        write(&self.substitutions)
            .query_params
            .insert(key.to_string());
    }

    pub fn remove_substitution_query_param(&self, key: &str) {
        debug!(key, "removeSubstitutionQueryParam");
        write(&self.substitutions).query_params.remove(key);
    }

    /// Exclude matching URLs from any attestation handling.
    ///
    /// Excluded URLs get no token and no substitutions, and do not refresh
    /// dynamic pins either.
    ///
    /// Patterns run against the parsed, normalized URL: scheme and host are
    /// lowercase, default ports are dropped and an empty path becomes `/`.
    /// `https://CDN.example.com` is matched as `https://cdn.example.com/`.
    pub fn add_exclusion_url_regex(&self, url_regex: &str) -> MediationResult<()> {
        let pattern = Regex::new(url_regex).map_err(|e| {
            Failure::general(format!("addExclusionURLRegex {} error: {}", url_regex, e))
        })?;
        debug!(url_regex, "addExclusionURLRegex");
        write(&self.exclusions)
            .patterns
            .insert(url_regex.to_string(), pattern);
        Ok(())
    }

    pub fn remove_exclusion_url_regex(&self, url_regex: &str) {
        debug!(url_regex, "removeExclusionURLRegex");
        write(&self.exclusions).patterns.remove(url_regex);
    }

    /// Copy of the current settings for one request flow.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let headers = read(&self.headers).clone();
        let substitutions = read(&self.substitutions).clone();
        let exclusions = read(&self.exclusions)
            .patterns
            .values()
            .cloned()
            .collect();

        ConfigSnapshot {
            token_header: headers.token_header,
            token_prefix: headers.token_prefix,
            binding_header: headers.binding_header,
            substitution_headers: substitutions.headers,
            substitution_query_params: substitutions.query_params,
            exclusions,
            proceed_on_network_fail: self.proceed_on_network_fail(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time copy of a [`MediationConfig`].
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub token_header: String,
    pub token_prefix: String,
    pub binding_header: Option<String>,
    pub substitution_headers: BTreeMap<String, String>,
    pub substitution_query_params: BTreeSet<String>,
    pub exclusions: Vec<Regex>,
    pub proceed_on_network_fail: bool,
}

impl ConfigSnapshot {
    /// Whether any exclusion pattern matches somewhere in the URL, given in
    /// its normalized form.
    pub fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.iter().any(|pattern| pattern.is_match(url))
    }

    /// Token header value for a token.
    pub fn token_value(&self, token: &str) -> String {
        format!("{}{}", self.token_prefix, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let snapshot = MediationConfig::new().snapshot();
        assert_eq!(snapshot.token_header, "Approov-Token");
        assert_eq!(snapshot.token_prefix, "");
        assert!(snapshot.binding_header.is_none());
        assert!(!snapshot.proceed_on_network_fail);
        assert_eq!(snapshot.token_value("abc"), "abc");
    }

    #[test]
    fn test_add_substitution_header_twice_keeps_one_entry() {
        let config = MediationConfig::new();
        config.add_substitution_header("Authorization", Some("Bearer "));
        config.add_substitution_header("Authorization", Some("Bearer "));
        config.add_substitution_header("authorization", Some("Bearer "));

        let snapshot = config.snapshot();
        assert_eq!(snapshot.substitution_headers.len(), 1);
        assert_eq!(
            snapshot.substitution_headers.get("authorization"),
            Some(&"Bearer ".to_string())
        );
    }

    #[test]
    fn test_re_adding_header_replaces_prefix() {
        let config = MediationConfig::new();
        config.add_substitution_header("Api-Key", None);
        config.add_substitution_header("Api-Key", Some("Key "));
        assert_eq!(
            config.snapshot().substitution_headers.get("api-key"),
            Some(&"Key ".to_string())
        );
    }

    #[test]
    fn test_removing_absent_entries_is_noop() {
        let config = MediationConfig::new();
        config.remove_substitution_header("Authorization");
        config.remove_substitution_query_param("key");
        config.remove_exclusion_url_regex("^https://cdn");

        let snapshot = config.snapshot();
        assert!(snapshot.substitution_headers.is_empty());
        assert!(snapshot.substitution_query_params.is_empty());
        assert!(snapshot.exclusions.is_empty());
    }

    #[test]
    fn test_exclusion_patterns() {
        let config = MediationConfig::new();
        config
            .add_exclusion_url_regex(r"^https://cdn\.example\.com/.*")
            .unwrap();
        config
            .add_exclusion_url_regex(r"^https://cdn\.example\.com/.*")
            .unwrap();

        let snapshot = config.snapshot();
        assert_eq!(snapshot.exclusions.len(), 1);
        assert!(snapshot.is_excluded("https://cdn.example.com/logo.png"));
        assert!(!snapshot.is_excluded("https://api.example.com/x"));

        config.remove_exclusion_url_regex(r"^https://cdn\.example\.com/.*");
        assert!(!config
            .snapshot()
            .is_excluded("https://cdn.example.com/logo.png"));
    }

    #[test]
    fn test_invalid_exclusion_regex_is_general_failure() {
        let config = MediationConfig::new();
        let err = config.add_exclusion_url_regex("(unclosed").unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::General);
        assert!(config.snapshot().exclusions.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let config = MediationConfig::new();
        config.set_token_header("Authorization", "Bearer ");
        let snapshot = config.snapshot();
        config.set_token_header("X-Token", "");
        assert_eq!(snapshot.token_header, "Authorization");
        assert_eq!(snapshot.token_value("abc"), "Bearer abc");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
token_header: Authorization
token_prefix: "Bearer "
binding_header: X-Session
substitution_headers:
  Api-Key: ""
substitution_query_params: [api_key]
exclusion_url_regexes: ['^https://cdn\.example\.com/']
proceed_on_network_fail: true
"#;
        let config = MediationConfig::from_yaml(yaml).unwrap();
        let snapshot = config.snapshot();
        assert_eq!(snapshot.token_header, "Authorization");
        assert_eq!(snapshot.binding_header.as_deref(), Some("X-Session"));
        assert!(snapshot.substitution_headers.contains_key("api-key"));
        assert!(snapshot.substitution_query_params.contains("api_key"));
        assert!(snapshot.is_excluded("https://cdn.example.com/a.png"));
        assert!(snapshot.proceed_on_network_fail);
    }

    #[test]
    fn test_from_yaml_rejects_bad_pattern() {
        let err = MediationConfig::from_yaml("exclusion_url_regexes: ['[']").unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::General);
    }

    #[test]
    fn test_concurrent_mutation_and_snapshots() {
        let config = std::sync::Arc::new(MediationConfig::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let config = config.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        config.add_substitution_header("Api-Key", Some(""));
                        config.add_substitution_query_param(&format!("key{}", i % 2));
                        let _ = config.snapshot();
                        config.remove_substitution_query_param("absent");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = config.snapshot();
        assert_eq!(snapshot.substitution_headers.len(), 1);
        assert_eq!(snapshot.substitution_query_params.len(), 2);
    }
}
