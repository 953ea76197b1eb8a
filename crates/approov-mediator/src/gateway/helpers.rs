//! Pure helpers and persisted dynamic configuration (no status logic).

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::AttestationGateway;

/// Base64 SHA-256 of `data`, as carried in the token `pay` claim.
pub(super) fn data_hash(data: &str) -> String {
    STANDARD.encode(Sha256::digest(data.as_bytes()))
}

/// Read a stored dynamic configuration, if any.
///
/// A missing or unreadable file is not an error: a fresh update arrives
/// with the next fetch.
pub(super) fn read_update_config(path: Option<&Path>) -> Option<String> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let contents = contents.trim();
            if contents.is_empty() {
                None
            } else {
                Some(contents.to_string())
            }
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no stored dynamic configuration");
            None
        }
    }
}

impl AttestationGateway {
    /// Pull a changed dynamic configuration from the SDK and persist it.
    pub(super) async fn handle_config_update(&self) {
        let Some(update) = self.inner.sdk.fetch_config() else {
            warn!("could not get dynamic configuration");
            return;
        };
        info!("dynamic configuration update received");

        let Some(path) = self.inner.settings.update_config_path.as_deref() else {
            return;
        };
        match tokio::fs::write(path, update.as_bytes()).await {
            Ok(()) => debug!(path = %path.display(), "wrote dynamic configuration"),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "cannot write dynamic configuration"
            ),
        }
    }
}
