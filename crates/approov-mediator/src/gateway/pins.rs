//! Public-key pins for pinning-aware transports.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::sdk::PinMap;

/// Host used for managed trust root pins.
const MANAGED_TRUST_ROOTS: &str = "*";

/// Base64 SHA-256 public key pins for one host.
///
/// An empty set accepts any key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSet {
    pins: BTreeSet<String>,
}

impl PinSet {
    /// Select the pins for `host`.
    ///
    /// A host listed with no pins uses the managed trust root pins. A host
    /// that is not listed at all is not pinned.
    pub fn for_host(all: &PinMap, host: &str) -> Self {
        let pins = match all.get(host) {
            Some(pins) if pins.is_empty() => all.get(MANAGED_TRUST_ROOTS).cloned().unwrap_or_default(),
            Some(pins) => pins.clone(),
            None => Vec::new(),
        };
        Self {
            pins: pins.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn allows(&self, spki_sha256: &str) -> bool {
        self.pins.is_empty() || self.pins.contains(spki_sha256)
    }

    /// Check a DER encoded SubjectPublicKeyInfo.
    pub fn allows_spki_der(&self, spki_der: &[u8]) -> bool {
        self.allows(&STANDARD.encode(Sha256::digest(spki_der)))
    }

    /// Whether any key in a certificate chain matches.
    pub fn allows_chain<'a>(&self, chain: impl IntoIterator<Item = &'a [u8]>) -> bool {
        if self.pins.is_empty() {
            return true;
        }
        chain.into_iter().any(|spki| self.allows_spki_der(spki))
    }
}
