//! Request mediator.
//!
//! Decides per outbound request what attestation it needs:
//!
//! 1. exclusion check: a matching URL passes through untouched
//! 2. token fetch, then the token header
//! 3. header substitutions
//! 4. query parameter substitutions
//!
//! Any failure that is not tolerated aborts the whole request, so a
//! partially prepared request never reaches the transport. Substitutions
//! only start once the token decision is made.

use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ConfigSnapshot;
use crate::gateway::{AttestationGateway, TokenDecision};
use crate::result::{FailureKind, MediationResult};
use crate::sdk::TokenFetchStatus;
use crate::types::PendingRequest;

/// Why a mediated request carries no token header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithoutTokenReason {
    /// Attestation could not reach the network and the configuration
    /// allows proceeding anyway.
    NetworkFailure,

    /// The attestation service does not require a token for the URL.
    NotRequired(TokenFetchStatus),
}

/// How a request left the mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Matched an exclusion pattern; untouched.
    Exempt,

    /// Token header applied.
    TokenApplied,

    /// Sent without a token header.
    WithoutToken(WithoutTokenReason),
}

impl Disposition {
    // Secrets only go to URLs the attestation service protects, or when
    // the caller opted into proceeding on network failure.
    fn allows_substitution(&self) -> bool {
        match self {
            Self::Exempt => false,
            Self::TokenApplied => true,
            Self::WithoutToken(WithoutTokenReason::NetworkFailure) => true,
            Self::WithoutToken(WithoutTokenReason::NotRequired(status)) => {
                *status == TokenFetchStatus::UnprotectedUrl
            }
        }
    }
}

/// A request ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatedRequest {
    pub request: PendingRequest,
    pub disposition: Disposition,
}

/// Applies attestation policy to outbound requests.
#[derive(Debug, Clone)]
pub struct RequestMediator {
    gateway: AttestationGateway,
}

impl RequestMediator {
    pub fn new(gateway: AttestationGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &AttestationGateway {
        &self.gateway
    }

    /// Mediate one request.
    ///
    /// Works from a snapshot of the configuration taken at the start, so
    /// concurrent configuration changes never apply halfway through a
    /// request.
    ///
    /// With a binding header configured, setting the data hash and fetching
    /// the token happen under one gateway-wide lock, so a token always
    /// carries the hash of its own request. Bound requests therefore fetch
    /// tokens one at a time.
    ///
    /// Only the first value of a substitution header is substituted; any
    /// further values are kept as they are.
    pub async fn mediate(&self, request: PendingRequest) -> MediationResult<MediatedRequest> {
        let span = info_span!(
            "mediate",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            host = request.url.host_str().unwrap_or_default(),
        );
        self.mediate_request(request).instrument(span).await
    }

    async fn mediate_request(&self, mut request: PendingRequest) -> MediationResult<MediatedRequest> {
        self.gateway.ensure_initialized("mediation")?;
        let config = self.gateway.config().snapshot();

        if config.is_excluded(request.url.as_str()) {
            debug!("url excluded, passing through");
            return Ok(MediatedRequest {
                request,
                disposition: Disposition::Exempt,
            });
        }

        let binding = config
            .binding_header
            .as_deref()
            .map(|header| request.header(header).map(str::to_string));

        let disposition = match self
            .gateway
            .request_token(request.url.as_str(), binding)
            .await
        {
            Ok(TokenDecision::Token(token)) => {
                request.set_sensitive_header(&config.token_header, &config.token_value(&token))?;
                Disposition::TokenApplied
            }
            Ok(TokenDecision::NotRequired(status)) => {
                debug!(%status, "no token required");
                Disposition::WithoutToken(WithoutTokenReason::NotRequired(status))
            }
            Err(failure)
                if failure.kind() == FailureKind::Network && config.proceed_on_network_fail =>
            {
                warn!(
                    message = failure.message(),
                    "token fetch failed on network, proceeding without token"
                );
                Disposition::WithoutToken(WithoutTokenReason::NetworkFailure)
            }
            Err(failure) => {
                debug!(kind = %failure.kind(), message = failure.message(), "request aborted");
                return Err(failure);
            }
        };

        if disposition.allows_substitution() {
            self.substitute_headers(&mut request, &config).await?;
            self.substitute_query_params(&mut request, &config).await?;
        }

        debug!(?disposition, "request mediated");
        Ok(MediatedRequest {
            request,
            disposition,
        })
    }

    async fn substitute_headers(
        &self,
        request: &mut PendingRequest,
        config: &ConfigSnapshot,
    ) -> MediationResult<()> {
        for (header, prefix) in &config.substitution_headers {
            let Some(reference) = request
                .header(header)
                .and_then(|value| value.strip_prefix(prefix.as_str()))
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
            else {
                continue;
            };

            let secret = self
                .lookup(&reference, config)
                .await
                .map_err(|f| f.context(format_args!("header substitution for {}", header)))?;
            match secret {
                Some(secret) => {
                    request.replace_first_header_value(header, &format!("{}{}", prefix, secret))?;
                    debug!(header = header.as_str(), "header substituted");
                }
                None => debug!(header = header.as_str(), "header left unchanged"),
            }
        }
        Ok(())
    }

    async fn substitute_query_params(
        &self,
        request: &mut PendingRequest,
        config: &ConfigSnapshot,
    ) -> MediationResult<()> {
        for key in &config.substitution_query_params {
            let Some(reference) = request.query_param(key).filter(|value| !value.is_empty()) else {
                continue;
            };

            let secret = self
                .lookup(&reference, config)
                .await
                .map_err(|f| f.context(format_args!("query parameter substitution for {}", key)))?;
            match secret {
                Some(secret) => {
                    request.replace_query_param(key, &secret);
                    debug!(key = key.as_str(), "query parameter substituted");
                }
                None => debug!(key = key.as_str(), "query parameter left unchanged"),
            }
        }
        Ok(())
    }

    /// Secure string lookup for a substitution. `None` leaves the value as
    /// it is: the key is unknown, or the network failed and the
    /// configuration tolerates that.
    async fn lookup(
        &self,
        reference: &str,
        config: &ConfigSnapshot,
    ) -> MediationResult {
        match self.gateway.fetch_secure_string(reference, None).await {
            Ok(secret) => Ok(secret),
            Err(failure)
                if failure.kind() == FailureKind::Network && config.proceed_on_network_fail =>
            {
                warn!(
                    message = failure.message(),
                    "substitution skipped after network failure"
                );
                Ok(None)
            }
            Err(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_gate() {
        assert!(!Disposition::Exempt.allows_substitution());
        assert!(Disposition::TokenApplied.allows_substitution());
        assert!(Disposition::WithoutToken(WithoutTokenReason::NetworkFailure).allows_substitution());
        assert!(Disposition::WithoutToken(WithoutTokenReason::NotRequired(
            TokenFetchStatus::UnprotectedUrl
        ))
        .allows_substitution());
        assert!(!Disposition::WithoutToken(WithoutTokenReason::NotRequired(
            TokenFetchStatus::UnknownUrl
        ))
        .allows_substitution());
        assert!(!Disposition::WithoutToken(WithoutTokenReason::NotRequired(
            TokenFetchStatus::NoApproovService
        ))
        .allows_substitution());
    }
}
