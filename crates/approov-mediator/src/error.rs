//! Error types for the attestation capability and the mediated client.

use crate::result::Failure;

/// Native errors raised by the attestation SDK.
///
/// These never cross the mediation boundary; the gateway translates them
/// into [`Failure`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// The SDK is not in a state where the call is allowed.
    #[error("IllegalState: {0}")]
    IllegalState(String),

    /// The call was made with an argument the SDK cannot accept.
    #[error("IllegalArgument: {0}")]
    IllegalArgument(String),
}

/// Errors from the reqwest transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the response not received.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Errors from a mediated send.
#[derive(Debug, thiserror::Error)]
pub enum ClientError<E>
where
    E: std::error::Error + 'static,
{
    /// Mediation aborted the request before it reached the transport.
    #[error("request aborted by mediation: {0}")]
    Mediation(#[from] Failure),

    /// The transport failed after mediation succeeded.
    #[error("transport error: {0}")]
    Transport(#[source] E),
}

impl<E> ClientError<E>
where
    E: std::error::Error + 'static,
{
    /// The mediation failure, if the request never left the client.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Mediation(failure) => Some(failure),
            Self::Transport(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_error_display() {
        let err = SdkError::IllegalState("not initialized".into());
        assert_eq!(err.to_string(), "IllegalState: not initialized");
    }

    #[test]
    fn test_client_error_exposes_failure() {
        let err: ClientError<TransportError> =
            ClientError::Mediation(Failure::rejection("fetchToken: REJECTED", "a", "b"));
        assert_eq!(err.failure().and_then(|f| f.rejection_arc()), Some("a"));
    }
}
