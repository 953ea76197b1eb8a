//! App attestation mediation for outbound HTTP requests.
//!
//! Sits between application code and the HTTP transport and decides, per
//! request, whether to:
//!
//! - attach an attestation token header
//! - substitute secure strings for placeholder header and query values
//! - bind a request header value into the token
//! - pass the request through untouched (exclusions)
//! - abort it with a typed [`Failure`]
//!
//! The attestation SDK itself is opaque and consumed through
//! [`AttestationSdk`]. Host runtimes drive the gateway through
//! [`CommandFacade`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use approov_mediator::{
//!     AttestationGateway, AttestationSdk, GatewayConfig, MediatedClient, PendingRequest,
//!     ReqwestTransport, RequestMediator,
//! };
//!
//! # async fn example(sdk: Arc<dyn AttestationSdk>) -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = AttestationGateway::new(sdk, GatewayConfig::from_env());
//! gateway.initialize("<initial config>")?;
//! gateway.config().set_token_header("Authorization", "Bearer ");
//! gateway.config().add_substitution_header("Api-Key", None);
//!
//! let client = MediatedClient::new(RequestMediator::new(gateway), ReqwestTransport::default());
//! let response = client
//!     .send(PendingRequest::get("https://api.example.com/shapes")?)
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Failures
//!
//! Every operation returns a [`MediationResult`]. A failure is one of
//! `general` (misconfiguration or internal error), `network` (worth
//! retrying) or `rejection` (the device failed attestation; carries the
//! ARC and rejection reasons).
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `APPROOV_FETCH_TIMEOUT_MS` | Upper bound per SDK fetch (default: 30000) |
//! | `APPROOV_MAX_RETRIES` | Retries on network statuses (default: 2) |
//! | `APPROOV_RETRY_BACKOFF_MS` | Base retry backoff (default: 250) |
//! | `APPROOV_UPDATE_CONFIG_PATH` | File holding the persisted dynamic configuration |

pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mediator;
pub mod result;
pub mod sdk;
pub mod transport;
pub mod types;

// Re-export main types
pub use command::{Command, CommandFacade, CommandResponse};
pub use config::{ConfigSnapshot, MediationConfig, MediationSettings, DEFAULT_TOKEN_HEADER};
pub use error::{ClientError, SdkError, TransportError};
pub use gateway::{AttestationGateway, PinSet};
pub use mediator::{Disposition, MediatedRequest, RequestMediator, WithoutTokenReason};
pub use result::{Failure, FailureKind, MediationResult, RejectionInfo};
pub use sdk::{AttestationSdk, PinMap, TokenFetchResult, TokenFetchStatus};
pub use transport::{MediatedClient, ReqwestTransport, Transport};
pub use types::{GatewayConfig, PendingRequest};
