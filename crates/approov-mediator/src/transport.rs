//! Transport collaborator and the mediated client.
//!
//! The transport performs the network exchange for a finalized request.
//! The mediator never looks at responses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::{ClientError, TransportError};
use crate::mediator::{MediatedRequest, RequestMediator};
use crate::types::PendingRequest;

const USER_AGENT_VALUE: &str = concat!("approov-mediator/", env!("CARGO_PKG_VERSION"));

/// Sends finalized requests.
#[async_trait]
pub trait Transport: Send + Sync {
    type Response: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&self, request: PendingRequest) -> Result<Self::Response, Self::Error>;
}

/// Transport backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with the given overall request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Response = reqwest::Response;
    type Error = TransportError;

    async fn send(&self, request: PendingRequest) -> Result<reqwest::Response, TransportError> {
        let PendingRequest {
            method,
            url,
            mut headers,
            body,
        } = request;

        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        Ok(builder.send().await?)
    }
}

/// Mediates each request, then hands it to the transport.
#[derive(Debug, Clone)]
pub struct MediatedClient<T> {
    mediator: RequestMediator,
    transport: T,
}

impl<T: Transport> MediatedClient<T> {
    pub fn new(mediator: RequestMediator, transport: T) -> Self {
        Self {
            mediator,
            transport,
        }
    }

    pub fn mediator(&self) -> &RequestMediator {
        &self.mediator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request. An aborted mediation returns its failure and the
    /// transport is never called.
    pub async fn send(&self, request: PendingRequest) -> Result<T::Response, ClientError<T::Error>> {
        let MediatedRequest {
            request,
            disposition,
        } = self.mediator.mediate(request).await?;
        debug!(?disposition, "sending mediated request");
        self.transport
            .send(request)
            .await
            .map_err(ClientError::Transport)
    }
}
