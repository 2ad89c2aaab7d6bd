//! gRPC gateway to a remote driver host.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tonic::Code;

use crate::connection::HostAddress;
use crate::error::{ClientError, FailureTag, Result, RpcFailure};
use crate::gateway::{Gateway, Operation};
use crate::proto::IviumServiceClient;

/// Response metadata key carrying the [`FailureTag`] wire name.
pub const ERROR_TAG_METADATA_KEY: &str = "x-ivium-error-tag";

/// gRPC channel configuration.
///
/// Driver calls are short acknowledgements, so timeouts are tuned for fast failure
/// detection rather than long transfers.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long to wait for the TCP/HTTP2 connection
    pub connect_timeout: Duration,
    /// Per-call deadline
    pub request_timeout: Duration,
    /// HTTP/2 keepalive ping interval
    pub keepalive_interval: Duration,
    /// How long to wait for a keepalive ack
    pub keepalive_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
            keepalive_timeout: Duration::from_secs(5),
        }
    }
}

/// [`Gateway`] backed by `ivium.v1.IviumService` over gRPC.
///
/// The channel connects lazily: an unreachable host does not fail construction, it
/// surfaces as a [`FailureTag::Transport`] failure on the first call.
#[derive(Debug, Clone)]
pub struct GrpcGateway {
    client: IviumServiceClient,
    address: HostAddress,
}

impl GrpcGateway {
    /// Build a gateway for `address` with the given channel settings.
    ///
    /// Driver hosts serve plaintext HTTP/2 on the lab network; `https` addresses are
    /// rejected with [`ClientError::InvalidConfig`] rather than silently downgraded.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(address: &HostAddress, config: &ChannelConfig) -> Result<Self> {
        if address.is_tls() {
            return Err(ClientError::InvalidConfig(format!(
                "{} uses https; driver hosts are reached over plain http",
                address.as_str()
            )));
        }

        let endpoint = Endpoint::from_shared(address.as_str().to_string())?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .http2_keep_alive_interval(config.keepalive_interval)
            .keep_alive_timeout(config.keepalive_timeout)
            .keep_alive_while_idle(true);

        let channel = endpoint.connect_lazy();
        tracing::debug!("gRPC gateway prepared for {}", address);

        Ok(Self {
            client: IviumServiceClient::new(channel),
            address: address.clone(),
        })
    }

    /// Address this gateway talks to.
    #[must_use]
    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    async fn acknowledge(&self, operation: Operation) -> std::result::Result<(), RpcFailure> {
        let mut client = self.client.clone();
        client
            .acknowledge(operation)
            .await
            .map(|_| ())
            .map_err(|status| failure_from_status(&status))
    }
}

#[async_trait]
impl Gateway for GrpcGateway {
    async fn open_driver(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::OpenDriver).await
    }

    async fn close_driver(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::CloseDriver).await
    }

    async fn connect_device(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::ConnectDevice).await
    }

    async fn disconnect_device(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::DisconnectDevice).await
    }

    async fn set_cell_on(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::SetCellOn).await
    }

    async fn set_cell_off(&self) -> std::result::Result<(), RpcFailure> {
        self.acknowledge(Operation::SetCellOff).await
    }

    async fn get_potential(&self) -> std::result::Result<f64, RpcFailure> {
        let mut client = self.client.clone();
        client
            .get_potential()
            .await
            .map(|response| response.into_inner().volts)
            .map_err(|status| failure_from_status(&status))
    }
}

/// Translate a gRPC status into an [`RpcFailure`].
///
/// The tag comes from the [`ERROR_TAG_METADATA_KEY`] metadata entry when present.
/// Without it only the status code is consulted; the message text never is.
#[must_use]
pub fn failure_from_status(status: &tonic::Status) -> RpcFailure {
    let tag = status
        .metadata()
        .get(ERROR_TAG_METADATA_KEY)
        .and_then(|value| value.to_str().ok())
        .map(FailureTag::parse)
        .unwrap_or_else(|| match status.code() {
            Code::DeadlineExceeded | Code::Cancelled => FailureTag::Timeout,
            Code::Unavailable => FailureTag::Transport,
            _ => FailureTag::Server,
        });
    RpcFailure::new(tag, status.message())
}

impl From<tonic::Status> for RpcFailure {
    fn from(status: tonic::Status) -> Self {
        failure_from_status(&status)
    }
}
