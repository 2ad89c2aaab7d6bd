//! Protocol buffer types and client stub for `ivium.v1.IviumService`.
//!
//! Mirrors `proto/ivium.proto`. Kept by hand so the crate builds without `protoc`;
//! the shapes match what `tonic-build` would emit for the same file.

#![allow(missing_docs)]

use tonic::codegen::http;
use tonic::transport::Channel;

use crate::gateway::Operation;

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Acknowledgement {
    #[prost(string, tag = "1")]
    pub detail: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Potential {
    #[prost(double, tag = "1")]
    pub volts: f64,
}

/// Fully qualified gRPC path for an operation.
#[must_use]
pub fn method_path(operation: Operation) -> &'static str {
    match operation {
        Operation::OpenDriver => "/ivium.v1.IviumService/OpenDriver",
        Operation::CloseDriver => "/ivium.v1.IviumService/CloseDriver",
        Operation::ConnectDevice => "/ivium.v1.IviumService/ConnectDevice",
        Operation::DisconnectDevice => "/ivium.v1.IviumService/DisconnectDevice",
        Operation::SetCellOn => "/ivium.v1.IviumService/SetCellOn",
        Operation::SetCellOff => "/ivium.v1.IviumService/SetCellOff",
        Operation::GetPotential => "/ivium.v1.IviumService/GetPotential",
    }
}

/// Unary client for `ivium.v1.IviumService`.
#[derive(Debug, Clone)]
pub struct IviumServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl IviumServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Invoke an acknowledgement-returning operation.
    pub async fn acknowledge(
        &mut self,
        operation: Operation,
    ) -> Result<tonic::Response<Acknowledgement>, tonic::Status> {
        self.unary(operation, Empty {}).await
    }

    pub async fn get_potential(&mut self) -> Result<tonic::Response<Potential>, tonic::Status> {
        self.unary(Operation::GetPotential, Empty {}).await
    }

    async fn unary<Req, Resp>(
        &mut self,
        operation: Operation,
        request: Req,
    ) -> Result<tonic::Response<Resp>, tonic::Status>
    where
        Req: ::prost::Message + Send + Sync + 'static,
        Resp: ::prost::Message + Default + Send + Sync + 'static,
    {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::new(
                tonic::Code::Unavailable,
                format!("Service was not ready: {e}"),
            )
        })?;
        let codec: tonic::codec::ProstCodec<Req, Resp> = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(method_path(operation));
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}
