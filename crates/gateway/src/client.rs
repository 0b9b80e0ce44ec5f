//! Programmatic client façade mirroring the service operations.

use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Status;
use tracing::error;
use uuid::Uuid;

use remex_core::process::{OutputStream, ProcessInfo};

use crate::envelope::{self, RemoteError};
use crate::remex_v1::executor_client::ExecutorClient;
use crate::remex_v1::{
    read_request, ExecRequest, GetProcessInfoRequest, KillRequest, ListProcessInfoRequest,
    ReadRequest,
};
use crate::process_info_from_wire;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the call; the reconstructed cause chain is
    /// available through `source()`.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Connecting or speaking to the server failed below the rpc layer.
    #[error("transport failure: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The server reply did not parse.
    #[error("malformed reply: {0}")]
    Reply(String),
}

/// Per-call options: an optional deadline. Cancellation is dropping the
/// call future.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Deadline for the whole call, carried as `grpc-timeout`.
    pub deadline: Option<Duration>,
}

/// Mirror of the service operations over an mTLS channel.
#[derive(Debug, Clone)]
pub struct Client {
    inner: ExecutorClient<Channel>,
}

impl Client {
    /// Connect to `server` (an `https://` url) with the given TLS setup.
    pub async fn connect(server: String, tls: ClientTlsConfig) -> Result<Self, ClientError> {
        let channel = Endpoint::from_shared(server)?.tls_config(tls)?.connect().await?;
        Ok(Self { inner: ExecutorClient::new(channel) })
    }

    /// Spawn an executable remotely; returns the new process id.
    pub async fn exec(
        &mut self,
        opts: CallOptions,
        path: &str,
        args: &[String],
    ) -> Result<Uuid, ClientError> {
        let req = request(opts, ExecRequest { path: path.to_string(), args: args.to_vec() });
        let reply = self.inner.exec(req).await.map_err(remote)?.into_inner();
        Uuid::parse_str(&reply.process_id)
            .map_err(|err| ClientError::Reply(format!("bad process id: {err}")))
    }

    /// Every process the server knows, newest first.
    pub async fn list_process_info(
        &mut self,
        opts: CallOptions,
    ) -> Result<Vec<ProcessInfo>, ClientError> {
        let req = request(opts, ListProcessInfoRequest {});
        let reply = self.inner.list_process_info(req).await.map_err(remote)?.into_inner();
        reply
            .processes
            .into_iter()
            .map(|wire| {
                process_info_from_wire(wire)
                    .map_err(|err| ClientError::Reply(format!("bad process info: {err}")))
            })
            .collect()
    }

    /// Snapshot of one process.
    pub async fn get_process_info(
        &mut self,
        opts: CallOptions,
        id: Uuid,
    ) -> Result<ProcessInfo, ClientError> {
        let req = request(opts, GetProcessInfoRequest { process_id: id.to_string() });
        let reply = self.inner.get_process_info(req).await.map_err(remote)?.into_inner();
        process_info_from_wire(reply)
            .map_err(|err| ClientError::Reply(format!("bad process info: {err}")))
    }

    /// Deliver a POSIX signal to a process.
    pub async fn kill(
        &mut self,
        opts: CallOptions,
        id: Uuid,
        signal: i32,
    ) -> Result<(), ClientError> {
        let req = request(opts, KillRequest { process_id: id.to_string(), signal });
        self.inner.kill(req).await.map_err(remote)?;
        Ok(())
    }

    /// Whole-file read of a captured output stream.
    pub async fn read(
        &mut self,
        opts: CallOptions,
        id: Uuid,
        target: OutputStream,
    ) -> Result<Vec<u8>, ClientError> {
        let target = match target {
            OutputStream::Stdout => read_request::Target::Stdout,
            OutputStream::Stderr => read_request::Target::Stderr,
        };
        let req = request(
            opts,
            ReadRequest { process_id: id.to_string(), target: target as i32 },
        );
        let reply = self.inner.read(req).await.map_err(remote)?.into_inner();
        Ok(reply.content)
    }
}

fn request<T>(opts: CallOptions, message: T) -> tonic::Request<T> {
    let mut req = tonic::Request::new(message);
    if let Some(deadline) = opts.deadline {
        req.set_timeout(deadline);
    }
    req
}

fn remote(status: Status) -> ClientError {
    let err = envelope::remote_error(&status);
    error!(code = ?status.code(), %err, "rpc failed");
    ClientError::Remote(err)
}
