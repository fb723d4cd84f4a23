use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::handshake::{authenticate, read_frame, write_frame};
use super::{call_timed_out, closed, open_stream, RemoteCall, Reply, Timeouts, Transport};
use crate::config::Endpoint;
use crate::error::{Result, RpcError};
use crate::secret::{AuthSecret, DEFAULT_SECRET_ENV};

/// Shared-object type the scheduler registers with its manager.
pub const SCHEDULER_TYPEID: &str = "scheduler";

/// Authenticated connection to a scheduler's object manager.
pub struct ManagedTransport {
    addr: String,
    stream: Option<TcpStream>,
    /// Handle of the scheduler object handed out by the manager.
    ident: String,
    timeouts: Timeouts,
}

impl ManagedTransport {
    pub async fn connect(endpoint: &Endpoint, secret: &AuthSecret, timeouts: Timeouts) -> Result<Self> {
        Self::connect_with_env(endpoint, secret, DEFAULT_SECRET_ENV, timeouts).await
    }

    /// Like [`ManagedTransport::connect`], naming `secret_env` as the source
    /// of the secret in authentication diagnostics.
    pub async fn connect_with_env(
        endpoint: &Endpoint,
        secret: &AuthSecret,
        secret_env: &str,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let addr = endpoint.to_string();
        let mut stream = open_stream(endpoint, timeouts.connect).await?;

        let handshake = async {
            authenticate(&mut stream, &addr, secret, secret_env).await?;
            open_object(&mut stream, &addr).await
        };
        let outcome = tokio::time::timeout(timeouts.connect, handshake).await;
        let ident = match outcome {
            Ok(Ok(ident)) => ident,
            Ok(Err(e)) => {
                if let RpcError::Authentication { hint } = &e {
                    tracing::error!(%addr, secret = %secret, "{}", hint);
                }
                return Err(e);
            }
            Err(_) => {
                return Err(RpcError::connection(
                    addr,
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
                ))
            }
        };

        tracing::debug!(%addr, %ident, "connected to scheduler manager");
        Ok(Self {
            addr,
            stream: Some(stream),
            ident,
            timeouts,
        })
    }

    async fn round_trip(stream: &mut TcpStream, addr: &str, request: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(request)?;
        write_frame(stream, &payload)
            .await
            .map_err(|e| RpcError::connection(addr, e))?;
        let frame = read_frame(stream)
            .await
            .map_err(|e| RpcError::connection(addr, e))?;
        let reply: Reply = serde_json::from_slice(&frame)?;
        reply.into_result()
    }
}

/// Asks the manager for a proxy to the registered scheduler object.
async fn open_object(stream: &mut TcpStream, addr: &str) -> Result<String> {
    let request = json!({ "open": SCHEDULER_TYPEID });
    match ManagedTransport::round_trip(stream, addr, &request).await? {
        Value::String(ident) => Ok(ident),
        other => Err(RpcError::Protocol(format!(
            "expected an object ident for '{}', got {}",
            SCHEDULER_TYPEID, other
        ))),
    }
}

#[async_trait]
impl Transport for ManagedTransport {
    async fn call(&mut self, call: RemoteCall) -> Result<Value> {
        let stream = self.stream.as_mut().ok_or_else(|| closed(&self.addr))?;
        let mut request = serde_json::to_value(&call)?;
        if let Value::Object(map) = &mut request {
            map.insert("ident".to_string(), Value::String(self.ident.clone()));
        }
        let timeout = self.timeouts.call;
        let outcome = tokio::time::timeout(timeout, Self::round_trip(stream, &self.addr, &request)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // A late reply would desynchronise the stream.
                self.stream = None;
                Err(call_timed_out(&call, timeout))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "closing scheduler manager connection");
            stream
                .shutdown()
                .await
                .map_err(|e| RpcError::connection(self.addr.clone(), e))?;
        }
        Ok(())
    }
}
