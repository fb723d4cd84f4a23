//! Transport bindings to a remote scheduler.
//!
//! Both bindings speak the same request/reply vocabulary ([`RemoteCall`] and
//! [`Reply`], JSON encoded) and differ only in framing and authentication:
//!
//! - [`ManagedTransport`] authenticates with a shared secret, then opens the
//!   registered `scheduler` object and addresses every call to it.
//! - [`DirectTransport`] talks to the scheduler object right away.
//!
//! Which one is used is decided by [`TransportKind`] at construction time.

mod direct;
pub mod handshake;
mod managed;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;

use crate::config::{ClientConfig, Endpoint};
use crate::error::{Result, RpcError};
use crate::job::{Job, JobId, SchedulerState};
use crate::secret::AuthSecret;

pub use direct::DirectTransport;
pub use managed::{ManagedTransport, SCHEDULER_TYPEID};

/// One remote method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum RemoteCall {
    State,
    ListJobs,
    GetJob {
        job_id: JobId,
    },
    AddJob {
        pipeline_filename: String,
        interval: String,
    },
    RescheduleJob {
        job_id: JobId,
        interval: String,
    },
    StartJob {
        job_id: JobId,
    },
    PauseJob {
        job_id: JobId,
    },
    RemoveJob {
        job_id: JobId,
    },
}

impl RemoteCall {
    pub fn method(&self) -> &'static str {
        match self {
            RemoteCall::State => "state",
            RemoteCall::ListJobs => "list_jobs",
            RemoteCall::GetJob { .. } => "get_job",
            RemoteCall::AddJob { .. } => "add_job",
            RemoteCall::RescheduleJob { .. } => "reschedule_job",
            RemoteCall::StartJob { .. } => "start_job",
            RemoteCall::PauseJob { .. } => "pause_job",
            RemoteCall::RemoveJob { .. } => "remove_job",
        }
    }
}

/// Error reported by the scheduler for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: String,
    pub message: String,
}

/// The scheduler's answer to one [`RemoteCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Value),
    Error(RemoteFault),
}

impl Reply {
    pub fn into_result(self) -> Result<Value> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(RemoteFault { kind, message }) => {
                Err(RpcError::Transport { kind, message })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Authenticated object manager.
    #[default]
    Managed,
    /// Unauthenticated object link.
    Direct,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportKind::Managed => write!(f, "managed"),
            TransportKind::Direct => write!(f, "direct"),
        }
    }
}

/// Timeout policy owned by the transport. The façade imposes none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            call: Duration::from_secs(30),
        }
    }
}

/// A live connection to a scheduler.
///
/// Every method is one blocking round trip. Results are decoded into owned
/// values, so nothing returned here touches the network again.
#[async_trait]
pub trait Transport: Send {
    /// Sends one call and waits for its reply.
    async fn call(&mut self, call: RemoteCall) -> Result<Value>;

    /// Shuts the connection down. Further calls fail.
    async fn close(&mut self) -> Result<()>;

    async fn state(&mut self) -> Result<SchedulerState> {
        decode(self.call(RemoteCall::State).await?)
    }

    async fn list_jobs(&mut self) -> Result<Vec<Job>> {
        decode(self.call(RemoteCall::ListJobs).await?)
    }

    async fn get_job(&mut self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        decode(self.call(RemoteCall::GetJob { job_id }).await?)
    }

    async fn add_job(&mut self, pipeline_filename: &str, interval: &str) -> Result<JobId> {
        let call = RemoteCall::AddJob {
            pipeline_filename: pipeline_filename.to_string(),
            interval: interval.to_string(),
        };
        decode(self.call(call).await?)
    }

    async fn reschedule_job(&mut self, job_id: &str, interval: &str) -> Result<Job> {
        let call = RemoteCall::RescheduleJob {
            job_id: job_id.to_string(),
            interval: interval.to_string(),
        };
        decode(self.call(call).await?)
    }

    async fn start_job(&mut self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        decode(self.call(RemoteCall::StartJob { job_id }).await?)
    }

    async fn pause_job(&mut self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        decode(self.call(RemoteCall::PauseJob { job_id }).await?)
    }

    /// Returns whatever the scheduler echoes back for the removed job.
    async fn remove_job(&mut self, job_id: &str) -> Result<Value> {
        let job_id = job_id.to_string();
        self.call(RemoteCall::RemoveJob { job_id }).await
    }
}

/// Opens the transport `config` asks for.
///
/// The secret is only consulted by the managed binding.
pub async fn connect(config: &ClientConfig, secret: &AuthSecret) -> Result<Box<dyn Transport>> {
    let endpoint = &config.endpoint;
    match config.transport {
        TransportKind::Managed => Ok(Box::new(
            ManagedTransport::connect_with_env(endpoint, secret, &config.secret_env, config.timeouts)
                .await?,
        )),
        TransportKind::Direct => Ok(Box::new(
            DirectTransport::connect(endpoint, config.timeouts).await?,
        )),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

async fn open_stream(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addr = endpoint.to_string();
    let outcome = tokio::time::timeout(timeout, TcpStream::connect(&addr)).await;
    let stream = match outcome {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(RpcError::connection(addr, e)),
        Err(_) => {
            return Err(RpcError::connection(
                addr,
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            ))
        }
    };
    stream
        .set_nodelay(true)
        .map_err(|e| RpcError::connection(endpoint.to_string(), e))?;
    Ok(stream)
}

fn closed(addr: &str) -> RpcError {
    RpcError::connection(
        addr,
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection already closed"),
    )
}

fn call_timed_out(call: &RemoteCall, timeout: Duration) -> RpcError {
    RpcError::Transport {
        kind: "Timeout".to_string(),
        message: format!("{} did not answer within {:?}", call.method(), timeout),
    }
}
