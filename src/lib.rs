//! rsched: RPC client for a remote job scheduler.

// Serde helper module.
mod serde;
// Previous job id cache.
pub mod cache;
// Command line arguments and configuration.
pub mod config;
// Error handling.
pub mod error;
// How to represent jobs and job references.
pub mod job;
// The scheduler proxy.
pub mod scheduler;
// Shared secret handling.
pub mod secret;
// Transport bindings.
pub mod transport;

pub use cache::{FileStore, JobIdCache, MemoryStore, PreviousJobStore};
pub use config::{ClientConfig, Command, Config, Endpoint, FileConfig};
pub use error::{Result, RpcError};
pub use job::{Job, JobId, JobRef, JobStatus, SchedulerState};
pub use scheduler::RpcScheduler;
pub use secret::AuthSecret;
pub use transport::{DirectTransport, ManagedTransport, RemoteCall, Reply, Timeouts, Transport, TransportKind};
