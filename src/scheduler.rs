//! The client-side scheduler proxy.
//!
//! [`RpcScheduler`] makes a remote scheduler look like a local object. It
//! owns one transport connection, resolves `-` to the previously used job id
//! before anything touches the network, and remembers the id of every job
//! it adds.

use serde_json::Value;

use crate::cache::{FileStore, JobIdCache, PreviousJobStore};
use crate::config::{ClientConfig, Endpoint};
use crate::error::{Result, RpcError};
use crate::job::{Job, JobId, JobRef, SchedulerState};
use crate::secret::AuthSecret;
use crate::transport::{self, Transport, TransportKind};

pub struct RpcScheduler {
    config: ClientConfig,
    cache: JobIdCache,
    /// `None` until `connect()` succeeds.
    conn: Option<Box<dyn Transport>>,
}

impl RpcScheduler {
    /// A disconnected client that keeps its previous job id in the per-user
    /// cache file.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_store(config, FileStore::user_default()?))
    }

    pub fn with_store(config: ClientConfig, store: impl PreviousJobStore + 'static) -> Self {
        Self {
            config,
            cache: JobIdCache::new(store),
            conn: None,
        }
    }

    /// Wraps an already open transport. The client starts out connected.
    pub fn with_transport(
        config: ClientConfig,
        store: impl PreviousJobStore + 'static,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            config,
            cache: JobIdCache::new(store),
            conn: Some(transport),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the configured transport.
    ///
    /// The shared secret is read from the environment here, not at
    /// construction time. An unset variable means an empty secret.
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Err(RpcError::AlreadyConnected);
        }
        tracing::debug!(
            endpoint = %self.config.endpoint,
            transport = %self.config.transport,
            "connect()"
        );
        let secret = match self.config.transport {
            TransportKind::Managed => AuthSecret::from_env(&self.config.secret_env),
            TransportKind::Direct => AuthSecret::default(),
        };
        let conn = transport::connect(&self.config, &secret).await?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Scheduler-wide status, copied into a local mapping.
    pub async fn state(&mut self) -> Result<SchedulerState> {
        tracing::debug!("state()");
        self.conn()?.state().await
    }

    pub async fn list_jobs(&mut self) -> Result<Vec<Job>> {
        tracing::debug!("list_jobs()");
        self.conn()?.list_jobs().await
    }

    pub async fn get_job(&mut self, job: impl Into<JobRef>) -> Result<Job> {
        let job = job.into();
        tracing::debug!("get_job({})", job);
        let job_id = self.resolve(job)?;
        self.conn()?.get_job(&job_id).await
    }

    /// Adds a job and remembers its id as the previous one.
    pub async fn add_job(&mut self, pipeline_filename: &str, interval: &str) -> Result<JobId> {
        tracing::debug!("add_job({}, {})", pipeline_filename, interval);
        let job_id = self.conn()?.add_job(pipeline_filename, interval).await?;
        self.cache.remember(&job_id)?;
        Ok(job_id)
    }

    pub async fn reschedule_job(&mut self, job: impl Into<JobRef>, interval: &str) -> Result<Job> {
        let job = job.into();
        tracing::debug!("reschedule_job({}, {})", job, interval);
        let job_id = self.resolve(job)?;
        self.conn()?.reschedule_job(&job_id, interval).await
    }

    pub async fn start_job(&mut self, job: impl Into<JobRef>) -> Result<Job> {
        let job = job.into();
        tracing::debug!("start_job({})", job);
        let job_id = self.resolve(job)?;
        self.conn()?.start_job(&job_id).await
    }

    /// Pauses the job. The scheduler keeps it and `start_job` resumes it.
    ///
    /// Note the remote method is `pause_job`; there is no remote stop.
    pub async fn stop_job(&mut self, job: impl Into<JobRef>) -> Result<Job> {
        let job = job.into();
        tracing::debug!("stop_job({})", job);
        let job_id = self.resolve(job)?;
        self.conn()?.pause_job(&job_id).await
    }

    /// Removes the job and returns its id. Whatever the scheduler answered
    /// besides success is discarded.
    pub async fn remove_job(&mut self, job: impl Into<JobRef>) -> Result<JobId> {
        let job = job.into();
        tracing::debug!("remove_job({})", job);
        let job_id = self.resolve(job)?;
        let _echo: Value = self.conn()?.remove_job(&job_id).await?;
        Ok(job_id)
    }

    /// Consumes the client and shuts the connection down.
    pub async fn close(mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => {
                tracing::debug!(endpoint = %self.config.endpoint, "close()");
                conn.close().await
            }
            None => Ok(()),
        }
    }

    /// Turns a [`JobRef`] into a concrete id. Purely local.
    fn resolve(&mut self, job: JobRef) -> Result<JobId> {
        match job {
            JobRef::Explicit(job_id) => Ok(job_id),
            JobRef::Previous => match self.cache.previous()? {
                Some(job_id) => {
                    tracing::debug!("using previous job_id {}", job_id);
                    Ok(job_id)
                }
                None => {
                    tracing::error!("No previous job id found.");
                    Err(RpcError::JobIdResolution)
                }
            },
        }
    }

    fn conn(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.conn.as_mut().ok_or(RpcError::NotConnected)
    }
}
