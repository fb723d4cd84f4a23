//! Jobs as seen from the client side.
//!
//! Everything here is plain owned data. Values decoded from a reply never
//! keep a handle into the connection they came from.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier assigned to a job by the scheduler.
pub type JobId = String;

/// Scheduler-wide status fields, copied out of the reply.
pub type SchedulerState = BTreeMap<String, Value>;

/// What the caller wants to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    /// A concrete job id, used verbatim.
    Explicit(JobId),
    /// Whatever job id was cached last. Written as `-` on the command line.
    Previous,
}

impl JobRef {
    pub const PREVIOUS: &'static str = "-";
}

impl FromStr for JobRef {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::PREVIOUS {
            Ok(JobRef::Previous)
        } else {
            Ok(JobRef::Explicit(s.to_string()))
        }
    }
}

impl From<&str> for JobRef {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(job) => job,
            Err(never) => match never {},
        }
    }
}

impl From<String> for JobRef {
    fn from(s: String) -> Self {
        if s == Self::PREVIOUS {
            JobRef::Previous
        } else {
            JobRef::Explicit(s)
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobRef::Explicit(id) => write!(f, "{}", id),
            JobRef::Previous => write!(f, "{}", Self::PREVIOUS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Paused,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A job record as returned by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Pipeline file the job runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_time: Option<String>,
    #[serde(default)]
    pub status: JobStatus,
    /// Any other fields the scheduler reports.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Job {
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == JobStatus::Paused
    }
}
