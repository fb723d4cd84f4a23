//! End-to-end tests against an in-process fake scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use rsched_rpc::transport::handshake::{answer_challenge, deliver_challenge, read_frame, write_frame};
use rsched_rpc::transport::SCHEDULER_TYPEID;
use rsched_rpc::{
    AuthSecret, ClientConfig, FileStore, JobRef, MemoryStore, PreviousJobStore, RemoteCall, Reply, RpcError,
    RpcScheduler, Timeouts, TransportKind,
};

/// Scheduler state shared by every connection to one fake server.
struct FakeScheduler {
    jobs: BTreeMap<String, Value>,
    next_id: u32,
    /// Remote method names in the order they arrived.
    calls: Vec<String>,
}

impl FakeScheduler {
    fn new(first_id: u32) -> Self {
        Self {
            jobs: BTreeMap::new(),
            next_id: first_id,
            calls: vec![],
        }
    }

    fn lookup_error(job_id: &str) -> Reply {
        Reply::Error(rsched_rpc::transport::RemoteFault {
            kind: "JobLookupError".to_string(),
            message: format!("No job by the id of {} was found", job_id),
        })
    }

    fn set_field(&mut self, job_id: &str, key: &str, value: Value) -> Reply {
        match self.jobs.get_mut(job_id) {
            Some(job) => {
                job[key] = value;
                Reply::Ok(job.clone())
            }
            None => Self::lookup_error(job_id),
        }
    }

    fn handle(&mut self, call: RemoteCall) -> Reply {
        self.calls.push(call.method().to_string());
        match call {
            RemoteCall::State => Reply::Ok(json!({"running": true, "job_count": self.jobs.len()})),
            RemoteCall::ListJobs => Reply::Ok(Value::Array(self.jobs.values().cloned().collect())),
            RemoteCall::GetJob { job_id } => match self.jobs.get(&job_id) {
                Some(job) => Reply::Ok(job.clone()),
                None => Self::lookup_error(&job_id),
            },
            RemoteCall::AddJob {
                pipeline_filename,
                interval,
            } => {
                let job_id = format!("job-{}", self.next_id);
                self.next_id += 1;
                self.jobs.insert(
                    job_id.clone(),
                    json!({
                        "id": job_id,
                        "pipeline": pipeline_filename,
                        "interval": interval,
                        "status": "paused",
                    }),
                );
                Reply::Ok(json!(job_id))
            }
            RemoteCall::RescheduleJob { job_id, interval } => {
                self.set_field(&job_id, "interval", json!(interval))
            }
            RemoteCall::StartJob { job_id } => self.set_field(&job_id, "status", json!("running")),
            RemoteCall::PauseJob { job_id } => self.set_field(&job_id, "status", json!("paused")),
            RemoteCall::RemoveJob { job_id } => match self.jobs.remove(&job_id) {
                Some(_) => Reply::Ok(json!(job_id)),
                None => Self::lookup_error(&job_id),
            },
        }
    }
}

type Shared = Arc<Mutex<FakeScheduler>>;

fn protocol_error(message: &str) -> Reply {
    Reply::Error(rsched_rpc::transport::RemoteFault {
        kind: "ProtocolError".to_string(),
        message: message.to_string(),
    })
}

async fn serve_managed(mut sock: TcpStream, secret: Arc<String>, scheduler: Shared) {
    let secret = AuthSecret::new(secret.as_str());
    if !deliver_challenge(&mut sock, &secret).await.unwrap_or(false) {
        return;
    }
    if !answer_challenge(&mut sock, &secret).await.unwrap_or(false) {
        return;
    }
    while let Ok(frame) = read_frame(&mut sock).await {
        let mut request: Value = serde_json::from_slice(&frame).unwrap();
        let reply = if let Some(typeid) = request.get("open") {
            if typeid == SCHEDULER_TYPEID {
                Reply::Ok(json!("scheduler-0"))
            } else {
                protocol_error("unknown typeid")
            }
        } else {
            let ident = request.as_object_mut().unwrap().remove("ident");
            if ident != Some(json!("scheduler-0")) {
                protocol_error("unknown ident")
            } else {
                let call: RemoteCall = serde_json::from_value(request).unwrap();
                scheduler.lock().await.handle(call)
            }
        };
        let payload = serde_json::to_vec(&reply).unwrap();
        if write_frame(&mut sock, &payload).await.is_err() {
            break;
        }
    }
}

async fn serve_direct(sock: TcpStream, scheduler: Shared) {
    let mut sock = BufReader::new(sock);
    let mut line = String::new();
    loop {
        line.clear();
        match sock.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let mut request: Value = serde_json::from_str(line.trim_end()).unwrap();
        let seq = request.as_object_mut().unwrap().remove("seq").unwrap();
        let call: RemoteCall = serde_json::from_value(request).unwrap();
        let reply = scheduler.lock().await.handle(call);
        let mut reply = serde_json::to_value(&reply).unwrap();
        reply["seq"] = seq;
        let mut out = serde_json::to_vec(&reply).unwrap();
        out.push(b'\n');
        if sock.get_mut().write_all(&out).await.is_err() {
            break;
        }
    }
}

/// Starts a fake scheduler on an ephemeral port and returns the port.
async fn spawn_server(kind: TransportKind, secret: &str, scheduler: Shared) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let secret = Arc::new(secret.to_string());
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            let scheduler = Arc::clone(&scheduler);
            match kind {
                TransportKind::Managed => {
                    tokio::spawn(serve_managed(sock, Arc::clone(&secret), scheduler));
                }
                TransportKind::Direct => {
                    tokio::spawn(serve_direct(sock, scheduler));
                }
            }
        }
    });
    port
}

fn fake_scheduler(first_id: u32) -> Shared {
    Arc::new(Mutex::new(FakeScheduler::new(first_id)))
}

/// Each test gets its own variable so parallel tests don't clobber each other.
fn config(kind: TransportKind, port: u16, secret_env: &str) -> ClientConfig {
    ClientConfig::new("127.0.0.1", port)
        .with_transport(kind)
        .with_secret_env(secret_env)
}

#[tokio::test]
async fn test_managed_lifecycle_with_previous_job() {
    let scheduler = fake_scheduler(42);
    let port = spawn_server(TransportKind::Managed, "s3cret", Arc::clone(&scheduler)).await;
    std::env::set_var("RSCHED_E2E_LIFECYCLE", "s3cret");
    let store = MemoryStore::new();
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Managed, port, "RSCHED_E2E_LIFECYCLE"),
        store.clone(),
    );
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let job_id = client.add_job("pipeline.yaml", "30s").await.unwrap();
    assert_eq!(job_id, "job-42");
    assert_eq!(store.load().unwrap(), "job-42");

    let job = client.start_job("-").await.unwrap();
    assert_eq!(job.id, "job-42");
    assert!(job.is_running());

    let job = client.reschedule_job("-", "1m").await.unwrap();
    assert_eq!(job.interval.as_deref(), Some("1m"));

    let job = client.stop_job("-").await.unwrap();
    assert!(job.is_paused());

    let jobs = client.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].pipeline.as_deref(), Some("pipeline.yaml"));

    assert_eq!(client.remove_job("-").await.unwrap(), "job-42");
    assert!(client.list_jobs().await.unwrap().is_empty());
    client.close().await.unwrap();

    let calls = scheduler.lock().await.calls.clone();
    assert_eq!(
        calls,
        vec![
            "add_job",
            "start_job",
            "reschedule_job",
            "pause_job",
            "list_jobs",
            "remove_job",
            "list_jobs"
        ]
    );
}

#[tokio::test]
async fn test_managed_unset_secret_is_rejected() {
    let port = spawn_server(TransportKind::Managed, "s3cret", fake_scheduler(1)).await;
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Managed, port, "RSCHED_E2E_NEVER_SET"),
        MemoryStore::new(),
    );
    match client.connect().await {
        Err(RpcError::Authentication { hint }) => {
            assert!(hint.contains("RSCHED_E2E_NEVER_SET"));
            assert!(!hint.contains("s3cret"));
        }
        other => panic!("expected authentication error, got {:?}", other.err()),
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_managed_wrong_secret_is_rejected() {
    let port = spawn_server(TransportKind::Managed, "s3cret", fake_scheduler(1)).await;
    std::env::set_var("RSCHED_E2E_WRONG", "hunter2");
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Managed, port, "RSCHED_E2E_WRONG"),
        MemoryStore::new(),
    );
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RpcError::Authentication { .. }));
    assert!(!err.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_direct_needs_no_secret() {
    let scheduler = fake_scheduler(1);
    let port = spawn_server(TransportKind::Direct, "", Arc::clone(&scheduler)).await;
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        MemoryStore::new(),
    );
    client.connect().await.unwrap();
    assert_eq!(client.add_job("a.yaml", "5m").await.unwrap(), "job-1");
    assert_eq!(client.add_job("b.yaml", "5m").await.unwrap(), "job-2");
    assert!(client.start_job("job-1").await.unwrap().is_running());
    assert_eq!(client.get_job("-").await.unwrap().id, "job-2");
    let job = client.stop_job(JobRef::Explicit("job-1".to_string())).await.unwrap();
    assert!(job.is_paused());
    assert_eq!(
        scheduler.lock().await.calls.last().map(String::as_str),
        Some("pause_job")
    );
}

#[tokio::test]
async fn test_state_survives_close() {
    let port = spawn_server(TransportKind::Direct, "", fake_scheduler(1)).await;
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        MemoryStore::new(),
    );
    client.connect().await.unwrap();
    client.add_job("a.yaml", "5m").await.unwrap();
    let state = client.state().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(state.get("running"), Some(&json!(true)));
    assert_eq!(state.get("job_count"), Some(&json!(1)));
}

#[tokio::test]
async fn test_previous_job_is_user_scoped_not_instance_scoped() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join(".rsched-previous-job");
    let port = spawn_server(TransportKind::Direct, "", fake_scheduler(1)).await;

    let mut a = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        FileStore::new(&cache),
    );
    a.connect().await.unwrap();
    assert_eq!(a.add_job("pipeline.yaml", "30s").await.unwrap(), "job-1");
    a.close().await.unwrap();
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), "job-1");

    let mut b = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        FileStore::new(&cache),
    );
    b.connect().await.unwrap();
    assert_eq!(b.get_job("-").await.unwrap().id, "job-1");
}

#[tokio::test]
async fn test_concurrent_clients_last_writer_wins() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join(".rsched-previous-job");
    let port = spawn_server(TransportKind::Direct, "", fake_scheduler(1)).await;

    let clients = (0..4).map(|i| {
        let cache = cache.clone();
        async move {
            let mut client = RpcScheduler::with_store(
                config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
                FileStore::new(cache),
            );
            client.connect().await.unwrap();
            client.add_job(&format!("p{}.yaml", i), "1m").await.unwrap()
        }
    });
    let added = futures::future::join_all(clients).await;

    // No locking: the file holds exactly one of the ids, whole.
    let cached = std::fs::read_to_string(&cache).unwrap();
    assert!(added.contains(&cached), "{} not in {:?}", cached, added);
}

#[tokio::test]
async fn test_unresolvable_previous_touches_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join(".rsched-previous-job");
    let port = spawn_server(TransportKind::Direct, "", fake_scheduler(1)).await;
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        FileStore::new(&cache),
    );
    client.connect().await.unwrap();
    assert!(matches!(client.start_job("-").await, Err(RpcError::JobIdResolution)));
    assert!(cache.exists());
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), "");
}

#[tokio::test]
async fn test_remote_errors_pass_through() {
    let port = spawn_server(TransportKind::Direct, "", fake_scheduler(1)).await;
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        MemoryStore::new(),
    );
    client.connect().await.unwrap();
    let err = client.get_job("job-404").await.unwrap_err();
    assert!(err.is_transport());
    match err {
        RpcError::Transport { kind, message } => {
            assert_eq!(kind, "JobLookupError");
            assert!(message.contains("job-404"));
        }
        other => panic!("unexpected {:?}", other),
    }
    // A failed call does not poison the connection.
    assert!(client.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_remote_call_leaves_cache_alone() {
    let scheduler = fake_scheduler(1);
    let port = spawn_server(TransportKind::Direct, "", Arc::clone(&scheduler)).await;
    let store = MemoryStore::with_previous("job-9");
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        store.clone(),
    );
    client.connect().await.unwrap();
    assert!(client.remove_job("job-404").await.is_err());
    assert_eq!(store.load().unwrap(), "job-9");
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    for kind in [TransportKind::Managed, TransportKind::Direct] {
        let mut client =
            RpcScheduler::with_store(config(kind, port, "RSCHED_E2E_NEVER_SET"), MemoryStore::new());
        match client.connect().await {
            Err(RpcError::Connection { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{}", port)),
            other => panic!("expected connection error, got {:?}", other.err()),
        }
    }
}

#[tokio::test]
async fn test_silent_scheduler_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accept and hold connections open without ever answering.
    tokio::spawn(async move {
        let mut held = vec![];
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });
    let timeouts = Timeouts {
        connect: Duration::from_millis(500),
        call: Duration::from_millis(200),
    };
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET").with_timeouts(timeouts),
        MemoryStore::new(),
    );
    client.connect().await.unwrap();
    match client.state().await {
        Err(RpcError::Transport { kind, .. }) => assert_eq!(kind, "Timeout"),
        other => panic!("expected timeout, got {:?}", other),
    }
    // The stream is abandoned after a timeout rather than reused.
    assert!(matches!(client.state().await, Err(RpcError::Connection { .. })));

    // The managed handshake is bounded by the connect timeout.
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Managed, port, "RSCHED_E2E_NEVER_SET").with_timeouts(timeouts),
        MemoryStore::new(),
    );
    assert!(matches!(client.connect().await, Err(RpcError::Connection { .. })));
}

#[tokio::test]
async fn test_managed_hangup_during_handshake_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accept and drop every socket before any challenge is sent.
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            drop(sock);
        }
    });
    std::env::set_var("RSCHED_E2E_HANGUP", "s3cret");
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Managed, port, "RSCHED_E2E_HANGUP"),
        MemoryStore::new(),
    );
    let err = client.connect().await.unwrap_err();
    assert!(!err.is_transport());
    match err {
        RpcError::Connection { addr, .. } => assert_eq!(addr, format!("127.0.0.1:{}", port)),
        other => panic!("expected connection error, got {:?}", other),
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_direct_sequence_mismatch_is_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Answers every request with a sequence number it never sent.
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sock = BufReader::new(sock);
                let mut line = String::new();
                while matches!(sock.read_line(&mut line).await, Ok(n) if n > 0) {
                    let request: Value = serde_json::from_str(line.trim_end()).unwrap();
                    let seq = request["seq"].as_u64().unwrap();
                    let mut out = serde_json::to_vec(&json!({"ok": null, "seq": seq + 100})).unwrap();
                    out.push(b'\n');
                    if sock.get_mut().write_all(&out).await.is_err() {
                        break;
                    }
                    line.clear();
                }
            });
        }
    });
    let mut client = RpcScheduler::with_store(
        config(TransportKind::Direct, port, "RSCHED_E2E_NEVER_SET"),
        MemoryStore::new(),
    );
    client.connect().await.unwrap();
    let err = client.state().await.unwrap_err();
    assert!(err.is_transport());
    match err {
        RpcError::Protocol(message) => assert!(message.contains("sequence")),
        other => panic!("expected protocol error, got {:?}", other),
    }
}
