use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{call_timed_out, closed, open_stream, RemoteCall, Reply, Timeouts, Transport};
use crate::config::Endpoint;
use crate::error::{Result, RpcError};

/// Unauthenticated link straight to the scheduler object.
///
/// Each request is one line of JSON tagged with a sequence number, and the
/// reply line must echo it back.
pub struct DirectTransport {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
    seq: u64,
    timeouts: Timeouts,
}

impl DirectTransport {
    pub async fn connect(endpoint: &Endpoint, timeouts: Timeouts) -> Result<Self> {
        let addr = endpoint.to_string();
        let stream = open_stream(endpoint, timeouts.connect).await?;
        tracing::debug!(%addr, "connected to scheduler");
        Ok(Self {
            addr,
            stream: Some(BufReader::new(stream)),
            seq: 0,
            timeouts,
        })
    }

    async fn round_trip(
        stream: &mut BufReader<TcpStream>,
        addr: &str,
        seq: u64,
        mut request: Value,
    ) -> Result<Value> {
        if let Value::Object(map) = &mut request {
            map.insert("seq".to_string(), Value::from(seq));
        }
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .await
            .map_err(|e| RpcError::connection(addr, e))?;
        stream
            .flush()
            .await
            .map_err(|e| RpcError::connection(addr, e))?;

        let mut buf = String::new();
        let read = stream
            .read_line(&mut buf)
            .await
            .map_err(|e| RpcError::connection(addr, e))?;
        // Zero bytes read means the scheduler hung up.
        if read == 0 {
            return Err(RpcError::connection(
                addr,
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            ));
        }

        let mut reply: Value = serde_json::from_str(buf.trim_end())?;
        let echoed = reply
            .as_object_mut()
            .and_then(|map| map.remove("seq"))
            .and_then(|seq| seq.as_u64());
        if echoed != Some(seq) {
            return Err(RpcError::Protocol(format!(
                "reply sequence {:?} does not match request {}",
                echoed, seq
            )));
        }
        let reply: Reply = serde_json::from_value(reply)?;
        reply.into_result()
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn call(&mut self, call: RemoteCall) -> Result<Value> {
        let stream = self.stream.as_mut().ok_or_else(|| closed(&self.addr))?;
        self.seq += 1;
        let request = serde_json::to_value(&call)?;
        let timeout = self.timeouts.call;
        let outcome =
            tokio::time::timeout(timeout, Self::round_trip(stream, &self.addr, self.seq, request))
                .await;
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
            tracing::debug!(addr = %self.addr, "closing scheduler connection");
            stream
                .get_mut()
                .shutdown()
                .await
                .map_err(|e| RpcError::connection(self.addr.clone(), e))?;
        }
        Ok(())
    }
}
