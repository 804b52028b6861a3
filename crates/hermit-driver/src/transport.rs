//! HTTP transport to the master's scheduler endpoint.
//!
//! A SUBSCRIBE call opens a chunked response that stays up for the life
//! of the subscription; events arrive as length-prefixed JSON records
//! (`<len>\n<payload>`). Every other call is a plain POST expecting
//! `202 Accepted`, tagged with the stream id the subscription response
//! handed back.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::types::{Call, Credentials, Event, FrameworkInfo};

const SCHEDULER_PATH: &str = "/api/v1/scheduler";
const STREAM_ID_HEADER: &str = "mesos-stream-id";
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How the driver reaches the master. The HTTP implementation is the
/// production one; tests swap in scripted transports.
pub trait MasterTransport: Send + Sync + 'static {
    /// Open a subscription and return the event stream. The stream ends
    /// when the master closes the connection.
    fn subscribe(
        &self,
        framework: &FrameworkInfo,
    ) -> impl Future<Output = DriverResult<mpsc::Receiver<Event>>> + Send;

    /// Send a non-subscribe call.
    fn call(&self, call: Call) -> impl Future<Output = DriverResult<()>> + Send;
}

// ── Record framing ─────────────────────────────────────────────────

/// Incremental decoder for length-prefixed records: a decimal byte
/// count, a newline, then that many payload bytes.
#[derive(Debug, Default)]
pub(crate) struct RecordDecoder {
    buffer: BytesMut,
}

impl RecordDecoder {
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete record, if one is buffered.
    pub(crate) fn next(&mut self) -> DriverResult<Option<Bytes>> {
        let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let len: usize = std::str::from_utf8(&self.buffer[..newline])
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| DriverError::Codec("malformed record length prefix".to_string()))?;
        if self.buffer.len() < newline + 1 + len {
            return Ok(None);
        }
        self.buffer.advance(newline + 1);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }
}

// ── HTTP transport ─────────────────────────────────────────────────

/// Transport over the master's v1 HTTP API.
pub struct HttpTransport {
    /// `host:port` of the master.
    address: String,
    credentials: Option<Credentials>,
    /// Stream id from the active subscription; attached to every
    /// subsequent call.
    stream_id: Mutex<Option<String>>,
    call_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from a master URL like `http://master:5050`.
    pub fn new(master_url: &str, credentials: Option<Credentials>) -> DriverResult<Self> {
        let address = master_url
            .strip_prefix("http://")
            .unwrap_or(master_url)
            .trim_end_matches('/');
        if address.is_empty() || address.contains("://") {
            return Err(DriverError::Address(master_url.to_string()));
        }
        Ok(Self {
            address: address.to_string(),
            credentials,
            stream_id: Mutex::new(None),
            call_timeout: Duration::from_secs(10),
        })
    }

    async fn connect(
        &self,
    ) -> DriverResult<hyper::client::conn::http1::SendRequest<http_body_util::Full<Bytes>>> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "master connection closed");
            }
        });
        Ok(sender)
    }

    fn request(&self, call: &Call) -> DriverResult<http::Request<http_body_util::Full<Bytes>>> {
        let body = serde_json::to_vec(call).map_err(|e| DriverError::Codec(e.to_string()))?;
        let mut builder = http::Request::builder()
            .method("POST")
            .uri(format!("http://{}{}", self.address, SCHEDULER_PATH))
            .header("host", &self.address)
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if let Some(id) = self.stream_id.lock().unwrap().as_deref() {
            builder = builder.header(STREAM_ID_HEADER, id);
        }
        builder
            .body(http_body_util::Full::new(Bytes::from(body)))
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}

impl MasterTransport for HttpTransport {
    async fn subscribe(&self, framework: &FrameworkInfo) -> DriverResult<mpsc::Receiver<Event>> {
        let call = Call::Subscribe {
            framework: framework.clone(),
            credentials: self.credentials.clone(),
        };
        // A fresh subscription must not carry the previous stream id.
        *self.stream_id.lock().unwrap() = None;
        let mut sender = self.connect().await?;
        let request = self.request(&call)?;

        let response = tokio::time::timeout(self.call_timeout, sender.send_request(request))
            .await
            .map_err(|_| DriverError::Connect("subscribe timed out".to_string()))?
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        if response.status() != http::StatusCode::OK {
            return Err(DriverError::MasterResponse(response.status()));
        }

        let stream_id = response
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *self.stream_id.lock().unwrap() = stream_id;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut body = response.into_body();
        tokio::spawn(async move {
            let mut decoder = RecordDecoder::default();
            loop {
                let frame = match body.frame().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(error = %e, "event stream read failed");
                        break;
                    }
                    None => break,
                };
                let Some(data) = frame.data_ref() else {
                    continue;
                };
                decoder.feed(data);
                loop {
                    match decoder.next() {
                        Ok(Some(record)) => match serde_json::from_slice::<Event>(&record) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping undecodable event"),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "event stream framing broken");
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn call(&self, call: Call) -> DriverResult<()> {
        let mut sender = self.connect().await?;
        let request = self.request(&call)?;
        let response = tokio::time::timeout(self.call_timeout, sender.send_request(request))
            .await
            .map_err(|_| DriverError::Connect("call timed out".to_string()))?
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        match response.status() {
            http::StatusCode::ACCEPTED | http::StatusCode::OK => Ok(()),
            status => Err(DriverError::MasterResponse(status)),
        }
    }
}
