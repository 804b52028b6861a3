//! Terminal-state callbacks.
//!
//! Fire-and-forget POST of the final status to the submitter's
//! callback URI. Runs detached from the event loop; failures are
//! logged, never surfaced.

use bytes::Bytes;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use hermit_core::Task;

#[derive(Debug, Serialize)]
struct CallbackBody<'a> {
    time: i64,
    status: &'a str,
    task_id: &'a str,
}

/// Spawn a detached POST of the task's last status to its callback URI.
/// No-op when the URI or the status history is empty.
pub fn notify(task: &Task) {
    let Some(last) = task.status.last() else {
        return;
    };
    if task.callback_uri.is_empty() {
        return;
    }

    let body = CallbackBody {
        time: last.time,
        status: last.status.as_str(),
        task_id: &task.id,
    };
    let payload = match serde_json::to_vec(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "callback body serialization failed");
            return;
        }
    };

    let uri = task.callback_uri.clone();
    let task_id = task.id.clone();
    tokio::spawn(async move {
        match post(&uri, payload).await {
            Ok(status) if status.is_success() => {
                debug!(%task_id, %uri, "callback delivered");
            }
            Ok(status) => {
                warn!(%task_id, %uri, %status, "callback rejected");
            }
            Err(e) => {
                warn!(%task_id, %uri, error = %e, "callback delivery failed");
            }
        }
    });
}

async fn post(uri: &str, payload: Vec<u8>) -> Result<http::StatusCode, String> {
    let parsed: http::Uri = uri.parse().map_err(|e| format!("bad uri: {e}"))?;
    let host = parsed.host().ok_or_else(|| "uri without host".to_string())?;
    let port = parsed.port_u16().unwrap_or(80);
    let address = format!("{host}:{port}");

    let stream = TcpStream::connect(&address)
        .await
        .map_err(|e| e.to_string())?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    // Origin-form target; the authority goes in the host header.
    let target = parsed
        .path_and_query()
        .map_or_else(|| "/".to_string(), |p| p.as_str().to_string());
    let request = http::Request::builder()
        .method("POST")
        .uri(target)
        .header("host", address)
        .header("content-type", "application/json")
        .body(http_body_util::Full::new(Bytes::from(payload)))
        .map_err(|e| e.to_string())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| e.to_string())?;
    Ok(response.status())
}

#[cfg(test)]
mod tests {
    use super::*;

    use hermit_core::{Status, TaskState};

    #[test]
    fn body_shape() {
        let body = CallbackBody {
            time: 1700000000,
            status: "FAILED",
            task_id: "hermit-task.abc",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"time":1700000000,"status":"FAILED","task_id":"hermit-task.abc"}"#
        );
    }

    #[tokio::test]
    async fn notify_without_uri_or_status_is_a_no_op() {
        // Neither may panic or spawn anything that dials out.
        notify(&Task::default());

        let mut task = Task::default();
        task.update_status(Status { status: TaskState::Finished, time: 1 });
        notify(&task);
    }
}
