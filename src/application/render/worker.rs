//! Message-passing render worker.
//!
//! Requests carry the document content plus a caller-chosen id. Each request
//! is rendered independently and the id is echoed unchanged, so callers can
//! correlate responses that arrive out of order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use super::runtime::RenderExecutor;
use super::types::RenderConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub content: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerResponse {
    Rendered { html: String, id: String },
    Failed { error: String, id: String },
}

impl WorkerResponse {
    pub fn id(&self) -> &str {
        match self {
            WorkerResponse::Rendered { id, .. } | WorkerResponse::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("render worker has stopped")]
    Stopped,
    #[error("failed to encode worker response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("worker stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle for posting requests to a running worker.
#[derive(Clone)]
pub struct RenderWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
}

impl RenderWorker {
    /// Start a worker on the current runtime. The response stream ends once
    /// every handle is dropped and all accepted requests have been answered.
    pub fn spawn(
        executor: RenderExecutor,
        config: RenderConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerResponse>) {
        let (requests, mut incoming) = mpsc::unbounded_channel::<WorkerRequest>();
        let (responses, outgoing) = mpsc::unbounded_channel();
        let executor = Arc::new(executor);

        tokio::spawn(async move {
            while let Some(request) = incoming.recv().await {
                let executor = Arc::clone(&executor);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let response = answer(&executor, request, &config).await;
                    if responses.send(response).is_err() {
                        debug!(
                            target = "application::render::worker",
                            "response receiver dropped"
                        );
                    }
                });
            }
        });

        (Self { requests }, outgoing)
    }

    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests
            .send(request)
            .map_err(|_| WorkerError::Stopped)
    }
}

async fn answer(
    executor: &RenderExecutor,
    request: WorkerRequest,
    config: &RenderConfig,
) -> WorkerResponse {
    match executor.try_render(&request.content, config).await {
        Ok(html) => WorkerResponse::Rendered {
            html,
            id: request.id,
        },
        Err(err) => {
            warn!(
                target = "application::render::worker",
                id = %request.id,
                error = %err,
                "worker render failed"
            );
            WorkerResponse::Failed {
                error: err.to_string(),
                id: request.id,
            }
        }
    }
}

/// Speak the worker protocol as JSON lines: one request per input line, one
/// response per output line. Malformed lines are answered with a failure
/// carrying whatever id could be recovered.
pub async fn serve_json_lines<R, W>(
    executor: RenderExecutor,
    config: RenderConfig,
    reader: R,
    mut writer: W,
) -> Result<(), WorkerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (worker, mut responses) = RenderWorker::spawn(executor, config);
    let mut worker = Some(worker);
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line(), if worker.is_some() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<WorkerRequest>(&line) {
                        Ok(request) => {
                            if let Some(worker) = &worker {
                                worker.post(request)?;
                            }
                        }
                        Err(err) => {
                            let response = WorkerResponse::Failed {
                                error: format!("invalid request: {err}"),
                                id: recover_id(&line),
                            };
                            write_response(&mut writer, &response).await?;
                        }
                    },
                    None => worker = None,
                }
            }
            response = responses.recv() => match response {
                Some(response) => write_response(&mut writer, &response).await?,
                None => break,
            },
        }
    }

    writer.flush().await?;
    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &WorkerResponse) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_string(response)?;
    encoded.push('\n');
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn recover_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(str::to_owned))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::types::{RenderError, RenderService};
    use serde_json::json;

    struct Upper;

    impl RenderService for Upper {
        fn render(&self, source: &str, _config: &RenderConfig) -> Result<String, RenderError> {
            if source == "fail" {
                return Err(RenderError::Document {
                    message: "refused".into(),
                });
            }
            Ok(source.to_uppercase())
        }
    }

    fn executor() -> RenderExecutor {
        RenderExecutor::new(Arc::new(Upper))
    }

    #[test]
    fn responses_serialize_without_tags() {
        let rendered = WorkerResponse::Rendered {
            html: "<p>x</p>".into(),
            id: "7".into(),
        };
        let failed = WorkerResponse::Failed {
            error: "boom".into(),
            id: "8".into(),
        };

        assert_eq!(
            serde_json::to_value(&rendered).expect("encode"),
            json!({"html": "<p>x</p>", "id": "7"})
        );
        assert_eq!(
            serde_json::to_value(&failed).expect("encode"),
            json!({"error": "boom", "id": "8"})
        );
    }

    #[tokio::test]
    async fn every_request_is_answered_with_its_id() {
        let (worker, mut responses) = RenderWorker::spawn(executor(), RenderConfig::default());
        worker
            .post(WorkerRequest {
                content: "a".into(),
                id: "first".into(),
            })
            .expect("post");
        worker
            .post(WorkerRequest {
                content: "fail".into(),
                id: "second".into(),
            })
            .expect("post");
        drop(worker);

        let mut collected = Vec::new();
        while let Some(response) = responses.recv().await {
            collected.push(response);
        }
        collected.sort_by(|a, b| a.id().cmp(b.id()));

        assert_eq!(
            collected,
            vec![
                WorkerResponse::Rendered {
                    html: "A".into(),
                    id: "first".into(),
                },
                WorkerResponse::Failed {
                    error: "document processing failed: refused".into(),
                    id: "second".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn json_lines_session_answers_valid_and_malformed_lines() {
        let input = b"{\"content\":\"hi\",\"id\":\"1\"}\n\n{\"id\":\"2\"}\nnot json\n";
        let mut output = Vec::new();

        serve_json_lines(
            executor(),
            RenderConfig::default(),
            &input[..],
            &mut output,
        )
        .await
        .expect("session completes");

        let text = String::from_utf8(output).expect("utf8");
        let responses: Vec<WorkerResponse> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("response line"))
            .collect();

        assert_eq!(responses.len(), 3);
        assert!(responses.contains(&WorkerResponse::Rendered {
            html: "HI".into(),
            id: "1".into(),
        }));
        assert!(responses.iter().any(|r| matches!(
            r,
            WorkerResponse::Failed { id, .. } if id == "2"
        )));
        assert!(responses.iter().any(|r| matches!(
            r,
            WorkerResponse::Failed { id, error } if id.is_empty() && error.starts_with("invalid request")
        )));
    }
}
