//! Pipeline executor.
//!
//! Runs the transform stage set as one atomic call on the blocking pool. The
//! executor holds no per-call state: every call receives the source text and
//! the render config, and hands back either markup or an error fragment.

use std::{any::Any, sync::Arc, time::Duration, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::task::JoinError;
use tracing::{debug, warn};

use super::service::render_service;
use super::types::{RenderConfig, RenderError, RenderResult, RenderService};

const METRIC_RENDER_TOTAL: &str = "mdtools_render_total";
const METRIC_RENDER_FAILED_TOTAL: &str = "mdtools_render_failed_total";
const METRIC_RENDER_MS: &str = "mdtools_render_ms";

/// Asynchronous render entry point consumed by the scheduler and the worker.
/// Implementations never fail: errors are encoded as markup.
#[async_trait]
pub trait PreviewRenderer: Send + Sync {
    async fn render(&self, source: &str, config: &RenderConfig) -> RenderResult;
}

#[derive(Clone)]
pub struct RenderExecutor {
    service: Arc<dyn RenderService>,
    timeout: Option<Duration>,
}

impl RenderExecutor {
    pub fn new(service: Arc<dyn RenderService>) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    /// Executor over the process-wide comrak service.
    pub fn shared() -> Self {
        Self::new(render_service())
    }

    /// Abandon a call after `timeout`. The blocking computation keeps running
    /// to completion in the background; only its result is dropped.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|limit| !limit.is_zero());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the pipeline and surface the stage failure, if any.
    pub async fn try_render(
        &self,
        source: &str,
        config: &RenderConfig,
    ) -> Result<String, RenderError> {
        let service = Arc::clone(&self.service);
        let source = source.to_owned();
        let config = *config;

        let task = tokio::task::spawn_blocking(move || service.render(&source, &config));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(RenderError::TimedOut {
                        elapsed_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => task.await,
        };

        joined.map_err(aborted)?
    }

    /// Run the pipeline; failures are logged and turned into the error
    /// fragment so callers never handle a rejected render.
    pub async fn render(&self, source: &str, config: &RenderConfig) -> RenderResult {
        let started_at = Instant::now();
        counter!(METRIC_RENDER_TOTAL).increment(1);

        let outcome = self.try_render(source, config).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS).record(elapsed_ms);

        match outcome {
            Ok(html) => {
                debug!(
                    target = "application::render::runtime",
                    op = "render",
                    result = "ok",
                    elapsed_ms = elapsed_ms as u64,
                    source_bytes = source.len(),
                    html_bytes = html.len(),
                    "render completed"
                );
                RenderResult::rendered(html)
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILED_TOTAL).increment(1);
                warn!(
                    target = "application::render::runtime",
                    op = "render",
                    result = "error",
                    elapsed_ms = elapsed_ms as u64,
                    source_bytes = source.len(),
                    error = %err,
                    "render failed; emitting error fragment"
                );
                RenderResult::failed(err.to_string())
            }
        }
    }
}

#[async_trait]
impl PreviewRenderer for RenderExecutor {
    async fn render(&self, source: &str, config: &RenderConfig) -> RenderResult {
        RenderExecutor::render(self, source, config).await
    }
}

fn aborted(err: JoinError) -> RenderError {
    let message = if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "render task cancelled".to_string()
    };
    RenderError::Aborted { message }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "render stage panicked".to_string()
    }
}
