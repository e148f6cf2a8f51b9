//! Markdown preview rendering.
//!
//! The transform stage set is pure: it accepts markdown input plus an explicit
//! render config and produces deterministic HTML. Scheduling, staleness and
//! message passing live in the layers around it.

mod runtime;
mod scheduler;
mod service;
mod types;
mod worker;

pub use runtime::{PreviewRenderer, RenderExecutor};
pub use scheduler::{
    AppliedRender, Offer, RenderScheduler, SchedulerHandle, SchedulerStats, SequenceGate,
};
pub use service::{
    ComrakRenderService, RenderConfigError, RenderPipelineConfig, configure_render_service,
    render_service,
};
pub use types::{
    DIAGRAM_CLASS, DIAGRAM_MARKER, ParseThemeError, RenderConfig, RenderError, RenderRequest,
    RenderResult, RenderService, Theme, error_fragment,
};
pub use worker::{RenderWorker, WorkerError, WorkerRequest, WorkerResponse, serve_json_lines};

pub(crate) use types::escape_html;
