//! Diagram rendering for mounted previews.

mod activation;
mod engine;
mod view;

pub use activation::{ActivationOptions, ActivationReport, DiagramActivator};
pub use engine::{
    DiagramEngine, DiagramEngineConfig, DiagramError, MermaidCliEngine, SecurityLevel,
    diagram_key,
};
pub use view::{MountSnapshot, MountedView};
