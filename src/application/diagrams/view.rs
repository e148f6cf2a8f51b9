use std::sync::RwLock;

use tokio::sync::watch;

use crate::infra::lock::{rw_read, rw_write};

const COMPONENT: &str = "application::diagrams::view";

/// Markup currently mounted in a preview surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSnapshot {
    pub html: String,
    /// Incremented by every mount; zero means nothing was mounted yet.
    pub generation: u64,
}

/// Preview surface with an explicit mount signal. Diagram activation waits
/// for [`MountedView::settled`] rather than guessing when markup is present.
pub struct MountedView {
    state: RwLock<MountSnapshot>,
    mounted: watch::Sender<u64>,
}

impl MountedView {
    pub fn new() -> Self {
        let (mounted, _) = watch::channel(0);
        Self {
            state: RwLock::new(MountSnapshot {
                html: String::new(),
                generation: 0,
            }),
            mounted,
        }
    }

    /// Replace the mounted markup and fire the settled signal.
    pub fn mount(&self, html: impl Into<String>) -> u64 {
        let generation = {
            let mut state = rw_write(&self.state, COMPONENT, "mount");
            state.html = html.into();
            state.generation += 1;
            state.generation
        };
        self.mounted.send_replace(generation);
        generation
    }

    /// Resolve once markup has been mounted, returning what is mounted now.
    pub async fn settled(&self) -> MountSnapshot {
        let mut mounted = self.mounted.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail here.
        let _ = mounted.wait_for(|generation| *generation > 0).await;
        self.snapshot()
    }

    pub fn snapshot(&self) -> MountSnapshot {
        rw_read(&self.state, COMPONENT, "snapshot").clone()
    }

    pub fn html(&self) -> String {
        rw_read(&self.state, COMPONENT, "html").html.clone()
    }

    pub fn generation(&self) -> u64 {
        rw_read(&self.state, COMPONENT, "generation").generation
    }

    /// Notified with the generation of every mount.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.mounted.subscribe()
    }

    /// Store activated markup if no newer mount happened meanwhile. Writing
    /// back is not a mount and does not bump the generation.
    pub(crate) fn write_back(&self, generation: u64, html: String) -> bool {
        let mut state = rw_write(&self.state, COMPONENT, "write_back");
        if state.generation != generation {
            return false;
        }
        state.html = html;
        true
    }
}

impl Default for MountedView {
    fn default() -> Self {
        Self::new()
    }
}
