//! Render scheduler for one editor instance.
//!
//! Content changes are numbered with a strictly increasing sequence, bursts are
//! coalesced within the debounce window, and completed renders pass through a
//! [`SequenceGate`] before they reach the preview channel. Renders may overlap;
//! a result older than the newest applied one is dropped at apply time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::{Instant, sleep_until},
};
use tracing::{debug, warn};

use super::runtime::PreviewRenderer;
use super::types::{RenderConfig, RenderResult};

const METRIC_STALE_DISCARDED_TOTAL: &str = "mdtools_render_stale_discarded_total";

/// Verdict for a completed render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Applied,
    Stale,
}

/// Apply-time filter keeping applied sequences non-decreasing.
#[derive(Debug, Default, Clone)]
pub struct SequenceGate {
    highest_applied: Option<u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, sequence: u64) -> Offer {
        match self.highest_applied {
            Some(highest) if sequence < highest => Offer::Stale,
            _ => {
                self.highest_applied = Some(sequence);
                Offer::Applied
            }
        }
    }

    pub fn highest_applied(&self) -> Option<u64> {
        self.highest_applied
    }
}

/// The render currently shown in the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRender {
    /// Zero until the first render has been applied.
    pub sequence: u64,
    pub result: RenderResult,
    pub config: RenderConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub applied: u64,
    pub stale_discarded: u64,
}

#[derive(Default)]
struct StatsCounters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    applied: AtomicU64,
    stale_discarded: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Submit { sequence: u64, source: String },
    SetConfig { sequence: u64, config: RenderConfig },
    Flush,
}

/// Cloneable handle feeding the scheduler task. The task stops once every
/// handle is dropped and the in-flight renders have settled.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_sequence: Arc<AtomicU64>,
    stats: Arc<StatsCounters>,
}

impl SchedulerHandle {
    /// Record a content change and return its request sequence.
    pub fn submit(&self, source: impl Into<String>) -> u64 {
        let sequence = self.allocate();
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Submit {
            sequence,
            source: source.into(),
        });
        sequence
    }

    /// Switch the render config; the latest source is rendered again even
    /// when it has not changed.
    pub fn set_config(&self, config: RenderConfig) -> u64 {
        let sequence = self.allocate();
        self.send(Command::SetConfig { sequence, config });
        sequence
    }

    /// Dispatch the pending request without waiting for the debounce window.
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    fn allocate(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(
                target = "application::render::scheduler",
                "scheduler task has stopped; request ignored"
            );
        }
    }
}

pub struct RenderScheduler {
    renderer: Arc<dyn PreviewRenderer>,
    debounce: Duration,
    config: RenderConfig,
    config_sequence: u64,
    latest_source: String,
    source_sequence: u64,
    highest_received: u64,
    pending: Option<u64>,
    deadline: Option<Instant>,
    gate: SequenceGate,
    in_flight: JoinSet<(u64, RenderConfig, RenderResult)>,
    applied: watch::Sender<AppliedRender>,
    stats: Arc<StatsCounters>,
}

impl RenderScheduler {
    /// Start the scheduler task on the current tokio runtime.
    pub fn spawn(
        renderer: Arc<dyn PreviewRenderer>,
        config: RenderConfig,
        debounce: Duration,
    ) -> (SchedulerHandle, watch::Receiver<AppliedRender>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (applied, applied_rx) = watch::channel(AppliedRender {
            sequence: 0,
            result: RenderResult::rendered(String::new()),
            config,
        });
        let stats = Arc::new(StatsCounters::default());

        let scheduler = RenderScheduler {
            renderer,
            debounce,
            config,
            config_sequence: 0,
            latest_source: String::new(),
            source_sequence: 0,
            highest_received: 0,
            pending: None,
            deadline: None,
            gate: SequenceGate::new(),
            in_flight: JoinSet::new(),
            applied,
            stats: Arc::clone(&stats),
        };
        tokio::spawn(scheduler.run(receiver));

        let handle = SchedulerHandle {
            commands,
            next_sequence: Arc::new(AtomicU64::new(0)),
            stats,
        };
        (handle, applied_rx)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.deadline;
            let debounce_elapsed = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = debounce_elapsed => self.dispatch(),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok((sequence, config, result)) => self.apply(sequence, config, result),
                        Err(err) => warn!(
                            target = "application::render::scheduler",
                            error = %err,
                            "render task failed to join"
                        ),
                    }
                }
            }
        }

        // The final submission is never dropped.
        if self.pending.is_some() {
            self.dispatch();
        }
        while let Some(joined) = self.in_flight.join_next().await {
            if let Ok((sequence, config, result)) = joined {
                self.apply(sequence, config, result);
            }
        }
        debug!(
            target = "application::render::scheduler",
            highest_applied = self.gate.highest_applied(),
            "scheduler stopped"
        );
    }

    // Handles may be cloned across tasks, so commands can arrive out of
    // sequence order. The newest source and the newest config win, and a
    // dispatch always carries the highest sequence seen so far.
    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { sequence, source } => {
                if sequence <= self.source_sequence {
                    debug!(
                        target = "application::render::scheduler",
                        sequence,
                        newest = self.source_sequence,
                        "late submission ignored"
                    );
                    return;
                }
                self.source_sequence = sequence;
                self.latest_source = source;
                self.mark_pending(sequence);
                self.deadline = Some(Instant::now() + self.debounce);
            }
            Command::SetConfig { sequence, config } => {
                if sequence <= self.config_sequence {
                    return;
                }
                self.config_sequence = sequence;
                self.config = config;
                self.mark_pending(sequence);
                self.deadline = Some(Instant::now());
            }
            Command::Flush => {
                if self.pending.is_some() {
                    self.deadline = Some(Instant::now());
                }
            }
        }
    }

    fn mark_pending(&mut self, sequence: u64) {
        self.highest_received = self.highest_received.max(sequence);
        self.pending = Some(self.highest_received);
    }

    fn dispatch(&mut self) {
        self.deadline = None;
        let Some(sequence) = self.pending.take() else {
            return;
        };

        let renderer = Arc::clone(&self.renderer);
        let source = self.latest_source.clone();
        let config = self.config;
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(
            target = "application::render::scheduler",
            sequence,
            source_bytes = source.len(),
            in_flight = self.in_flight.len() + 1,
            "dispatching render"
        );

        self.in_flight.spawn(async move {
            let result = renderer.render(&source, &config).await;
            (sequence, config, result)
        });
    }

    fn apply(&mut self, sequence: u64, config: RenderConfig, result: RenderResult) {
        match self.gate.offer(sequence) {
            Offer::Applied => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                self.applied.send_replace(AppliedRender {
                    sequence,
                    result,
                    config,
                });
            }
            Offer::Stale => {
                self.stats.stale_discarded.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_STALE_DISCARDED_TOTAL).increment(1);
                debug!(
                    target = "application::render::scheduler",
                    sequence,
                    highest_applied = self.gate.highest_applied(),
                    "stale render discarded"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::render::Theme;

    struct EchoRenderer;

    #[async_trait]
    impl PreviewRenderer for EchoRenderer {
        async fn render(&self, source: &str, config: &RenderConfig) -> RenderResult {
            RenderResult::rendered(format!("{}:{source}", config.theme))
        }
    }

    async fn final_render(mut applied: watch::Receiver<AppliedRender>) -> AppliedRender {
        while applied.changed().await.is_ok() {}
        applied.borrow().clone()
    }

    #[tokio::test]
    async fn late_older_submission_does_not_replace_newer_source() {
        let (handle, applied) = RenderScheduler::spawn(
            Arc::new(EchoRenderer),
            RenderConfig::default(),
            Duration::from_secs(3600),
        );

        handle
            .commands
            .send(Command::Submit {
                sequence: 2,
                source: "newer".into(),
            })
            .expect("scheduler alive");
        handle
            .commands
            .send(Command::Submit {
                sequence: 1,
                source: "older".into(),
            })
            .expect("scheduler alive");
        drop(handle);

        let last = final_render(applied).await;
        assert_eq!(last.sequence, 2);
        assert_eq!(last.result.html, "light:newer");
    }

    #[tokio::test]
    async fn config_and_source_arriving_out_of_order_are_combined() {
        let (handle, applied) = RenderScheduler::spawn(
            Arc::new(EchoRenderer),
            RenderConfig::default(),
            Duration::from_secs(3600),
        );

        handle
            .commands
            .send(Command::SetConfig {
                sequence: 2,
                config: RenderConfig::new(Theme::Dark),
            })
            .expect("scheduler alive");
        handle
            .commands
            .send(Command::Submit {
                sequence: 1,
                source: "text".into(),
            })
            .expect("scheduler alive");
        drop(handle);

        let last = final_render(applied).await;
        assert_eq!(last.sequence, 2);
        assert_eq!(last.result.html, "dark:text");
    }

    #[test]
    fn gate_rejects_older_sequences_after_newer_applied() {
        let mut gate = SequenceGate::new();
        assert_eq!(gate.offer(3), Offer::Applied);
        assert_eq!(gate.offer(1), Offer::Stale);
        assert_eq!(gate.offer(2), Offer::Stale);
        assert_eq!(gate.highest_applied(), Some(3));
    }

    #[test]
    fn gate_applies_in_order_sequences() {
        let mut gate = SequenceGate::new();
        assert_eq!(gate.offer(1), Offer::Applied);
        assert_eq!(gate.offer(2), Offer::Applied);
        assert_eq!(gate.offer(2), Offer::Applied);
        assert_eq!(gate.offer(5), Offer::Applied);
        assert_eq!(gate.highest_applied(), Some(5));
    }
}
