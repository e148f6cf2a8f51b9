use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mdtools::application::render::{
    AppliedRender, PreviewRenderer, RenderConfig, RenderResult, RenderScheduler, Theme,
};
use tokio::sync::{mpsc, oneshot, watch};

const LONG_DEBOUNCE: Duration = Duration::from_secs(3600);

/// Holds every render until the test releases it.
struct GatedRenderer {
    calls: mpsc::UnboundedSender<(String, oneshot::Sender<()>)>,
}

#[async_trait]
impl PreviewRenderer for GatedRenderer {
    async fn render(&self, source: &str, _config: &RenderConfig) -> RenderResult {
        let (release, released) = oneshot::channel();
        let _ = self.calls.send((source.to_string(), release));
        let _ = released.await;
        RenderResult::rendered(format!("<p>{source}</p>"))
    }
}

/// Renders immediately and remembers what it was asked to render.
#[derive(Default)]
struct RecordingRenderer {
    seen: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PreviewRenderer for RecordingRenderer {
    async fn render(&self, source: &str, config: &RenderConfig) -> RenderResult {
        self.seen.lock().expect("lock").push(source.to_string());
        RenderResult::rendered(format!("{}:{source}", config.theme))
    }
}

async fn wait_for_sequence(
    applied: &mut watch::Receiver<AppliedRender>,
    sequence: u64,
) -> AppliedRender {
    applied
        .wait_for(|render| render.sequence >= sequence)
        .await
        .expect("scheduler alive")
        .clone()
}

#[tokio::test]
async fn out_of_order_completion_keeps_newest_result() {
    let (calls_tx, mut calls) = mpsc::unbounded_channel();
    let renderer = Arc::new(GatedRenderer { calls: calls_tx });
    let (handle, mut applied) =
        RenderScheduler::spawn(renderer, RenderConfig::default(), LONG_DEBOUNCE);

    let mut gates = Vec::new();
    for source in ["one", "two", "three"] {
        handle.submit(source);
        handle.flush();
        let (seen, gate) = calls.recv().await.expect("render started");
        assert_eq!(seen, source);
        gates.push(gate);
    }

    let third = gates.pop().expect("third gate");
    third.send(()).expect("release third");
    let current = wait_for_sequence(&mut applied, 3).await;
    assert_eq!(current.result.html, "<p>three</p>");

    for gate in gates {
        gate.send(()).expect("release older render");
    }
    while handle.stats().stale_discarded < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let current = applied.borrow().clone();
    assert_eq!(current.sequence, 3);
    assert_eq!(current.result.html, "<p>three</p>");

    let stats = handle.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.stale_discarded, 2);
}

#[tokio::test(start_paused = true)]
async fn bursts_within_debounce_window_coalesce() {
    let renderer = Arc::new(RecordingRenderer::default());
    let debounce = Duration::from_millis(200);
    let (handle, mut applied) =
        RenderScheduler::spawn(renderer.clone(), RenderConfig::default(), debounce);

    handle.submit("a");
    handle.submit("ab");
    let last = handle.submit("abc");
    assert_eq!(last, 3);

    let current = wait_for_sequence(&mut applied, last).await;
    assert_eq!(current.result.html, "light:abc");
    assert_eq!(renderer.seen(), ["abc"]);

    handle.submit("abcd");
    tokio::time::sleep(debounce / 2).await;
    let last = handle.submit("abcde");
    tokio::time::sleep(debounce / 2).await;
    assert_eq!(renderer.seen().len(), 1);

    let current = wait_for_sequence(&mut applied, last).await;
    assert_eq!(current.result.html, "light:abcde");
    assert_eq!(renderer.seen(), ["abc", "abcde"]);
    assert_eq!(handle.stats().dispatched, 2);
}

#[tokio::test]
async fn config_change_rerenders_unchanged_source() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (handle, mut applied) =
        RenderScheduler::spawn(renderer.clone(), RenderConfig::default(), LONG_DEBOUNCE);

    let first = handle.submit("same");
    handle.flush();
    wait_for_sequence(&mut applied, first).await;

    let second = handle.set_config(RenderConfig::new(Theme::Dark));
    let current = wait_for_sequence(&mut applied, second).await;

    assert_eq!(current.config.theme, Theme::Dark);
    assert_eq!(current.result.html, "dark:same");
    assert_eq!(renderer.seen(), ["same", "same"]);
}

#[tokio::test]
async fn dropping_the_handle_renders_the_last_submission() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (handle, mut applied) =
        RenderScheduler::spawn(renderer.clone(), RenderConfig::default(), LONG_DEBOUNCE);

    handle.submit("draft");
    let last = handle.submit("final");
    drop(handle);

    let current = wait_for_sequence(&mut applied, last).await;
    assert_eq!(current.result.html, "light:final");
    assert_eq!(renderer.seen(), ["final"]);
}

#[tokio::test]
async fn initial_preview_is_empty() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (_handle, applied) =
        RenderScheduler::spawn(renderer, RenderConfig::default(), LONG_DEBOUNCE);

    let current = applied.borrow().clone();
    assert_eq!(current.sequence, 0);
    assert!(current.result.ok);
    assert!(current.result.html.is_empty());
}
