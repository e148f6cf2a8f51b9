//! Diagram post-activation.
//!
//! After preview markup is mounted, diagram containers are located in the
//! mounted HTML, handed to the diagram engine, and the resulting SVG is written
//! back in place. A pass never fails: engine errors are recorded on the
//! container that caused them.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use dashmap::DashMap;
use lol_html::{
    RewriteStrSettings, Selector, element, errors::RewritingError, html_content::ContentType,
    rewrite_str, text,
};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::engine::{DiagramEngine, DiagramEngineConfig, diagram_key};
use super::view::MountedView;

const ATTR_PROCESSED: &str = "data-processed";
const ATTR_KEY: &str = "data-diagram-key";
const ATTR_THEME: &str = "data-diagram-theme";
const ATTR_ERROR: &str = "data-diagram-error";

const METRIC_DIAGRAM_RENDERED_TOTAL: &str = "mdtools_diagram_rendered_total";
const METRIC_DIAGRAM_FAILED_TOTAL: &str = "mdtools_diagram_failed_total";
const METRIC_ACTIVATION_MS: &str = "mdtools_diagram_activation_ms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOptions {
    pub engine: DiagramEngineConfig,
    /// Re-render containers even when they are rendered and unchanged, e.g.
    /// after printing cleared the mounted output.
    pub force_rerender: bool,
}

impl ActivationOptions {
    pub fn new(engine: DiagramEngineConfig) -> Self {
        Self {
            engine,
            force_rerender: false,
        }
    }

    pub fn force_rerender(mut self, force: bool) -> Self {
        self.force_rerender = force;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub found: usize,
    pub rendered: usize,
    pub skipped: usize,
    pub failed: usize,
    /// A newer mount happened during the pass; nothing was written back.
    pub superseded: bool,
    pub generation: u64,
}

struct Container {
    key: Option<String>,
    processed: bool,
    errored: bool,
    text: String,
}

enum Action {
    Keep,
    Render { svg: String, key: String },
    Fail {
        source: String,
        key: String,
        message: String,
    },
}

pub struct DiagramActivator {
    engine: Arc<dyn DiagramEngine>,
    // Rendered containers hold SVG, so their source is remembered by key.
    sources: DashMap<String, String>,
}

impl DiagramActivator {
    pub fn new(engine: Arc<dyn DiagramEngine>) -> Self {
        Self {
            engine,
            sources: DashMap::new(),
        }
    }

    pub async fn activate(
        &self,
        view: &MountedView,
        selector: &str,
        options: &ActivationOptions,
    ) -> ActivationReport {
        let started_at = Instant::now();
        let mut report = ActivationReport::default();

        if let Err(err) = selector.parse::<Selector>() {
            warn!(
                target = "application::diagrams::activation",
                op = "activate",
                result = "invalid_selector",
                selector,
                error = %err,
                "Diagram container selector rejected"
            );
            return report;
        }

        let snapshot = view.settled().await;
        report.generation = snapshot.generation;

        let containers = match scan(&snapshot.html, selector) {
            Ok(containers) => containers,
            Err(err) => {
                warn!(
                    target = "application::diagrams::activation",
                    op = "activate",
                    result = "scan_error",
                    error = %err,
                    "Mounted markup could not be scanned"
                );
                return report;
            }
        };
        report.found = containers.len();

        let mut actions = Vec::with_capacity(containers.len());
        let mut this_pass: HashMap<String, Result<String, String>> = HashMap::new();
        let mut live_keys: HashSet<String> = HashSet::new();

        for container in containers {
            let Some(source) = self.source_of(&container) else {
                report.skipped += 1;
                actions.push(Action::Keep);
                continue;
            };

            let key = diagram_key(&source, &options.engine);
            let unchanged = container.key.as_deref() == Some(key.as_str());
            if unchanged
                && (container.processed || container.errored)
                && !options.force_rerender
            {
                live_keys.insert(key);
                report.skipped += 1;
                actions.push(Action::Keep);
                continue;
            }
            live_keys.insert(key.clone());

            let outcome = match this_pass.get(&key) {
                Some(outcome) => outcome.clone(),
                None => {
                    let outcome = self.render_one(&source, &options.engine).await;
                    this_pass.insert(key.clone(), outcome.clone());
                    outcome
                }
            };
            self.sources.insert(key.clone(), source.clone());

            actions.push(match outcome {
                Ok(svg) => {
                    report.rendered += 1;
                    Action::Render { svg, key }
                }
                Err(message) => {
                    report.failed += 1;
                    Action::Fail {
                        source,
                        key,
                        message,
                    }
                }
            });
        }

        if report.rendered + report.failed > 0 {
            match apply(&snapshot.html, selector, &actions, &options.engine) {
                Ok(html) => {
                    if !view.write_back(snapshot.generation, html) {
                        report.superseded = true;
                        debug!(
                            target = "application::diagrams::activation",
                            generation = snapshot.generation,
                            "Newer mount arrived; activation results dropped"
                        );
                    }
                }
                Err(err) => warn!(
                    target = "application::diagrams::activation",
                    op = "activate",
                    result = "rewrite_error",
                    error = %err,
                    "Activated diagrams could not be written back"
                ),
            }
        }

        // Only containers in the scanned markup can be looked up again.
        self.sources.retain(|key, _| live_keys.contains(key));

        let elapsed = started_at.elapsed();
        counter!(METRIC_DIAGRAM_RENDERED_TOTAL).increment(report.rendered as u64);
        counter!(METRIC_DIAGRAM_FAILED_TOTAL).increment(report.failed as u64);
        histogram!(METRIC_ACTIVATION_MS).record(elapsed.as_secs_f64() * 1000.0);

        info!(
            target = "application::diagrams::activation",
            op = "activate",
            result = if report.superseded { "superseded" } else { "ok" },
            elapsed_ms = elapsed.as_millis() as u64,
            found = report.found,
            rendered = report.rendered,
            skipped = report.skipped,
            failed = report.failed,
            theme = %options.engine.theme,
            "Diagram activation pass finished"
        );
        report
    }

    fn source_of(&self, container: &Container) -> Option<String> {
        if let Some(source) = container
            .key
            .as_ref()
            .and_then(|key| self.sources.get(key).map(|entry| entry.value().clone()))
        {
            return Some(source);
        }
        if container.processed {
            // Rendered outside this activator; its source is gone.
            return None;
        }
        Some(decode_entities(&container.text))
    }

    async fn render_one(&self, source: &str, config: &DiagramEngineConfig) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let source = source.to_owned();
        let config = config.clone();

        match tokio::task::spawn_blocking(move || engine.render_svg(&source, &config)).await {
            Ok(Ok(svg)) => Ok(svg),
            Ok(Err(err)) => {
                warn!(
                    target = "application::diagrams::activation",
                    op = "render_one",
                    result = "error",
                    error = %err,
                    "Diagram failed to render; keeping source"
                );
                Err(err.to_string())
            }
            Err(err) => Err(format!("diagram task aborted: {err}")),
        }
    }
}

fn scan(html: &str, selector: &str) -> Result<Vec<Container>, RewritingError> {
    let containers: RefCell<Vec<Container>> = RefCell::new(Vec::new());

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(selector, |el| {
                    containers.borrow_mut().push(Container {
                        key: el.get_attribute(ATTR_KEY),
                        processed: el.has_attribute(ATTR_PROCESSED),
                        errored: el.has_attribute(ATTR_ERROR),
                        text: String::new(),
                    });
                    Ok(())
                }),
                text!(selector, |chunk| {
                    if let Some(container) = containers.borrow_mut().last_mut() {
                        container.text.push_str(chunk.as_str());
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(containers.into_inner())
}

fn apply(
    html: &str,
    selector: &str,
    actions: &[Action],
    config: &DiagramEngineConfig,
) -> Result<String, RewritingError> {
    let position = Cell::new(0_usize);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |el| {
                let index = position.get();
                position.set(index + 1);

                match actions.get(index) {
                    Some(Action::Render { svg, key }) => {
                        el.set_inner_content(svg, ContentType::Html);
                        el.set_attribute(ATTR_PROCESSED, "true")?;
                        el.set_attribute(ATTR_KEY, key)?;
                        el.set_attribute(ATTR_THEME, config.theme.as_str())?;
                        el.remove_attribute(ATTR_ERROR);
                    }
                    Some(Action::Fail {
                        source,
                        key,
                        message,
                    }) => {
                        el.set_inner_content(source, ContentType::Text);
                        el.remove_attribute(ATTR_PROCESSED);
                        el.set_attribute(ATTR_KEY, key)?;
                        el.set_attribute(ATTR_ERROR, &attribute_safe(message))?;
                    }
                    Some(Action::Keep) | None => {}
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}

fn attribute_safe(message: &str) -> String {
    message
        .chars()
        .map(|ch| match ch {
            '"' => '\'',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// Undo the entity escaping applied to container text.
fn decode_entities(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';').filter(|end| *end <= 10) else {
            decoded.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..end];
        let replacement = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match replacement {
            Some(ch) => {
                decoded.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &tail[1..];
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::diagrams::engine::DiagramError;
    use crate::application::render::Theme;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeEngine {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl DiagramEngine for FakeEngine {
        fn render_svg(
            &self,
            source: &str,
            config: &DiagramEngineConfig,
        ) -> Result<String, DiagramError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if source.contains("bad") {
                return Err(DiagramError::Cli {
                    exit_code: Some(1),
                    stderr: "Parse error on line 1".into(),
                });
            }
            Ok(format!(
                "<svg data-lines=\"{}\">{}</svg>",
                source.lines().count(),
                config.mermaid_theme()
            ))
        }
    }

    const MOUNTED: &str = concat!(
        "<h1>Doc</h1>",
        "<div class=\"mermaid\" data-diagram-theme=\"light\">graph LR\nA--&gt;B</div>",
        "<div class=\"mermaid\" data-diagram-theme=\"light\">bad &amp; broken</div>",
        "<p>tail</p>"
    );

    fn activator(engine: &Arc<FakeEngine>) -> DiagramActivator {
        let engine: Arc<dyn DiagramEngine> = engine.clone();
        DiagramActivator::new(engine)
    }

    fn light() -> ActivationOptions {
        ActivationOptions::new(DiagramEngineConfig::for_theme(Theme::Light))
    }

    #[test]
    fn entities_are_decoded_once() {
        assert_eq!(decode_entities("A--&gt;B &amp;lt; &#39;x&#x27;"), "A-->B &lt; 'x'");
        assert_eq!(decode_entities("a & b;"), "a & b;");
    }

    #[tokio::test]
    async fn renders_pending_and_marks_failures() {
        let engine = Arc::new(FakeEngine::default());
        let activator = activator(&engine);
        let view = MountedView::new();
        view.mount(MOUNTED);

        let report = activator.activate(&view, ".mermaid", &light()).await;

        assert_eq!(report.found, 2);
        assert_eq!(report.rendered, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.superseded);

        let html = view.html();
        assert!(html.contains("<svg data-lines=\"2\">default</svg>"));
        assert!(html.contains("data-processed=\"true\""));
        assert!(html.contains("data-diagram-error=\"diagram CLI invocation failed"));
        assert!(html.contains(">bad &amp; broken</div>"));
        assert!(html.starts_with("<h1>Doc</h1>"));
        assert!(html.ends_with("<p>tail</p>"));
    }

    #[tokio::test]
    async fn repeated_pass_skips_unchanged_containers() {
        let engine = Arc::new(FakeEngine::default());
        let activator = activator(&engine);
        let view = MountedView::new();
        view.mount(MOUNTED);

        activator.activate(&view, ".mermaid", &light()).await;
        let calls = engine.calls.load(Ordering::SeqCst);
        let second = activator.activate(&view, ".mermaid", &light()).await;

        assert_eq!(second.skipped, 2);
        assert_eq!(second.rendered + second.failed, 0);
        assert_eq!(engine.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn theme_change_and_force_rerender_render_again() {
        let engine = Arc::new(FakeEngine::default());
        let activator = activator(&engine);
        let view = MountedView::new();
        view.mount(MOUNTED);
        activator.activate(&view, ".mermaid", &light()).await;

        let dark = ActivationOptions::new(DiagramEngineConfig::for_theme(Theme::Dark));
        let report = activator.activate(&view, ".mermaid", &dark).await;
        assert_eq!(report.rendered, 1);
        assert!(view.html().contains("<svg data-lines=\"2\">dark</svg>"));
        assert!(view.html().contains("data-diagram-theme=\"dark\""));

        let forced = activator
            .activate(&view, ".mermaid", &dark.clone().force_rerender(true))
            .await;
        assert_eq!(forced.rendered, 1);
        assert_eq!(forced.skipped, 0);
    }

    #[tokio::test]
    async fn remembered_sources_follow_the_mounted_diagrams() {
        let engine = Arc::new(FakeEngine::default());
        let activator = activator(&engine);
        let view = MountedView::new();

        for edit in 0..50 {
            view.mount(format!(
                "<div class=\"mermaid\">graph LR\nA--&gt;B{edit}</div>"
            ));
            let report = activator.activate(&view, ".mermaid", &light()).await;
            assert_eq!(report.rendered, 1);
            assert_eq!(activator.sources.len(), 1);
        }

        view.mount("<p>no diagrams left</p>");
        activator.activate(&view, ".mermaid", &light()).await;
        assert!(activator.sources.is_empty());
    }

    #[tokio::test]
    async fn invalid_selector_yields_empty_report() {
        let engine = Arc::new(FakeEngine::default());
        let activator = activator(&engine);
        let view = MountedView::new();
        view.mount(MOUNTED);

        let report = activator.activate(&view, "div[", &light()).await;
        assert_eq!(report, ActivationReport::default());
        assert_eq!(view.html(), MOUNTED);
    }

    #[tokio::test]
    async fn newer_mount_supersedes_running_pass() {
        let engine = Arc::new(FakeEngine {
            calls: AtomicUsize::new(0),
            delay: Some(Duration::from_millis(100)),
        });
        let activator = Arc::new(activator(&engine));
        let view = Arc::new(MountedView::new());
        view.mount(MOUNTED);

        let pass = {
            let activator = Arc::clone(&activator);
            let view = Arc::clone(&view);
            tokio::spawn(async move { activator.activate(&view, ".mermaid", &light()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        view.mount("<p>newer</p>");

        let report = pass.await.expect("join");
        assert!(report.superseded);
        assert_eq!(view.html(), "<p>newer</p>");
    }
}
