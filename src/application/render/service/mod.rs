mod config;
mod convert;
mod highlight;
mod math;

use std::sync::Arc;

use comrak::{Arena, format_html, nodes::AstNode, parse_document};
use once_cell::sync::{Lazy, OnceCell};
use syntect::{dumps::from_uncompressed_data, html::ClassStyle, parsing::SyntaxSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::render::types::{
    DIAGRAM_CLASS, DIAGRAM_MARKER, RenderConfig, RenderError, RenderService, escape_html,
};

use config::{build_preview_sanitizer, default_options};
use convert::{BlockKind, ClassifiedNode, FragmentTable, classify_nodes};

/// Comrak-based transform stage set with Syntect highlighting, KaTeX math and
/// Ammonia sanitisation.
pub struct ComrakRenderService {
    options: comrak::Options<'static>,
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
    sanitizer: ammonia::Builder<'static>,
    pipeline: RenderPipelineConfig,
}

impl ComrakRenderService {
    /// Construct a renderer with the GFM and math extensions enabled and
    /// syntax highlighting configured to emit `syntax-` prefixed CSS classes.
    pub fn new(pipeline: RenderPipelineConfig) -> Self {
        let syntax_bytes = include_bytes!(env!("SYNTAX_PACK_FILE"));
        let syntax_set: SyntaxSet = from_uncompressed_data(syntax_bytes).unwrap_or_else(|err| {
            warn!(
                target = "application::render::highlight",
                error = %err,
                "Bundled syntax pack unreadable; using syntect defaults"
            );
            SyntaxSet::load_defaults_newlines()
        });

        Self {
            options: default_options(),
            syntax_set,
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
            sanitizer: build_preview_sanitizer(),
            pipeline,
        }
    }
}

static RENDER_SERVICE: Lazy<Arc<ComrakRenderService>> =
    Lazy::new(|| Arc::new(ComrakRenderService::new(active_render_config())));

/// Access the shared render service instance, initialised on first use.
pub fn render_service() -> Arc<ComrakRenderService> {
    Arc::clone(&RENDER_SERVICE)
}

impl Default for ComrakRenderService {
    fn default() -> Self {
        Self::new(RenderPipelineConfig::default())
    }
}

impl RenderService for ComrakRenderService {
    fn render(&self, source: &str, config: &RenderConfig) -> Result<String, RenderError> {
        let arena = Arena::new();
        // Structural parse, GFM and math syntax extensions happen in one comrak pass.
        let root = parse_document(&arena, source, &self.options);

        let classified = convert_stage(root, &self.pipeline);
        let mut fragments = FragmentTable::for_source(source);

        highlight_stage(
            &classified,
            &self.syntax_set,
            &self.class_style,
            self.pipeline.detect_languages,
            &mut fragments,
        );
        diagram_stage(&classified, config, &mut fragments);
        math_stage(&classified, &mut fragments);

        let serialized = serialize_stage(root, &self.options)?;
        let sanitized = sanitize_stage(serialized, &self.sanitizer);

        debug!(
            target = "application::render::service",
            source_bytes = source.len(),
            fragments = fragments.len(),
            theme = %config.theme,
            "markdown rendered"
        );

        Ok(fragments.restore(sanitized))
    }
}

/// Process-wide stage configuration, fixed before the first render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPipelineConfig {
    /// Fenced-code language tag routed to the diagram stage.
    pub diagram_marker: String,
    /// Detect a language from the first line when a fence declares none.
    pub detect_languages: bool,
}

impl Default for RenderPipelineConfig {
    fn default() -> Self {
        Self {
            diagram_marker: DIAGRAM_MARKER.to_string(),
            detect_languages: true,
        }
    }
}

impl From<&crate::config::RenderSettings> for RenderPipelineConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            diagram_marker: settings.diagram_marker.clone(),
            detect_languages: settings.detect_languages,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderConfigError {
    #[error("render service already configured")]
    AlreadyConfigured,
}

static RENDER_PIPELINE_CONFIG: OnceCell<RenderPipelineConfig> = OnceCell::new();

pub fn configure_render_service(config: RenderPipelineConfig) -> Result<(), RenderConfigError> {
    RENDER_PIPELINE_CONFIG
        .set(config)
        .map_err(|_| RenderConfigError::AlreadyConfigured)
}

fn active_render_config() -> RenderPipelineConfig {
    RENDER_PIPELINE_CONFIG.get().cloned().unwrap_or_default()
}

fn convert_stage<'a>(
    root: &'a AstNode<'a>,
    pipeline: &RenderPipelineConfig,
) -> Vec<ClassifiedNode<'a>> {
    classify_nodes(root, &pipeline.diagram_marker.to_ascii_lowercase())
}

fn highlight_stage(
    classified: &[ClassifiedNode<'_>],
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
    detect_languages: bool,
    fragments: &mut FragmentTable,
) {
    for entry in classified {
        let BlockKind::Code {
            language,
            meta,
            literal,
        } = &entry.kind
        else {
            continue;
        };

        if language.is_none() && !detect_languages {
            fragments.substitute(entry.node, highlight::plain_code_block(None, literal));
            continue;
        }

        let html = match highlight::highlight_code(
            language.as_deref(),
            meta.as_deref(),
            literal,
            syntax_set,
            class_style,
        ) {
            Ok(Some(html)) => html,
            Ok(None) => highlight::plain_code_block(language.as_deref(), literal),
            Err(err) => {
                warn!(
                    target = "application::render::highlight",
                    error = %err,
                    "Syntax highlighting failed; emitting plain block"
                );
                highlight::plain_code_block(language.as_deref(), literal)
            }
        };
        fragments.substitute(entry.node, html);
    }
}

fn diagram_stage(
    classified: &[ClassifiedNode<'_>],
    config: &RenderConfig,
    fragments: &mut FragmentTable,
) {
    for entry in classified {
        let BlockKind::Diagram { source } = &entry.kind else {
            continue;
        };

        let html = format!(
            "<div class=\"{DIAGRAM_CLASS}\" data-diagram-theme=\"{}\">{}</div>",
            config.theme,
            escape_html(source)
        );
        fragments.substitute(entry.node, html);
    }
}

fn math_stage(classified: &[ClassifiedNode<'_>], fragments: &mut FragmentTable) {
    for entry in classified {
        let BlockKind::Math {
            literal,
            display: is_block,
        } = &entry.kind
        else {
            continue;
        };

        let html = match math::render_math_html(literal, *is_block) {
            Ok(html) => html,
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    display_mode = *is_block,
                    "KaTeX rendering failed: {err}"
                );
                math::math_fallback(literal, *is_block)
            }
        };
        fragments.substitute(entry.node, html);
    }
}

fn serialize_stage<'a>(
    root: &'a AstNode<'a>,
    options: &comrak::Options<'static>,
) -> Result<String, RenderError> {
    let mut html = String::new();
    format_html(root, options, &mut html).map_err(|err| RenderError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}

fn sanitize_stage(html: String, sanitizer: &ammonia::Builder<'static>) -> String {
    sanitizer.clean(&html).to_string()
}
