use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fenced-code language tag that marks a block as diagram source.
pub const DIAGRAM_MARKER: &str = "mermaid";

/// Class carried by every diagram placeholder container in rendered output.
pub const DIAGRAM_CLASS: &str = "mermaid";

/// Colour scheme of the surrounding view. Cosmetically sensitive output
/// (diagrams, exported syntax CSS) depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown theme `{0}`, expected `light` or `dark`")]
pub struct ParseThemeError(String);

impl FromStr for Theme {
    type Err = ParseThemeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(ParseThemeError(other.to_string())),
        }
    }
}

/// The only input besides the source text that may influence a render.
/// It is read-only for the duration of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RenderConfig {
    pub theme: Theme,
}

impl RenderConfig {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }
}

/// One render attempt for an editor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub source_text: String,
    /// Strictly increasing per editor instance; used to detect stale results.
    pub request_sequence: u64,
    pub config: RenderConfig,
}

impl RenderRequest {
    pub fn new(source_text: impl Into<String>, request_sequence: u64, config: RenderConfig) -> Self {
        Self {
            source_text: source_text.into(),
            request_sequence,
            config,
        }
    }
}

/// Outcome of one pipeline run. When `ok` is false, `html` holds a
/// self-contained, escaped error fragment that is safe to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResult {
    pub html: String,
    pub ok: bool,
    pub error_message: Option<String>,
}

impl RenderResult {
    pub fn rendered(html: String) -> Self {
        Self {
            html,
            ok: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            html: error_fragment(&message),
            ok: false,
            error_message: Some(message),
        }
    }
}

/// Single red-tinted paragraph shown in place of the preview.
pub fn error_fragment(message: &str) -> String {
    format!(
        "<p class=\"render-error\" style=\"color:red\">Error rendering markdown: {}</p>",
        escape_html(message)
    )
}

/// Escape text for HTML element content or quoted attribute values.
pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Structured errors surfaced by the rendering pipeline. Every variant is a
/// stage failure: the executor turns it into an error fragment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("markdown serialisation failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("math typesetting failed: {message}")]
    Math { message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
    #[error("sanitisation rejected content: {message}")]
    Sanitisation { message: String },
    #[error("render task aborted: {message}")]
    Aborted { message: String },
    #[error("render timed out after {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },
}

/// Trait exposed by the transform stage set. Implementations must be pure and
/// deterministic: the same source and config yield identical output.
pub trait RenderService: Send + Sync {
    fn render(&self, source: &str, config: &RenderConfig) -> Result<String, RenderError>;
}
