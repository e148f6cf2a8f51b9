//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{DIAGRAM_MARKER, Theme};

pub use cli::{
    BindArgs, CliArgs, Command, CommandOverrides, DiagramOverrides, ExportArgs, RenderArgs,
    WatchArgs, WorkerArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mdtools";
const ENV_PREFIX: &str = "MDTOOLS";
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const MAX_DEBOUNCE_MS: u64 = 60_000;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 0;
const DEFAULT_DIAGRAM_SELECTOR: &str = ".mermaid";
const DEFAULT_FONT_FAMILY: &str = "Inter, system-ui, sans-serif";
pub(crate) const DEFAULT_MERMAID_CLI_PATH: &str = "mmdc";
pub(crate) const DEFAULT_MERMAID_CACHE_DIR: &str = "/tmp/mdtools-mermaid";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub diagrams: DiagramSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub theme: Theme,
    /// Quiet period after the last edit before a render is dispatched.
    pub debounce: Duration,
    /// `None` lets renders run to completion.
    pub timeout: Option<Duration>,
    pub diagram_marker: String,
    pub detect_languages: bool,
}

#[derive(Debug, Clone)]
pub struct DiagramSettings {
    pub mermaid_cli_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Selector for diagram containers in mounted markup.
    pub selector: String,
    pub font_family: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(cli.command.overrides());

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    diagrams: RawDiagramSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CommandOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(theme) = overrides.theme.as_ref() {
            self.render.theme = Some(theme.clone());
        }
        if let Some(debounce) = overrides.debounce_ms {
            self.render.debounce_ms = Some(debounce);
        }
        if let Some(timeout) = overrides.render_timeout_ms {
            self.render.timeout_ms = Some(timeout);
        }
        if let Some(marker) = overrides.diagram_marker.as_ref() {
            self.render.diagram_marker = Some(marker.clone());
        }

        self.apply_diagram_overrides(&overrides.diagrams);
    }

    fn apply_diagram_overrides(&mut self, overrides: &DiagramOverrides) {
        if let Some(path) = overrides.mermaid_cli_path.as_ref() {
            self.diagrams.mermaid_cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.mermaid_cache_dir.as_ref() {
            self.diagrams.cache_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            diagrams,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            diagrams: build_diagram_settings(diagrams)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let theme = match render.theme {
        Some(theme) => Theme::from_str(&theme)
            .map_err(|err| LoadError::invalid("render.theme", err.to_string()))?,
        None => Theme::default(),
    };

    let debounce_ms = render.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
    if debounce_ms > MAX_DEBOUNCE_MS {
        return Err(LoadError::invalid(
            "render.debounce_ms",
            format!("must not exceed {MAX_DEBOUNCE_MS}"),
        ));
    }

    let timeout_ms = render.timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS);
    let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

    let diagram_marker = render
        .diagram_marker
        .map(|marker| marker.trim().to_string())
        .unwrap_or_else(|| DIAGRAM_MARKER.to_string());
    if diagram_marker.is_empty() || diagram_marker.contains(char::is_whitespace) {
        return Err(LoadError::invalid(
            "render.diagram_marker",
            "must be a single non-empty word",
        ));
    }

    Ok(RenderSettings {
        theme,
        debounce: Duration::from_millis(debounce_ms),
        timeout,
        diagram_marker,
        detect_languages: render.detect_languages.unwrap_or(true),
    })
}

fn build_diagram_settings(diagrams: RawDiagramSettings) -> Result<DiagramSettings, LoadError> {
    let cli_path = diagrams
        .mermaid_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CLI_PATH));
    if cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "diagrams.mermaid_cli_path",
            "path must not be empty",
        ));
    }

    let cache_dir = diagrams
        .cache_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CACHE_DIR));
    if cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "diagrams.cache_dir",
            "path must not be empty",
        ));
    }

    let selector = diagrams
        .selector
        .map(|selector| selector.trim().to_string())
        .unwrap_or_else(|| DEFAULT_DIAGRAM_SELECTOR.to_string());
    if selector.is_empty() {
        return Err(LoadError::invalid(
            "diagrams.selector",
            "selector must not be empty",
        ));
    }

    let font_family = diagrams
        .font_family
        .filter(|font| !font.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string());

    Ok(DiagramSettings {
        mermaid_cli_path: cli_path,
        cache_dir,
        selector,
        font_family,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    theme: Option<String>,
    debounce_ms: Option<u64>,
    timeout_ms: Option<u64>,
    diagram_marker: Option<String>,
    detect_languages: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiagramSettings {
    mermaid_cli_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    selector: Option<String>,
    font_family: Option<String>,
}

#[cfg(test)]
mod tests;
