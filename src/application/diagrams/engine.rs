use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::render::Theme;

const DEFAULT_FONT_FAMILY: &str = "Inter";
const PRIMARY_COLOR_DARK: &str = "#3b82f6";
const PRIMARY_COLOR_LIGHT: &str = "#2563eb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Strict,
    #[default]
    Loose,
    Antiscript,
    Sandbox,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Strict => "strict",
            SecurityLevel::Loose => "loose",
            SecurityLevel::Antiscript => "antiscript",
            SecurityLevel::Sandbox => "sandbox",
        }
    }
}

/// Immutable engine configuration handed to every activation pass. A theme
/// change builds a new value instead of mutating a shared one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagramEngineConfig {
    pub theme: Theme,
    pub font_family: String,
    pub primary_color: String,
    pub security_level: SecurityLevel,
}

impl DiagramEngineConfig {
    pub fn for_theme(theme: Theme) -> Self {
        let primary_color = match theme {
            Theme::Dark => PRIMARY_COLOR_DARK,
            Theme::Light => PRIMARY_COLOR_LIGHT,
        };
        Self {
            theme,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            primary_color: primary_color.to_string(),
            security_level: SecurityLevel::Loose,
        }
    }

    pub fn with_font_family(mut self, font_family: impl Into<String>) -> Self {
        self.font_family = font_family.into();
        self
    }

    /// Mermaid's own theme name for this colour scheme.
    pub fn mermaid_theme(&self) -> &'static str {
        match self.theme {
            Theme::Dark => "dark",
            Theme::Light => "default",
        }
    }

    /// Stable text identifying everything that changes the rendered output.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.mermaid_theme(),
            self.font_family,
            self.primary_color,
            self.security_level.as_str()
        )
    }

    pub fn mermaid_config(&self) -> serde_json::Value {
        json!({
            "startOnLoad": false,
            "theme": self.mermaid_theme(),
            "securityLevel": self.security_level.as_str(),
            "fontFamily": self.font_family,
            "themeVariables": {
                "primaryColor": self.primary_color,
            },
        })
    }
}

impl Default for DiagramEngineConfig {
    fn default() -> Self {
        Self::for_theme(Theme::default())
    }
}

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("failed to prepare cache directory: {0}")]
    CacheInit(io::Error),
    #[error("failed to write temporary file: {0}")]
    Io(io::Error),
    #[error("failed to encode engine configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("diagram CLI invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("diagram CLI unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered SVG: {0}")]
    Read(io::Error),
    #[error("diagram source is empty")]
    EmptySource,
}

/// External renderer turning diagram source text into SVG markup.
pub trait DiagramEngine: Send + Sync {
    fn render_svg(&self, source: &str, config: &DiagramEngineConfig)
    -> Result<String, DiagramError>;
}

/// Cache key over the source and every output-relevant config field.
pub fn diagram_key(source: &str, config: &DiagramEngineConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0]);
    hasher.update(config.fingerprint().as_bytes());
    hex::encode(hasher.finalize())
}

/// Renders through the `mmdc` command line tool, caching SVG output on disk.
#[derive(Debug, Clone)]
pub struct MermaidCliEngine {
    cli_path: PathBuf,
    cache_dir: PathBuf,
}

impl MermaidCliEngine {
    pub fn new(cli_path: PathBuf, cache_dir: PathBuf) -> Result<Self, DiagramError> {
        fs::create_dir_all(&cache_dir).map_err(DiagramError::CacheInit)?;
        Ok(Self {
            cli_path,
            cache_dir,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn run_cli(
        &self,
        source: &str,
        config: &DiagramEngineConfig,
        output_path: &Path,
    ) -> Result<(), DiagramError> {
        let mut input_file = NamedTempFile::new().map_err(DiagramError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(DiagramError::Io)?;
        input_file.flush().map_err(DiagramError::Io)?;

        let mut config_file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .map_err(DiagramError::Io)?;
        serde_json::to_writer(&mut config_file, &config.mermaid_config())?;
        config_file.flush().map_err(DiagramError::Io)?;

        let started_at = Instant::now();
        let output = Command::new(&self.cli_path)
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(output_path)
            .arg("--outputFormat")
            .arg("svg")
            .arg("--theme")
            .arg(config.mermaid_theme())
            .arg("--configFile")
            .arg(config_file.path())
            .arg("--backgroundColor")
            .arg("transparent")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "application::diagrams::engine",
                    op = "mermaid::run_cli",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn Mermaid CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    DiagramError::NotFound(err)
                } else {
                    DiagramError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "application::diagrams::engine",
                op = "mermaid::run_cli",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "mermaid_cli",
                stderr = %stderr,
                "Mermaid CLI invocation failed"
            );
            return Err(DiagramError::Cli { exit_code, stderr });
        }

        Ok(())
    }
}

impl DiagramEngine for MermaidCliEngine {
    fn render_svg(
        &self,
        source: &str,
        config: &DiagramEngineConfig,
    ) -> Result<String, DiagramError> {
        if source.trim().is_empty() {
            return Err(DiagramError::EmptySource);
        }

        let started_at = Instant::now();
        let cache_path = self
            .cache_dir
            .join(format!("{}.svg", diagram_key(source, config)));

        match fs::read_to_string(&cache_path) {
            Ok(svg) => {
                info!(
                    target = "application::diagrams::engine",
                    op = "mermaid::render_svg",
                    result = "cache_hit",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    theme = %config.theme,
                    svg_bytes = svg.len(),
                    "Diagram served from cache"
                );
                return Ok(svg);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "application::diagrams::engine",
                op = "mermaid::render_svg",
                result = "cache_read_error",
                cache_path = %cache_path.display(),
                error = %err,
                "Cached diagram unreadable; re-rendering"
            ),
        }

        let output_file = tempfile::Builder::new()
            .suffix(".svg")
            .tempfile_in(&self.cache_dir)
            .map_err(DiagramError::Io)?;
        self.run_cli(source, config, output_file.path())?;

        match output_file.persist(&cache_path) {
            Ok(_) => {}
            // A concurrent pass stored the same diagram first.
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(DiagramError::Io(err.error)),
        }

        let svg = fs::read_to_string(&cache_path).map_err(DiagramError::Read)?;
        info!(
            target = "application::diagrams::engine",
            op = "mermaid::render_svg",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            theme = %config.theme,
            svg_bytes = svg.len(),
            "Diagram rendered via CLI"
        );
        Ok(svg)
    }
}
