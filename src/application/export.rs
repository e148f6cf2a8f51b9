//! Export of a workspace document in the formats the editor offers.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::render::{RenderConfig, RenderError, RenderExecutor, Theme, escape_html};
use crate::domain::documents::Document;
use crate::domain::error::DomainError;

const SYNTAX_CSS_LIGHT: &str = include_str!(env!("SYNTAX_CSS_LIGHT_FILE"));
const SYNTAX_CSS_DARK: &str = include_str!(env!("SYNTAX_CSS_DARK_FILE"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Rendered preview fragment.
    #[default]
    Html,
    /// Rendered fragment wrapped for a `text/html` clipboard entry.
    RichText,
    /// Raw markdown source.
    Markdown,
    /// Complete HTML page with title and syntax theme CSS.
    Standalone,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Html => "html",
            ExportFormat::RichText => "rich_text",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Standalone => "standalone",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            _ => "text/html; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            _ => "html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "html" => Ok(ExportFormat::Html),
            "rich_text" | "rich" => Ok(ExportFormat::RichText),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "standalone" => Ok(ExportFormat::Standalone),
            other => Err(DomainError::validation(format!(
                "unknown export format `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub media_type: &'static str,
    pub body: String,
}

#[derive(Clone)]
pub struct ExportService {
    executor: RenderExecutor,
}

impl ExportService {
    pub fn new(executor: RenderExecutor) -> Self {
        Self { executor }
    }

    pub async fn export(
        &self,
        document: &Document,
        format: ExportFormat,
        config: &RenderConfig,
    ) -> Result<ExportArtifact, RenderError> {
        let body = match format {
            ExportFormat::Markdown => document.content.clone(),
            ExportFormat::Html => self.executor.try_render(&document.content, config).await?,
            ExportFormat::RichText => {
                let fragment = self.executor.try_render(&document.content, config).await?;
                clipboard_html(&fragment)
            }
            ExportFormat::Standalone => {
                let fragment = self.executor.try_render(&document.content, config).await?;
                standalone_page(&document_title(&document.name), &fragment, config.theme)
            }
        };

        let file_name = export_file_name(&document.name, format);
        info!(
            target = "application::export",
            document = %document.id,
            format = format.as_str(),
            file_name = %file_name,
            bytes = body.len(),
            "document exported"
        );

        Ok(ExportArtifact {
            file_name,
            media_type: format.media_type(),
            body,
        })
    }
}

/// File name for `name` exported as `format`. Markdown keeps an existing
/// `.md`/`.markdown` name; other formats swap the extension.
pub fn export_file_name(name: &str, format: ExportFormat) -> String {
    let name = name.trim();
    let name = if name.is_empty() { "document" } else { name };

    if format == ExportFormat::Markdown
        && crate::domain::documents::is_markdown_file_name(name)
    {
        return name.to_string();
    }

    format!("{}.{}", document_title(name), format.extension())
}

fn document_title(name: &str) -> String {
    let path = Path::new(name);
    let is_markdown = crate::domain::documents::is_markdown_file_name(name);
    match path.file_stem().and_then(|stem| stem.to_str()) {
        Some(stem) if is_markdown && !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn clipboard_html(fragment: &str) -> String {
    format!("<html><body><!--StartFragment-->{fragment}<!--EndFragment--></body></html>")
}

fn standalone_page(title: &str, fragment: &str, theme: Theme) -> String {
    let css = match theme {
        Theme::Light => SYNTAX_CSS_LIGHT,
        Theme::Dark => SYNTAX_CSS_DARK,
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\" data-theme=\"{theme}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}</style>\n</head>\n<body>\n<article class=\"markdown-body\">\n{fragment}\n</article>\n</body>\n</html>\n",
        theme = theme.as_str(),
        title = escape_html(title),
    )
}
