//! Merging several documents into one.
//!
//! The binder keeps an ordered selection of workspace documents and external
//! markdown files and concatenates them with a chosen separator.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::documents::{Document, DocumentId, DocumentStore, is_markdown_file_name};
use super::error::DomainError;

/// Merges above this size may slow the preview down.
pub const RECOMMENDED_BINDING_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStyle {
    /// Horizontal rule between parts.
    #[default]
    Rule,
    /// Blank line between parts.
    Blank,
    /// Single newline between parts.
    Newline,
}

impl MergeStyle {
    pub fn separator(&self) -> &'static str {
        match self {
            MergeStyle::Rule => "\n\n---\n\n",
            MergeStyle::Blank => "\n\n",
            MergeStyle::Newline => "\n",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStyle::Rule => "rule",
            MergeStyle::Blank => "blank",
            MergeStyle::Newline => "newline",
        }
    }
}

impl fmt::Display for MergeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStyle {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rule" => Ok(MergeStyle::Rule),
            "blank" => Ok(MergeStyle::Blank),
            "newline" => Ok(MergeStyle::Newline),
            other => Err(DomainError::validation(format!(
                "unknown merge style `{other}`, expected rule, blank or newline"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSource {
    Document(DocumentId),
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingItem {
    pub key: String,
    pub name: String,
    pub source: BindingSource,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDocument {
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct Binder {
    items: Vec<BindingItem>,
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a workspace document. Returns false when it is already queued.
    pub fn add_document(&mut self, document: &Document) -> bool {
        let source = BindingSource::Document(document.id.clone());
        if self.items.iter().any(|item| item.source == source) {
            return false;
        }
        self.items.push(BindingItem {
            key: document.id.to_string(),
            name: document.name.clone(),
            source,
            content: document.content.clone(),
        });
        true
    }

    /// Queue an external markdown file and return its item key.
    pub fn add_external(
        &mut self,
        file_name: &str,
        content: impl Into<String>,
    ) -> Result<String, DomainError> {
        if !is_markdown_file_name(file_name) {
            return Err(DomainError::validation(format!(
                "`{file_name}` is not a .md or .markdown file"
            )));
        }
        let key = format!("external-{}", Uuid::new_v4());
        self.items.push(BindingItem {
            key: key.clone(),
            name: file_name.to_string(),
            source: BindingSource::External,
            content: content.into(),
        });
        Ok(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<BindingItem> {
        let position = self.items.iter().position(|item| item.key == key)?;
        Some(self.items.remove(position))
    }

    /// Move the item at `from` so that it ends up at index `to`.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), DomainError> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(DomainError::validation(format!(
                "cannot move item {from} to {to} in a binding of {len}"
            )));
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        Ok(())
    }

    /// Re-read queued workspace documents; items whose document is gone are
    /// dropped. Returns the number of dropped items.
    pub fn refresh(&mut self, store: &dyn DocumentStore) -> usize {
        let before = self.items.len();
        self.items.retain_mut(|item| match &item.source {
            BindingSource::Document(id) => match store.get_content(id) {
                Ok(content) => {
                    item.content = content;
                    true
                }
                Err(_) => false,
            },
            BindingSource::External => true,
        });
        before - self.items.len()
    }

    pub fn items(&self) -> &[BindingItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total_bytes(&self) -> usize {
        self.items.iter().map(|item| item.content.len()).sum()
    }

    pub fn exceeds_recommended_size(&self) -> bool {
        self.total_bytes() > RECOMMENDED_BINDING_BYTES
    }

    pub fn merge(&self, style: MergeStyle) -> String {
        self.items
            .iter()
            .map(|item| item.content.as_str())
            .collect::<Vec<_>>()
            .join(style.separator())
    }

    pub fn bind(&self, style: MergeStyle, at: OffsetDateTime) -> Result<BoundDocument, DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::validation("nothing to bind"));
        }
        Ok(BoundDocument {
            file_name: binding_file_name(at),
            content: self.merge(style),
        })
    }
}

pub fn binding_file_name(at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!("binding_{millis}.md")
}
