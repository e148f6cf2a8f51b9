use std::{fmt, path::Path, sync::RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::infra::lock::{rw_read, rw_write};

use super::error::DomainError;

/// Documents above this size get a "heavy" badge; previews may lag.
pub const HEAVY_DOCUMENT_BYTES: usize = 2 * 1024 * 1024;
/// Imports above this size are reported as likely to degrade the editor.
pub const OVERSIZED_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

const ENTITY: &str = "document";
const COMPONENT: &str = "domain::documents";
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("document id must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SizeClass {
    Normal,
    Heavy,
    Oversized,
}

impl SizeClass {
    pub fn for_len(bytes: usize) -> Self {
        if bytes > OVERSIZED_DOCUMENT_BYTES {
            SizeClass::Oversized
        } else if bytes > HEAVY_DOCUMENT_BYTES {
            SizeClass::Heavy
        } else {
            SizeClass::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub content: String,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: DocumentId::generate(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }

    pub fn size_class(&self) -> SizeClass {
        SizeClass::for_len(self.content.len())
    }

    pub fn is_heavy(&self) -> bool {
        self.content.len() > HEAVY_DOCUMENT_BYTES
    }
}

/// True for `.md` and `.markdown` file names, ignoring case.
pub fn is_markdown_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Added { id: DocumentId },
    ContentChanged { id: DocumentId },
    Deleted { id: DocumentId },
    Cleared,
}

/// Document access consumed by the render core. Content is read as a
/// snapshot; the store remains the only owner.
pub trait DocumentStore: Send + Sync {
    fn list_documents(&self) -> Vec<Document>;
    fn get_content(&self, id: &DocumentId) -> Result<String, DomainError>;
    fn on_content_change(&self, id: &DocumentId, content: String) -> Result<(), DomainError>;
}

#[derive(Default)]
struct StoreState {
    documents: Vec<Document>,
    active: Option<DocumentId>,
}

pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<DocumentEvent>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            events,
        }
    }

    pub fn add(
        &self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<DocumentId, DomainError> {
        self.insert(Document::new(name, content))
    }

    pub fn insert(&self, document: Document) -> Result<DocumentId, DomainError> {
        if document.name.trim().is_empty() {
            return Err(DomainError::validation("document name must not be empty"));
        }

        let id = document.id.clone();
        {
            let mut state = rw_write(&self.state, COMPONENT, "insert");
            if state.documents.iter().any(|existing| existing.id == id) {
                return Err(DomainError::duplicate(ENTITY, id.as_str()));
            }
            state.documents.push(document);
        }

        self.publish(DocumentEvent::Added { id: id.clone() });
        Ok(id)
    }

    /// Add an uploaded markdown file, reporting how large it is.
    pub fn import_markdown(
        &self,
        file_name: &str,
        content: impl Into<String>,
    ) -> Result<(DocumentId, SizeClass), DomainError> {
        if !is_markdown_file_name(file_name) {
            return Err(DomainError::validation(format!(
                "`{file_name}` is not a .md or .markdown file"
            )));
        }
        let content = content.into();
        let size = SizeClass::for_len(content.len());
        let id = self.add(file_name, content)?;
        Ok((id, size))
    }

    pub fn get(&self, id: &DocumentId) -> Result<Document, DomainError> {
        rw_read(&self.state, COMPONENT, "get")
            .documents
            .iter()
            .find(|document| &document.id == id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(ENTITY, id.as_str()))
    }

    pub fn delete(&self, id: &DocumentId) -> Result<Document, DomainError> {
        let removed = {
            let mut state = rw_write(&self.state, COMPONENT, "delete");
            let position = state
                .documents
                .iter()
                .position(|document| &document.id == id)
                .ok_or_else(|| DomainError::not_found(ENTITY, id.as_str()))?;
            if state.active.as_ref() == Some(id) {
                state.active = None;
            }
            state.documents.remove(position)
        };

        self.publish(DocumentEvent::Deleted { id: id.clone() });
        Ok(removed)
    }

    pub fn delete_all(&self) -> usize {
        let removed = {
            let mut state = rw_write(&self.state, COMPONENT, "delete_all");
            state.active = None;
            std::mem::take(&mut state.documents).len()
        };

        self.publish(DocumentEvent::Cleared);
        removed
    }

    pub fn set_active(&self, id: Option<&DocumentId>) -> Result<(), DomainError> {
        let mut state = rw_write(&self.state, COMPONENT, "set_active");
        if let Some(id) = id {
            if !state.documents.iter().any(|document| &document.id == id) {
                return Err(DomainError::not_found(ENTITY, id.as_str()));
            }
        }
        state.active = id.cloned();
        Ok(())
    }

    pub fn active(&self) -> Option<DocumentId> {
        rw_read(&self.state, COMPONENT, "active").active.clone()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, COMPONENT, "len").documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DocumentEvent) {
        if self.events.send(event).is_err() {
            debug!(target = "domain::documents", "no document event subscribers");
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn list_documents(&self) -> Vec<Document> {
        rw_read(&self.state, COMPONENT, "list_documents")
            .documents
            .clone()
    }

    fn get_content(&self, id: &DocumentId) -> Result<String, DomainError> {
        self.get(id).map(|document| document.content)
    }

    fn on_content_change(&self, id: &DocumentId, content: String) -> Result<(), DomainError> {
        {
            let mut state = rw_write(&self.state, COMPONENT, "on_content_change");
            let document = state
                .documents
                .iter_mut()
                .find(|document| &document.id == id)
                .ok_or_else(|| DomainError::not_found(ENTITY, id.as_str()))?;
            document.content = content;
        }

        self.publish(DocumentEvent::ContentChanged { id: id.clone() });
        Ok(())
    }
}
