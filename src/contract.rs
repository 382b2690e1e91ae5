//! Remote storage boundary: the trait the pipeline calls instead of a
//! concrete Drive/Docs client.
//!
//! The trait is annotated for `mockall` (behind the same feature gate the
//! tests use) so the whole pipeline can run against a deterministic mock.
//! The real implementation lives in [`crate::drive`].

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::filter::FieldValue;

/// Error type for remote calls (boxed, the caller decides what is fatal).
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// A candidate document as returned by folder listing.
///
/// Immutable once fetched: created during listing, consumed during assembly,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDescriptor {
    /// Remote file ID.
    pub id: String,
    /// Display title, also used as the TOC entry text and sort key.
    pub title: String,
    /// Free-form metadata (year, artist, difficulty, tags, ...).
    pub metadata: BTreeMap<String, FieldValue>,
}

impl DocumentDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Trait for everything the pipeline needs from the remote storage and
/// document service.
///
/// Every call is expected to have a bounded timeout enforced by the
/// transport; the pipeline itself never retries.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// List the documents that are members of the given source folder.
    async fn list_documents(
        &self,
        folder_id: &str,
    ) -> std::result::Result<Vec<DocumentDescriptor>, SourceError>;

    /// Export a document as a PDF blob.
    async fn export_pdf(&self, file_id: &str) -> std::result::Result<Vec<u8>, SourceError>;

    /// Copy a document remotely (used for the cover template, so the
    /// original is never mutated). Returns the server-assigned copy ID.
    async fn copy_document(
        &self,
        file_id: &str,
        title: &str,
    ) -> std::result::Result<String, SourceError>;

    /// Replace all placeholder tokens in one batched request, returning the
    /// total number of occurrences changed.
    async fn batch_replace_text(
        &self,
        file_id: &str,
        replacements: &BTreeMap<String, String>,
    ) -> std::result::Result<usize, SourceError>;

    /// Delete a remote document (best-effort cleanup of temporary copies).
    async fn delete_document(&self, file_id: &str) -> std::result::Result<(), SourceError>;
}
