//! # Document Bundles and Blob Store
//!
//! A farmer's application consists of two documents, an identity document and
//! an eligibility certificate. The service records *references* to uploaded
//! blobs; the bytes live in a [`DocumentStore`] and are read back only when an
//! approval needs to hash them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// The document types an application needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Government identity document.
    Identity,
    /// Proof of eligibility for the farming scheme.
    EligibilityCertificate,
}

impl DocumentType {
    /// Every type a complete bundle holds.
    pub const REQUIRED: [DocumentType; 2] = [Self::Identity, Self::EligibilityCertificate];

    /// Return the string representation of this document type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::EligibilityCertificate => "eligibility_certificate",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "eligibility_certificate" => Ok(Self::EligibilityCertificate),
            other => Err(format!(
                "unknown document type '{other}' (expected identity or eligibility_certificate)"
            )),
        }
    }
}

/// Pointer to one uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    /// Key of the blob in the document store.
    pub blob_ref: String,
    /// MIME type reported at upload.
    pub content_type: String,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
}

/// The documents a farmer has uploaded, by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct DocumentBundle(BTreeMap<DocumentType, DocumentRef>);

impl DocumentBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace a document.
    pub fn insert(&mut self, doc_type: DocumentType, doc: DocumentRef) -> Option<DocumentRef> {
        self.0.insert(doc_type, doc)
    }

    /// The document of a given type.
    pub fn get(&self, doc_type: DocumentType) -> Option<&DocumentRef> {
        self.0.get(&doc_type)
    }

    /// Number of documents present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no document has been uploaded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required types not yet uploaded.
    pub fn missing(&self) -> Vec<DocumentType> {
        DocumentType::REQUIRED
            .into_iter()
            .filter(|t| !self.0.contains_key(t))
            .collect()
    }

    /// Whether every required type is present.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Blob store failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreError {
    /// No blob under this reference.
    #[error("document blob not found: {0}")]
    NotFound(String),
    /// The reference is not acceptable to this store.
    #[error("invalid document reference: {0}")]
    InvalidRef(String),
    /// Backend I/O failure.
    #[error("document store I/O error: {0}")]
    Io(String),
}

/// Read access to uploaded document bytes.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Fetch the bytes of a blob.
    async fn fetch_bytes(&self, blob_ref: &str) -> Result<Vec<u8>, DocumentStoreError>;
}

/// Blobs held in process memory. Used in development and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob under `blob_ref`.
    pub fn put(&self, blob_ref: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.write().insert(blob_ref.into(), bytes.into());
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch_bytes(&self, blob_ref: &str) -> Result<Vec<u8>, DocumentStoreError> {
        self.blobs
            .read()
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| DocumentStoreError::NotFound(blob_ref.to_string()))
    }
}

/// Blobs stored as files under a root directory; a blob reference is a
/// relative path below the root.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Serve blobs from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference to a path, refusing anything that escapes the root.
    fn resolve(&self, blob_ref: &str) -> Result<PathBuf, DocumentStoreError> {
        let rel = Path::new(blob_ref);
        let plain = !blob_ref.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(DocumentStoreError::InvalidRef(blob_ref.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn fetch_bytes(&self, blob_ref: &str) -> Result<Vec<u8>, DocumentStoreError> {
        let path = self.resolve(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentStoreError::NotFound(blob_ref.to_string()))
            }
            Err(e) => Err(DocumentStoreError::Io(format!("{}: {e}", path.display()))),
        }
    }
}
