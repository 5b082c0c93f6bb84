//! Document registry
//!
//! Maps server-issued opaque ids to files on disk. Uploaded documents are
//! owned by the registry and deleted on unregister; documents registered by
//! path are left in place. Path registration is confined to the storage root
//! and only accepts files that start with the PDF magic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};

/// Leading bytes of every PDF file
const PDF_MAGIC: &[u8] = b"%PDF-";

/// A document the server can deliver
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDocument {
    pub id: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Whether the registry created the file (and deletes it on unregister)
    pub owned: bool,
    pub registered_at: DateTime<Utc>,
}

pub struct DocumentRegistry {
    upload_dir: PathBuf,
    /// Only files below this directory can be registered by path
    storage_root: PathBuf,
    documents: RwLock<HashMap<String, RegisteredDocument>>,
}

impl DocumentRegistry {
    pub fn new(upload_dir: PathBuf, storage_root: PathBuf) -> Self {
        Self {
            upload_dir,
            storage_root,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Store uploaded bytes and register them under a new id
    pub async fn register_bytes(
        &self,
        data: &[u8],
        name: Option<String>,
    ) -> DeliveryResult<RegisteredDocument> {
        if !data.starts_with(PDF_MAGIC) {
            return Err(DeliveryError::BadRequest(
                "Uploaded file is not a PDF document".to_string(),
            ));
        }

        let id = new_id();
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(format!("{}.pdf", id));
        tokio::fs::write(&path, data).await?;

        let document = RegisteredDocument {
            name: name.unwrap_or_else(|| format!("{}.pdf", id)),
            id: id.clone(),
            path,
            size: data.len() as u64,
            owned: true,
            registered_at: Utc::now(),
        };

        tracing::info!(
            doc_id = %document.id,
            name = %document.name,
            size = document.size,
            "Registered uploaded document"
        );

        self.documents.write().insert(id, document.clone());
        Ok(document)
    }

    /// Register an existing file below the storage root without taking ownership of it
    pub async fn register_path(&self, path: &Path) -> DeliveryResult<RegisteredDocument> {
        let path = self.resolve_stored(path).await?;

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(DeliveryError::BadRequest(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if !has_pdf_magic(&path).await? {
            return Err(DeliveryError::BadRequest(format!(
                "{} is not a PDF document",
                path.display()
            )));
        }

        let id = new_id();
        let document = RegisteredDocument {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone()),
            id: id.clone(),
            size: metadata.len(),
            path,
            owned: false,
            registered_at: Utc::now(),
        };

        tracing::info!(doc_id = %document.id, path = %document.path.display(), "Registered stored document");

        self.documents.write().insert(id, document.clone());
        Ok(document)
    }

    /// Canonical form of `path`, rejected unless it lies below the storage root
    async fn resolve_stored(&self, path: &Path) -> DeliveryResult<PathBuf> {
        let root = tokio::fs::canonicalize(&self.storage_root).await.map_err(|e| {
            tracing::warn!(root = %self.storage_root.display(), error = %e, "Storage root unavailable");
            DeliveryError::Forbidden("Path registration is not available".to_string())
        })?;

        let resolved = tokio::fs::canonicalize(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeliveryError::NotFound(format!("{} does not exist", path.display()))
            } else {
                DeliveryError::Io(e)
            }
        })?;

        if !resolved.starts_with(&root) {
            tracing::warn!(path = %path.display(), "Rejected path outside the storage root");
            return Err(DeliveryError::Forbidden(format!(
                "{} is outside the storage root",
                path.display()
            )));
        }
        Ok(resolved)
    }

    pub fn get(&self, id: &str) -> DeliveryResult<RegisteredDocument> {
        self.documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DeliveryError::NotFound(format!("Document {} not found", id)))
    }

    /// All registered documents, oldest first
    pub fn list(&self) -> Vec<RegisteredDocument> {
        let mut documents: Vec<_> = self.documents.read().values().cloned().collect();
        documents.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        documents
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Forget `id`, deleting the file if the registry owns it
    ///
    /// Cache and pool cleanup is the caller's job.
    pub async fn unregister(&self, id: &str) -> DeliveryResult<RegisteredDocument> {
        let document = self
            .documents
            .write()
            .remove(id)
            .ok_or_else(|| DeliveryError::NotFound(format!("Document {} not found", id)))?;

        if document.owned {
            match tokio::fs::remove_file(&document.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(doc_id = %id, error = %e, "Failed to delete uploaded file");
                }
            }
        }

        tracing::info!(doc_id = %id, "Unregistered document");
        Ok(document)
    }
}

async fn has_pdf_magic(path: &Path) -> DeliveryResult<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = [0u8; 5];
    match file.read_exact(&mut head).await {
        Ok(_) => Ok(head == PDF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_and_unregister_upload() {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::new(dir.path().join("uploads"), dir.path().to_path_buf());

        let doc = registry
            .register_bytes(b"%PDF-1.7 body", Some("report.pdf".to_string()))
            .await
            .unwrap();
        assert!(doc.owned);
        assert_eq!(doc.size, 13);
        assert_eq!(doc.name, "report.pdf");
        assert!(doc.path.exists());
        assert_eq!(registry.get(&doc.id).unwrap().path, doc.path);

        registry.unregister(&doc.id).await.unwrap();
        assert!(!doc.path.exists());
        assert!(matches!(registry.get(&doc.id), Err(DeliveryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_pdf_upload() {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::new(dir.path().to_path_buf(), dir.path().to_path_buf());

        let result = registry.register_bytes(b"PK\x03\x04zip", None).await;
        assert!(matches!(result, Err(DeliveryError::BadRequest(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_registered_path_is_not_deleted() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("stored.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();
        let registry = DocumentRegistry::new(dir.path().join("uploads"), dir.path().to_path_buf());

        let doc = registry.register_path(&file).await.unwrap();
        assert!(!doc.owned);
        assert_eq!(doc.name, "stored.pdf");

        registry.unregister(&doc.id).await.unwrap();
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_register_missing_path() {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let result = registry.register_path(&dir.path().join("nope.pdf")).await;
        assert!(matches!(result, Err(DeliveryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_register_path_outside_storage_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("storage");
        std::fs::create_dir_all(&root).unwrap();
        let outside = dir.path().join("secret.pdf");
        std::fs::write(&outside, b"%PDF-1.4 secret").unwrap();
        let registry = DocumentRegistry::new(dir.path().join("uploads"), root.clone());

        assert!(matches!(
            registry.register_path(&outside).await,
            Err(DeliveryError::Forbidden(_))
        ));
        // Traversal out of the root resolves to the same file
        assert!(matches!(
            registry.register_path(&root.join("../secret.pdf")).await,
            Err(DeliveryError::Forbidden(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_path_requires_pdf_magic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"plain text").unwrap();
        std::fs::write(dir.path().join("tiny.pdf"), b"%PD").unwrap();
        let registry = DocumentRegistry::new(dir.path().join("uploads"), dir.path().to_path_buf());

        for name in ["notes.txt", "tiny.pdf"] {
            assert!(matches!(
                registry.register_path(&dir.path().join(name)).await,
                Err(DeliveryError::BadRequest(_))
            ));
        }
        assert!(matches!(
            registry.register_path(dir.path()).await,
            Err(DeliveryError::BadRequest(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let a = registry.register_bytes(b"%PDF-a", None).await.unwrap();
        let b = registry.register_bytes(b"%PDF-b", None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id() {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(matches!(
            registry.unregister("missing").await,
            Err(DeliveryError::NotFound(_))
        ));
    }
}
