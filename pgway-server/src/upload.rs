//! Upload handling.
//!
//! Endpoints tagged `upload` run their configured handlers over the
//! multipart payload inside the request transaction; each handler returns a
//! JSON metadata fragment, and the combined metadata back-fills the
//! routine's upload-metadata parameter before the main statement runs. A
//! failed request calls `on_error` so handlers can undo partial work.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use pgway_core::options::UploadOptions;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// A file received from a multipart form upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The field name in the form.
    pub name: String,
    /// The original file name provided by the client, if any.
    pub file_name: Option<String>,
    /// The content type of the file, if provided.
    pub content_type: Option<String>,
    /// The raw file data.
    pub data: Bytes,
}

/// One upload handler. Handlers are selected per endpoint by name via the
/// `upload [handler, …]` annotation.
pub trait UploadHandler: Send + Sync + 'static {
    /// Process one file, returning its metadata fragment.
    fn handle<'a>(
        &'a self,
        file: &'a UploadedFile,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

    /// Undo partial work after a failed request.
    fn on_error<'a>(
        &'a self,
        metadata: &'a Value,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Handler registry keyed by name.
#[derive(Clone, Default)]
pub struct UploadHandlers {
    handlers: HashMap<String, Arc<dyn UploadHandler>>,
}

impl UploadHandlers {
    /// Registry with the built-in `file` handler.
    pub fn with_defaults() -> UploadHandlers {
        let mut registry = UploadHandlers::default();
        registry.register("file", FileUploadHandler);
        registry
    }

    pub fn register(&mut self, name: &str, handler: impl UploadHandler) {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UploadHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Run the named handlers over every file; returns the combined
    /// metadata array. On failure, already-produced metadata is rolled back
    /// through `on_error`.
    pub async fn run(
        &self,
        names: &[String],
        files: &[UploadedFile],
        options: &UploadOptions,
    ) -> Result<Value, GatewayError> {
        let mut selected = Vec::new();
        for name in names {
            match self.get(name) {
                Some(handler) => selected.push((name.clone(), handler)),
                None => {
                    return Err(GatewayError::Internal(format!(
                        "unknown upload handler '{name}'"
                    )))
                }
            }
        }

        let mut done: Vec<(Arc<dyn UploadHandler>, Value)> = Vec::new();
        for file in files {
            for (name, handler) in &selected {
                match handler.handle(file, options).await {
                    Ok(metadata) => done.push((handler.clone(), metadata)),
                    Err(err) => {
                        warn!(handler = %name, error = %err, "upload handler failed");
                        for (handler, metadata) in &done {
                            handler.on_error(metadata, options).await;
                        }
                        return Err(err);
                    }
                }
            }
        }
        Ok(Value::Array(done.into_iter().map(|(_, m)| m).collect()))
    }

    /// Roll back every metadata fragment after a failed request.
    pub async fn undo(&self, names: &[String], metadata: &Value, options: &UploadOptions) {
        let Some(entries) = metadata.as_array() else {
            return;
        };
        for entry in entries {
            for name in names {
                if let Some(handler) = self.get(name) {
                    handler.on_error(entry, options).await;
                }
            }
        }
    }
}

/// The built-in handler: writes each file into the configured directory and
/// reports where it landed.
pub struct FileUploadHandler;

static UPLOAD_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn target_path(options: &UploadOptions, file: &UploadedFile) -> PathBuf {
    let dir = options
        .directory
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().display().to_string());
    let original = file
        .file_name
        .clone()
        .unwrap_or_else(|| file.name.clone());
    // Avoid collisions without trusting the client-supplied name.
    let seq = UPLOAD_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let unique = format!(
        "{:x}-{seq}-{}",
        std::process::id(),
        sanitize_file_name(&original)
    );
    PathBuf::from(dir).join(unique)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl UploadHandler for FileUploadHandler {
    fn handle<'a>(
        &'a self,
        file: &'a UploadedFile,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(max) = options.max_size {
                if file.data.len() as u64 > max {
                    return Err(GatewayError::Validation {
                        status: 413,
                        message: "upload too large".to_string(),
                    });
                }
            }
            let path = target_path(options, file);
            tokio::fs::write(&path, &file.data)
                .await
                .map_err(|e| GatewayError::Internal(format!("upload write: {e}")))?;
            debug!(path = %path.display(), size = file.data.len(), "upload stored");
            Ok(json!({
                "type": "file",
                "field": file.name,
                "file_name": file.file_name,
                "content_type": file.content_type,
                "size": file.data.len(),
                "path": path.display().to_string(),
            }))
        })
    }

    fn on_error<'a>(
        &'a self,
        metadata: &'a Value,
        _options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(path) = metadata.get("path").and_then(Value::as_str) {
                if let Err(err) = tokio::fs::remove_file(path).await {
                    debug!(path, error = %err, "upload rollback failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &str) -> UploadedFile {
        UploadedFile {
            name: "file".to_string(),
            file_name: Some(name.to_string()),
            content_type: Some("text/plain".to_string()),
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }

    fn options(dir: &std::path::Path) -> UploadOptions {
        UploadOptions {
            directory: Some(dir.display().to_string()),
            ..UploadOptions::default()
        }
    }

    #[tokio::test]
    async fn file_handler_writes_and_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadHandlers::with_defaults();
        let metadata = registry
            .run(
                &["file".to_string()],
                &[file("report.txt", "hello")],
                &options(dir.path()),
            )
            .await
            .unwrap();
        let entry = &metadata.as_array().unwrap()[0];
        assert_eq!(entry["size"], 5);
        let path = entry["path"].as_str().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn undo_removes_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadHandlers::with_defaults();
        let opts = options(dir.path());
        let metadata = registry
            .run(&["file".to_string()], &[file("a.txt", "x")], &opts)
            .await
            .unwrap();
        let path = metadata[0]["path"].as_str().unwrap().to_string();
        assert!(std::path::Path::new(&path).exists());
        registry.undo(&["file".to_string()], &metadata, &opts).await;
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadHandlers::with_defaults();
        let mut opts = options(dir.path());
        opts.max_size = Some(2);
        let err = registry
            .run(&["file".to_string()], &[file("big.txt", "toolarge")], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { status: 413, .. }));
    }

    #[tokio::test]
    async fn unknown_handler_is_an_error() {
        let registry = UploadHandlers::with_defaults();
        let err = registry
            .run(
                &["nope".to_string()],
                &[],
                &UploadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }
}
