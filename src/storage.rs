use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

// 1. StorageService Contract
/// StorageService
///
/// Contract for storing uploaded cover images. Handlers only ever see the returned
/// path string, which is what gets recorded on the book row.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the target directory if needed. Called once at startup.
    async fn ensure_root_exists(&self) -> AppResult<()>;

    /// Writes `bytes` under a unique name derived from `file_name` and returns the
    /// stored path.
    async fn save_cover(&self, file_name: &str, bytes: &[u8]) -> AppResult<String>;

    /// Removes a previously stored cover. A path that no longer exists is not an error.
    async fn remove_cover(&self, path: &str) -> AppResult<()>;
}

// 2. The Real Implementation (local directory)
/// LocalStorageClient
///
/// Writes covers into one fixed directory (`COVER_DIR`). The file write is not
/// transactional with the book insert; a failure between the two leaves an orphan.
#[derive(Clone)]
pub struct LocalStorageClient {
    root: PathBuf,
}

impl LocalStorageClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only paths inside the cover directory may be removed; a book row's
    /// `cover_image` is client-controlled and must not reach arbitrary files.
    fn is_managed(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rest) => {
                rest.components().next().is_some()
                    && rest.components().all(|c| matches!(c, Component::Normal(_)))
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl StorageService for LocalStorageClient {
    async fn ensure_root_exists(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::Internal(format!(
                "Failed to create cover directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    async fn save_cover(&self, file_name: &str, bytes: &[u8]) -> AppResult<String> {
        let target = self.root.join(unique_file_name(file_name));
        tokio::fs::write(&target, bytes).await.map_err(|e| {
            AppError::Internal(format!("Failed to write cover {}: {}", target.display(), e))
        })?;
        tracing::debug!(path = %target.display(), size = bytes.len(), "Stored cover image");
        Ok(target.to_string_lossy().into_owned())
    }

    async fn remove_cover(&self, path: &str) -> AppResult<()> {
        let path = Path::new(path);
        if !self.is_managed(path) {
            tracing::warn!(path = %path.display(), "Refusing to remove file outside the cover directory");
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "Failed to remove cover {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// sanitize_file_name
///
/// Keeps only the final path segment of a client-supplied file name, so names like
/// `../../etc/passwd` or `C:\tmp\x.png` cannot escape the cover directory.
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .next_back()
        .unwrap_or("cover")
        .to_string()
}

fn unique_file_name(file_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(file_name))
}

// 3. The Mock Implementation (For Tests)
/// MockStorageService
///
/// In-memory `StorageService` for handler and API tests. Stored paths look like
/// `mock-covers/<unique name>`.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A poisoned map is still a valid map for a test double.
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail_if_requested(&self) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Internal(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_root_exists(&self) -> AppResult<()> {
        self.fail_if_requested()
    }

    async fn save_cover(&self, file_name: &str, bytes: &[u8]) -> AppResult<String> {
        self.fail_if_requested()?;
        let path = format!("mock-covers/{}", unique_file_name(file_name));
        self.lock().insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn remove_cover(&self, path: &str) -> AppResult<()> {
        self.fail_if_requested()?;
        self.lock().remove(path);
        Ok(())
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
