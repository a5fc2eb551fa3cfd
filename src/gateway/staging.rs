use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A document written to the temp dir for a gateway that sends from disk.
///
/// The file is removed when the guard drops.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub async fn write(file_name: &str, bytes: &[u8]) -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "portal_courier_{}_{}",
            uuid::Uuid::new_v4().simple(),
            file_name
        ));
        let guard = Self { path };
        tokio::fs::write(&guard.path, bytes).await?;
        debug!(path = %guard.path.display(), bytes = bytes.len(), "Staged document");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staged document"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged document {}: {}", self.path.display(), e),
        }
    }
}
