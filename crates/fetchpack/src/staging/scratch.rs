//! Private scratch storage for one staging run

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::{BundleError, FileOperation, Result};

/// Characters that cannot appear in a standalone file name on common platforms
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Make `name` safe to use as a single file name
///
/// Path separators, reserved characters and control characters become `_`
/// and the result is cut to `max_len` characters. Names that would be empty
/// or refer to `.`/`..` are replaced.
pub fn sanitize_file_name(name: &str, max_len: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '_' } else { c })
        .take(max_len.max(1))
        .collect();

    if cleaned.trim().is_empty() || cleaned.chars().all(|c| c == '.') {
        return "file".to_string();
    }
    cleaned
}

/// `stem (n)ext`, cut back to at most `max_len` characters
///
/// The stem gives way first, then the extension. The counter is never cut.
fn suffixed_name(stem: &str, ext: &str, counter: usize, max_len: usize) -> String {
    let suffix = format!(" ({})", counter);
    let budget = max_len.saturating_sub(suffix.chars().count());
    if budget == 0 {
        return counter.to_string();
    }

    let ext_len = ext.chars().count();
    let (stem_len, ext) = if ext_len < budget {
        (budget - ext_len, ext)
    } else {
        (budget, "")
    };
    let stem: String = stem.chars().take(stem_len).collect();
    format!("{}{}{}", stem, suffix, ext)
}

/// A temporary directory owned by one run
///
/// Dropping the storage removes the directory and everything in it; `remove`
/// does the same but reports failures.
#[derive(Debug)]
pub struct ScratchStorage {
    dir: TempDir,
}

impl ScratchStorage {
    /// Create a scratch directory under the system temp dir
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fetchpack_batch_")
            .tempdir()
            .map_err(|e| BundleError::fs(std::env::temp_dir(), FileOperation::CreateDir, e))?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Create a scratch directory inside `parent`
    pub fn create_in<P: AsRef<Path>>(parent: P) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix("fetchpack_batch_")
            .tempdir_in(parent)
            .map_err(|e| BundleError::fs(parent, FileOperation::CreateDir, e))?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Pick a path for `name` that is not taken yet
    ///
    /// `clip.mp4` becomes `clip (1).mp4`, `clip (2).mp4`, ... on collision.
    /// The stem is shortened so that a suffixed name stays within `max_len`
    /// characters.
    pub async fn unique_path(&self, name: &str, max_len: usize) -> Result<(String, PathBuf)> {
        let (stem, ext) = match name.rfind('.') {
            Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
            _ => (name, ""),
        };

        let mut candidate = name.to_string();
        let mut counter = 1;
        loop {
            let path = self.dir.path().join(&candidate);
            let taken = fs::try_exists(&path)
                .await
                .map_err(|e| BundleError::fs(&path, FileOperation::Metadata, e))?;
            if !taken {
                return Ok((candidate, path));
            }
            candidate = suffixed_name(stem, ext, counter, max_len);
            counter += 1;
        }
    }

    /// Create (or truncate) a file for writing
    pub async fn create_file(&self, path: &Path) -> Result<fs::File> {
        fs::File::create(path)
            .await
            .map_err(|e| BundleError::fs(path, FileOperation::Create, e))
    }

    /// Remove the directory recursively
    pub fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| BundleError::fs(path, FileOperation::Delete, e))
    }
}

/// Flush and close a writer, reporting failures
pub(crate) async fn close_file(mut file: fs::File, path: &Path) -> Result<()> {
    file.shutdown()
        .await
        .map_err(|e| BundleError::fs(path, FileOperation::Close, e))
}

/// Close a writer on an error path, where the original error wins
pub(crate) async fn close_file_quietly(file: fs::File, path: &Path) {
    if let Err(e) = close_file(file, path).await {
        warn!("Failed to close {}: {}", path.display(), e);
    }
}
