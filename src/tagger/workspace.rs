//! Process-local scratch area for in-flight file transforms.

use super::error::{PipelineError, Result};
use super::schema::relative_object_path;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Root of the scratch tree. Subdirectories mirror object folders, so two
/// distinct objects never share a scratch file.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure `<root>/<relative_dir>` exists as a directory. Idempotent.
    pub async fn ensure_dir(&self, relative_dir: &str) -> Result<PathBuf> {
        let mut target = self.root.clone();
        if !relative_dir.is_empty() {
            target.push(relative_object_path(relative_dir)?);
        }

        // Walk existing ancestors first so a stray file is reported precisely.
        let mut walked = PathBuf::new();
        for component in target.components() {
            walked.push(component);
            match fs::metadata(&walked).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(PipelineError::NotADirectory(walked)),
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => {
                    return Err(PipelineError::io(
                        format!("failed to inspect {}", walked.display()),
                        e,
                    ))
                }
            }
        }

        fs::create_dir_all(&target).await.map_err(|e| {
            PipelineError::io(format!("failed to create {}", target.display()), e)
        })?;
        Ok(target)
    }

    /// Reserve the scratch file for `object_name`, creating its directory.
    /// The returned guard deletes the file when dropped.
    pub async fn acquire(&self, object_name: &str) -> Result<ScratchFile> {
        let relative = relative_object_path(object_name)?;
        let folder = relative
            .parent()
            .and_then(Path::to_str)
            .unwrap_or_default()
            .to_string();
        let dir = self.ensure_dir(&folder).await?;
        let file_name = relative
            .file_name()
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!("`{object_name}` has no file name"))
            })?;
        Ok(ScratchFile {
            path: dir.join(file_name),
            released: false,
        })
    }
}

/// A scratch file owned for the duration of one transform.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    released: bool,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now and report failures. A file that was never
    /// written counts as removed.
    pub async fn remove(mut self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PipelineError::io(
                    format!("failed to remove {}", self.path.display()),
                    e,
                ))
            }
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
