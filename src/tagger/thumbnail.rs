use super::error::{bounded, PipelineError, Result, ThumbnailStage};
use super::schema::{ImageEvent, ThumbnailResult};
use super::storage::StorageGateway;
use super::workspace::ScratchSpace;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Bounding box (square) of generated thumbnails.
pub const THUMBNAIL_SIZE: u32 = 200;

/// External resizer invoked as `<program> <path> -thumbnail NxN <path>`.
#[derive(Debug, Clone)]
pub struct ResizeTool {
    program: String,
    size: u32,
}

impl ResizeTool {
    pub fn new(program: impl Into<String>, size: u32) -> Self {
        Self {
            program: program.into(),
            size,
        }
    }

    fn geometry(&self) -> String {
        format!("{0}x{0}", self.size)
    }

    /// The invocation as a shell would need to see it, for logs and errors.
    pub fn command_line(&self, path: &Path) -> String {
        let path = shell_quote(&path.to_string_lossy());
        format!(
            "{} {} -thumbnail {} {}",
            shell_quote(&self.program),
            path,
            shell_quote(&self.geometry()),
            path
        )
    }

    /// Resize `path` in place, preserving aspect ratio. The path is passed
    /// as its own argv entry, so whitespace needs no quoting here.
    pub async fn resize_in_place(&self, path: &Path) -> Result<()> {
        let command = self.command_line(path);
        debug!(command = %command, "running resize tool");

        let output = Command::new(&self.program)
            .arg(path)
            .arg("-thumbnail")
            .arg(self.geometry())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::io(format!("failed to spawn `{command}`"), e))?;

        if !output.status.success() {
            return Err(PipelineError::ThumbnailTool {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Quote `raw` for a POSIX shell when it contains anything beyond a safe set.
fn shell_quote(raw: &str) -> String {
    let safe = !raw.is_empty()
        && raw.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '+' | ',')
        });
    if safe {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

/// Downloads an image, shrinks it with the resize tool and uploads the
/// result under the thumbnail prefix of the same bucket.
pub struct ThumbnailGenerator {
    storage: Arc<dyn StorageGateway>,
    scratch: ScratchSpace,
    tool: ResizeTool,
    prefix: String,
    timeout: Duration,
}

impl ThumbnailGenerator {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        scratch: ScratchSpace,
        tool: ResizeTool,
        prefix: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            scratch,
            tool,
            prefix: prefix.trim_matches('/').to_string(),
            timeout,
        }
    }

    /// Destination object name for a source file name.
    pub fn destination_for(&self, file_name: &str) -> String {
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    pub async fn generate_thumbnail(&self, event: &ImageEvent) -> Result<ThumbnailResult> {
        let scratch = self
            .scratch
            .acquire(&event.name)
            .await
            .map_err(|e| e.at_stage(ThumbnailStage::Workspace))?;

        bounded(
            "object download",
            self.timeout,
            self.storage.download(&event.bucket, &event.name, scratch.path()),
        )
        .await
        .map_err(|e| e.at_stage(ThumbnailStage::Download))?;

        bounded("resize tool", self.timeout, self.tool.resize_in_place(scratch.path()))
            .await
            .map_err(|e| e.at_stage(ThumbnailStage::Resize))?;

        let destination = self.destination_for(event.file_name());
        let uploaded = bounded(
            "thumbnail upload",
            self.timeout,
            self.storage.upload(&event.bucket, scratch.path(), &destination),
        )
        .await
        .map_err(|e| e.at_stage(ThumbnailStage::Upload))?;

        scratch
            .remove()
            .await
            .map_err(|e| e.at_stage(ThumbnailStage::Cleanup))?;

        info!(bucket = %event.bucket, thumbnail = %uploaded.name, "thumbnail uploaded");
        Ok(ThumbnailResult {
            uploaded_name: uploaded.name,
        })
    }
}
