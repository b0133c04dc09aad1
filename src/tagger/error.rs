use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Stage of thumbnail generation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStage {
    Workspace,
    Download,
    Resize,
    Upload,
    Cleanup,
}

impl fmt::Display for ThumbnailStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Download => "download",
            Self::Resize => "resize",
            Self::Upload => "upload",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Everything that can go wrong while processing one storage event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The event can never be processed (e.g. not an image).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-directory entry occupies a scratch directory path.
    #[error("scratch path {} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("vision service error: {0}")]
    VisionService(String),

    /// The resize tool ran but exited unsuccessfully.
    #[error("thumbnail tool `{command}` exited with {status}: {stderr}")]
    ThumbnailTool {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("thumbnail {stage} failed: {source}")]
    Thumbnail {
        stage: ThumbnailStage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Tag an error with the thumbnail stage it came from.
    pub fn at_stage(self, stage: ThumbnailStage) -> Self {
        match self {
            already @ Self::Thumbnail { .. } => already,
            other => Self::Thumbnail {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Whether redelivering the same event could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidInput(_)
            | Self::NotADirectory(_)
            | Self::ThumbnailTool { .. }
            | Self::Config(_) => false,
            Self::Thumbnail { source, .. } => source.is_retryable(),
            Self::Storage(_)
            | Self::VisionService(_)
            | Self::Repository(_)
            | Self::Io { .. }
            | Self::Timeout { .. } => true,
        }
    }
}

/// Run `fut`, failing with [`PipelineError::Timeout`] if it outlives `limit`.
pub(crate) async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { operation, limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_keeps_innermost_stage() {
        let err = PipelineError::Storage("boom".into())
            .at_stage(ThumbnailStage::Download)
            .at_stage(ThumbnailStage::Cleanup);
        match err {
            PipelineError::Thumbnail { stage, .. } => assert_eq!(stage, ThumbnailStage::Download),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn retryability_follows_wrapped_cause() {
        let transient = PipelineError::Storage("503".into()).at_stage(ThumbnailStage::Upload);
        assert!(transient.is_retryable());

        let fatal = PipelineError::NotADirectory(PathBuf::from("/tmp/x"))
            .at_stage(ThumbnailStage::Workspace);
        assert!(!fatal.is_retryable());
        assert!(!PipelineError::InvalidInput("text/plain".into()).is_retryable());
    }

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let err = bounded("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                operation: "slow call",
                limit,
            } if limit == Duration::from_millis(10)
        ));
        assert_eq!(err.to_string(), "slow call timed out after 10ms");
        assert!(err.is_retryable());
    }
}
