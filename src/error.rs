use thiserror::Error;

/// Failure modes of one batch job.
///
/// Every variant except `Unexpected` corresponds to a structural
/// precondition checked before or during the listing phase. Per-video
/// extraction failures are deliberately NOT represented here: they are
/// carried as data in [`crate::extractor::ExtractionResult`] and never
/// abort the batch.
#[derive(Debug, Error)]
pub enum JobError {
    /// The input prefix does not follow the fixed 7-segment layout.
    #[error("S3 prefix '{0}' is not in the expected format")]
    InvalidPrefixFormat(String),

    /// The object store rejected or failed the listing call.
    #[error("Failed to list videos from S3: {0}")]
    Listing(String),

    /// The listing succeeded but matched no videos. An empty batch is
    /// treated as a job failure, not a vacuous success.
    #[error("No videos found in the specified folder.")]
    EmptyBatch,

    /// Anything else. Converted to a terminal FAILED publish at the
    /// orchestrator boundary so the job never gets stuck mid-state.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = JobError::InvalidPrefixFormat("a/b".to_string());
        assert_eq!(err.to_string(), "S3 prefix 'a/b' is not in the expected format");

        let err = JobError::EmptyBatch;
        assert_eq!(err.to_string(), "No videos found in the specified folder.");

        let err = JobError::Listing("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
