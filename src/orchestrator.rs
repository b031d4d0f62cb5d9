use crate::catalog::VideoLister;
use crate::consumer::JobSubmission;
use crate::error::JobError;
use crate::extractor::{FrameExtractor, ProgressSink};
use crate::prefix;
use crate::status::{JobResult, JobStatus, StatusStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Drives one batch job from submission to a terminal state.
///
/// Within a job, videos are processed strictly sequentially: progress
/// accounting and artifact ordering depend on a deterministic fold over
/// the listing. Cross-job parallelism comes from running more consumer
/// instances, never from sharing an orchestrator between jobs.
pub struct JobOrchestrator {
    lister: Arc<dyn VideoLister>,
    extractor: Arc<dyn FrameExtractor>,
    status: Arc<dyn StatusStore>,
    sample_interval: u32,
}

impl JobOrchestrator {
    pub fn new(
        lister: Arc<dyn VideoLister>,
        extractor: Arc<dyn FrameExtractor>,
        status: Arc<dyn StatusStore>,
        sample_interval: u32,
    ) -> Self {
        Self {
            lister,
            extractor,
            status,
            sample_interval,
        }
    }

    /// Run a job to a terminal state.
    ///
    /// This is the single error boundary: every failure inside the run,
    /// expected or not, is converted into a terminal FAILED publish so the
    /// job's externally-visible state can never get stuck. Errors while
    /// publishing the terminal record itself are logged and dropped; the
    /// delivery loop acknowledges the job either way.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, input_prefix = %job.input_prefix))]
    pub async fn run(&self, job: &JobSubmission) {
        if let Err(e) = self.status.publish(&JobStatus::pending(job.job_id)).await {
            error!(error = %e, "Failed to publish initial PENDING status");
        }

        match self.execute(job).await {
            Ok(result) => {
                info!(frame_count = result.frame_count, "Job completed");
                metrics::counter!("jobs.completed").increment(1);

                if let Err(e) = self
                    .status
                    .publish(&JobStatus::completed(job.job_id, result))
                    .await
                {
                    error!(error = %e, "Failed to publish COMPLETED status");
                }
            }
            Err(job_error) => {
                error!(error = %job_error, "Job failed");
                metrics::counter!("jobs.failed").increment(1);

                if let Err(e) = self
                    .status
                    .publish(&JobStatus::failed(job.job_id, &job_error))
                    .await
                {
                    error!(error = %e, "Failed to publish FAILED status");
                }
            }
        }
    }

    /// The state machine proper. Every step returns an explicit error
    /// kind; `run` owns the conversion to a terminal publish.
    async fn execute(&self, job: &JobSubmission) -> Result<JobResult, JobError> {
        // Structural precondition: the output prefix is a pure function
        // of the input prefix. On format failure no videos are attempted.
        let output_prefix = prefix::output_prefix(&job.input_prefix)?;

        let listings = self
            .lister
            .list_videos(&job.bucket, &job.input_prefix)
            .await
            .map_err(|e| JobError::Listing(e.to_string()))?;

        let folder = listings
            .into_iter()
            .next()
            .filter(|folder| !folder.videos.is_empty())
            .ok_or(JobError::EmptyBatch)?;

        let total = folder.videos.len();
        let mut frames: Vec<String> = Vec::new();
        let mut failed_videos = 0usize;

        info!(total_videos = total, output_prefix = %output_prefix, "Starting batch");

        for (index, video) in folder.videos.iter().enumerate() {
            let video_key = prefix::join_key(&folder.name, video);
            let video_output = prefix::join_key(&output_prefix, prefix::stem(video));

            let sink: Arc<dyn ProgressSink> = Arc::new(RunningSink {
                status: Arc::clone(&self.status),
                job_id: job.job_id,
                progress: ((index * 100) / total) as u8,
                frames: frames.clone(),
            });

            let result = self
                .extractor
                .extract_frames(
                    &job.bucket,
                    &video_key,
                    &video_output,
                    self.sample_interval,
                    sink,
                )
                .await;

            // A failed video is recorded but never aborts the batch.
            if result.success {
                frames.extend(result.frames);
                metrics::counter!("jobs.videos.succeeded").increment(1);
            } else {
                failed_videos += 1;
                warn!(
                    video_key = %video_key,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Video extraction failed, continuing batch"
                );
                metrics::counter!("jobs.videos.failed").increment(1);
            }

            let processed = index + 1;
            let progress = ((processed * 100) / total) as u8;
            self.status
                .publish(&JobStatus::running(
                    job.job_id,
                    progress,
                    format!("Processing video {processed} of {total}"),
                    frames.clone(),
                ))
                .await
                .map_err(JobError::Unexpected)?;
        }

        if failed_videos > 0 {
            warn!(failed_videos, total_videos = total, "Batch finished with failures");
        }

        Ok(JobResult {
            frame_count: frames.len(),
            frames,
        })
    }
}

/// Progress sink handed to the extractor for one video: republishes
/// RUNNING with the overall progress and artifacts accumulated so far.
/// Intermediate notifications are best-effort; publish errors are logged
/// and dropped.
struct RunningSink {
    status: Arc<dyn StatusStore>,
    job_id: Uuid,
    progress: u8,
    frames: Vec<String>,
}

#[async_trait]
impl ProgressSink for RunningSink {
    async fn update(&self, message: String) {
        let record = JobStatus::running(self.job_id, self.progress, message, self.frames.clone());
        if let Err(e) = self.status.publish(&record).await {
            warn!(error = %e, job_id = %self.job_id, "Failed to publish progress update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FolderListing, MockVideoLister};
    use crate::extractor::{ExtractionResult, MockFrameExtractor};
    use crate::status::{JobState, MockStatusStore};
    use anyhow::anyhow;
    use std::sync::Mutex;

    const INPUT_PREFIX: &str = "media/intake/01-03-2024/clientA/Raw-videos/front/incoming";

    fn submission() -> JobSubmission {
        JobSubmission {
            job_id: Uuid::new_v4(),
            bucket: "wagon-inspection".to_string(),
            input_prefix: INPUT_PREFIX.to_string(),
        }
    }

    fn listing(videos: &[&str]) -> Vec<FolderListing> {
        vec![FolderListing {
            id: prefix::folder_id(INPUT_PREFIX),
            name: INPUT_PREFIX.to_string(),
            videos: videos.iter().map(|v| v.to_string()).collect(),
        }]
    }

    /// Status store mock that records every published record in order.
    fn recording_store() -> (MockStatusStore, Arc<Mutex<Vec<JobStatus>>>) {
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);

        let mut store = MockStatusStore::new();
        store.expect_publish().returning(move |status| {
            sink.lock().unwrap().push(status.clone());
            Ok(())
        });

        (store, published)
    }

    fn frames(prefix: &str, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("{prefix}/frame_{i:05}.jpg")).collect()
    }

    fn orchestrator(
        lister: MockVideoLister,
        extractor: MockFrameExtractor,
        store: MockStatusStore,
    ) -> JobOrchestrator {
        JobOrchestrator::new(Arc::new(lister), Arc::new(extractor), Arc::new(store), 10)
    }

    #[tokio::test]
    async fn test_successful_batch_reaches_completed() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .times(1)
            .returning(|_, _| Ok(listing(&["a.mp4", "b.mp4", "c.mp4"])));

        // 5, 0 and 7 artifacts for the three videos
        let mut extractor = MockFrameExtractor::new();
        let counts = Mutex::new(vec![5usize, 0, 7]);
        extractor
            .expect_extract_frames()
            .times(3)
            .returning(move |_, _, output_prefix, _, _| {
                let count = counts.lock().unwrap().remove(0);
                ExtractionResult::ok(frames(output_prefix, count))
            });

        let (store, published) = recording_store();
        let job = submission();

        orchestrator(lister, extractor, store).run(&job).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Completed);
        assert_eq!(last.progress, 100);
        assert_eq!(last.result.as_ref().unwrap().frame_count, 12);
        assert_eq!(last.frames.len(), 12);
        assert!(last.error.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .returning(|_, _| Ok(listing(&["a.mp4", "b.mp4", "c.mp4"])));

        let mut extractor = MockFrameExtractor::new();
        extractor
            .expect_extract_frames()
            .returning(|_, _, output_prefix, _, _| ExtractionResult::ok(frames(output_prefix, 1)));

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        assert_eq!(published[0].state, JobState::Pending);
        assert_eq!(published[0].progress, 0);

        let progresses: Vec<u8> = published.iter().map(|s| s.progress).collect();
        assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progresses.last().unwrap(), 100);

        // floor(1/3 * 100) and floor(2/3 * 100)
        let running: Vec<u8> = published
            .iter()
            .filter(|s| s.state == JobState::Running)
            .map(|s| s.progress)
            .collect();
        assert_eq!(running, vec![33, 66, 100]);
    }

    #[tokio::test]
    async fn test_all_videos_failing_still_completes() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .returning(|_, _| Ok(listing(&["a.mp4", "b.mp4"])));

        let mut extractor = MockFrameExtractor::new();
        extractor
            .expect_extract_frames()
            .times(2)
            .returning(|_, _, _, _, _| ExtractionResult::failed("decode error"));

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Completed);
        assert_eq!(last.progress, 100);
        assert_eq!(last.result.as_ref().unwrap().frame_count, 0);
        assert!(last.frames.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_fails() {
        let mut lister = MockVideoLister::new();
        lister.expect_list_videos().returning(|_, _| Ok(Vec::new()));

        let mut extractor = MockFrameExtractor::new();
        extractor.expect_extract_frames().times(0);

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(
            last.error.as_deref(),
            Some("No videos found in the specified folder.")
        );
    }

    #[tokio::test]
    async fn test_listing_with_no_videos_fails() {
        let mut lister = MockVideoLister::new();
        lister.expect_list_videos().returning(|_, _| Ok(listing(&[])));

        let mut extractor = MockFrameExtractor::new();
        extractor.expect_extract_frames().times(0);

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        assert_eq!(published.last().unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_prefix_never_lists() {
        let mut lister = MockVideoLister::new();
        lister.expect_list_videos().times(0);

        let mut extractor = MockFrameExtractor::new();
        extractor.expect_extract_frames().times(0);

        let (store, published) = recording_store();
        let job = JobSubmission {
            job_id: Uuid::new_v4(),
            bucket: "wagon-inspection".to_string(),
            input_prefix: "too/short/prefix".to_string(),
        };

        orchestrator(lister, extractor, store).run(&job).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(
            last.error.as_deref(),
            Some("S3 prefix 'too/short/prefix' is not in the expected format")
        );
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_job() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .returning(|_, _| Err(anyhow!("access denied")));

        let mut extractor = MockFrameExtractor::new();
        extractor.expect_extract_frames().times(0);

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(
            last.error.as_deref(),
            Some("Failed to list videos from S3: access denied")
        );
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_artifacts_in_order() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .returning(|_, _| Ok(listing(&["a.mp4", "b.mp4", "c.mp4"])));

        let mut extractor = MockFrameExtractor::new();
        let calls = Mutex::new(0usize);
        extractor
            .expect_extract_frames()
            .times(3)
            .returning(move |_, _, output_prefix, _, _| {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                if *calls == 2 {
                    ExtractionResult::failed("corrupt container")
                } else {
                    ExtractionResult::ok(frames(output_prefix, 2))
                }
            });

        let (store, published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;

        let published = published.lock().unwrap();
        let last = published.last().unwrap();
        assert_eq!(last.state, JobState::Completed);
        assert_eq!(last.result.as_ref().unwrap().frame_count, 4);
        // Artifacts from video a precede artifacts from video c
        assert!(last.frames[0].contains("/a/"));
        assert!(last.frames[2].contains("/c/"));
    }

    #[tokio::test]
    async fn test_extractor_receives_mapped_output_prefix() {
        let mut lister = MockVideoLister::new();
        lister
            .expect_list_videos()
            .returning(|_, _| Ok(listing(&["wagon-07.mp4"])));

        let mut extractor = MockFrameExtractor::new();
        extractor
            .expect_extract_frames()
            .times(1)
            .withf(|bucket, video_key, output_prefix, interval, _| {
                bucket == "wagon-inspection"
                    && video_key
                        == "media/intake/01-03-2024/clientA/Raw-videos/front/incoming/wagon-07.mp4"
                    && output_prefix
                        == "media/intake/01-03-2024/clientA/Processed Frames/front/incoming/wagon-07"
                    && *interval == 10
            })
            .returning(|_, _, _, _, _| ExtractionResult::ok(Vec::new()));

        let (store, _published) = recording_store();
        orchestrator(lister, extractor, store).run(&submission()).await;
    }
}
