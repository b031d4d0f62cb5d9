//! Extraction Orchestrator
//!
//! Batch frame-extraction orchestration service for the wagon inspection
//! platform. Job submissions name a bucket and an input key prefix; the
//! orchestrator lists the videos under that prefix, maps the input prefix
//! to its processed-media output prefix, drives a per-video frame
//! extraction step over the batch, and publishes an externally-polled
//! status record from submission through to a terminal state.
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                 S3 Bucket                 PostgreSQL
//! ┌──────────────┐           ┌──────────────────┐      ┌──────────────┐
//! │ Job          │           │ .../Raw-videos/  │      │ job_status   │
//! │ Submissions  │──────────▶│ .../Processed    │      └──────────────┘
//! └──────────────┘           │     Frames/      │             ▲
//!        │                   └──────────────────┘             │
//!        ▼                        ▲        │                  │
//! ┌──────────────┐                │        ▼                  │
//! │ Job          │         ┌──────────────────┐               │
//! │ Orchestrator │────────▶│ Object Catalog   │               │
//! └──────────────┘         └──────────────────┘               │
//!        │                                                    │
//!        ▼                                                    │
//! ┌──────────────┐                                            │
//! │ Frame        │         ┌──────────────────┐               │
//! │ Extractor    │         │ Status Store     │───────────────┘
//! └──────────────┘         └──────────────────┘
//! ```
//!
//! Delivery is at-least-once with late acknowledgement: the submission
//! offset is committed only after the job publishes a terminal state, so
//! a worker crash mid-job causes a from-scratch re-run on another worker.
//! Job steps are not individually idempotent; a re-run re-extracts and
//! re-uploads its frames.

pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod prefix;
pub mod status;
pub mod usage;

pub use catalog::{FolderListing, ObjectCatalog, VideoLister};
pub use config::Config;
pub use consumer::{JobKafkaConsumer, JobSubmission};
pub use error::JobError;
pub use extractor::{
    ExtractionResult, FfmpegFrameExtractor, FrameExtractor, NoopProgressSink, ProgressSink,
};
pub use orchestrator::JobOrchestrator;
pub use status::{JobResult, JobState, JobStatus, PgStatusStore, StatusStore};
pub use usage::{format_bytes, UsageReport, UsageStats};
