use crate::config::KafkaConfig;
use crate::orchestrator::JobOrchestrator;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One batch-job submission, as delivered by the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Opaque job id assigned at submission time.
    pub job_id: Uuid,
    /// Bucket holding both the input videos and the output frames.
    pub bucket: String,
    /// Input prefix in the fixed 7-segment layout.
    pub input_prefix: String,
}

/// Kafka consumer delivering job submissions to the orchestrator.
///
/// Offsets are committed only after the orchestrator reaches a terminal
/// state (late acknowledgement): a worker crash mid-job leaves the offset
/// uncommitted and the job is redelivered to another consumer in the
/// group and re-run from scratch.
pub struct JobKafkaConsumer {
    consumer: StreamConsumer,
    orchestrator: Arc<JobOrchestrator>,
}

impl JobKafkaConsumer {
    /// Create a consumer subscribed to the job submission topic.
    pub async fn new(config: &KafkaConfig, orchestrator: Arc<JobOrchestrator>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            );

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.jobs_topic])
            .context("Failed to subscribe to job submission topic")?;

        info!(
            topic = %config.jobs_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            orchestrator,
        })
    }

    /// Consume and process submissions until the stream ends.
    ///
    /// Jobs within one consumer run strictly one at a time; cross-job
    /// parallelism is bounded by the number of consumer instances in the
    /// group.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting job submission consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    self.handle_message(&message).await;

                    // Late acknowledgement: by the time we get here the
                    // job has published a terminal state (or the payload
                    // was rejected as poison).
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        warn!(error = %e, "Failed to commit offset");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("jobs.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        match decode_submission(message.payload()) {
            Ok(job) => {
                info!(
                    job_id = %job.job_id,
                    bucket = %job.bucket,
                    input_prefix = %job.input_prefix,
                    "Job submission received"
                );

                self.orchestrator.run(&job).await;
                metrics::counter!("jobs.processed").increment(1);
            }
            Err(e) => {
                // Poison messages are acknowledged, not retried, so they
                // cannot wedge the partition.
                error!(
                    error = %e,
                    partition = message.partition(),
                    offset = message.offset(),
                    "Rejected malformed job submission"
                );
                metrics::counter!("jobs.submissions.rejected").increment(1);
            }
        }
    }
}

/// Decode a submission payload.
fn decode_submission(payload: Option<&[u8]>) -> Result<JobSubmission> {
    let payload = payload.context("Message has no payload")?;
    serde_json::from_slice(payload).context("Failed to deserialize job submission")
}
