//! Frame Consumer - Broker Ingestion Loop
//!
//! ## Responsibilities
//!
//! - Connect to the Kafka broker with bounded startup retries
//! - Consume frame envelopes sequentially, one workflow run at a time
//! - Track processing counters and emit per-message statistics
//! - Publish frames for the HTTP gateway
//!
//! A malformed message is counted and skipped, never fatal. Shutdown
//! drains the in-flight message before the loop exits.

use crate::error::{Error, Result};
use crate::models::{AnalysisRequest, Severity};
use crate::workflow::WorkflowEngine;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Wire format of one frame message on the broker topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnvelope {
    /// Base64-encoded image bytes
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub organization_id: String,
}

impl FrameEnvelope {
    /// Decode into a validated analysis request
    pub fn into_request(self) -> Result<AnalysisRequest> {
        let image = BASE64
            .decode(self.image.as_bytes())
            .map_err(|e| Error::Validation(format!("invalid base64 image: {}", e)))?;
        AnalysisRequest::new(image, self.timestamp, self.location, self.organization_id)
    }
}

/// Shared processing counters, monotonic for the process lifetime
#[derive(Debug, Default)]
pub struct ConsumerStats {
    messages_processed: AtomicU64,
    incidents_detected: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub incidents_detected: u64,
    pub errors: u64,
}

impl ConsumerStats {
    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incident(&self) {
        self.incidents_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            incidents_detected: self.incidents_detected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Broker connection settings for the consumer and publisher
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub connect_retries: u32,
    pub connect_retry_delay: Duration,
}

/// Client settings shared by every consumer instance. A fresh group starts
/// from the earliest offset so frames published before the first
/// subscription are not dropped.
fn consumer_client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "6000");
    client
}

/// Sequential frame ingestion loop over a Kafka topic
pub struct FrameConsumer {
    consumer: StreamConsumer,
    processor: FrameProcessor,
    topic: String,
}

impl FrameConsumer {
    /// Connect and subscribe, probing broker metadata with bounded retries.
    /// Exhausting the retry budget is fatal to startup.
    pub async fn connect(
        config: &BrokerConfig,
        engine: Arc<WorkflowEngine>,
        stats: Arc<ConsumerStats>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = consumer_client_config(config).create()?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match consumer.fetch_metadata(Some(&config.topic), Duration::from_secs(10)) {
                Ok(_) => {
                    tracing::info!(
                        brokers = %config.brokers,
                        topic = %config.topic,
                        attempt,
                        "Connected to broker"
                    );
                    break;
                }
                Err(e) if attempt < config.connect_retries => {
                    tracing::warn!(
                        brokers = %config.brokers,
                        attempt,
                        max_attempts = config.connect_retries,
                        error = %e,
                        "Broker not reachable, retrying"
                    );
                    tokio::time::sleep(config.connect_retry_delay).await;
                }
                Err(e) => {
                    return Err(Error::Broker(format!(
                        "broker unreachable after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }

        consumer.subscribe(&[&config.topic])?;

        Ok(Self {
            consumer,
            processor: FrameProcessor::new(engine, stats),
            topic: config.topic.clone(),
        })
    }

    /// Consume until the shutdown signal flips. Frames are processed one at
    /// a time; the in-flight frame finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(topic = %self.topic, "Consumer loop started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        self.processor.process(message.payload()).await;
                    }
                    Err(e) => {
                        self.processor.stats.record_error();
                        tracing::warn!(error = %e, "Broker receive error");
                    }
                },
            }
        }

        let stats = self.processor.stats.snapshot();
        tracing::info!(
            messages_processed = stats.messages_processed,
            incidents_detected = stats.incidents_detected,
            errors = stats.errors,
            "Consumer loop stopped"
        );
    }
}

/// Per-message handling: envelope decode, workflow dispatch, counters.
/// Separated from the broker loop so the skip-and-continue contract is
/// testable without a live consumer.
pub struct FrameProcessor {
    engine: Arc<WorkflowEngine>,
    stats: Arc<ConsumerStats>,
}

impl FrameProcessor {
    pub fn new(engine: Arc<WorkflowEngine>, stats: Arc<ConsumerStats>) -> Self {
        Self { engine, stats }
    }

    /// Handle one raw payload. A malformed message is counted and skipped;
    /// nothing here is fatal to the loop.
    pub async fn process(&self, payload: Option<&[u8]>) {
        let Some(payload) = payload else {
            self.stats.record_error();
            tracing::warn!("Skipping message with empty payload");
            return;
        };

        let envelope: FrameEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(error = %e, "Skipping malformed envelope");
                return;
            }
        };

        let request = match envelope.into_request() {
            Ok(request) => request,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(error = %e, "Skipping undecodable frame");
                return;
            }
        };

        let location = request.location.clone();
        let state = self.engine.run(request).await;

        if state.is_failed() {
            self.stats.record_error();
        } else {
            self.stats.record_processed();
            if let Some(ref result) = state.result {
                if result.reports_problem() {
                    self.stats.record_incident();
                    if result.severity >= Severity::High {
                        tracing::error!(
                            location = %location,
                            incident_type = %result.incident_type,
                            severity = %result.severity,
                            confidence = result.confidence,
                            recommended_action = %result.recommended_action,
                            "ALERT: incident requires immediate attention"
                        );
                        // Alert delivery and automated response are stubs;
                        // wire email/SMS/webhook and actuators here
                        tracing::info!(
                            incident_type = %result.incident_type,
                            "Sending alert for incident"
                        );
                        tracing::info!(
                            incident_type = %result.incident_type,
                            "Triggering automated response"
                        );
                    } else {
                        tracing::warn!(
                            location = %location,
                            incident_type = %result.incident_type,
                            severity = %result.severity,
                            confidence = result.confidence,
                            "Incident detected"
                        );
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            location = %location,
            messages_processed = stats.messages_processed,
            incidents_detected = stats.incidents_detected,
            errors = stats.errors,
            "Frame handled"
        );
    }
}

/// Publishes gateway-submitted frames onto the consumer topic
pub struct FramePublisher {
    producer: FutureProducer,
    topic: String,
}

impl FramePublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    pub async fn publish(&self, envelope: &FrameEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        let record = FutureRecord::to(&self.topic)
            .key(&envelope.organization_id)
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| Error::Broker(format!("publish failed: {}", e)))?;

        Ok(())
    }
}
