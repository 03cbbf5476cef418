//! Metrics collection and Prometheus export.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use bark_core::{BarkError, BarkResult};

/// Generation stage, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Semantic,
    Coarse,
    Fine,
    Codec,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Coarse => "coarse",
            Self::Fine => "fine",
            Self::Codec => "codec",
        }
    }
}

/// Metrics recorder for the generation pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarkMetrics;

impl BarkMetrics {
    /// Initialize the metrics system and start the Prometheus exporter.
    ///
    /// # Arguments
    /// * `port` - Port for the Prometheus metrics endpoint
    pub fn init(port: u16) -> BarkResult<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();

        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| BarkError::internal(format!("metrics init failed: {e}")))?;

        Self::register_metrics();

        Ok(Self)
    }

    /// Metrics handle without an exporter; recording is a no-op.
    pub fn init_noop() -> Self {
        Self
    }

    fn register_metrics() {
        describe_counter!(
            "bark_requests_total",
            "Total number of pipeline calls received"
        );
        describe_counter!(
            "bark_requests_failed",
            "Total number of pipeline calls that returned an error"
        );
        describe_counter!(
            "bark_tokens_generated_total",
            "Tokens produced per generation stage"
        );
        describe_histogram!(
            "bark_stage_latency_ms",
            "Latency of a single generation stage in milliseconds"
        );
        describe_histogram!(
            "bark_audio_duration_secs",
            "Duration of generated audio in seconds"
        );
        describe_histogram!(
            "bark_rtf",
            "Real-time factor (processing time / audio duration)"
        );
        describe_gauge!("bark_models_loaded", "Number of models currently loaded");
    }

    /// Record a new pipeline call.
    pub fn request_received(&self) {
        counter!("bark_requests_total").increment(1);
    }

    /// Record a failed pipeline call.
    pub fn request_failed(&self) {
        counter!("bark_requests_failed").increment(1);
    }

    /// Record a finished stage.
    pub fn record_stage(&self, stage: Stage, tokens: usize, ms: f64) {
        counter!("bark_tokens_generated_total", "stage" => stage.as_str()).increment(tokens as u64);
        histogram!("bark_stage_latency_ms", "stage" => stage.as_str()).record(ms);
    }

    /// Record generated audio and the real-time factor of producing it.
    pub fn record_audio(&self, duration_secs: f64, total_ms: f64) {
        histogram!("bark_audio_duration_secs").record(duration_secs);
        if duration_secs > 0.0 {
            histogram!("bark_rtf").record(total_ms / 1000.0 / duration_secs);
        }
    }

    /// Set the number of loaded models.
    pub fn set_models_loaded(&self, count: usize) {
        gauge!("bark_models_loaded").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop() {
        let metrics = BarkMetrics::init_noop();

        // no recorder installed; calls must not panic
        metrics.request_received();
        metrics.record_stage(Stage::Coarse, 150, 12.5);
        metrics.record_audio(2.0, 500.0);
        metrics.record_audio(0.0, 10.0);
        metrics.set_models_loaded(3);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Semantic.as_str(), "semantic");
        assert_eq!(Stage::Codec.as_str(), "codec");
    }
}
