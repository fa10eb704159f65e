//! Inference metrics.
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! which recorder (if any) to install. Without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Metric names.
pub mod names {
    pub const REQUESTS: &str = "fastpitch_requests_total";
    pub const FAILURES: &str = "fastpitch_requests_failed";
    pub const FALLBACKS: &str = "fastpitch_prosody_fallbacks_total";
    pub const FRAMES: &str = "fastpitch_output_frames";
    pub const LATENCY_MS: &str = "fastpitch_inference_latency_ms";
}

/// Handle used by [`crate::InferenceSession`] to record its activity.
#[derive(Debug, Clone, Copy)]
pub struct SessionMetrics {
    enabled: bool,
}

impl SessionMetrics {
    /// Describe every metric once and return a recording handle.
    pub fn new(enabled: bool) -> Self {
        if enabled {
            describe_counter!(names::REQUESTS, "Inference requests received");
            describe_counter!(names::FAILURES, "Inference requests that returned an error");
            describe_counter!(
                names::FALLBACKS,
                "Requests whose supplied prosody was discarded for self-predicted prosody"
            );
            describe_histogram!(names::FRAMES, "Mel frames produced per utterance");
            describe_histogram!(names::LATENCY_MS, "Model inference latency in milliseconds");
        }
        Self { enabled }
    }

    /// A handle that records nothing.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn request_received(&self) {
        if self.enabled {
            counter!(names::REQUESTS).increment(1);
        }
    }

    pub fn request_failed(&self) {
        if self.enabled {
            counter!(names::FAILURES).increment(1);
        }
    }

    pub fn prosody_fallback(&self) {
        if self.enabled {
            counter!(names::FALLBACKS).increment(1);
        }
    }

    /// Record a finished request.
    pub fn request_completed(&self, frames: &[u32], latency_ms: f64) {
        if self.enabled {
            for &count in frames {
                histogram!(names::FRAMES).record(count as f64);
            }
            histogram!(names::LATENCY_MS).record(latency_ms);
        }
    }
}
