//! Prometheus metrics for the retrieval service
//!
//! Every metric name is declared once in [`names`] and described in
//! [`register_metrics`]; recorders below only reference those constants.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metric names, all under the `kgforge_` prefix
pub mod names {
    pub const HTTP_REQUESTS: &str = "kgforge_http_requests_total";
    pub const HTTP_LATENCY: &str = "kgforge_http_request_duration_seconds";

    pub const RETRIEVALS: &str = "kgforge_retrievals_total";
    pub const RETRIEVAL_LATENCY: &str = "kgforge_retrieval_duration_seconds";
    pub const RETRIEVAL_CANDIDATES: &str = "kgforge_retrieval_candidate_chunks";
    pub const RETRIEVAL_DOCUMENTS: &str = "kgforge_retrieval_documents";

    pub const EXPANSIONS: &str = "kgforge_entity_expansions_total";
    pub const EXPANSION_FAILURES: &str = "kgforge_expansion_failures_total";

    pub const EMBEDDINGS: &str = "kgforge_embedding_requests_total";
    pub const EMBEDDING_LATENCY: &str = "kgforge_embedding_duration_seconds";

    pub const CACHE_LOOKUPS: &str = "kgforge_cache_lookups_total";
}

/// Histogram buckets in seconds, 5ms to 10s
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Describe every metric to the installed recorder
pub fn register_metrics() {
    use names::*;

    for (name, help) in [
        (HTTP_REQUESTS, "HTTP requests by method, endpoint and status"),
        (RETRIEVALS, "Completed retrieval calls"),
        (EXPANSIONS, "Entity expansions by similarity policy"),
        (EXPANSION_FAILURES, "Documents returned without graph context after a failed expansion"),
        (EMBEDDINGS, "Embedding API requests by model and outcome"),
        (CACHE_LOOKUPS, "Result cache lookups by cache and outcome"),
    ] {
        describe_counter!(name, Unit::Count, help);
    }

    for (name, help) in [
        (HTTP_LATENCY, "HTTP request latency"),
        (RETRIEVAL_LATENCY, "End-to-end retrieval latency"),
        (EMBEDDING_LATENCY, "Embedding call latency"),
    ] {
        describe_histogram!(name, Unit::Seconds, help);
    }

    describe_histogram!(RETRIEVAL_CANDIDATES, Unit::Count, "Fused chunk candidates per retrieval");
    describe_gauge!(RETRIEVAL_DOCUMENTS, Unit::Count, "Document bundles in the latest retrieval");

    tracing::info!("Metrics registered");
}

/// Times one HTTP request from handler entry to response
pub struct RequestMetrics {
    start: Instant,
    method: &'static str,
    endpoint: &'static str,
}

impl RequestMetrics {
    pub fn start(method: &'static str, endpoint: &'static str) -> Self {
        Self {
            start: Instant::now(),
            method,
            endpoint,
        }
    }

    pub fn finish(self, status: u16) {
        counter!(
            names::HTTP_REQUESTS,
            "method" => self.method,
            "endpoint" => self.endpoint,
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(names::HTTP_LATENCY, "method" => self.method, "endpoint" => self.endpoint)
            .record(self.start.elapsed().as_secs_f64());
    }
}

pub fn record_retrieval(duration_secs: f64, candidate_count: usize, document_count: usize) {
    counter!(names::RETRIEVALS).increment(1);
    histogram!(names::RETRIEVAL_LATENCY).record(duration_secs);
    histogram!(names::RETRIEVAL_CANDIDATES).record(candidate_count as f64);
    gauge!(names::RETRIEVAL_DOCUMENTS).set(document_count as f64);
}

/// `policy` is the expansion band label: skip, moderate or deep
pub fn record_expansion(policy: &'static str) {
    counter!(names::EXPANSIONS, "policy" => policy).increment(1);
}

pub fn record_expansion_failure() {
    counter!(names::EXPANSION_FAILURES).increment(1);
}

pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!(names::EMBEDDINGS, "model" => model.to_string(), "outcome" => outcome).increment(1);

    if success {
        histogram!(
            names::EMBEDDING_LATENCY,
            "model" => model.to_string(),
            "batch" => batch_size.to_string()
        )
        .record(duration_secs);
    }
}

pub fn record_cache(hit: bool, cache_name: &'static str) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_LOOKUPS, "cache" => cache_name, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_ascend() {
        assert!(LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_names_share_prefix() {
        for name in [
            names::HTTP_REQUESTS,
            names::RETRIEVALS,
            names::EXPANSIONS,
            names::EXPANSION_FAILURES,
            names::CACHE_LOOKUPS,
        ] {
            assert!(name.starts_with("kgforge_"));
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls must be no-ops
        let metrics = RequestMetrics::start("POST", "/v1/retrieve");
        metrics.finish(200);
        record_retrieval(0.01, 5, 2);
        record_expansion("moderate");
        record_expansion_failure();
        record_cache(false, "retrieval");
    }
}
