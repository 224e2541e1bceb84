use prometheus::{TextEncoder, Encoder, Registry, HistogramVec, IntCounterVec, opts, histogram_opts};
use once_cell::sync::Lazy;
use axum::{response::IntoResponse, http::StatusCode};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(histogram_opts!("http_request_duration_seconds", "HTTP request latency"), &["method", "path"]).unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static DEPLOYMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("deployments_total", "Deployment outcomes by terminal status"), &["status"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Collapse id-bearing paths to a stable label to keep cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    let mut out = Vec::new();
    for seg in path.split('/') {
        if seg.len() >= 32 && uuid::Uuid::parse_str(seg).is_ok() {
            out.push(":id");
        } else {
            out.push(seg);
        }
    }
    out.join("/")
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn uuid_segments_collapse() {
        let p = "/api/projects/6f6b2a2e-1111-4a4a-9b9b-222233334444/env";
        assert_eq!(normalize_path(p), "/api/projects/:id/env");
    }

    #[test]
    fn plain_paths_unchanged() {
        assert_eq!(normalize_path("/health"), "/health");
    }
}
