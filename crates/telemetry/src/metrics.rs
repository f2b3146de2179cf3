use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static WORKERS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("camera_workers_running", "Number of live camera workers")
        .expect("metric can be created");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static FRAMES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("camera_frames_processed_total", "Frames read per camera"),
        &["camera"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static EVENTS_DETECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "camera_events_detected_total",
            "Events persisted per camera and type",
        ),
        &["camera", "event_type"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static STREAM_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "camera_stream_reconnects_total",
            "RTSP reconnect attempts per camera",
        ),
        &["camera"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static INFERENCE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new(
            "camera_inference_seconds",
            "Wall-clock time of a single model invocation",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["model"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static CLIP_WRITE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "camera_clip_write_failures_total",
        "Clip persistence attempts that failed",
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mfs = REGISTRY.gather();
    encoder.encode(&mfs, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_render() {
        FRAMES_PROCESSED.with_label_values(&["cam-1"]).inc();
        EVENTS_DETECTED.with_label_values(&["cam-1", "cash"]).inc();
        WORKERS_RUNNING.set(1);

        let text = render();
        assert!(text.contains("camera_frames_processed_total"));
        assert!(text.contains("camera_events_detected_total"));
    }
}
