use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RPC_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "tidepool_rpc_messages_total",
            "RPC messages classified by the channel",
        ),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static REDRAW_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "tidepool_redraw_events_total",
            "Redraw events applied to the grid, by event name",
        ),
        &["event"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FRAMES_RENDERED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidepool_frames_rendered_total",
        "Render passes produced from grid state",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidepool_decode_errors_total",
        "Malformed MessagePack streams that reset the decoder",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static UNHANDLED_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidepool_rpc_unhandled_requests_total",
        "Peer requests dropped because no responder was configured",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RING_DROPPED_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidepool_ring_dropped_bytes_total",
        "Outbound bytes dropped because the ring was full",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    // Touch the statics so they appear even when still zero.
    Lazy::force(&RPC_MESSAGES);
    Lazy::force(&REDRAW_EVENTS);
    Lazy::force(&FRAMES_RENDERED);
    Lazy::force(&DECODE_ERRORS);
    Lazy::force(&UNHANDLED_REQUESTS);
    Lazy::force(&RING_DROPPED_BYTES);

    let mut buf = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buf) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
