//! Prometheus metrics for uploads, releases and sweeps.
//!
//! The statics are created lazily; [`register`] adds them to the registry
//! the server exposes on `/metrics`.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static UPLOADS_LINKED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_uploads_linked_total",
            "Uploads stored and linked into a record",
        ),
        &["namespace"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "curator_upload_failures_total",
        "Uploads rejected by the blob store",
    )
    .expect("metric creation failed")
});

pub static LINK_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "curator_link_failures_total",
        "Uploads whose record write failed, leaving an orphan",
    )
    .expect("metric creation failed")
});

pub static BLOBS_RELEASED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_blobs_released_total",
            "Blobs deleted after their last reference was removed",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SWEEPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("curator_sweeps_total", "Reconciliation sweeps by outcome"),
        &["mode", "outcome"],
    )
    .expect("metric creation failed")
});

pub static ORPHANS_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_orphans_deleted_total",
            "Orphaned blobs deleted by sweeps",
        ),
        &["namespace"],
    )
    .expect("metric creation failed")
});

pub static GRACE_SKIPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_sweep_grace_skips_total",
            "Unreferenced blobs kept because they are inside the grace window",
        ),
        &["namespace"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "curator_sweep_duration_seconds",
            "Wall time of reconciliation sweeps",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["mode"],
    )
    .expect("metric creation failed")
});

/// Register the lifecycle metrics with `registry`.
pub fn register(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(UPLOADS_LINKED.clone()))?;
    registry.register(Box::new(UPLOAD_FAILURES.clone()))?;
    registry.register(Box::new(LINK_FAILURES.clone()))?;
    registry.register(Box::new(BLOBS_RELEASED.clone()))?;
    registry.register(Box::new(SWEEPS.clone()))?;
    registry.register(Box::new(ORPHANS_DELETED.clone()))?;
    registry.register(Box::new(GRACE_SKIPS.clone()))?;
    registry.register(Box::new(SWEEP_DURATION.clone()))?;
    Ok(())
}
