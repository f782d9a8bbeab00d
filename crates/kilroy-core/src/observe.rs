//! Collector and lock metrics.
//!
//! Behind the `observe` feature these report through the [`metrics`] facade;
//! the embedding process installs whatever recorder it exports with. Without
//! the feature they compile to nothing.

/// Record a completed or aborted collection pass.
///
/// - `kilroy.gc.passes_total` – counter with `outcome` label (`ok` / `fail`)
/// - `kilroy.gc.pass_duration_seconds` – histogram
#[inline]
pub fn record_gc_pass(duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("kilroy.gc.passes_total", "outcome" => outcome).increment(1);
        metrics::histogram!("kilroy.gc.pass_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}

/// Record objects newly marked during a pass.
///
/// - `kilroy.gc.marked_total` – counter with `collection` label
#[inline]
pub fn record_marked(collection: &'static str, count: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("kilroy.gc.marked_total", "collection" => collection).increment(count);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (collection, count);
    }
}

/// Record sweep results for one collection.
///
/// - `kilroy.gc.swept_total` – counter with `collection` label
/// - `kilroy.gc.kept` – gauge with `collection` label
#[inline]
pub fn record_sweep(collection: &'static str, kept: u64, deleted: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("kilroy.gc.swept_total", "collection" => collection).increment(deleted);
        metrics::gauge!("kilroy.gc.kept", "collection" => collection).set(kept as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (collection, kept, deleted);
    }
}

/// Set the tracer's current work-queue length.
///
/// - `kilroy.gc.queue_len` – gauge
#[inline]
pub fn set_queue_len(len: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("kilroy.gc.queue_len").set(len as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = len;
    }
}

/// Record a lock acquisition wait time.
///
/// - `kilroy.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("kilroy.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a citation list rewritten by lazy validation.
///
/// - `kilroy.citations.pruned_total` – counter of dropped ids
#[inline]
pub fn record_citations_pruned(dropped: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("kilroy.citations.pruned_total").increment(dropped as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = dropped;
    }
}
