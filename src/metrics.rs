//! Prometheus metrics for the jukebox.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! with its own scrape listener, and defines the metric name constants.
//! When no recorder is installed the `metrics` macros are no-ops, so
//! library code records unconditionally.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Bytes downloaded into the play cache (counter).
pub const DOWNLOAD_BYTES_TOTAL: &str = "jukebox_download_bytes_total";

/// Song downloads (counter). Labels: status.
pub const DOWNLOADS_TOTAL: &str = "jukebox_downloads_total";

/// Songs played to completion (counter).
pub const SONGS_PLAYED_TOTAL: &str = "jukebox_songs_played_total";

/// Player launches that failed or exited non-zero (counter).
pub const PLAYER_FAILURES_TOTAL: &str = "jukebox_player_failures_total";

/// Mirrored writes (counter). Labels: operation, outcome.
pub const MIRROR_WRITES_TOTAL: &str = "jukebox_mirror_writes_total";

/// Songs in the current play queue (gauge).
pub const QUEUE_LENGTH: &str = "jukebox_queue_length";

// -- Global recorder installation ---------------------------------------------

/// Address the scrape listener was bound to, once installed.
static METRICS_LISTENER: OnceLock<SocketAddr> = OnceLock::new();

/// Install the global Prometheus recorder with an HTTP scrape listener on
/// `listen`. Idempotent: later calls return the first address.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen: &str) -> anyhow::Result<SocketAddr> {
    if let Some(addr) = METRICS_LISTENER.get() {
        return Ok(*addr);
    }
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address '{listen}': {e}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    describe_metrics();
    Ok(*METRICS_LISTENER.get_or_init(|| addr))
}

/// Register metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(DOWNLOAD_BYTES_TOTAL, "Bytes downloaded into the play cache");
    describe_counter!(DOWNLOADS_TOTAL, "Song downloads by status");
    describe_counter!(SONGS_PLAYED_TOTAL, "Songs played to completion");
    describe_counter!(PLAYER_FAILURES_TOTAL, "Failed player launches");
    describe_counter!(MIRROR_WRITES_TOTAL, "Mirrored writes by operation and outcome");
    describe_gauge!(QUEUE_LENGTH, "Songs in the current play queue");
}

// -- Tests --------------------------------------------------------------------
