//! Common test utilities for skydav-core integration tests.

#![allow(dead_code)]

use skydav_core::testing::MemoryRepo;
use skydav_core::{CloudFs, CloudPath, Entry, SkydavConfig};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shorthand for [`CloudPath::new`].
pub fn p(path: &str) -> CloudPath {
    CloudPath::new(path)
}

/// `/docs` holding `a.txt` (1 byte) and `b.txt` (2 bytes).
pub fn docs_folder() -> Entry {
    Entry::folder_with_children(
        "/docs",
        vec![Entry::file("/docs/a.txt", 1), Entry::file("/docs/b.txt", 2)],
    )
}

/// Caching on, detector off, no parent prefetch, no retry delay.
pub fn quiet_config() -> SkydavConfig {
    SkydavConfig::default()
        .cache_ttl(Duration::from_secs(30))
        .prefetch_parent(false)
        .retry(no_delay_retry())
}

/// Like [`quiet_config`] but with the activity poller running every 30s.
pub fn detector_config() -> SkydavConfig {
    SkydavConfig::default()
        .cache_ttl(Duration::from_secs(600))
        .detector_min_ttl(Duration::from_secs(60))
        .activity_poll_interval(Duration::from_secs(30))
        .prefetch_parent(false)
        .retry(no_delay_retry())
}

fn no_delay_retry() -> skydav_core::RetryConfig {
    skydav_core::RetryConfig {
        retry_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// A session over `repo`.
pub fn session(repo: &Arc<MemoryRepo>, config: SkydavConfig) -> CloudFs {
    init_tracing();
    CloudFs::new(Arc::clone(repo) as Arc<dyn skydav_core::CloudRepo>, config)
        .expect("valid test config")
}

/// Let spawned tasks run without moving the paused clock noticeably.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Names of the children of a folder entry, in order.
pub fn child_names(entry: &Entry) -> Vec<String> {
    entry
        .children()
        .expect("folder with listing")
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}
