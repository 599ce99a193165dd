//! Test configuration helpers

use satfetch::{Config, RetryPolicy};
use std::path::Path;
use std::time::Duration;

/// Retry policy with millisecond delays so failing tests stay fast
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        idle_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(20),
        stall_retry_delay: Duration::from_millis(30),
        jitter: false,
        size_tolerance: 1024,
    }
}

/// Full configuration rooted in a temp directory
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.harvest.listen_dir = root.join("browser");
    config.harvest.timeout = Duration::from_secs(5);
    config.harvest.poll_interval = Duration::from_millis(50);
    config.harvest.file_settle = Duration::from_millis(20);
    config.retry = fast_policy(3);
    config
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
