//! Install statistics.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// The bucket that was populated.
    pub cache_name: String,
    /// Number of assets stored.
    pub assets_cached: usize,
    /// Total body bytes stored.
    pub total_bytes: u64,
    /// Wall time from cache open to commit.
    pub elapsed: Duration,
    /// When the bucket commit finished.
    pub installed_at: DateTime<Utc>,
}

impl InstallReport {
    /// Returns the average fetch throughput in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Accumulates an [`InstallReport`] while assets are fetched.
pub struct InstallReportBuilder {
    cache_name: String,
    assets_cached: usize,
    total_bytes: u64,
    start_time: Instant,
}

impl InstallReportBuilder {
    /// Starts timing an install into `cache_name`.
    #[must_use]
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            assets_cached: 0,
            total_bytes: 0,
            start_time: Instant::now(),
        }
    }

    /// Records one staged asset of `bytes` length.
    pub const fn add_asset(&mut self, bytes: u64) {
        self.assets_cached += 1;
        self.total_bytes += bytes;
    }

    /// Finishes the report; call after the bucket commit.
    #[must_use]
    pub fn build(self) -> InstallReport {
        InstallReport {
            cache_name: self.cache_name,
            assets_cached: self.assets_cached,
            total_bytes: self.total_bytes,
            elapsed: self.start_time.elapsed(),
            installed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(total_bytes: u64, elapsed: Duration) -> InstallReport {
        InstallReport {
            cache_name: "v1".to_string(),
            assets_cached: 1,
            total_bytes,
            elapsed,
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn throughput_zero_elapsed() {
        assert_eq!(report(1000, Duration::ZERO).bytes_per_sec(), 0);
    }

    #[test]
    fn throughput() {
        assert_eq!(report(1000, Duration::from_secs(2)).bytes_per_sec(), 500);
    }

    #[test]
    fn builder_counts_assets_and_bytes() {
        let mut builder = InstallReportBuilder::new("finance-os-v1");
        builder.add_asset(100);
        builder.add_asset(0);
        builder.add_asset(50);

        let report = builder.build();
        assert_eq!(report.cache_name, "finance-os-v1");
        assert_eq!(report.assets_cached, 3);
        assert_eq!(report.total_bytes, 150);
    }

    #[test]
    fn empty_install_report() {
        let report = InstallReportBuilder::new("v1").build();
        assert_eq!(report.assets_cached, 0);
        assert_eq!(report.total_bytes, 0);
    }
}
