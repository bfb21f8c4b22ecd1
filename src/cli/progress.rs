//! Progress bar and summary reporting for CLI installs.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;

use crate::shell::InstallProgress;
use crate::stats::InstallReport;

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates the bar counting staged assets.
fn make_install_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} assets - {msg}",
    )
    .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("━━╌"));
    bar.set_style(style);
    bar
}

/// Install progress drawn as an indicatif bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Creates an empty bar; its length is set when the install starts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bar: make_install_bar(),
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallProgress for BarProgress {
    fn on_install_start(&self, cache_name: &str, assets: usize) {
        self.bar.set_length(assets as u64);
        self.bar.set_message(format!("opening {cache_name}"));
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_asset_cached(&self, url: &str, bytes: u64) {
        self.bar.inc(1);
        self.bar.set_message(format!("{url} ({})", format_size(bytes)));
    }

    fn on_asset_failed(&self, url: &str, error: &str) {
        self.bar.println(format!("  {} {url}: {error}", style("failed").red().bold()));
    }

    fn on_install_complete(&self, _report: &InstallReport) {
        self.bar.finish_and_clear();
    }

    fn on_install_failed(&self, _error: &str) {
        self.bar.abandon();
    }
}

/// Formats a byte count with a binary unit suffix.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Formats an elapsed time as milliseconds below a second, seconds above.
pub fn format_elapsed(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

/// Prints a summary of a finished install.
pub fn print_install_summary(report: &InstallReport) {
    println!("\n{SEPARATOR}");
    println!("{} {}", style("Installed").green().bold(), report.cache_name);
    println!("{SEPARATOR}");
    println!("  Assets cached:     {}", report.assets_cached);
    println!("  Total size:        {}", format_size(report.total_bytes));
    println!("  Total time:        {}", format_elapsed(report.elapsed));
    println!("  Throughput:        {}/s", format_size(report.bytes_per_sec()));
    println!(
        "  Installed at:      {}",
        report.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{SEPARATOR}");
}

/// Prints the keys held by a bucket.
pub fn print_keys(cache_name: &str, keys: &[Url]) {
    println!("{} ({} entries)", style(cache_name).bold(), keys.len());
    for key in keys {
        println!("  GET {key}");
    }
}
