//! Install progress bar and cache/status reports.

use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cache::CacheEntry;
use crate::format::{format_age, format_bytes};
use crate::worker::InstallProgress;

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Shows precache progress as a bar of manifest entries.
pub struct InstallBar {
    bar: ProgressBar,
}

impl InstallBar {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan} Precaching [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            bar.set_style(style.progress_chars("━━╌"));
        }
        Self { bar }
    }
}

impl InstallProgress for InstallBar {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_fetched(&self, url: &str, bytes: usize) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("{url} ({})", format_bytes(bytes as u64)));
    }

    fn on_failed(&self, url: &str, error: &str) {
        self.bar.abandon_with_message(format!("✗ {url}: {error}"));
    }

    fn on_complete(&self, cache_name: &str) {
        self.bar.finish_with_message(format!("✓ {cache_name}"));
    }
}

/// Prints one namespace and its entries.
pub fn print_namespace(name: &str, current: bool, entries: &[CacheEntry]) {
    let total: u64 = entries.iter().map(|e| e.body.len() as u64).sum();
    let marker = if current { " (current)" } else { "" };

    println!("{SEPARATOR}");
    println!(
        "{name}{marker}: {} entry(ies), {}",
        entries.len(),
        format_bytes(total)
    );
    println!("{SEPARATOR}");

    let now = Utc::now();
    for entry in entries {
        println!(
            "  {:<32} {:>3} {:>10}  {}",
            entry.key,
            entry.status,
            format_bytes(entry.body.len() as u64),
            format_age(entry.cached_at, now)
        );
    }
}
