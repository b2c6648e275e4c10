//! CLI-specific progress handling for chunk-dl
//!
//! Renders per-chunk [`chunk_dl::Progress`] updates as a byte progress bar.

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {bytes_per_sec} {msg}";

/// Creates a progress bar for CLI display with chunk counts in the message slot
pub fn create_progress_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress bar owned by one transfer
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_size: u64, message: &str) -> Self {
        let pb = create_progress_bar(total_size);

        // Print initial message to stderr
        eprintln!("{message}");

        Self { pb }
    }

    /// Stop the bar and leave the final message on screen
    pub fn finish(&self, message: &str) {
        self.pb.finish_with_message(message.to_string());
    }
}
