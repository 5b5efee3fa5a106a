use console::style;
use harvest_core::ProgressSink;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

/// Bold section title with a blank line above
pub fn title(msg: &str) {
    println!();
    println!("{}", style(msg).bold());
}

/// Indented `label: value` line with a dimmed label
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {} {}", style(format!("{}:", label)).dim(), value);
}

/// Create a progress bar measured in percent
pub fn progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {msg}  {bar:20.cyan/dim} {pos}%")
            .unwrap()
            .progress_chars("█▓░"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Drives a terminal progress bar from run progress.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(message: &str) -> Self {
        Self {
            bar: progress_bar(message),
        }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

impl ProgressSink for BarSink {
    fn progress(&self, fraction: f64, status: &str) {
        self.bar.set_position((fraction * 100.0).round() as u64);
        self.bar.set_message(status.to_string());
    }

    fn log(&self, line: &str) {
        self.bar.println(format!("  {}", line));
    }
}
