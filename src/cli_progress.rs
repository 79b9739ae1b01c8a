/*!
 * CLI progress renderer for uploads
 *
 * Consumes progress events from the upload engine and renders them as an
 * indicatif bar with transfer rate and ETA.
 */

use crate::cli_style::{format_bytes, format_duration, Icons};
use crate::protocol::s3::progress::ProgressEvent;
use crate::protocol::s3::TransferMode;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Renders one upload's events on the terminal
pub struct UploadProgressBar {
    bar: ProgressBar,
    verbose: bool,
}

impl UploadProgressBar {
    /// Create a bar; hidden when `show` is false
    pub fn new(show: bool, verbose: bool) -> Self {
        let bar = if show {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar, verbose }
    }

    /// Drain `events` on a background task until the sender is dropped
    pub fn spawn(self, mut events: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(&event);
            }
        })
    }

    /// Apply one event to the bar
    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TransferStarted {
                total_bytes,
                attempt,
                ..
            } => {
                self.bar.set_length(*total_bytes);
                if *attempt == 1 {
                    self.bar.reset_elapsed();
                }
            }
            ProgressEvent::Progress(snapshot) => {
                // snapshots are monotonic; never move the bar back
                if snapshot.bytes_transferred > self.bar.position() {
                    self.bar.set_position(snapshot.bytes_transferred);
                }
            }
            ProgressEvent::PartCompleted { .. } if !self.verbose => {}
            ProgressEvent::TransferCompleted { .. } | ProgressEvent::TransferFailed { .. } => {
                if let Some(line) = describe(event) {
                    self.bar.finish_with_message(line);
                }
                return;
            }
            _ => {}
        }

        if let Some(line) = describe(event) {
            self.bar.set_message(line);
        }
    }
}

/// One-line description of an event, if it has one worth showing
pub fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::TransferStarted {
            key,
            total_bytes,
            mode,
            attempt,
        } => {
            let mode = match mode {
                TransferMode::SingleShot => "single request",
                TransferMode::Chunked => "multipart",
            };
            let retry = if *attempt > 1 {
                format!(", attempt {}", attempt)
            } else {
                String::new()
            };
            Some(format!(
                "{} {} ({}, {}{})",
                Icons::FILE,
                key,
                format_bytes(*total_bytes),
                mode,
                retry
            ))
        }
        ProgressEvent::Progress(_) => None,
        ProgressEvent::PartCompleted {
            part_number,
            part_bytes,
        } => Some(format!(
            "{} part {} done ({})",
            Icons::BULLET,
            part_number,
            format_bytes(*part_bytes)
        )),
        ProgressEvent::Retrying {
            attempt,
            delay,
            error,
        } => Some(format!(
            "{} attempt {} failed, retrying in {}: {}",
            Icons::WARNING,
            attempt,
            format_duration(delay.as_secs_f64()),
            error
        )),
        ProgressEvent::TransferCompleted {
            key,
            total_bytes,
            duration,
        } => {
            let secs = duration.as_secs_f64();
            let rate = if secs > 0.0 {
                *total_bytes as f64 / secs
            } else {
                0.0
            };
            Some(format!(
                "{} {} - {} in {} ({}/s)",
                Icons::SUCCESS,
                key,
                format_bytes(*total_bytes),
                format_duration(secs),
                format_bytes(rate as u64)
            ))
        }
        ProgressEvent::TransferFailed { key, error } => {
            Some(format!("{} {} - {}", Icons::ERROR, key, error))
        }
    }
}
