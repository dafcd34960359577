//! Terminal progress rendering for pipeline events
//!
//! The library emits typed events; this reporter is the CLI's view of them.
//! One spinner is live at a time and rolls over when the stage changes.

use crate::events::{PipelineEvent, ProgressEvent, Stage};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Renders pipeline events as indicatif spinners
pub struct ProgressReporter {
    current: Option<(Stage, ProgressBar)>,
    show_progress: bool,
}

impl ProgressReporter {
    pub fn new(show_progress: bool) -> Self {
        Self {
            current: None,
            show_progress,
        }
    }

    /// Feed one event from the pipeline's channel
    pub fn handle(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Progress(progress) => self.handle_progress(progress),
            PipelineEvent::Error(error) => {
                let line = format!("⚠ {}", error.message);
                match &self.current {
                    Some((_, pb)) => pb.println(line),
                    None => eprintln!("{}", line),
                }
                if !error.recoverable {
                    log::error!("{}", error.message);
                }
            }
        }
    }

    fn handle_progress(&mut self, progress: &ProgressEvent) {
        if !self.show_progress {
            return;
        }
        let stage_changed = self
            .current
            .as_ref()
            .map(|(stage, _)| *stage != progress.stage)
            .unwrap_or(true);
        if stage_changed {
            self.finish_current();
            self.current = Some((progress.stage, create_spinner(&progress.message)));
        }

        if let Some((_, pb)) = &self.current {
            pb.set_message(format!(
                "{} ({} rows, {:.0} rows/s)",
                progress.message, progress.processed_rows, progress.rows_per_sec
            ));
        }
    }

    fn finish_current(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.finish();
        }
    }

    /// Finish any live spinner once the event stream ends
    pub fn finish(&mut self) {
        self.finish_current();
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.finish_and_clear();
        }
    }
}

/// Create a spinner progress bar
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.green} {msg}")
            .expect("Invalid progress template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
