use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow, heading};

/// Spinner for a numbered sequence of long-running phases, drawn on stderr.
pub struct PhaseProgress {
    pb: ProgressBar,
    phase: usize,
    total: usize,
}

impl PhaseProgress {
    pub fn start(total: usize, label: &str) -> Self {
        eprintln!("{}", heading("⚙️", "Phases"));
        Self::spin(1, total, label)
    }

    /// Marks the current phase done and starts the next one.
    pub fn next(self, done: &str, label: &str) -> Self {
        self.finish_current(done);
        Self::spin(self.phase + 1, self.total, label)
    }

    pub fn finish(self, done: &str) {
        self.finish_current(done);
        eprintln!();
    }

    /// Prints a line above the spinner without breaking it.
    pub fn println(&self, message: impl std::fmt::Display) {
        self.pb.println(format!("  {}", bright(message)));
    }

    fn finish_current(&self, done: &str) {
        self.pb.finish_with_message(
            bright_green(format!("Phase {}/{}: {done} ✓", self.phase, self.total)).to_string(),
        );
    }

    fn spin(phase: usize, total: usize, label: &str) -> Self {
        let pb = create_spinner(bright_yellow(format!("Phase {phase}/{total}: {label}")).to_string());
        Self { pb, phase, total }
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
