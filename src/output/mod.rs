mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::{emit, render_graph_diff, to_json};
pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::{print_batch_summary, print_critical_path, print_impact};

/// Prints the `cigraph` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🕸️ cigraph"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI pipeline graph and test impact tool")
    );
}
