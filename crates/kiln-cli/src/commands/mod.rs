pub mod build;
pub mod completions;
pub mod state_rm;
pub mod state_show;
pub mod state_unlock;

use indicatif::{ProgressBar, ProgressStyle};
use kiln_state::{default_state_path, BuildStatus};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// The state path for a command: the explicit flag when given, otherwise
/// the default location relative to `dir`.
pub fn resolve_state_path(explicit: Option<&Path>, dir: &Path) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => default_state_path(dir),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn colorize_build_status(status: BuildStatus) -> String {
    use console::Style;
    let text = status.to_string();
    match status {
        BuildStatus::Complete => Style::new().green().apply_to(text).to_string(),
        BuildStatus::Failed => Style::new().red().bold().apply_to(text).to_string(),
        BuildStatus::Pending => Style::new().yellow().apply_to(text).to_string(),
        _ => Style::new().cyan().apply_to(text).to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}
