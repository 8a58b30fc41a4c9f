use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::{Level, OutputFormat, emit, get_output_format};

pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    // Spinners would corrupt JSON output
    if matches!(get_output_format(), OutputFormat::Json) {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style.tick_chars("⠁⠉⠙⠚⠒⠂⠂⠒⠲⠴⠤⠄⠄⠤⠠⠠⠤⠦⠖⠒⠐⠐⠒⠓⠋"));
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Clear the spinner line and report the finished step as an event.
pub fn finish_spinner(pb: ProgressBar, code: &str, message: &str) {
    pb.finish_and_clear();
    emit(Level::Success, code, message, None);
}
