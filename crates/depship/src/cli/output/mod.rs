//! Output formatting utilities

use console::{style, Style};

use depship_core::{CommandState, ReleaseState};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Style for a command state
pub fn state_style(state: &CommandState) -> Style {
    match state {
        CommandState::Succeeded => Style::new().green(),
        CommandState::Failed => Style::new().red().bold(),
        CommandState::Queueing | CommandState::InProgress | CommandState::RePolling => {
            Style::new().cyan()
        }
        CommandState::Ready | CommandState::ReadyToReTrigger => Style::new().blue(),
        CommandState::Waiting { .. } => Style::new().yellow(),
        CommandState::Deactivated | CommandState::Disabled => Style::new().dim(),
    }
}

/// Style for the overall release state
pub fn release_state_style(state: ReleaseState) -> Style {
    match state {
        ReleaseState::Succeeded => Style::new().green().bold(),
        ReleaseState::Failed => Style::new().red().bold(),
        ReleaseState::InProgress => Style::new().cyan(),
        ReleaseState::NotStarted => Style::new().dim(),
    }
}
