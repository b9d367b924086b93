use std::fmt::Display;

use console::{style, StyledObject};

use crate::ci::JobStatus;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Section heading: an emoji and an underlined title.
pub fn heading(emoji: &str, title: &str) -> String {
    format!("{} {}", bright(emoji), bright(title).underlined())
}

pub fn styled_status(status: JobStatus) -> StyledObject<String> {
    let text = format!("{status:?}").to_lowercase();
    match status {
        JobStatus::Success => bright_green(text),
        JobStatus::Failed => bright_red(text),
        _ => dim(text),
    }
}
