//! Colors and text styles shared by the panels.

use ratatui::style::{Color, Modifier, Style};

const TEXT: Color = Color::White;
const MUTED: Color = Color::Gray;
const ACCENT: Color = Color::Cyan;

/// Link is live.
pub const SUCCESS: Color = Color::Green;
/// Link is connecting or retrying; also marks unsaved tasks.
pub const WARNING: Color = Color::Yellow;
/// Failures.
pub const ERROR: Color = Color::Red;
/// No link.
pub const OFFLINE: Color = Color::DarkGray;

pub const TASKS_TITLE: Color = Color::Green;
pub const INPUT_TITLE: Color = Color::Cyan;
pub const LOG_TITLE: Color = Color::Blue;

#[must_use]
pub fn normal() -> Style {
    Style::default().fg(TEXT)
}

/// Secondary text: hints, counts, metadata.
#[must_use]
pub fn dimmed() -> Style {
    Style::default().fg(MUTED)
}

#[must_use]
pub fn bold() -> Style {
    normal().add_modifier(Modifier::BOLD)
}

/// The row under the list cursor.
#[must_use]
pub fn selected() -> Style {
    Style::default()
        .fg(Color::Black)
        .bg(ACCENT)
        .add_modifier(Modifier::BOLD)
}

/// A finished task: muted and struck through.
#[must_use]
pub fn completed() -> Style {
    dimmed().add_modifier(Modifier::CROSSED_OUT)
}

/// A task still carrying a temporary id.
#[must_use]
pub fn unsaved() -> Style {
    Style::default().fg(WARNING).add_modifier(Modifier::ITALIC)
}

/// Informational lines in the system log.
#[must_use]
pub fn system_message() -> Style {
    Style::default()
        .fg(Color::Rgb(110, 150, 190))
        .add_modifier(Modifier::ITALIC)
}

#[must_use]
pub fn error_message() -> Style {
    Style::default().fg(ERROR)
}

#[must_use]
pub fn timestamp() -> Style {
    Style::default().fg(Color::Rgb(115, 115, 115))
}

/// The block glyph drawn at the input cursor.
#[must_use]
pub fn input_cursor() -> Style {
    bold()
}

#[must_use]
pub fn status_bar_bg() -> Style {
    Style::default().fg(TEXT).bg(Color::Rgb(25, 30, 45))
}

/// Bold title text in `color`.
#[must_use]
pub fn panel_title(color: Color) -> Style {
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Accent for focused borders and headers.
#[must_use]
pub fn highlighted() -> Style {
    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
}

/// Panel border: accented when the panel has focus.
#[must_use]
pub fn border(focused: bool) -> Style {
    if focused { highlighted() } else { normal() }
}
