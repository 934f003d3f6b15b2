//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::{App, InputMode, PanelFocus};
use crate::transport::LinkStatus;

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let help_text = match (app.focus, &app.input_mode) {
        (PanelFocus::Input, InputMode::Create) => "Enter: add | Tab: list | Esc: quit",
        (PanelFocus::Input, InputMode::Rename(_)) => "Enter: save | Esc: cancel",
        (PanelFocus::List, _) => {
            "↑↓/jk: navigate | Space: toggle | r: rename | d: delete | R: refresh | Tab: input"
        }
    };

    let (dot_color, link_text) = match &app.link {
        LinkStatus::Connected => (theme::SUCCESS, "Live".to_string()),
        LinkStatus::Connecting => (theme::WARNING, "Connecting...".to_string()),
        LinkStatus::Reconnecting {
            attempt,
            max_attempts,
        } => (
            theme::WARNING,
            format!("Reconnecting ({attempt}/{max_attempts})..."),
        ),
        LinkStatus::Idle => (theme::OFFLINE, "Idle".to_string()),
        LinkStatus::Disconnected => (theme::ERROR, "Offline".to_string()),
    };

    let identity = if app.signed_in {
        Span::styled("Signed in", theme::normal())
    } else if let Some(url) = &app.sign_in_url {
        Span::styled(format!("Anonymous (sign in: {url})"), theme::dimmed())
    } else {
        Span::styled("Anonymous", theme::dimmed())
    };

    let mut spans = vec![
        Span::styled(
            concat!("Taskdeck v", env!("CARGO_PKG_VERSION")),
            theme::bold(),
        ),
        Span::raw(" | "),
        Span::styled("●", theme::normal().fg(dot_color)),
        Span::raw(format!(" {link_text}")),
        Span::raw(" | "),
        identity,
    ];
    let pending = app.reconciler.pending_count();
    if pending > 0 {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            format!("{pending} saving"),
            theme::unsaved(),
        ));
    }
    spans.push(Span::raw(" | "));
    spans.push(Span::styled(help_text, theme::dimmed()));

    let paragraph = Paragraph::new(Line::from(spans)).style(theme::status_bar_bg());
    frame.render_widget(paragraph, area);
}
