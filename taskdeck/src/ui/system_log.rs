//! System message log rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
};

use super::theme;
use crate::app::{App, Severity};

/// Render the most recent system messages that fit in `area`.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let visible = usize::from(area.height.saturating_sub(2));
    let skip = app.system_messages.len().saturating_sub(visible);

    let items: Vec<ListItem> = app
        .system_messages
        .iter()
        .skip(skip)
        .map(|msg| {
            let text_style = match msg.severity {
                Severity::Info => theme::system_message(),
                Severity::Error => theme::error_message(),
            };
            ListItem::new(Line::from(vec![
                Span::styled(msg.timestamp.as_str(), theme::timestamp()),
                Span::raw(" "),
                Span::styled(msg.text.as_str(), text_style),
            ]))
        })
        .collect();

    let block = Block::default()
        .title(Span::styled("Messages", theme::panel_title(theme::LOG_TITLE)))
        .borders(Borders::ALL)
        .border_style(theme::normal());

    frame.render_widget(List::new(items).block(block), area);
}
