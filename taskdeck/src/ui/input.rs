//! Input box rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use super::theme;
use crate::app::{App, InputMode, PanelFocus};

/// Render the input box. Its title follows the input mode.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Input;

    let title = match &app.input_mode {
        InputMode::Create => "New task".to_string(),
        InputMode::Rename(id) => format!("Rename task {id} (Esc to cancel)"),
    };

    let input_line = if app.input.is_empty() && !is_focused {
        Line::from(Span::styled("Type a task title...", theme::dimmed()))
    } else if is_focused {
        // Split around the cursor so it can be drawn as a block
        let split = app
            .input
            .char_indices()
            .nth(app.cursor_position)
            .map_or(app.input.len(), |(i, _)| i);
        let (before, after) = app.input.split_at(split);
        Line::from(vec![
            Span::styled(before, theme::normal()),
            Span::styled("█", theme::input_cursor()),
            Span::styled(after, theme::normal()),
        ])
    } else {
        Line::from(Span::styled(app.input.as_str(), theme::normal()))
    };

    let block = Block::default()
        .title(Span::styled(title, theme::panel_title(theme::INPUT_TITLE)))
        .borders(Borders::ALL)
        .border_style(theme::border(is_focused));

    frame.render_widget(Paragraph::new(input_line).block(block), area);
}
