//! Task list rendering.

use chrono::{DateTime, Local};
use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use taskdeck_proto::task::Task;

use super::theme;
use crate::app::{App, ListStatus, PanelFocus};

/// Render the task list, or its loading/error placeholder.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::List;
    let tasks = app.tasks();
    let done = tasks.iter().filter(|t| t.completed).count();

    let block = Block::default()
        .title(Span::styled(
            format!("Tasks ({done}/{})", tasks.len()),
            theme::panel_title(theme::TASKS_TITLE),
        ))
        .borders(Borders::ALL)
        .border_style(theme::border(is_focused));

    match &app.status {
        ListStatus::Loading => {
            let text = Line::from(Span::styled("Loading tasks...", theme::dimmed()));
            frame.render_widget(Paragraph::new(text).block(block), area);
        }
        ListStatus::Error(message) => {
            let text = vec![
                Line::from(Span::styled(
                    format!("Failed to load tasks: {message}"),
                    theme::error_message(),
                )),
                Line::from(Span::styled("Press Tab then R to retry", theme::dimmed())),
            ];
            let paragraph = Paragraph::new(text)
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
        }
        ListStatus::Ready if tasks.is_empty() => {
            let text = Line::from(Span::styled(
                "No tasks yet. Type a title and press Enter.",
                theme::dimmed(),
            ));
            frame.render_widget(Paragraph::new(text).block(block), area);
        }
        ListStatus::Ready => {
            let items: Vec<ListItem> = tasks.iter().map(task_item).collect();
            let list = List::new(items).block(block).highlight_style(if is_focused {
                theme::selected()
            } else {
                theme::highlighted()
            });
            let mut state = ListState::default().with_selected(Some(app.selected));
            frame.render_stateful_widget(list, area, &mut state);
        }
    }
}

fn task_item(task: &Task) -> ListItem<'_> {
    let checkbox = if task.completed { "[✓]" } else { "[ ]" };
    let title_style = if task.completed {
        theme::completed()
    } else {
        theme::normal()
    };

    let mut spans = vec![
        Span::styled(checkbox, theme::normal()),
        Span::raw(" "),
        Span::styled(task.title.as_str(), title_style),
    ];

    if task.id.is_temporary() {
        spans.push(Span::styled(" (saving...)", theme::unsaved()));
    } else if let Some(created) = task.created_at.and_then(format_created) {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(created, theme::timestamp()));
    }

    ListItem::new(Line::from(spans))
}

/// Formats a millisecond timestamp as local date and time.
fn format_created(millis: i64) -> Option<String> {
    let utc = DateTime::from_timestamp_millis(millis)?;
    Some(
        utc.with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
    )
}
