//! Terminal UI rendering.

pub mod input;
pub mod status_bar;
pub mod system_log;
pub mod task_list;
pub mod theme;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
};

use crate::app::App;

/// Height of the system log panel, borders included.
const SYSTEM_LOG_HEIGHT: u16 = 6;

/// Main draw function for the entire UI.
pub fn draw(frame: &mut Frame, app: &App) {
    // Create main layout with status bar at bottom
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let content_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                 // Input
            Constraint::Min(3),                    // Tasks
            Constraint::Length(SYSTEM_LOG_HEIGHT), // System log
        ])
        .split(main_chunks[0]);

    input::render(frame, content_chunks[0], app);
    task_list::render(frame, content_chunks[1], app);
    system_log::render(frame, content_chunks[2], app);

    status_bar::render(frame, main_chunks[1], app);
}
