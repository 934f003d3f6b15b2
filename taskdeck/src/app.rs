//! Application state and event handling.
//!
//! [`App`] owns the [`Reconciler`] and is the only place the task list is
//! changed. Key presses become intents, each intent applies its optimistic
//! write and yields exactly one [`NetCommand`]; results coming back from the
//! networking tasks are applied through [`App::apply_net_event`].

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use taskdeck_proto::operation::Operation;
use taskdeck_proto::task::{Task, TaskId, TaskPatch};

use crate::net::{NetCommand, NetEvent};
use crate::reconcile::{MutationId, Reconciler, Settlement, TaskError};
use crate::transport::LinkStatus;

/// Maximum number of system messages kept for display.
const MAX_SYSTEM_MESSAGES: usize = 50;

/// Which panel is currently focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelFocus {
    /// Input box is focused (default).
    Input,
    /// Task list is focused.
    List,
}

/// What the input box submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    /// Enter creates a task.
    Create,
    /// Enter renames the given task.
    Rename(TaskId),
}

/// Load state of the task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStatus {
    /// Initial query in flight.
    Loading,
    /// Initial query failed.
    Error(String),
    /// The list is shown.
    Ready,
}

/// Severity of a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something failed.
    Error,
}

/// A line in the system message log.
#[derive(Debug, Clone)]
pub struct SystemMessage {
    /// Formatted local time (e.g., "14:23:05").
    pub timestamp: String,
    /// Message text.
    pub text: String,
    /// Severity.
    pub severity: Severity,
}

/// Main application state.
pub struct App {
    /// Tasks, pending mutations and the merge rules.
    pub reconciler: Reconciler,
    /// Load state of the list.
    pub status: ListStatus,
    /// Current text input.
    pub input: String,
    /// Cursor position in input (character index).
    pub cursor_position: usize,
    /// What Enter in the input box does.
    pub input_mode: InputMode,
    /// Which panel is focused.
    pub focus: PanelFocus,
    /// Selected row in the task list.
    pub selected: usize,
    /// State of the live-update link.
    pub link: LinkStatus,
    /// Whether a credential was present at startup.
    pub signed_in: bool,
    /// Where to sign in, shown to anonymous users.
    pub sign_in_url: Option<String>,
    /// Recent system messages, oldest first.
    pub system_messages: Vec<SystemMessage>,
    /// Whether the app should quit.
    pub should_quit: bool,
}

impl App {
    /// Create an application waiting for its first query result.
    #[must_use]
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            status: ListStatus::Loading,
            input: String::new(),
            cursor_position: 0,
            input_mode: InputMode::Create,
            focus: PanelFocus::Input,
            selected: 0,
            link: LinkStatus::Idle,
            signed_in: false,
            sign_in_url: None,
            system_messages: Vec::new(),
            should_quit: false,
        }
    }

    /// Records the sign-in state shown in the status bar.
    #[must_use]
    pub fn with_identity(mut self, signed_in: bool, sign_in_url: Option<String>) -> Self {
        self.signed_in = signed_in;
        self.sign_in_url = sign_in_url;
        self
    }

    /// The visible tasks, newest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.reconciler.tasks()
    }

    /// The selected task, if any.
    #[must_use]
    pub fn selected_task(&self) -> Option<Task> {
        self.tasks().into_iter().nth(self.selected)
    }

    /// Handle a key event, returning the command it produced, if any.
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<NetCommand> {
        // Global shortcuts
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                self.should_quit = true;
                return None;
            }
            (KeyCode::Esc, _) => {
                if matches!(self.input_mode, InputMode::Rename(_)) {
                    self.cancel_rename();
                } else {
                    self.should_quit = true;
                }
                return None;
            }
            (KeyCode::Tab | KeyCode::BackTab, _) => {
                self.toggle_focus();
                return None;
            }
            _ => {}
        }

        // Focus-specific shortcuts
        match self.focus {
            PanelFocus::Input => self.handle_input_key(key),
            PanelFocus::List => self.handle_list_key(key),
        }
    }

    /// Handle key event when input is focused.
    fn handle_input_key(&mut self, key: KeyEvent) -> Option<NetCommand> {
        match key.code {
            KeyCode::Enter => return self.submit_input(),
            KeyCode::Char(c) => self.enter_char(c),
            KeyCode::Backspace => self.delete_char(),
            KeyCode::Left => self.cursor_position = self.cursor_position.saturating_sub(1),
            KeyCode::Right => {
                self.cursor_position = (self.cursor_position + 1).min(self.input_len());
            }
            KeyCode::Home => self.cursor_position = 0,
            KeyCode::End => self.cursor_position = self.input_len(),
            _ => {}
        }
        None
    }

    /// Handle key event when the task list is focused.
    fn handle_list_key(&mut self, key: KeyEvent) -> Option<NetCommand> {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let last = self.tasks().len().saturating_sub(1);
                self.selected = (self.selected + 1).min(last);
                None
            }
            KeyCode::Char(' ') | KeyCode::Enter => {
                let task = self.selected_task()?;
                self.toggle(&task.id)
            }
            KeyCode::Char('r') => {
                let task = self.selected_task()?;
                self.start_rename(&task);
                None
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                let task = self.selected_task()?;
                self.delete(&task.id)
            }
            KeyCode::Char('R') => Some(self.refresh()),
            _ => None,
        }
    }

    /// Create intent.
    pub fn create(&mut self, title: &str) -> Option<NetCommand> {
        let result = self.reconciler.begin_create(title);
        self.dispatch(result)
    }

    /// Toggle intent: flips the completion flag of `id`.
    pub fn toggle(&mut self, id: &TaskId) -> Option<NetCommand> {
        let completed = self
            .reconciler
            .cache()
            .read_entity(id)
            .map(|t| t.completed)?;
        let result = self
            .reconciler
            .begin_update(id, TaskPatch::completed(!completed));
        self.dispatch(result)
    }

    /// Rename intent. Unchanged or empty titles are not sent.
    pub fn rename(&mut self, id: &TaskId, title: &str) -> Option<NetCommand> {
        let title = title.trim();
        let unchanged = self
            .reconciler
            .cache()
            .read_entity(id)
            .is_some_and(|t| t.title == title);
        if title.is_empty() || unchanged {
            return None;
        }
        let result = self.reconciler.begin_update(id, TaskPatch::title(title));
        self.dispatch(result)
    }

    /// Delete intent.
    pub fn delete(&mut self, id: &TaskId) -> Option<NetCommand> {
        let result = self.reconciler.begin_delete(id);
        let command = self.dispatch(result);
        self.clamp_selection();
        command
    }

    /// Re-runs the task query.
    pub fn refresh(&mut self) -> NetCommand {
        if matches!(self.status, ListStatus::Error(_)) {
            self.status = ListStatus::Loading;
        }
        NetCommand::Refresh
    }

    /// Apply one event from the networking layer.
    pub fn apply_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::TasksLoaded(tasks) => {
                self.reconciler.load(tasks);
                self.status = ListStatus::Ready;
                self.clamp_selection();
            }
            NetEvent::QueryFailed(message) => {
                if self.status == ListStatus::Ready {
                    self.push_system(Severity::Error, format!("Refresh failed: {message}"));
                } else {
                    self.status = ListStatus::Error(message);
                }
            }
            NetEvent::MutationSettled { mutation, result } => {
                if let Settlement::RolledBack { action, reason } =
                    self.reconciler.settle(mutation, result)
                {
                    self.push_system(Severity::Error, format!("Could not {action} task: {reason}"));
                }
                self.clamp_selection();
            }
            NetEvent::Subscription(event) => {
                self.reconciler.apply_event(event);
                self.clamp_selection();
            }
            NetEvent::SubscriptionError { operation, message } => {
                self.push_system(Severity::Error, format!("{operation}: {message}"));
            }
            NetEvent::LinkStatus(status) => {
                match &status {
                    LinkStatus::Disconnected => {
                        self.push_system(Severity::Error, "Live updates offline; press R to retry");
                    }
                    LinkStatus::Connected if matches!(self.link, LinkStatus::Reconnecting { .. }) => {
                        self.push_system(Severity::Info, "Live updates reconnected");
                    }
                    _ => {}
                }
                self.link = status;
            }
        }
    }

    /// Append a system message, dropping the oldest beyond the cap.
    pub fn push_system(&mut self, severity: Severity, text: impl Into<String>) {
        self.system_messages.push(SystemMessage {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            text: text.into(),
            severity,
        });
        if self.system_messages.len() > MAX_SYSTEM_MESSAGES {
            let excess = self.system_messages.len() - MAX_SYSTEM_MESSAGES;
            self.system_messages.drain(..excess);
        }
    }

    fn dispatch(
        &mut self,
        result: Result<(MutationId, Operation), TaskError>,
    ) -> Option<NetCommand> {
        match result {
            Ok((mutation, operation)) => Some(NetCommand::Mutate {
                mutation,
                operation,
            }),
            Err(e) => {
                self.push_system(Severity::Error, e.to_string());
                None
            }
        }
    }

    /// Submit the input box according to the current mode.
    fn submit_input(&mut self) -> Option<NetCommand> {
        let text = std::mem::take(&mut self.input);
        self.cursor_position = 0;
        match std::mem::replace(&mut self.input_mode, InputMode::Create) {
            InputMode::Create => {
                if text.trim().is_empty() {
                    return None;
                }
                self.selected = 0;
                self.create(&text)
            }
            InputMode::Rename(id) => {
                self.focus = PanelFocus::List;
                self.rename(&id, &text)
            }
        }
    }

    fn start_rename(&mut self, task: &Task) {
        self.input.clone_from(&task.title);
        self.cursor_position = self.input_len();
        self.input_mode = InputMode::Rename(task.id.clone());
        self.focus = PanelFocus::Input;
    }

    fn cancel_rename(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
        self.input_mode = InputMode::Create;
    }

    const fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            PanelFocus::Input => PanelFocus::List,
            PanelFocus::List => PanelFocus::Input,
        };
    }

    fn clamp_selection(&mut self) {
        let len = self.tasks().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    fn input_len(&self) -> usize {
        self.input.chars().count()
    }

    /// Byte offset of the character at `cursor_position`.
    fn cursor_byte_offset(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    /// Insert a character at the cursor position.
    fn enter_char(&mut self, c: char) {
        let at = self.cursor_byte_offset();
        self.input.insert(at, c);
        self.cursor_position += 1;
    }

    /// Delete the character before the cursor.
    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let at = self.cursor_byte_offset();
            self.input.remove(at);
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(Reconciler::default())
    }
}
