//! The window chrome around the terminal.
//!
//! The controller talks to the shell through [`HostShell`]; the shell talks
//! back by sending [`ShellEvent`]s into the event loop.

use tokio::sync::oneshot;
use tracing::info;

use crate::dispatcher::ContextMenuItem;
use crate::error_state::ErrorBar;
use crate::layout::{TerminalLayout, Viewport};
use crate::settings::ConnectionSettings;

pub const DISCONNECTED_TITLE: &str = "VT - Disconnected";

pub fn connected_title(settings: &ConnectionSettings) -> String {
    format!("VT - {}", settings.endpoint())
}

pub trait HostShell {
    fn set_title(&mut self, title: &str);

    /// Called whenever the vertical offset of the terminal area changes.
    fn apply_layout(&mut self, layout: &TerminalLayout);

    /// Called after every error-bar refresh.
    fn show_error_bar(&mut self, bar: &ErrorBar);

    fn spawn_context_menu(&mut self, x: i32, y: i32, items: &[ContextMenuItem]);

    fn viewport(&self) -> Viewport;
}

/// Callbacks delivered by the shell to the event loop.
#[derive(Debug)]
pub enum ShellEvent {
    /// The shell wants to discard the component. The sender is completed
    /// once the session has been torn down.
    Close(oneshot::Sender<()>),
    /// The viewport changed; `HostShell::viewport` reports the new size.
    Resized,
    ContextMenuRequested { x: i32, y: i32 },
    MenuItemSelected(usize),
}

/// A shell that renders its chrome as lines on stderr.
pub struct ConsoleShell {
    viewport: Viewport,
    title: String,
}

impl ConsoleShell {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            title: String::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl HostShell for ConsoleShell {
    fn set_title(&mut self, title: &str) {
        if self.title != title {
            self.title = title.to_owned();
            eprintln!("== {} ==", self.title);
        }
    }

    fn apply_layout(&mut self, layout: &TerminalLayout) {
        info!(target: "shell", top = %layout.top(), height = %layout.height(), "Terminal layout");
    }

    fn show_error_bar(&mut self, bar: &ErrorBar) {
        if let Some(message) = &bar.message {
            let marker = if bar.blocking { "!!" } else { "!" };
            eprintln!("{marker} {message}");
        }
    }

    fn spawn_context_menu(&mut self, x: i32, y: i32, items: &[ContextMenuItem]) {
        if items.is_empty() {
            eprintln!("(no actions at {x},{y})");
            return;
        }
        for (i, item) in items.iter().enumerate() {
            eprintln!("  [{i}] {}", item.text);
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}
