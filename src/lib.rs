//! vt-client: a VT terminal client driven over a WebSocket terminal stream.
//!
//! The heart of the crate is [`controller::ConnectionLifecycleController`],
//! which tracks connection errors, decides whether a connect may proceed,
//! and keeps the terminal's vertical layout in step with the error bar.
//! Its collaborators sit behind traits:
//!
//! - [`config_store::SessionConfigStore`]: stored host/port/security
//! - [`session::TerminalSession`]: the terminal stream
//! - [`host_shell::HostShell`]: title, layout, context menus

pub mod app;
pub mod config;
pub mod config_store;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod error_state;
pub mod host_shell;
pub mod layout;
pub mod logging;
pub mod paths;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod state_machine;
