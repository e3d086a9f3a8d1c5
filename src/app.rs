//! Event loop: wires the controller to its collaborators.
//!
//! Everything runs on one task. Config-store calls are spawned and report
//! back through a channel, so the loop keeps serving input while a load is
//! in flight.
//!
//! ```text
//! stdin commands ─┐
//! session events ─┼──► select! ──► ConnectionLifecycleController
//! store results ──┤
//! shell events ───┤
//! resize deadline ┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config_store::SessionConfigStore;
use crate::controller::{ConnectionLifecycleController, MessageReply, ToggleOutcome};
use crate::dispatcher::ActionDispatcher;
use crate::error::ConfigLoadError;
use crate::host_shell::{HostShell, ShellEvent};
use crate::protocol::{
    DispatcherMessage, LaunchMetadata, MessageData, SecurityType, SessionConfigDocument,
};
use crate::session::{LinkEvent, TerminalSession};

/// Completion of a spawned config-store call.
#[derive(Debug)]
pub enum StoreEvent {
    Loaded(Result<SessionConfigDocument, ConfigLoadError>),
    ProxyResolved(Result<String>),
    Saved(Result<()>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Toggle,
    Disconnect,
    Host(String),
    Port(String),
    Security(SecurityType),
    Save,
    Menu(bool),
    Context { x: i32, y: i32 },
    Pick(usize),
    Info,
    Help,
    Quit,
    /// Anything not starting with `/` is typed into the terminal.
    Input(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
/connect            connect, or disconnect when connected
/disconnect         close the session
/host <name>        set host
/port <n>           set port
/security ssh|telnet
/save               store the current settings
/menu on|off        show or hide the settings menu
/context <x> <y>    open the context menu
/pick <n>           run a context-menu item
/info               show connection info
/quit";

pub fn parse_command(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Input(format!("{line}\r")));
    };
    let mut parts = rest.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().trim();

    match name {
        "connect" | "toggle" => Ok(Command::Toggle),
        "disconnect" => Ok(Command::Disconnect),
        "host" => Ok(Command::Host(arg.to_owned())),
        "port" => Ok(Command::Port(arg.to_owned())),
        "security" => arg.parse().map(Command::Security),
        "save" => Ok(Command::Save),
        "menu" => match arg {
            "on" | "" => Ok(Command::Menu(true)),
            "off" => Ok(Command::Menu(false)),
            other => Err(format!("expected on|off, got {other}")),
        },
        "context" => {
            let mut nums = arg.split_whitespace().map(str::parse::<i32>);
            match (nums.next(), nums.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok(Command::Context { x, y }),
                _ => Err("usage: /context <x> <y>".to_owned()),
            }
        }
        "pick" => arg
            .parse()
            .map(Command::Pick)
            .map_err(|_| "usage: /pick <n>".to_owned()),
        "info" => Ok(Command::Info),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other} (try /help)")),
    }
}

pub struct App<S, H, C, D>
where
    S: TerminalSession,
    H: HostShell,
    C: SessionConfigStore + Send + Sync + 'static,
    D: ActionDispatcher,
{
    controller: ConnectionLifecycleController<S, H>,
    store: Arc<C>,
    dispatcher: D,
    store_tx: mpsc::UnboundedSender<StoreEvent>,
    store_rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl<S, H, C, D> App<S, H, C, D>
where
    S: TerminalSession,
    H: HostShell,
    C: SessionConfigStore + Send + Sync + 'static,
    D: ActionDispatcher,
{
    pub fn new(controller: ConnectionLifecycleController<S, H>, store: C, dispatcher: D) -> Self {
        let (store_tx, store_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            store: Arc::new(store),
            dispatcher,
            store_tx,
            store_rx,
        }
    }

    pub fn controller(&self) -> &ConnectionLifecycleController<S, H> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ConnectionLifecycleController<S, H> {
        &mut self.controller
    }

    /// Connect straight away for a `"connect"` launch, otherwise start
    /// loading the stored settings.
    pub fn start(&mut self, launch: &LaunchMetadata) {
        if self.controller.apply_launch_metadata(launch) {
            self.controller.auto_connect();
        } else if self.controller.wants_config_load() {
            self.spawn_load();
        }
    }

    fn spawn_load(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.store_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(StoreEvent::Loaded(store.load().await));
        });
    }

    fn spawn_proxy_lookup(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.store_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(StoreEvent::ProxyResolved(store.proxy_host().await));
        });
    }

    fn spawn_save(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.store_tx.clone();
        let doc = self.controller.settings_document();
        tokio::spawn(async move {
            let _ = tx.send(StoreEvent::Saved(store.save(&doc).await));
        });
    }

    pub async fn next_store_event(&mut self) -> Option<StoreEvent> {
        self.store_rx.recv().await
    }

    pub fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Loaded(Ok(doc)) => {
                info!(target: "app", host = %doc.host, "Session config loaded");
                self.controller.apply_loaded_config(&doc);
                if self.controller.needs_proxy_lookup() {
                    self.spawn_proxy_lookup();
                } else {
                    self.controller.auto_connect();
                }
            }
            StoreEvent::Loaded(Err(e)) => self.controller.config_load_failed(&e),
            StoreEvent::ProxyResolved(lookup) => {
                if self.controller.apply_proxy_host(lookup) {
                    self.controller.auto_connect();
                }
            }
            StoreEvent::Saved(Ok(())) => debug!(target: "app", "Save returned"),
            StoreEvent::Saved(Err(e)) => warn!(target: "app", "Save failed: {:#}", e),
        }
    }

    /// The ack of a close request is sent only after the session's
    /// transport has closed.
    pub async fn handle_shell_event(&mut self, event: ShellEvent) -> Flow {
        match event {
            ShellEvent::Close(ack) => {
                self.controller.shutdown().await;
                let _ = ack.send(());
                return Flow::Quit;
            }
            ShellEvent::Resized => self.controller.resize_terminal(),
            ShellEvent::ContextMenuRequested { x, y } => self.open_context_menu(x, y),
            ShellEvent::MenuItemSelected(index) => self.select_menu_item(index),
        }
        Flow::Continue
    }

    fn open_context_menu(&mut self, x: i32, y: i32) {
        self.controller.open_context_menu(x, y, &self.dispatcher);
    }

    fn select_menu_item(&mut self, index: usize) {
        if let Err(e) = self.controller.select_menu_item(index, &self.dispatcher) {
            warn!(target: "app", "Menu action failed: {:#}", e);
        }
    }

    pub fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Toggle => match self.controller.toggle_connection() {
                ToggleOutcome::Blocked(err) => eprintln!("connect blocked: {err}"),
                outcome => debug!(target: "app", ?outcome, "Toggled connection"),
            },
            Command::Disconnect => {
                let msg = message("disconnect");
                if let Err(e) = self.controller.handle_message(&msg) {
                    warn!(target: "app", "{}", e);
                }
            }
            Command::Host(host) => {
                self.controller.edit_host(host);
            }
            Command::Port(port) => {
                self.controller.edit_port(port);
            }
            Command::Security(security) => self.controller.set_security(security),
            Command::Save => self.spawn_save(),
            Command::Menu(open) => self.controller.toggle_menu(open),
            Command::Context { x, y } => self.open_context_menu(x, y),
            Command::Pick(index) => self.select_menu_item(index),
            Command::Info => {
                let msg = message("connectionInfo");
                match self.controller.handle_message(&msg) {
                    Ok(MessageReply::ConnectionInfo(Some(info))) => eprintln!("{info}"),
                    Ok(_) => eprintln!("no connection info"),
                    Err(e) => warn!(target: "app", "{}", e),
                }
            }
            Command::Help => eprintln!("{HELP}"),
            Command::Quit => return Flow::Quit,
            Command::Input(text) => {
                if let Err(e) = self.controller.send_input(&text) {
                    eprintln!("input dropped: {e}");
                }
            }
        }
        Flow::Continue
    }

    /// Run until `/quit`, end of input, or a shell close request.
    pub async fn run<R>(
        &mut self,
        input: R,
        mut session_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut shell_rx: mpsc::UnboundedReceiver<ShellEvent>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut stdout = tokio::io::stdout();

        loop {
            let deadline = self.controller.resize_deadline();
            tokio::select! {
                Some(event) = session_rx.recv() => {
                    if let Some(bytes) = self.controller.handle_session_event(event) {
                        stdout.write_all(&bytes).await.context("write terminal output")?;
                        stdout.flush().await.context("flush terminal output")?;
                    }
                }
                Some(event) = self.store_rx.recv() => self.handle_store_event(event),
                Some(event) = shell_rx.recv() => {
                    if self.handle_shell_event(event).await == Flow::Quit {
                        return Ok(());
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("read input")? else {
                        break;
                    };
                    match parse_command(&line) {
                        Ok(command) => {
                            if self.handle_command(command) == Flow::Quit {
                                break;
                            }
                        }
                        Err(msg) => eprintln!("{msg}"),
                    }
                }
                _ = sleep_until(deadline) => {
                    self.controller.poll_resize(Instant::now());
                }
            }
        }

        self.controller.shutdown().await;
        Ok(())
    }
}

fn message(kind: &str) -> DispatcherMessage {
    DispatcherMessage {
        data: Some(MessageData {
            kind: kind.to_owned(),
        }),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
