//! Connection/error lifecycle controller.
//!
//! Owns the error slots, the settings draft and the terminal layout, and
//! decides whether a connect action may proceed. All methods run on the
//! event-loop thread; the controller never blocks and never spawns.
//!
//! Error-bar transitions (hidden → visible and back) move the terminal down
//! or up by one row and arm a deferred resize; see [`poll_resize`].
//!
//! [`poll_resize`]: ConnectionLifecycleController::poll_resize

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;
use statig::blocking::StateMachine;
use statig::prelude::*;
use tracing::{debug, info, warn};

use crate::dispatcher::{ActionDispatcher, ContextMenuItem, build_context_menu};
use crate::error::{ConfigLoadError, ValidationError, VtError};
use crate::error_state::{ErrorBar, ErrorKind, ErrorSlots};
use crate::host_shell::{DISCONNECTED_TITLE, HostShell, connected_title};
use crate::layout::{
    CONFIG_MENU_ROW_PX, CONFIG_MENU_SIZE_PX, ResizeTimer, TOGGLE_MENU_BUTTON_PX, TerminalLayout,
};
use crate::protocol::{
    ConnectRequest, DispatcherMessage, LaunchMetadata, RendererSettings, SecurityType,
    SessionConfigDocument,
};
use crate::session::{LinkEvent, SessionEvent, TerminalSession};
use crate::settings::{ConnectionSettings, SettingsDraft, check_host, parse_port, port_text};
use crate::state_machine::connection_sm::{ConnectionEvent, ConnectionMachine, ConnectionPhase};

/// Static inputs supplied by the hosting application.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Terminal stream endpoint put into every connect request.
    pub stream_url: String,
    pub renderer: RendererSettings,
    /// Stamped onto context-menu screen contexts as `sourcePluginID`.
    pub plugin_id: String,
}

/// Result of a connect/disconnect action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Connected,
    Disconnected,
    /// Settings failed validation; the session was not touched.
    Blocked(ValidationError),
    /// The session refused the connect request.
    Failed,
}

/// Colour state of the connect button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Blocked,
    Connected,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageReply {
    Disconnected,
    ConnectionInfo(Option<Value>),
}

struct OpenMenu {
    items: Vec<ContextMenuItem>,
    context: Value,
}

pub struct ConnectionLifecycleController<S: TerminalSession, H: HostShell> {
    session: S,
    shell: H,
    options: ControllerOptions,
    draft: SettingsDraft,
    errors: ErrorSlots,
    /// What the error bar currently shows.
    bar: ErrorBar,
    layout: TerminalLayout,
    resize: ResizeTimer,
    menu_open: bool,
    launched_with_settings: bool,
    context_menu: Option<OpenMenu>,
    phase: StateMachine<ConnectionMachine>,
}

impl<S: TerminalSession, H: HostShell> ConnectionLifecycleController<S, H> {
    pub fn new(session: S, mut shell: H, options: ControllerOptions) -> Self {
        let mut layout = TerminalLayout::default();
        layout.adjust(TOGGLE_MENU_BUTTON_PX);
        shell.apply_layout(&layout);
        shell.set_title(DISCONNECTED_TITLE);

        Self {
            session,
            shell,
            options,
            draft: SettingsDraft::default(),
            errors: ErrorSlots::new(),
            bar: ErrorBar::default(),
            layout,
            resize: ResizeTimer::default(),
            menu_open: false,
            launched_with_settings: false,
            context_menu: None,
            phase: ConnectionMachine::default().state_machine(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn shell(&self) -> &H {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut H {
        &mut self.shell
    }

    pub fn draft(&self) -> &SettingsDraft {
        &self.draft
    }

    pub fn errors(&self) -> &ErrorSlots {
        &self.errors
    }

    pub fn error_bar(&self) -> &ErrorBar {
        &self.bar
    }

    pub fn layout(&self) -> &TerminalLayout {
        &self.layout
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Connecting from a successful `connect` call until the session
    /// reports the stream open, then Connected.
    pub fn phase(&self) -> ConnectionPhase {
        ConnectionMachine::phase(self.phase.state())
    }

    /// Settings fields are read-only while connected.
    pub fn settings_locked(&self) -> bool {
        self.is_connected()
    }

    pub fn power_state(&self) -> PowerState {
        if self.bar.blocking {
            PowerState::Blocked
        } else if self.is_connected() {
            PowerState::Connected
        } else {
            PowerState::Idle
        }
    }

    // ------------------------------------------------------------------
    // Validation and error slots
    // ------------------------------------------------------------------

    /// Set or clear the host error. Returns `true` when `host` is valid.
    pub fn validate_host(&mut self, host: &str) -> bool {
        match check_host(host) {
            Ok(()) => {
                self.clear_error(ErrorKind::Host);
                true
            }
            Err(e) => {
                self.set_error(ErrorKind::Host, e.to_string());
                false
            }
        }
    }

    /// Set or clear the port error. Returns `true` when `port` is an integer
    /// in `0..=65535`.
    pub fn validate_port(&mut self, port: &str) -> bool {
        if parse_port(port).is_some() {
            self.clear_error(ErrorKind::Port);
            true
        } else {
            self.set_error(ErrorKind::Port, ValidationError::Port.to_string());
            false
        }
    }

    pub fn edit_host(&mut self, host: impl Into<String>) -> bool {
        self.draft.host = host.into();
        let host = self.draft.host.clone();
        self.validate_host(&host)
    }

    pub fn edit_port(&mut self, port: impl Into<String>) -> bool {
        self.draft.port = port.into();
        let port = self.draft.port.clone();
        self.validate_port(&port)
    }

    pub fn set_security(&mut self, security: SecurityType) {
        self.draft.security = security;
    }

    pub fn record_config_error(&mut self, message: impl Into<String>) {
        self.set_error(ErrorKind::Config, message);
    }

    pub fn config_load_failed(&mut self, err: &ConfigLoadError) {
        if let ConfigLoadError::Unknown { detail } = err {
            warn!(target: "controller", "Config load error={}", detail);
        }
        self.record_config_error(err.to_string());
    }

    /// Surface a transport failure and force the session closed.
    pub fn record_websocket_error(&mut self, code: u16, reason: &str) {
        let message = format!("Terminal closed due to websocket error. Code={code}");
        warn!(target: "controller", "{}, Reason={}", message, reason);
        self.set_error(ErrorKind::Websocket, message);
        self.phase.handle(&ConnectionEvent::TransportLost { code });
        self.disconnect_and_unset_title();
    }

    pub fn set_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.errors.set(kind, message);
        self.refresh();
    }

    pub fn clear_error(&mut self, kind: ErrorKind) {
        if self.errors.clear(kind).is_some() {
            self.refresh();
        }
    }

    pub fn clear_all_errors(&mut self) {
        self.errors.clear_all();
        if self.bar.is_visible() {
            self.refresh();
        }
    }

    /// Recompute the error bar from the slots.
    ///
    /// The terminal is moved by one row only when the bar appears or
    /// disappears; a refresh that keeps the bar visible (or hidden) leaves
    /// the layout alone.
    pub fn refresh(&mut self) -> ErrorBar {
        let next = self.errors.error_bar();
        let was_visible = self.bar.is_visible();
        let is_visible = next.is_visible();

        if next != self.bar {
            self.shell.show_error_bar(&next);
            self.bar = next.clone();
        }

        if was_visible != is_visible {
            let offset = if is_visible {
                CONFIG_MENU_ROW_PX
            } else {
                -CONFIG_MENU_ROW_PX
            };
            self.adjust_terminal(offset);
        }
        next
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    pub fn toggle_menu(&mut self, open: bool) {
        if open == self.menu_open {
            return;
        }
        self.menu_open = open;
        self.adjust_terminal(if open {
            CONFIG_MENU_SIZE_PX
        } else {
            -CONFIG_MENU_SIZE_PX
        });
    }

    fn adjust_terminal(&mut self, delta_px: i32) {
        self.layout.adjust(delta_px);
        self.shell.apply_layout(&self.layout);
        self.resize.arm(Instant::now());
    }

    pub fn resize_deadline(&self) -> Option<Instant> {
        self.resize.deadline()
    }

    /// Perform the deferred resize if it is due. Returns `true` if it ran.
    pub fn poll_resize(&mut self, now: Instant) -> bool {
        if !self.resize.fire(now) {
            return false;
        }
        self.resize_terminal();
        true
    }

    /// Resize right away, e.g. after the shell's viewport changed.
    pub fn resize_terminal(&mut self) {
        let viewport = self.shell.viewport();
        let height = self.layout.terminal_height(viewport);
        debug!(target: "controller", width = viewport.width, height, "Resizing terminal");
        self.session.perform_resize(viewport.width, height);
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect if disconnected, disconnect if connected.
    pub fn toggle_connection(&mut self) -> ToggleOutcome {
        if self.session.is_connected() {
            self.disconnect_and_unset_title();
            return ToggleOutcome::Disconnected;
        }
        self.clear_all_errors();
        self.try_connect()
    }

    /// Connect with the current draft, unless already connected.
    pub fn auto_connect(&mut self) -> ToggleOutcome {
        if self.session.is_connected() {
            return ToggleOutcome::Connected;
        }
        self.try_connect()
    }

    fn try_connect(&mut self) -> ToggleOutcome {
        let host = self.draft.host.clone();
        let port = self.draft.port.clone();
        // Validate both so both slots reflect the draft.
        let host_ok = self.validate_host(&host);
        let port_ok = self.validate_port(&port);
        if !(host_ok && port_ok) {
            let err = if host_ok {
                ValidationError::Port
            } else {
                ValidationError::Host
            };
            info!(target: "controller", "Connect blocked: {}", err);
            return ToggleOutcome::Blocked(err);
        }

        match self.draft.to_settings() {
            Ok(settings) => self.connect_and_set_title(&settings),
            Err(err) => ToggleOutcome::Blocked(err),
        }
    }

    fn connect_and_set_title(&mut self, settings: &ConnectionSettings) -> ToggleOutcome {
        self.phase.handle(&ConnectionEvent::ConnectRequested {
            endpoint: settings.endpoint(),
        });
        let request = ConnectRequest::new(
            settings.host.clone(),
            settings.port,
            settings.security,
            self.options.stream_url.clone(),
        );

        match self.session.connect(&self.options.renderer, request) {
            Ok(()) => {
                self.shell.set_title(&connected_title(settings));
                ToggleOutcome::Connected
            }
            Err(e) => {
                self.phase.handle(&ConnectionEvent::ConnectFailed(e.to_string()));
                self.set_error(ErrorKind::Websocket, format!("Terminal failed to connect: {e}"));
                self.shell.set_title(DISCONNECTED_TITLE);
                ToggleOutcome::Failed
            }
        }
    }

    fn disconnect_and_unset_title(&mut self) {
        self.session.close();
        self.phase.handle(&ConnectionEvent::Closed);
        self.context_menu = None;
        self.shell.set_title(DISCONNECTED_TITLE);
    }

    /// Route an event from the session. Output bytes are handed back for
    /// display. Events from a link that was closed or replaced are dropped.
    pub fn handle_session_event(&mut self, event: LinkEvent) -> Option<Vec<u8>> {
        if !self.session.is_current(event.link) {
            debug!(target: "controller", link = event.link, event = ?event.event, "Dropping event from stale link");
            return None;
        }
        match event.event {
            SessionEvent::Opened => {
                self.phase.handle(&ConnectionEvent::Established);
                None
            }
            SessionEvent::Output(bytes) => Some(bytes),
            SessionEvent::TransportError(failure) => {
                debug!(target: "controller", terminal_message = %failure.terminal_message, "Transport failure");
                self.record_websocket_error(failure.code, &failure.reason);
                None
            }
            SessionEvent::Closed => {
                self.disconnect_and_unset_title();
                None
            }
        }
    }

    pub fn send_input(&mut self, data: &str) -> Result<(), VtError> {
        self.session.send_input(data)
    }

    /// Close handler: returns once the transport is closed, so the shell
    /// may discard us afterwards.
    pub async fn shutdown(&mut self) {
        self.session.teardown().await;
        self.phase.handle(&ConnectionEvent::Closed);
        self.context_menu = None;
        info!(target: "controller", "Session torn down");
    }

    // ------------------------------------------------------------------
    // Startup: launch metadata, stored config, proxy fallback
    // ------------------------------------------------------------------

    /// Seed the draft from a `"connect"` launch. Returns `true` when the
    /// launch carried settings, in which case the stored config is not
    /// loaded.
    pub fn apply_launch_metadata(&mut self, meta: &LaunchMetadata) -> bool {
        let Some(data) = &meta.data else {
            return false;
        };
        if data.kind != "connect" {
            debug!(target: "controller", kind = %data.kind, "Ignoring launch type");
            return false;
        }
        let Some(cs) = &data.connection_settings else {
            return false;
        };
        self.draft.host = cs.host.clone();
        self.draft.port = port_text(&cs.port);
        if let Some(security) = cs.security_type() {
            self.draft.security = security;
        }
        self.launched_with_settings = true;
        info!(target: "controller", host = %self.draft.host, port = %self.draft.port, "Launched with connection settings");
        true
    }

    pub fn wants_config_load(&self) -> bool {
        !self.launched_with_settings
    }

    pub fn apply_loaded_config(&mut self, doc: &SessionConfigDocument) {
        self.draft.apply_document(doc);
    }

    /// An empty stored host is resolved through the proxy settings.
    pub fn needs_proxy_lookup(&self) -> bool {
        self.draft.host.is_empty()
    }

    /// Returns `true` if the draft now has a host to connect to.
    pub fn apply_proxy_host(&mut self, lookup: Result<String>) -> bool {
        match lookup {
            Ok(host) if !host.is_empty() => {
                info!(target: "controller", host = %host, "Using proxy host");
                self.draft.host = host;
                true
            }
            Ok(_) => {
                self.set_error(ErrorKind::Host, invalid_hostname(&self.draft.host));
                false
            }
            Err(e) => {
                warn!(target: "controller", "Proxy lookup failed: {:#}", e);
                self.set_error(ErrorKind::Host, invalid_hostname(&self.draft.host));
                false
            }
        }
    }

    pub fn settings_document(&self) -> SessionConfigDocument {
        self.draft.to_document()
    }

    // ------------------------------------------------------------------
    // Dispatcher: messages and context menus
    // ------------------------------------------------------------------

    pub fn handle_message(&mut self, msg: &DispatcherMessage) -> Result<MessageReply, VtError> {
        let data = msg.data.as_ref().ok_or(VtError::UnknownMessage)?;
        match data.kind.as_str() {
            "disconnect" => {
                self.disconnect_and_unset_title();
                Ok(MessageReply::Disconnected)
            }
            "connectionInfo" => {
                let info = self.session.host_info();
                debug!(target: "controller", host_info = ?info, "Connection info requested");
                Ok(MessageReply::ConnectionInfo(info))
            }
            _ => Err(VtError::UnknownMessage),
        }
    }

    /// Build and show the context menu for the current screen. Returns the
    /// number of items offered.
    pub fn open_context_menu<D: ActionDispatcher + ?Sized>(
        &mut self,
        x: i32,
        y: i32,
        dispatcher: &D,
    ) -> usize {
        let Some(mut context) = self.session.screen_context() else {
            return 0;
        };
        if let Value::Object(map) = &mut context {
            map.insert(
                "sourcePluginID".to_owned(),
                Value::String(self.options.plugin_id.clone()),
            );
        }
        let items = build_context_menu(dispatcher, &context);
        self.shell.spawn_context_menu(x, y, &items);
        let count = items.len();
        self.context_menu = Some(OpenMenu { items, context });
        count
    }

    pub fn select_menu_item<D: ActionDispatcher + ?Sized>(
        &mut self,
        index: usize,
        dispatcher: &D,
    ) -> Result<()> {
        let menu = self.context_menu.take().context("no context menu open")?;
        let item = menu
            .items
            .get(index)
            .with_context(|| format!("no menu item {index}"))?;
        dispatcher.invoke(&item.action, &menu.context)
    }
}

fn invalid_hostname(host: &str) -> String {
    format!("Invalid Hostname: \"{host}\".")
}
