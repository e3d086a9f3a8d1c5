#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};

use vt_client::controller::{ConnectionLifecycleController, ControllerOptions};
use vt_client::dispatcher::ContextMenuItem;
use vt_client::error::VtError;
use vt_client::error_state::ErrorBar;
use vt_client::host_shell::HostShell;
use vt_client::layout::{TerminalLayout, Viewport};
use vt_client::protocol::{ConnectRequest, RendererSettings};
use vt_client::session::{LinkId, TerminalSession};

/// What the fake session saw. Shared so tests can inspect it after the
/// session has moved into the controller.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub connects: Vec<ConnectRequest>,
    pub closes: usize,
    pub teardowns: usize,
    pub resizes: Vec<(u32, u32)>,
    pub inputs: Vec<String>,
}

pub struct FakeSession {
    pub log: Rc<RefCell<SessionLog>>,
    pub connected: bool,
    pub refuse: bool,
    pub host_info: Option<Value>,
    /// Id of the most recent link; the first connect gets 1.
    pub link: LinkId,
}

impl FakeSession {
    pub fn new() -> (Self, Rc<RefCell<SessionLog>>) {
        let log = Rc::new(RefCell::new(SessionLog::default()));
        let session = Self {
            log: Rc::clone(&log),
            connected: false,
            refuse: false,
            host_info: None,
            link: 0,
        };
        (session, log)
    }
}

impl TerminalSession for FakeSession {
    fn connect(&mut self, _: &RendererSettings, request: ConnectRequest) -> Result<(), VtError> {
        if self.refuse {
            return Err(VtError::Transport("refused".into()));
        }
        self.log.borrow_mut().connects.push(request);
        self.connected = true;
        self.link += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.borrow_mut().closes += 1;
        self.connected = false;
    }

    async fn teardown(&mut self) {
        if self.connected {
            self.log.borrow_mut().teardowns += 1;
        }
        self.connected = false;
    }

    fn is_current(&self, link: LinkId) -> bool {
        self.connected && link == self.link
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn perform_resize(&mut self, width: u32, height: u32) {
        self.log.borrow_mut().resizes.push((width, height));
    }

    fn host_info(&self) -> Option<Value> {
        self.host_info.clone()
    }

    fn screen_context(&self) -> Option<Value> {
        self.connected.then(|| json!({"screenID": 1, "panel": "ISPF"}))
    }

    fn send_input(&mut self, data: &str) -> Result<(), VtError> {
        if !self.connected {
            return Err(VtError::Transport("not connected".into()));
        }
        self.log.borrow_mut().inputs.push(data.to_owned());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingShell {
    pub titles: Vec<String>,
    pub layouts: Vec<TerminalLayout>,
    pub bars: Vec<ErrorBar>,
    pub menus: Vec<(i32, i32, Vec<String>)>,
}

impl RecordingShell {
    pub fn title(&self) -> &str {
        self.titles.last().map(String::as_str).unwrap_or_default()
    }
}

impl HostShell for RecordingShell {
    fn set_title(&mut self, title: &str) {
        self.titles.push(title.to_owned());
    }

    fn apply_layout(&mut self, layout: &TerminalLayout) {
        self.layouts.push(*layout);
    }

    fn show_error_bar(&mut self, bar: &ErrorBar) {
        self.bars.push(bar.clone());
    }

    fn spawn_context_menu(&mut self, x: i32, y: i32, items: &[ContextMenuItem]) {
        let labels = items.iter().map(|i| i.text.clone()).collect();
        self.menus.push((x, y, labels));
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            width: 1024,
            height: 768,
        }
    }
}

pub fn options() -> ControllerOptions {
    ControllerOptions {
        stream_url: "ws://localhost:8543/terminalstream".into(),
        renderer: RendererSettings::default(),
        plugin_id: "org.zowe.terminal.vt".into(),
    }
}

pub type TestController = ConnectionLifecycleController<FakeSession, RecordingShell>;

pub fn controller() -> (TestController, Rc<RefCell<SessionLog>>) {
    let (session, log) = FakeSession::new();
    let controller = ConnectionLifecycleController::new(session, RecordingShell::default(), options());
    (controller, log)
}
