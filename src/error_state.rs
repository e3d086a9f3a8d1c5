//! Error slots and the derived error-bar state.
//!
//! There is exactly one slot per [`ErrorKind`]. Slots are independent and
//! last write wins. The error bar shows the first set slot in category
//! order, so connectivity-blocking errors (host, port) always win over
//! config and websocket errors.

/// Error category, in display priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Host,
    Port,
    Config,
    Websocket,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::Host,
        ErrorKind::Port,
        ErrorKind::Config,
        ErrorKind::Websocket,
    ];

    /// Host and port errors prevent a connect attempt.
    pub fn is_blocking(self) -> bool {
        matches!(self, ErrorKind::Host | ErrorKind::Port)
    }
}

/// Snapshot of what the error bar should display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBar {
    pub message: Option<String>,
    pub blocking: bool,
}

impl ErrorBar {
    pub fn is_visible(&self) -> bool {
        self.message.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorSlots {
    host: Option<String>,
    port: Option<String>,
    config: Option<String>,
    websocket: Option<String>,
}

impl ErrorSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: ErrorKind) -> &Option<String> {
        match kind {
            ErrorKind::Host => &self.host,
            ErrorKind::Port => &self.port,
            ErrorKind::Config => &self.config,
            ErrorKind::Websocket => &self.websocket,
        }
    }

    fn slot_mut(&mut self, kind: ErrorKind) -> &mut Option<String> {
        match kind {
            ErrorKind::Host => &mut self.host,
            ErrorKind::Port => &mut self.port,
            ErrorKind::Config => &mut self.config,
            ErrorKind::Websocket => &mut self.websocket,
        }
    }

    pub fn get(&self, kind: ErrorKind) -> Option<&str> {
        self.slot(kind).as_deref()
    }

    /// Store `message` in the slot, returning the previous value.
    pub fn set(&mut self, kind: ErrorKind, message: impl Into<String>) -> Option<String> {
        self.slot_mut(kind).replace(message.into())
    }

    /// Empty the slot, returning the previous value.
    pub fn clear(&mut self, kind: ErrorKind) -> Option<String> {
        self.slot_mut(kind).take()
    }

    pub fn clear_all(&mut self) {
        for kind in ErrorKind::ALL {
            self.clear(kind);
        }
    }

    pub fn is_blocking(&self) -> bool {
        ErrorKind::ALL
            .into_iter()
            .any(|kind| kind.is_blocking() && self.slot(kind).is_some())
    }

    pub fn first_error(&self) -> Option<&str> {
        ErrorKind::ALL.into_iter().find_map(|kind| self.get(kind))
    }

    pub fn error_bar(&self) -> ErrorBar {
        match self.first_error() {
            Some(message) => ErrorBar {
                message: Some(message.to_owned()),
                blocking: self.is_blocking(),
            },
            None => ErrorBar::default(),
        }
    }
}
