//! Connection-phase state machine.
//!
//! ```text
//! Disconnected ──ConnectRequested──► Connecting ──Established──► Connected
//!      ▲                                 │                          │
//!      └──── ConnectFailed / Closed / TransportLost ◄───────────────┘
//! ```
//!
//! Connecting lasts until the stream reports it is open (`Established`), or
//! until the connect call fails or the transport goes away first.

use statig::prelude::*;
use tracing::{info, warn};

/// Observable phase of the terminal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnectRequested { endpoint: String },
    Established,
    ConnectFailed(String),
    TransportLost { code: u16 },
    Closed,
}

/// Shared storage: counters kept across transitions.
#[derive(Debug, Default)]
pub struct ConnectionMachine {
    pub attempts: u32,
    pub transport_failures: u32,
}

impl ConnectionMachine {
    pub fn phase(state: &State) -> ConnectionPhase {
        match state {
            State::Disconnected {} => ConnectionPhase::Disconnected,
            State::Connecting {} => ConnectionPhase::Connecting,
            State::Connected {} => ConnectionPhase::Connected,
        }
    }
}

#[state_machine(
    initial = "State::disconnected()",
    state(derive(Debug, Clone, PartialEq))
)]
impl ConnectionMachine {
    #[state]
    fn disconnected(&mut self, event: &ConnectionEvent) -> Outcome<State> {
        match event {
            ConnectionEvent::ConnectRequested { endpoint } => {
                self.attempts += 1;
                info!(target: "connection", endpoint = %endpoint, attempt = self.attempts, "Connecting");
                Transition(State::connecting())
            }
            _ => Handled,
        }
    }

    #[state]
    fn connecting(&mut self, event: &ConnectionEvent) -> Outcome<State> {
        match event {
            ConnectionEvent::Established => Transition(State::connected()),
            ConnectionEvent::ConnectFailed(reason) => {
                warn!(target: "connection", reason = %reason, "Connect failed");
                Transition(State::disconnected())
            }
            ConnectionEvent::TransportLost { code } => {
                self.transport_failures += 1;
                warn!(target: "connection", code, "Transport lost while connecting");
                Transition(State::disconnected())
            }
            ConnectionEvent::Closed => Transition(State::disconnected()),
            ConnectionEvent::ConnectRequested { .. } => Handled,
        }
    }

    #[state]
    fn connected(&mut self, event: &ConnectionEvent) -> Outcome<State> {
        match event {
            ConnectionEvent::TransportLost { code } => {
                self.transport_failures += 1;
                warn!(target: "connection", code, "Transport lost");
                Transition(State::disconnected())
            }
            ConnectionEvent::Closed => {
                info!(target: "connection", "Disconnected");
                Transition(State::disconnected())
            }
            _ => Handled,
        }
    }
}
