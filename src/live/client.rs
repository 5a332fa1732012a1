//! Live-update client: reconnect with backoff, fall back to polling.
//!
//! ```text
//!   Disconnected --connect--> Connecting --ok--> Connected
//!        ^                        |                  |
//!        |<-------fail (n < N)----+     stream ends  |
//!        |<------------------------------------------+
//!   Degraded <----fail (n >= N)---+
//!   Degraded --poll ... periodic connect attempt--> Connecting
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::hub::CatalogVersion;
use crate::notify::LiveMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Live channel unavailable; polling the version endpoint instead.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
    /// Consecutive failed connects before falling back to polling.
    pub degrade_after: u32,
    pub poll_interval: Duration,
    /// While degraded, try the live channel again every this many polls.
    pub reconnect_every_polls: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(30),
            degrade_after: 5,
            poll_interval: Duration::from_secs(15),
            reconnect_every_polls: 4,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.multiplier);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

/// Connection state plus the failure count that drives backoff.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    failures: u32,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.failures = 0;
    }

    /// A connect attempt failed. Returns the delay before the next attempt.
    pub fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.state = if self.failures >= self.policy.degrade_after {
            ConnectionState::Degraded
        } else {
            ConnectionState::Disconnected
        };
        self.policy.delay(self.failures)
    }

    /// An established stream ended.
    pub fn dropped(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.policy.initial
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("poll failed: {0}")]
    Poll(String),
}

/// The two ways a client can learn about catalog changes.
#[async_trait]
pub trait LiveTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Next message on the live channel; `None` once the stream has ended.
    async fn next_message(&mut self) -> Option<LiveMessage>;

    async fn poll(&mut self) -> Result<CatalogVersion, TransportError>;
}

/// What the driver reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State(ConnectionState),
    Message(LiveMessage),
    /// Events may have been missed; pull the full catalog.
    ResyncRequired,
    /// A poll saw a different catalog than the last one.
    Polled(CatalogVersion),
}

/// Drive `transport` until `cancel` turns `true` or its sender is dropped,
/// or the consumer of `events` goes away.
pub async fn run_client<T: LiveTransport>(
    mut transport: T,
    policy: BackoffPolicy,
    mut cancel: watch::Receiver<bool>,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut machine = ConnectionMachine::new(policy);
    let mut ever_connected = false;
    let mut polls: u32 = 0;
    let mut last_seen: Option<CatalogVersion> = None;

    macro_rules! emit {
        ($event:expr) => {
            if events.send($event).await.is_err() {
                return;
            }
        };
    }

    loop {
        if *cancel.borrow() {
            return;
        }

        if machine.state() == ConnectionState::Degraded {
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                _ = tokio::time::sleep(policy.poll_interval) => {}
            }
            match transport.poll().await {
                Ok(version) => {
                    if last_seen.as_ref() != Some(&version) {
                        last_seen = Some(version.clone());
                        emit!(ClientEvent::Polled(version));
                    }
                }
                Err(e) => log::warn!("Catalog poll failed: {}", e),
            }
            polls += 1;
            if polls % policy.reconnect_every_polls.max(1) != 0 {
                continue;
            }
        }

        machine.connecting();
        emit!(ClientEvent::State(machine.state()));

        let connected = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = transport.connect() => result,
        };

        match connected {
            Ok(()) => {
                machine.connected();
                polls = 0;
                emit!(ClientEvent::State(machine.state()));
                if ever_connected {
                    emit!(ClientEvent::ResyncRequired);
                }
                ever_connected = true;

                loop {
                    let message = tokio::select! {
                        _ = cancelled(&mut cancel) => return,
                        message = transport.next_message() => message,
                    };
                    match message {
                        Some(message) => emit!(ClientEvent::Message(message)),
                        None => break,
                    }
                }

                let delay = machine.dropped();
                emit!(ClientEvent::State(machine.state()));
                tokio::select! {
                    _ = cancelled(&mut cancel) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                let delay = machine.failed();
                log::debug!("Live connect failed ({} in a row): {}", machine.failures(), e);
                emit!(ClientEvent::State(machine.state()));
                if machine.state() != ConnectionState::Degraded {
                    tokio::select! {
                        _ = cancelled(&mut cancel) => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Resolves once cancellation is requested.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
