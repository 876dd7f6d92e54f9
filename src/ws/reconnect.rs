//! Connection lifecycle state machine with a bounded retry budget.
//!
//! Pure and synchronous: the connection task feeds it outcomes and performs
//! whatever [`Step`] it returns, so retry exhaustion can be tested without a
//! socket.

use std::time::Duration;

use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&Config> for ReconnectPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            interval: config.reconnect_interval,
        }
    }
}

/// What the connection task has to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RetryAfter(Duration),
    GiveUp { attempts: u32 },
    Ignore,
}

#[derive(Debug)]
pub struct ReconnectMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries spent since the channel was last open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begin a connection attempt.
    pub fn start(&mut self) -> ConnectionState {
        match self.state {
            ConnectionState::Idle | ConnectionState::Reconnecting => {
                self.state = ConnectionState::Connecting;
            }
            ConnectionState::Closed => {
                // explicit restart, e.g. with a refreshed credential
                self.attempts = 0;
                self.state = ConnectionState::Connecting;
            }
            ConnectionState::Connecting | ConnectionState::Open => {}
        }
        self.state
    }

    pub fn opened(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            self.attempts = 0;
        }
        self.state
    }

    /// A connect attempt failed or an open channel closed abnormally.
    pub fn failed(&mut self) -> Step {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                if self.attempts < self.policy.max_attempts {
                    self.attempts += 1;
                    self.state = ConnectionState::Reconnecting;
                    Step::RetryAfter(self.policy.interval)
                } else {
                    self.state = ConnectionState::Closed;
                    Step::GiveUp {
                        attempts: self.attempts,
                    }
                }
            }
            _ => Step::Ignore,
        }
    }

    /// Explicit close, by the client or a clean close from the server.
    pub fn close(&mut self) -> ConnectionState {
        self.state = ConnectionState::Closed;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> ReconnectMachine {
        ReconnectMachine::new(ReconnectPolicy {
            max_attempts,
            interval: Duration::from_millis(3000),
        })
    }

    #[test]
    fn test_happy_path() {
        let mut m = machine(10);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.start(), ConnectionState::Connecting);
        assert_eq!(m.opened(), ConnectionState::Open);
        assert_eq!(m.close(), ConnectionState::Closed);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let mut m = machine(10);
        m.start();
        m.opened();

        for attempt in 1..=10 {
            assert_eq!(m.failed(), Step::RetryAfter(Duration::from_millis(3000)));
            assert_eq!(m.state(), ConnectionState::Reconnecting);
            assert_eq!(m.attempts(), attempt);
            m.start();
        }

        assert_eq!(m.failed(), Step::GiveUp { attempts: 10 });
        assert_eq!(m.state(), ConnectionState::Closed);

        // nothing reschedules once closed
        assert_eq!(m.failed(), Step::Ignore);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut m = machine(2);
        m.start();
        m.failed();
        m.start();
        m.failed();
        assert_eq!(m.attempts(), 2);

        m.start();
        m.opened();
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.failed(), Step::RetryAfter(Duration::from_millis(3000)));
    }

    #[test]
    fn test_opened_ignored_unless_connecting() {
        let mut m = machine(1);
        assert_eq!(m.opened(), ConnectionState::Idle);
        m.close();
        assert_eq!(m.opened(), ConnectionState::Closed);
    }

    #[test]
    fn test_restart_after_close_resets_budget() {
        let mut m = machine(0);
        m.start();
        assert_eq!(m.failed(), Step::GiveUp { attempts: 0 });
        assert_eq!(m.start(), ConnectionState::Connecting);
        assert_eq!(m.attempts(), 0);
    }
}
