//! Token removal recovery
//!
//! When a device call reports that the session or the token went away, the
//! operation in progress is handed to a [`RecoveryProtocol`]. The protocol
//! closes the dead session, asks the caller's notifier whether to wait for
//! the token, and on approval rescans slots and rediscovers the key so the
//! operation can restart from its first phase.
//!
//! Phases and the events that move between them:
//!
//! | from       | event               | to         |
//! |------------|---------------------|------------|
//! | Operating  | `TransientFault`    | Faulted    |
//! | Faulted    | `NoNotifier`        | Failed     |
//! | Faulted    | `Continue`          | Recovering |
//! | Faulted    | `Stop`              | Failed     |
//! | Recovering | `Rediscovered`      | Operating  |
//! | Recovering | `RediscoveryFailed` | Failed     |
//!
//! The notifier is consulted exactly once per fault. A failed rediscovery
//! ends the operation; it never re-enters `Faulted`, so the notifier is the
//! only source of further attempts.

use tracing::{debug, info, warn};

use crate::error::DeviceError;
use crate::ports::{RetryDecision, TokenNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Operating,
    Faulted,
    Recovering,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    TransientFault,
    NoNotifier,
    Continue,
    Stop,
    Rediscovered,
    RediscoveryFailed,
}

/// The transition table; `None` for events not valid in `phase`
pub fn transition(phase: RecoveryPhase, event: RecoveryEvent) -> Option<RecoveryPhase> {
    use RecoveryEvent as E;
    use RecoveryPhase as P;

    match (phase, event) {
        (P::Operating, E::TransientFault) => Some(P::Faulted),
        (P::Faulted, E::NoNotifier) => Some(P::Failed),
        (P::Faulted, E::Continue) => Some(P::Recovering),
        (P::Faulted, E::Stop) => Some(P::Failed),
        (P::Recovering, E::Rediscovered) => Some(P::Operating),
        (P::Recovering, E::RediscoveryFailed) => Some(P::Failed),
        _ => None,
    }
}

/// Side effects the protocol needs from the key being recovered
pub trait RecoveryHost {
    /// Human-readable label passed to the notifier
    fn key_label(&self) -> String;

    /// Release the dead session; errors from the provider are ignored
    fn drop_session(&mut self);

    fn rescan(&mut self) -> Result<(), DeviceError>;

    /// Find the key again from its stored locator and bind to it
    fn rediscover(&mut self) -> Result<(), DeviceError>;
}

/// Why a faulted operation could not be resumed
///
/// `source` is always the status of the fault that started recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryFailure {
    /// No notifier was configured, so the fault is final
    NoNotifier { source: DeviceError },
    /// The notifier refused the first retry
    Declined { label: String, source: DeviceError },
    /// Retries were attempted and the key is still unavailable
    Exhausted {
        label: String,
        attempts: u32,
        source: DeviceError,
    },
}

/// Recovery state for one operation call
pub struct RecoveryProtocol<'n> {
    notifier: Option<&'n dyn TokenNotifier>,
    phase: RecoveryPhase,
    attempt: u32,
}

impl<'n> RecoveryProtocol<'n> {
    pub fn new(notifier: Option<&'n dyn TokenNotifier>) -> Self {
        Self {
            notifier,
            phase: RecoveryPhase::Operating,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// Number of notifier consultations so far in this call
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Run the protocol for one transient fault
    ///
    /// Returns `Ok(())` once the key has been rediscovered; the caller must
    /// then restart its operation from the first phase.
    pub fn handle_fault<H>(&mut self, host: &mut H, status: DeviceError) -> Result<(), RecoveryFailure>
    where
        H: RecoveryHost + ?Sized,
    {
        let label = host.key_label();

        if self.phase != RecoveryPhase::Operating {
            return Err(RecoveryFailure::Exhausted {
                label,
                attempts: self.attempt,
                source: status,
            });
        }

        self.advance(RecoveryEvent::TransientFault);
        warn!("Token for key '{}' faulted: {}", label, status);
        host.drop_session();

        let Some(notifier) = self.notifier else {
            self.advance(RecoveryEvent::NoNotifier);
            return Err(RecoveryFailure::NoNotifier { source: status });
        };

        let attempt = self.attempt;
        self.attempt += 1;

        match notifier.token_removed(&label, attempt) {
            RetryDecision::Continue => self.advance(RecoveryEvent::Continue),
            RetryDecision::Stop => {
                self.advance(RecoveryEvent::Stop);
                info!("Recovery of key '{}' stopped at attempt {}", label, attempt);
                return Err(if attempt == 0 {
                    RecoveryFailure::Declined {
                        label,
                        source: status,
                    }
                } else {
                    RecoveryFailure::Exhausted {
                        label,
                        attempts: attempt,
                        source: status,
                    }
                });
            }
        }

        match host.rescan().and_then(|()| host.rediscover()) {
            Ok(()) => {
                self.advance(RecoveryEvent::Rediscovered);
                info!("Key '{}' rediscovered on attempt {}", label, attempt);
                Ok(())
            }
            Err(e) => {
                self.advance(RecoveryEvent::RediscoveryFailed);
                warn!("Key '{}' not rediscovered: {}", label, e);
                Err(RecoveryFailure::Exhausted {
                    label,
                    attempts: self.attempt,
                    source: status,
                })
            }
        }
    }

    fn advance(&mut self, event: RecoveryEvent) {
        let next = transition(self.phase, event);
        debug_assert!(
            next.is_some(),
            "invalid recovery transition: {:?} on {:?}",
            self.phase,
            event
        );
        let next = next.unwrap_or(RecoveryPhase::Failed);
        debug!("Recovery {:?} --{:?}--> {:?}", self.phase, event, next);
        self.phase = next;
    }
}
