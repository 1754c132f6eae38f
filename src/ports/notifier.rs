//! Token removal notification

/// Answer given by a notifier when a token disappears mid-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rescan, rediscover the key and retry the operation
    Continue,
    /// Give up; the operation fails
    Stop,
}

/// Callback consulted once per token fault
///
/// `attempt` counts from zero within a single operation. The notifier runs
/// on the caller's thread and may block, for example while a person
/// reinserts the token; no timeout is applied around it.
pub trait TokenNotifier: Send + Sync {
    fn token_removed(&self, key_label: &str, attempt: u32) -> RetryDecision;
}

impl<F> TokenNotifier for F
where
    F: Fn(&str, u32) -> RetryDecision + Send + Sync,
{
    fn token_removed(&self, key_label: &str, attempt: u32) -> RetryDecision {
        self(key_label, attempt)
    }
}

/// Notifier that keeps retrying for the first `n` attempts of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryUpTo(pub u32);

impl TokenNotifier for RetryUpTo {
    fn token_removed(&self, _key_label: &str, attempt: u32) -> RetryDecision {
        if attempt < self.0 {
            RetryDecision::Continue
        } else {
            RetryDecision::Stop
        }
    }
}
