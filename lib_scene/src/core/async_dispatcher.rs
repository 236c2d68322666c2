//! # Async Result Dispatcher
//!
//! Correlates an opaque request token with background work and guarantees the
//! token is completed exactly once.
//!
//! Work runs on tokio's blocking pool. Its outcome is posted as a
//! [`Completion`] onto an unbounded channel that the control loop consumes, so
//! delivery to the caller always happens on the control loop. The token table
//! is the only state shared with workers; whoever removes a token from it
//! first (the worker or [`AsyncResultDispatcher::shutdown`]) owns the single
//! completion for that token. A late second completion is logged and ignored.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Result, SceneError};

/// Terminal outcome for one token.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub token: String,
    pub outcome: Result<Value>,
}

#[derive(Clone)]
pub struct AsyncResultDispatcher {
    pending: Arc<Mutex<HashMap<String, Instant>>>,
    completions: mpsc::UnboundedSender<Completion>,
    shutdown: CancellationToken,
}

impl AsyncResultDispatcher {
    /// Creates the dispatcher and the receiving end of its completion channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            completions: tx,
            shutdown: CancellationToken::new(),
        };
        (dispatcher, rx)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // The map holds no invariants a panicking holder could break.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `work` on the blocking pool and completes `token` with its result.
    ///
    /// Must be called from within a tokio runtime. A token that is already
    /// pending is rejected with [`SceneError::DuplicateToken`] and the pending
    /// one is left untouched. After shutdown the token is not recorded and
    /// [`SceneError::Cancelled`] is returned directly, since no completion
    /// could reach the caller any more.
    pub fn dispatch<F>(&self, token: impl Into<String>, work: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<Value, String> + Send + 'static,
    {
        let token = token.into();
        {
            // Checked under the table lock so shutdown() cannot miss the token.
            let mut table = self.table();
            if self.shutdown.is_cancelled() {
                log::warn!("Rejecting token '{}': dispatcher is shut down", token);
                return Err(SceneError::Cancelled);
            }
            if table.contains_key(&token) {
                return Err(SceneError::DuplicateToken(token));
            }
            table.insert(token.clone(), Instant::now());
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let job = tokio::task::spawn_blocking(work);
            tokio::select! {
                _ = dispatcher.shutdown.cancelled() => {
                    // shutdown() has already rejected the token.
                }
                joined = job => {
                    let outcome = match joined {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(message)) => Err(SceneError::TaskFailed(message)),
                        Err(err) if err.is_panic() => {
                            let message = panic_message(err.into_panic());
                            log::error!("Background work for token '{}' panicked: {}", token, message);
                            Err(SceneError::TaskFailed(format!("panicked: {message}")))
                        }
                        Err(err) => Err(SceneError::TaskFailed(err.to_string())),
                    };
                    dispatcher.complete(&token, outcome);
                }
            }
        });
        Ok(())
    }

    /// Completes `token` once. Returns `false` if the token was not pending,
    /// which means it was already completed or never dispatched.
    pub fn complete(&self, token: &str, outcome: Result<Value>) -> bool {
        // The lock is held across the send so that a completion racing
        // shutdown() is queued before shutdown() returns.
        let mut table = self.table();
        let Some(started) = table.remove(token) else {
            log::warn!("Ignoring second completion for token '{}'", token);
            return false;
        };

        log::debug!(
            "Token '{}' completed after {:?} ({})",
            token,
            started.elapsed(),
            if outcome.is_ok() { "resolved" } else { "rejected" }
        );
        let completion = Completion {
            token: token.to_string(),
            outcome,
        };
        if self.completions.send(completion).is_err() {
            log::warn!("Completion for token '{}' dropped: control loop is gone", token);
        }
        true
    }

    /// Stops accepting work and rejects every pending token with
    /// [`SceneError::Cancelled`]. Returns the rejected tokens.
    pub fn shutdown(&self) -> Vec<String> {
        let tokens: Vec<String> = {
            let table = self.table();
            self.shutdown.cancel();
            table.keys().cloned().collect()
        };
        for token in &tokens {
            self.complete(token, Err(SceneError::Cancelled));
        }
        if !tokens.is_empty() {
            log::info!("Rejected {} pending tokens on shutdown", tokens.len());
        }
        tokens
    }

    pub fn pending_len(&self) -> usize {
        self.table().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
