//! Per-identity rate limiter actors
//!
//! Every client identity (an IP address) gets its own actor task that owns a
//! single cooldown counter. Callers talk to it through a [`RateLimiterHandle`];
//! the [`RateLimiterDirectory`] spawns actors lazily and replaces retired ones.

use chrono::Utc;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::constants::{COOLDOWN_GRACE_SECS, COOLDOWN_INCREMENT_SECS};
use crate::error::{ChatError, Result};

/// Cooldown counter for one identity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimiterState {
    next_allowed_time: f64,
}

impl RateLimiterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer one request at wall-clock time `now` (seconds).
    ///
    /// A registered action pushes the next allowed time out by five seconds.
    /// The returned cooldown only becomes positive once the backlog of actions
    /// exceeds the twenty second grace window.
    pub fn fetch(&mut self, now: f64, register: bool) -> f64 {
        self.next_allowed_time = self.next_allowed_time.max(now);
        if register {
            self.next_allowed_time += COOLDOWN_INCREMENT_SECS;
        }
        (self.next_allowed_time - now - COOLDOWN_GRACE_SECS).max(0.0)
    }

    /// True when this state answers exactly like a fresh one would
    pub fn is_settled(&self, now: f64) -> bool {
        self.next_allowed_time <= now
    }
}

/// Request kinds understood by a limiter actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterRequest {
    /// Write-style call: registers one action and extends the cooldown
    Register,
    /// Pure status query
    Status,
}

struct LimiterCall {
    request: LimiterRequest,
    reply: oneshot::Sender<f64>,
}

/// Cloneable reference to a running limiter actor
#[derive(Clone)]
pub struct RateLimiterHandle {
    identity: Arc<str>,
    sender: mpsc::Sender<LimiterCall>,
}

impl RateLimiterHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Send one request and wait for the cooldown in seconds
    pub async fn fetch(&self, request: LimiterRequest) -> Result<f64> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(LimiterCall { request, reply })
            .await
            .map_err(|_| {
                ChatError::LimiterUnavailable(format!("limiter for {} has retired", self.identity))
            })?;
        response.await.map_err(|_| {
            ChatError::LimiterUnavailable(format!(
                "limiter for {} dropped the request",
                self.identity
            ))
        })
    }

    pub async fn register_action(&self) -> Result<f64> {
        self.fetch(LimiterRequest::Register).await
    }

    pub async fn status(&self) -> Result<f64> {
        self.fetch(LimiterRequest::Status).await
    }

    /// A closed handle points at an actor that has retired
    pub fn is_stale(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The actor task owning one identity's counter
pub struct RateLimiterActor {
    identity: Arc<str>,
    state: RateLimiterState,
    calls: mpsc::Receiver<LimiterCall>,
    idle_timeout: Duration,
}

impl RateLimiterActor {
    pub fn spawn(identity: &str, idle_timeout: Duration) -> RateLimiterHandle {
        let identity: Arc<str> = Arc::from(identity);
        let (sender, calls) = mpsc::channel(32);
        let actor = Self {
            identity: identity.clone(),
            state: RateLimiterState::new(),
            calls,
            idle_timeout,
        };
        tokio::spawn(actor.run());
        debug!("Spawned rate limiter for {}", identity);
        RateLimiterHandle { identity, sender }
    }

    async fn run(mut self) {
        loop {
            match tokio::time::timeout(self.idle_timeout, self.calls.recv()).await {
                Ok(Some(call)) => {
                    let register = call.request == LimiterRequest::Register;
                    let cooldown = self.state.fetch(wall_clock_secs(), register);
                    let _ = call.reply.send(cooldown);
                }
                Ok(None) => break,
                Err(_) => {
                    if self.state.is_settled(wall_clock_secs()) {
                        break;
                    }
                }
            }
        }
        debug!("Rate limiter for {} retired", self.identity);
    }
}

fn wall_clock_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Maps identities to limiter actors, spawning them on first use
#[derive(Clone)]
pub struct RateLimiterDirectory {
    limiters: Arc<Mutex<HashMap<String, RateLimiterHandle>>>,
    idle_timeout: Duration,
}

impl RateLimiterDirectory {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            limiters: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Resolve the live actor for `identity`, replacing a retired one
    pub async fn get(&self, identity: &str) -> RateLimiterHandle {
        let mut limiters = self.limiters.lock().await;
        if let Some(handle) = limiters.get(identity) {
            if !handle.is_stale() {
                return handle.clone();
            }
        }

        limiters.retain(|_, handle| !handle.is_stale());
        let handle = RateLimiterActor::spawn(identity, self.idle_timeout);
        limiters.insert(identity.to_string(), handle.clone());
        if limiters.len() % 1000 == 0 {
            info!("Tracking {} rate limiter actors", limiters.len());
        }
        handle
    }

    /// Number of actors currently believed alive
    pub async fn active_count(&self) -> usize {
        let limiters = self.limiters.lock().await;
        limiters.values().filter(|h| !h.is_stale()).count()
    }
}

#[cfg(test)]
impl RateLimiterDirectory {
    /// Register a live limiter for `identity` that swallows every call unanswered
    pub(crate) async fn install_unresponsive(&self, identity: &str) {
        let (sender, mut calls) = mpsc::channel::<LimiterCall>(32);
        tokio::spawn(async move {
            while let Some(call) = calls.recv().await {
                drop(call);
            }
        });
        let handle = RateLimiterHandle {
            identity: Arc::from(identity),
            sender,
        };
        self.limiters
            .lock()
            .await
            .insert(identity.to_string(), handle);
    }
}
