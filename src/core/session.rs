//! Per-connection session state owned by a room actor

use log::warn;
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message as WsMessage;

use crate::core::limiter_client::RateLimiterClient;
use crate::core::message::{close_message, ServerFrame};

/// Room-local session number, assigned in accept order
pub type SessionId = u64;

/// Lifecycle of a session. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Unnamed,
    Active,
    Closed,
}

pub struct Session {
    pub id: SessionId,
    pub connection_id: Uuid,
    sender: mpsc::UnboundedSender<WsMessage>,
    state: SessionState,
    name: Option<String>,
    limiter: RateLimiterClient,
    /// Frames queued until the session names itself; `None` once flushed
    backlog: Option<Vec<String>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        sender: mpsc::UnboundedSender<WsMessage>,
        limiter: RateLimiterClient,
    ) -> Self {
        Self {
            id,
            connection_id: Uuid::new_v4(),
            sender,
            state: SessionState::Connecting,
            name: None,
            limiter,
            backlog: Some(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn limiter(&self) -> &RateLimiterClient {
        &self.limiter
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.as_ref().map_or(0, Vec::len)
    }

    fn advance(&mut self, next: SessionState) -> bool {
        if next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    /// The room has registered this session
    pub fn mark_accepted(&mut self) -> bool {
        self.advance(SessionState::Unnamed)
    }

    /// Terminal; the session must not be used for traffic afterwards
    pub fn mark_quit(&mut self) {
        self.advance(SessionState::Closed);
    }

    /// Queue a payload for delivery once the session is named
    pub fn enqueue(&mut self, payload: String) {
        if let Some(backlog) = self.backlog.as_mut() {
            backlog.push(payload);
        }
    }

    /// Name the session and flush its backlog in order.
    ///
    /// Returns false if the session was not waiting for a name or if the
    /// connection went away while flushing.
    pub fn activate(&mut self, name: String) -> bool {
        if self.state != SessionState::Unnamed {
            return false;
        }
        self.name = Some(name);
        self.state = SessionState::Active;

        let backlog = self.backlog.take().unwrap_or_default();
        backlog.iter().all(|payload| self.send(payload))
    }

    /// Send raw text; false means the connection is gone
    pub fn send(&self, payload: &str) -> bool {
        match self.sender.send(WsMessage::text(payload)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to session {}", self.id);
                false
            }
        }
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.send(&frame.to_json())
    }

    /// Ask the connection writer to close with `code`
    pub fn close(&mut self, code: u16, reason: &str) {
        let _ = self.sender.send(close_message(code, reason));
        self.mark_quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limiter::RateLimiterDirectory;
    use std::sync::Arc;
    use std::time::Duration;

    async fn session() -> (Session, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let limiter = RateLimiterClient::new(
            "127.0.0.1".to_string(),
            RateLimiterDirectory::new(Duration::from_secs(60)),
            Arc::new(|_| {}),
        )
        .await;
        (Session::new(1, tx, limiter), rx)
    }

    #[tokio::test]
    async fn test_state_only_moves_forward() {
        let (mut session, _rx) = session().await;
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.mark_accepted());
        assert!(!session.mark_accepted());
        assert!(session.activate("alice".to_string()));
        assert_eq!(session.state(), SessionState::Active);

        session.mark_quit();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.mark_accepted());
        assert!(!session.activate("bob".to_string()));
        assert_eq!(session.name(), Some("alice"));
    }

    #[tokio::test]
    async fn test_cannot_activate_before_accept() {
        let (mut session, _rx) = session().await;
        assert!(!session.activate("alice".to_string()));
        assert!(!session.is_named());
    }

    #[tokio::test]
    async fn test_backlog_flushed_in_order() {
        let (mut session, mut rx) = session().await;
        session.mark_accepted();
        session.enqueue("one".to_string());
        session.enqueue("two".to_string());
        assert_eq!(session.backlog_len(), 2);

        assert!(session.activate("alice".to_string()));
        assert_eq!(rx.recv().await.unwrap().to_str().unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap().to_str().unwrap(), "two");

        // the buffer is gone once flushed
        session.enqueue("three".to_string());
        assert_eq!(session.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_send_fails_when_connection_gone() {
        let (mut session, rx) = session().await;
        session.mark_accepted();
        drop(rx);
        assert!(!session.send("hello"));
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (mut session, mut rx) = session().await;
        session.close(1008, "Name too long.");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.close_frame().unwrap().0, 1008);
        assert_eq!(session.state(), SessionState::Closed);
    }
}
