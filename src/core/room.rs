//! Room actors
//!
//! Each room is a single tokio task that owns its sessions, its logical clock
//! and its slice of storage. Connections talk to it through a [`RoomHandle`];
//! because the task handles one event at a time, every named session sees
//! broadcasts in the same order and no room state needs a lock.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;
use warp::ws::Message as WsMessage;

use crate::constants::{
    BACKLOG_LIMIT, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, MAX_MESSAGE_LENGTH,
    MAX_NAME_LENGTH,
};
use crate::core::limiter_client::{ErrorCallback, RateLimiterClient};
use crate::core::message::{close_message, ChatMessage, ClientFrame, ServerFrame};
use crate::core::rate_limiter::RateLimiterDirectory;
use crate::core::room_key::RoomId;
use crate::core::session::{Session, SessionId, SessionState};
use crate::error::{ChatError, Result};
use crate::storage::{RoomStorage, SessionAttachment, StorageProvider};

/// Hands out strictly increasing millisecond timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock {
    last: i64,
}

impl LogicalClock {
    pub fn starting_at(last: i64) -> Self {
        Self { last }
    }

    /// Wall-clock time unless that would not move past the last timestamp
    pub fn next(&mut self, wall_clock_ms: i64) -> i64 {
        let timestamp = wall_clock_ms.max(self.last + 1);
        self.last = timestamp;
        timestamp
    }

    pub fn last(&self) -> i64 {
        self.last
    }
}

/// Snapshot of a room actor's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    pub sessions: usize,
    pub named: usize,
    pub last_timestamp: i64,
}

enum RoomEvent {
    Accept {
        sender: mpsc::UnboundedSender<WsMessage>,
        identity: String,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    Frame {
        session: SessionId,
        text: String,
    },
    Close {
        session: SessionId,
    },
    Error {
        session: SessionId,
        reason: String,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

/// Cloneable reference to a running room actor
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Register a connection with the room. Outbound frames for the session
    /// are pushed into `sender`.
    pub async fn accept_session(
        &self,
        sender: mpsc::UnboundedSender<WsMessage>,
        identity: &str,
    ) -> Result<SessionId> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(RoomEvent::Accept {
                sender,
                identity: identity.to_string(),
                reply,
            })
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())?
    }

    /// Forward one inbound text frame
    pub fn send_frame(&self, session: SessionId, text: String) -> Result<()> {
        self.sender
            .send(RoomEvent::Frame { session, text })
            .map_err(|_| self.unavailable())
    }

    pub fn close_session(&self, session: SessionId) {
        let _ = self.sender.send(RoomEvent::Close { session });
    }

    pub fn report_error(&self, session: SessionId, reason: String) {
        let _ = self.sender.send(RoomEvent::Error { session, reason });
    }

    pub async fn stats(&self) -> Result<RoomStats> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(RoomEvent::Stats { reply })
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    /// A stale handle points at an actor that has retired
    pub fn is_stale(&self) -> bool {
        self.sender.is_closed()
    }

    fn unavailable(&self) -> ChatError {
        ChatError::RoomUnavailable(format!("room {} is not running", self.room_id))
    }
}

pub struct RoomActor {
    room_id: RoomId,
    sessions: BTreeMap<SessionId, Session>,
    next_session_id: SessionId,
    clock: LogicalClock,
    storage: Arc<dyn RoomStorage>,
    limiters: RateLimiterDirectory,
    events: mpsc::UnboundedReceiver<RoomEvent>,
    idle_timeout: Duration,
    /// Connections whose attachments still need deleting
    departed: Vec<Uuid>,
}

impl RoomActor {
    pub fn spawn(
        room_id: RoomId,
        storage: Arc<dyn RoomStorage>,
        limiters: RateLimiterDirectory,
        idle_timeout: Duration,
    ) -> RoomHandle {
        let (sender, events) = mpsc::unbounded_channel();
        let actor = Self {
            room_id: room_id.clone(),
            sessions: BTreeMap::new(),
            next_session_id: 1,
            clock: LogicalClock::default(),
            storage,
            limiters,
            events,
            idle_timeout,
            departed: Vec::new(),
        };
        tokio::spawn(actor.run());
        RoomHandle { room_id, sender }
    }

    async fn run(mut self) {
        self.restore().await;
        info!("Room {} started", self.room_id);

        loop {
            let event = if self.sessions.is_empty() {
                match tokio::time::timeout(self.idle_timeout, self.events.recv()).await {
                    Ok(event) => event,
                    Err(_) => break,
                }
            } else {
                self.events.recv().await
            };

            let Some(event) = event else { break };
            self.handle_event(event).await;
            self.forget_departed().await;
        }

        // anything still queued is dropped; accepting connections retry
        // against a fresh actor
        self.events.close();
        info!("Room {} retired", self.room_id);
    }

    /// Pick up where a previous incarnation of this room left off
    async fn restore(&mut self) {
        match self.storage.list(true, 1).await {
            Ok(latest) => {
                if let Some(raw) = latest.first() {
                    match serde_json::from_str::<ChatMessage>(raw) {
                        Ok(message) => self.clock = LogicalClock::starting_at(message.timestamp),
                        Err(e) => warn!("Room {} has an unreadable latest message: {}", self.room_id, e),
                    }
                }
            }
            Err(e) => error!("Room {} failed to read history: {}", self.room_id, e),
        }

        // connections are bound to the process that accepted them, so any
        // attachment left behind describes a socket that no longer exists
        match self.storage.list_attachments().await {
            Ok(stale) => {
                for attachment in stale {
                    debug!(
                        "Reaping attachment {} ({:?}) in room {}",
                        attachment.connection_id, attachment.name, self.room_id
                    );
                    self.departed.push(attachment.connection_id);
                }
                self.forget_departed().await;
            }
            Err(e) => warn!("Room {} failed to list attachments: {}", self.room_id, e),
        }
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Accept {
                sender,
                identity,
                reply,
            } => {
                let result = self.accept_session(sender, identity).await;
                if let Err(Ok(session)) = reply.send(result) {
                    // the connection gave up waiting
                    self.on_close(session);
                }
            }
            RoomEvent::Frame { session, text } => self.on_message(session, &text).await,
            RoomEvent::Close { session } => self.on_close(session),
            RoomEvent::Error { session, reason } => {
                debug!("Session {} in room {} errored: {}", session, self.room_id, reason);
                self.on_close(session);
            }
            RoomEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn accept_session(
        &mut self,
        sender: mpsc::UnboundedSender<WsMessage>,
        identity: String,
    ) -> Result<SessionId> {
        let history = self.storage.list(true, BACKLOG_LIMIT).await?;

        let close_sender = sender.clone();
        let report_error: ErrorCallback = Arc::new(move |err: ChatError| {
            let _ = close_sender.send(close_message(CLOSE_INTERNAL_ERROR, &err.to_string()));
        });
        let limiter =
            RateLimiterClient::new(identity.clone(), self.limiters.clone(), report_error).await;

        let id = self.next_session_id;
        self.next_session_id += 1;

        let mut session = Session::new(id, sender, limiter);
        for other in self.sessions.values() {
            if let Some(name) = other.name() {
                session.enqueue(ServerFrame::joined(name).to_json());
            }
        }
        for value in history.into_iter().rev() {
            session.enqueue(value);
        }
        session.mark_accepted();

        let attachment = SessionAttachment {
            connection_id: session.connection_id,
            limiter_identity: identity,
            name: None,
        };
        if let Err(e) = self.storage.put_attachment(&attachment).await {
            warn!("Room {} failed to persist attachment: {}", self.room_id, e);
        }

        self.sessions.insert(id, session);
        info!(
            "Session {} accepted in room {} ({} connected)",
            id,
            self.room_id,
            self.sessions.len()
        );
        Ok(id)
    }

    async fn on_message(&mut self, id: SessionId, raw: &str) {
        let Some(state) = self.sessions.get(&id).map(Session::state) else {
            debug!("Frame for unknown session {} in room {}", id, self.room_id);
            return;
        };

        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply(id, &ServerFrame::error(&e));
                return;
            }
        };

        if frame.is_ping() {
            self.reply(id, &ServerFrame::pong());
            return;
        }

        match state {
            SessionState::Unnamed => match frame.name_text() {
                Some(name) => self.name_session(id, name).await,
                None => self.reply(id, &ServerFrame::error(&ChatError::NameRequired)),
            },
            SessionState::Active => match frame.message_text() {
                Some(text) => self.post_message(id, text).await,
                None if frame.name.is_some() => {
                    self.reply(id, &ServerFrame::error(&ChatError::NameAlreadySet))
                }
                None => self.reply(
                    id,
                    &ServerFrame::error(&ChatError::MessageParseError(
                        "expected a message field".to_string(),
                    )),
                ),
            },
            SessionState::Connecting | SessionState::Closed => {}
        }
    }

    async fn name_session(&mut self, id: SessionId, name: String) {
        let length = name.chars().count();
        if length > MAX_NAME_LENGTH {
            if let Some(mut session) = self.sessions.remove(&id) {
                session.send_frame(&ServerFrame::error(&ChatError::NameTooLong(length)));
                session.close(CLOSE_POLICY_VIOLATION, "Name too long.");
                self.departed.push(session.connection_id);
            }
            return;
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.activate(name.clone()) {
            // connection went away while the backlog was flushing
            if let Some(mut session) = self.sessions.remove(&id) {
                session.mark_quit();
                self.departed.push(session.connection_id);
            }
            return;
        }
        let attachment = SessionAttachment {
            connection_id: session.connection_id,
            limiter_identity: session.limiter().identity().to_string(),
            name: Some(name.clone()),
        };

        if let Err(e) = self.storage.put_attachment(&attachment).await {
            warn!("Room {} failed to persist attachment: {}", self.room_id, e);
        }

        info!("Session {} in room {} is now {}", id, self.room_id, name);
        self.broadcast(&ServerFrame::joined(&name));
        self.reply(id, &ServerFrame::ready());
    }

    async fn post_message(&mut self, id: SessionId, text: String) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };

        if !session.limiter().check_limit() {
            debug!("Rate limited {} in room {}", session.limiter().identity(), self.room_id);
            session.send_frame(&ServerFrame::error(&ChatError::RateLimited));
            return;
        }

        let length = text.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            session.send_frame(&ServerFrame::error(&ChatError::MessageTooLong(length)));
            return;
        }

        let name = session.name().unwrap_or_default().to_string();
        let message = ChatMessage {
            name,
            message: text,
            timestamp: self.clock.next(Utc::now().timestamp_millis()),
        };
        let payload = ServerFrame::Chat(message.clone()).to_json();

        // persist first: anything a client has seen is in the history
        if let Err(e) = self.storage.put(&message.storage_key(), &payload).await {
            error!("Room {} failed to persist message: {}", self.room_id, e);
            self.reply(id, &ServerFrame::error(&e));
            return;
        }

        self.broadcast_payload(payload);
    }

    fn on_close(&mut self, id: SessionId) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.mark_quit();
        self.departed.push(session.connection_id);
        info!(
            "Session {} left room {} ({} connected)",
            id,
            self.room_id,
            self.sessions.len()
        );

        if let Some(name) = session.name() {
            self.broadcast(&ServerFrame::quit(name));
        }
    }

    fn broadcast(&mut self, frame: &ServerFrame) {
        self.broadcast_payload(frame.to_json());
    }

    /// Deliver to named sessions and queue for unnamed ones. Sessions whose
    /// send fails are removed after the pass, and their quit notices go out
    /// as follow-up broadcasts.
    fn broadcast_payload(&mut self, payload: String) {
        let mut pending = VecDeque::from([payload]);

        while let Some(payload) = pending.pop_front() {
            let mut quitters = Vec::new();
            for session in self.sessions.values_mut() {
                if session.is_named() {
                    if !session.send(&payload) {
                        session.mark_quit();
                        quitters.push(session.id);
                    }
                } else {
                    session.enqueue(payload.clone());
                }
            }

            for id in quitters {
                if let Some(quitter) = self.sessions.remove(&id) {
                    self.departed.push(quitter.connection_id);
                    if let Some(name) = quitter.name() {
                        pending.push_back(ServerFrame::quit(name).to_json());
                    }
                }
            }
        }
    }

    fn reply(&self, id: SessionId, frame: &ServerFrame) {
        if let Some(session) = self.sessions.get(&id) {
            session.send_frame(frame);
        }
    }

    async fn forget_departed(&mut self) {
        for connection_id in std::mem::take(&mut self.departed) {
            if let Err(e) = self.storage.delete_attachment(&connection_id).await {
                warn!("Room {} failed to drop attachment: {}", self.room_id, e);
            }
        }
    }

    fn stats(&self) -> RoomStats {
        RoomStats {
            sessions: self.sessions.len(),
            named: self.sessions.values().filter(|s| s.is_named()).count(),
            last_timestamp: self.clock.last(),
        }
    }
}

/// Maps room ids to room actors, spawning them on first use
#[derive(Clone)]
pub struct RoomDirectory {
    rooms: Arc<Mutex<HashMap<RoomId, RoomHandle>>>,
    storage: Arc<dyn StorageProvider>,
    limiters: RateLimiterDirectory,
    idle_timeout: Duration,
}

impl RoomDirectory {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        limiters: RateLimiterDirectory,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            storage,
            limiters,
            idle_timeout,
        }
    }

    /// Resolve the live actor for `room_id`, replacing a retired one
    pub async fn get(&self, room_id: &RoomId) -> Result<RoomHandle> {
        if let Some(handle) = self.live_handle(room_id).await {
            return Ok(handle);
        }

        // opening may touch the disk; other rooms must not wait on it
        let storage = self.storage.open(room_id).await?;

        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_stale() {
                // another connection spawned it while we were opening
                return Ok(handle.clone());
            }
        }
        rooms.retain(|_, handle| !handle.is_stale());
        let handle = RoomActor::spawn(
            room_id.clone(),
            storage,
            self.limiters.clone(),
            self.idle_timeout,
        );
        rooms.insert(room_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn live_handle(&self, room_id: &RoomId) -> Option<RoomHandle> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room_id)
            .filter(|handle| !handle.is_stale())
            .cloned()
    }

    /// Register a connection with a room, retrying once against a fresh actor
    /// if the resolved one retired before it could answer
    pub async fn connect(
        &self,
        room_id: &RoomId,
        sender: mpsc::UnboundedSender<WsMessage>,
        identity: &str,
    ) -> Result<(RoomHandle, SessionId)> {
        let handle = self.get(room_id).await?;
        match handle.accept_session(sender.clone(), identity).await {
            Ok(session) => Ok((handle, session)),
            Err(ChatError::RoomUnavailable(reason)) => {
                debug!("Retrying connect to {}: {}", room_id, reason);
                let handle = self.get(room_id).await?;
                let session = handle.accept_session(sender, identity).await?;
                Ok((handle, session))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn active_rooms(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().filter(|h| !h.is_stale()).count()
    }
}
