/// Registry of live terminal sessions
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{Instrument, Span, info, warn};

use crate::config::RelayConfig;
use crate::pty::{ProcessExit, PtyFactory};
use crate::service::{PtySession, SessionError, SessionOptions};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new session was spawned and registered
    Created { id: String },
    /// The session's command exited and the session was removed
    Exited { id: String, exit: Option<ProcessExit> },
}

/// Maps session ids to running sessions; at most one live session per id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<PtySession>>>,
    factory: Arc<dyn PtyFactory>,
    config: Arc<RelayConfig>,
    events: broadcast::Sender<SessionEvent>,
    span: Span,
}

impl SessionRegistry {
    /// Create an empty registry spawning sessions through `factory`.
    /// Sessions log under `span`.
    pub fn new(factory: Arc<dyn PtyFactory>, config: Arc<RelayConfig>, span: Span) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            config,
            events,
            span,
        }
    }

    /// Spawn a new session running `command args`. Does not register it.
    pub async fn create(
        &self,
        id: &str,
        command: &str,
        args: &[String],
    ) -> Result<Arc<PtySession>, SessionError> {
        let pty_config = self.config.pty_config(command, args);
        let options = SessionOptions {
            refresh_delay: self.config.refresh_delay(),
            inherit_host_size: self.config.terminal.inherit_host_size,
        };
        PtySession::start(id, self.factory.as_ref(), &pty_config, options, &self.span).await
    }

    /// Register `session` under `id` unless that id is already taken.
    ///
    /// A registered session is deregistered again once its command exits.
    pub async fn add(
        self: &Arc<Self>,
        id: &str,
        session: Arc<PtySession>,
    ) -> Result<(), SessionError> {
        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(id) {
                warn!(parent: &self.span, "Can not add session {}: already exists", id);
                return Err(SessionError::DuplicateSession(id.to_string()));
            }
            sessions.insert(id.to_string(), session.clone());
        }
        self.watch_exit(session);
        let _ = self.events.send(SessionEvent::Created { id: id.to_string() });
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<PtySession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove `session` if its id still maps to it. Returns whether anything was removed.
    pub async fn remove(&self, session: &PtySession) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session.id()) {
            Some(current) if std::ptr::eq(current.as_ref(), session) => {
                sessions.remove(session.id());
                info!(parent: &self.span, "Removed session {}", session.id());
                true
            }
            _ => false,
        }
    }

    /// Ids of every registered session, sorted. May be stale as soon as it returns.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Return the live session for `id`, spawning the configured command if there is
    /// none. The flag tells whether this call created it.
    ///
    /// When two callers race for the same new id, the loser's freshly spawned session
    /// is stopped and the winner's is returned.
    pub async fn get_or_create(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<(Arc<PtySession>, bool), SessionError> {
        if let Some(session) = self.get(id).await {
            return Ok((session, false));
        }

        let command = &self.config.command;
        let session = self.create(id, &command.name, &command.args).await?;
        match self.add(id, session.clone()).await {
            Ok(()) => Ok((session, true)),
            Err(SessionError::DuplicateSession(_)) => {
                session.stop().await;
                match self.get(id).await {
                    Some(existing) => Ok((existing, false)),
                    None => Err(SessionError::DuplicateSession(id.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Deregister `session` and close its viewers once its command exits.
    fn watch_exit(self: &Arc<Self>, session: Arc<PtySession>) {
        let registry = Arc::clone(self);
        let span = session.span().clone();
        tokio::spawn(
            async move {
                let exit = match session.wait().await {
                    Ok(exit) => {
                        info!("Session {} stopped: {}", session.id(), exit);
                        Some(exit)
                    }
                    Err(e) => {
                        warn!("Session {} wait failed: {}", session.id(), e);
                        None
                    }
                };
                registry.remove(&session).await;
                session.close_connections().await;
                let _ = registry.events.send(SessionEvent::Exited {
                    id: session.id().to_string(),
                    exit,
                });
            }
            .instrument(span),
        );
    }

    /// Stop every session and empty the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<PtySession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        info!(parent: &self.span, "Stopping {} session(s)", sessions.len());
        for session in sessions {
            session.stop().await;
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
