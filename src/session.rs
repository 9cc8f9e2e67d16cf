//! Session management with TTL and cleanup.
//!
//! A session is one operator-authenticated browser identity: the target
//! URL, the captured storage state on disk, and an expiry deadline. Expired
//! sessions are reaped both eagerly on read and by a periodic sweep.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as TtlDuration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Started,
    Authenticated,
    Expired,
}

/// One audit session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub url: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub storage_state_path: PathBuf,
    pub is_authenticated: bool,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn time_remaining_minutes(&self) -> i64 {
        (self.expires_at - Utc::now()).num_minutes().max(0)
    }
}

/// Mutex-guarded session table with a cancellable expiry sweep.
pub struct SessionManager {
    settings: Arc<Settings>,
    sessions: Mutex<HashMap<String, Session>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            cleanup_task: Mutex::new(None),
        })
    }

    /// Create a session for a target URL and its artifact directory.
    pub fn create(&self, url: &str) -> std::io::Result<Session> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let session_dir = self.settings.session_dir(&session_id);
        std::fs::create_dir_all(&session_dir)?;

        let session = Session {
            session_id: session_id.clone(),
            url: url.to_string(),
            status: SessionStatus::Started,
            created_at: now,
            expires_at: now + TtlDuration::minutes(self.settings.session_ttl_minutes),
            storage_state_path: session_dir.join("storage_state.json"),
            is_authenticated: false,
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), session.clone());

        info!(session_id, url, "Created session");
        Ok(session)
    }

    /// Fetch a session, reaping it (record and artifacts) if expired.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.get(session_id).is_some_and(Session::is_expired) {
            info!(session_id, "Session has expired");
            self.remove_locked(&mut sessions, session_id);
            return None;
        }
        sessions.get(session_id).cloned()
    }

    /// Flip a live session to authenticated. No-op on expired sessions.
    pub fn mark_authenticated(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(session_id) {
            Some(session) if !session.is_expired() => {
                session.is_authenticated = true;
                session.status = SessionStatus::Authenticated;
                info!(session_id, "Session marked as authenticated");
                true
            }
            _ => false,
        }
    }

    /// Delete a session and its artifacts.
    pub fn delete(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        self.remove_locked(&mut sessions, session_id)
    }

    fn remove_locked(&self, sessions: &mut HashMap<String, Session>, session_id: &str) -> bool {
        if sessions.remove(session_id).is_none() {
            return false;
        }
        let session_dir = self.settings.session_dir(session_id);
        if session_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&session_dir) {
                error!(session_id, error = %e, "Failed to remove session directory");
            } else {
                info!(session_id, "Removed session directory");
            }
        }
        true
    }

    /// Sweep every expired session. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        let mut cleaned = 0;
        for session_id in expired {
            if self.remove_locked(&mut sessions, &session_id) {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(cleaned, "Cleaned up expired sessions");
        }
        cleaned
    }

    pub fn active_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions.values().filter(|s| !s.is_expired()).count()
    }

    /// Start the periodic expiry sweep.
    ///
    /// Holds only a weak reference so dropping the manager ends the task;
    /// `stop_cleanup_loop` cancels it explicitly on shutdown.
    pub fn start_cleanup_loop(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(manager) => {
                        manager.cleanup_expired();
                    }
                    None => break,
                }
            }
        });
        *self.cleanup_task.lock().unwrap() = Some(task);
        info!("Started session cleanup loop");
    }

    pub fn stop_cleanup_loop(&self) {
        if let Some(task) = self.cleanup_task.lock().unwrap().take() {
            task.abort();
            info!("Stopped session cleanup loop");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
