//! Per-user session state and the session authority

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// One exchange in the question-answering chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Typed state carried between requests of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub username: String,
    /// Most recently uploaded file name
    pub file_name: Option<String>,
    /// Every file submitted in this session, oldest first
    pub file_history: Vec<String>,
    pub last_batch_id: Option<Uuid>,
    /// Whether an index has been built or loaded for this session
    pub index_loaded: bool,
    pub index_dir: Option<PathBuf>,
    pub chat_history: Vec<ChatTurn>,
    pub expander_open: bool,
    pub parse_requested: bool,
}

impl SessionContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            file_name: None,
            file_history: Vec::new(),
            last_batch_id: None,
            index_loaded: false,
            index_dir: None,
            chat_history: Vec::new(),
            expander_open: false,
            parse_requested: false,
        }
    }

    /// Restore every field to its default, keeping the user
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.username));
    }

    /// Record a batch started from this session
    pub fn record_batch(&mut self, batch_id: Uuid, files: &[String]) {
        self.last_batch_id = Some(batch_id);
        if let Some(last) = files.last() {
            self.file_name = Some(last.clone());
        }
        self.file_history.extend(files.iter().cloned());
        self.parse_requested = false;
    }
}

/// Token issued on a successful login
#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Authentication and session bookkeeping collaborator
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Check credentials and open a session
    async fn authenticate(&self, username: &str, secret: &str) -> Result<SessionToken>;

    /// Context of a live session; `Unauthorized` when unknown or expired
    async fn validate(&self, token: &str) -> Result<SessionContext>;

    /// Close a session; returns whether it existed
    async fn invalidate(&self, token: &str) -> Result<bool>;

    /// Replace the stored context of a live session
    async fn save(&self, token: &str, context: SessionContext) -> Result<()>;
}

/// Hex SHA-256 of a secret, the form stored in the credential table
pub fn secret_digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

struct LiveSession {
    context: SessionContext,
    expires_at: DateTime<Utc>,
}

/// Session authority backed by a configured credential table
pub struct InMemorySessions {
    credentials: HashMap<String, String>,
    timeout: Duration,
    sessions: DashMap<String, LiveSession>,
}

impl InMemorySessions {
    /// `credentials` maps usernames to hex SHA-256 digests of their secrets
    pub fn new(credentials: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            credentials: credentials
                .into_iter()
                .map(|(user, digest)| (user, digest.to_lowercase()))
                .collect(),
            timeout,
            sessions: DashMap::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.users.clone(),
            Duration::from_secs(config.session_timeout_secs),
        )
    }

    /// Sessions not yet expired
    pub fn active(&self) -> usize {
        let now = Utc::now();
        self.sessions.iter().filter(|s| s.expires_at > now).count()
    }

    /// Drop expired sessions; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    /// Sweep expired sessions every `interval` until the handle is aborted
    pub fn spawn_purge_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    tracing::debug!("Purged {} expired sessions", purged);
                }
            }
        })
    }

    fn expiry(&self) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::hours(8));
        Utc::now()
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl SessionAuthority for InMemorySessions {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<SessionToken> {
        let matches = self
            .credentials
            .get(username)
            .map(|digest| *digest == secret_digest(secret))
            .unwrap_or(false);

        if !matches {
            tracing::warn!("Failed login attempt for user: {}", username);
            return Err(Error::Unauthorized("invalid username or password".to_string()));
        }

        let token = Uuid::new_v4().simple().to_string();
        let expires_at = self.expiry();
        self.sessions.insert(
            token.clone(),
            LiveSession {
                context: SessionContext::new(username),
                expires_at,
            },
        );
        tracing::info!("Session opened for {}", username);

        Ok(SessionToken {
            token,
            username: username.to_string(),
            expires_at,
        })
    }

    async fn validate(&self, token: &str) -> Result<SessionContext> {
        let now = Utc::now();
        let expired = match self.sessions.get(token) {
            Some(session) if session.expires_at > now => return Ok(session.context.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(token);
            return Err(Error::Unauthorized("session expired".to_string()));
        }
        Err(Error::Unauthorized("unknown session".to_string()))
    }

    async fn invalidate(&self, token: &str) -> Result<bool> {
        let removed = self.sessions.remove(token);
        if let Some((_, session)) = &removed {
            tracing::info!("Session closed for {}", session.context.username);
        }
        Ok(removed.is_some())
    }

    async fn save(&self, token: &str, context: SessionContext) -> Result<()> {
        match self.sessions.get_mut(token) {
            Some(mut session) if session.expires_at > Utc::now() => {
                session.context = context;
                Ok(())
            }
            _ => Err(Error::Unauthorized("unknown session".to_string())),
        }
    }
}
