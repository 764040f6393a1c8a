// Brainstorming session model and the in-memory session store.
//
// The store is owned by the application event loop, so no locking is needed.
// Sessions live for the lifetime of the process and are never persisted.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alphabet used for session codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default number of characters in a session code.
pub const DEFAULT_CODE_LENGTH: usize = 6;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session '{code}' not found")]
    NotFound { code: String },

    #[error("session '{code}' is not accepting ideas (status: {status})")]
    NotAcceptingIdeas { code: String, status: SessionStatus },

    #[error("session '{code}' is no longer active")]
    NotJoinable { code: String },

    #[error("cannot move session from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("no ideas to analyse yet")]
    NoIdeas,

    #[error("idea text must not be empty")]
    EmptyIdea,

    #[error("display name must not be empty")]
    EmptyName,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Generating,
    Complete,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Generating => "generating",
            SessionStatus::Complete => "complete",
            SessionStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single submitted idea. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl Idea {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Idea {
            text: text.into(),
            author: author.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub topic: String,
    /// Opaque secret handed to the creator. Not checked anywhere.
    pub moderator_token: String,
    pub status: SessionStatus,
    pub ideas: Vec<Idea>,
    pub participants: BTreeSet<String>,
    pub mindmap_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String, topic: String, moderator_token: String) -> Self {
        Session {
            id,
            topic,
            moderator_token,
            status: SessionStatus::Active,
            ideas: Vec::new(),
            participants: BTreeSet::new(),
            mindmap_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Whether a participant may enter this session from the lobby.
    pub fn is_enterable(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Active | SessionStatus::Complete
        )
    }

    fn transition(&mut self, from: &[SessionStatus], to: SessionStatus) -> Result<(), SessionError> {
        if !from.contains(&self.status) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// In-memory mapping from session code to session record.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    code_length: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

impl SessionStore {
    pub fn new(code_length: usize) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            code_length,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a new `Active` session under a fresh, unique code.
    pub fn create_session(&mut self, topic: &str) -> &Session {
        let mut id = generate_code(self.code_length);
        while self.sessions.contains_key(&id) {
            id = generate_code(self.code_length);
        }
        let session = Session::new(id.clone(), topic.trim().to_string(), generate_token());
        self.sessions.entry(id).or_insert(session)
    }

    /// Look up a session. Codes are matched case-insensitively.
    pub fn get_session(&self, code: &str) -> Option<&Session> {
        self.sessions.get(&normalize_code(code))
    }

    pub fn get_session_mut(&mut self, code: &str) -> Option<&mut Session> {
        self.sessions.get_mut(&normalize_code(code))
    }

    fn require_mut(&mut self, code: &str) -> Result<&mut Session, SessionError> {
        self.sessions
            .get_mut(&normalize_code(code))
            .ok_or_else(|| SessionError::NotFound {
                code: normalize_code(code),
            })
    }

    /// Append an idea. Only permitted while the session is `Active`.
    pub fn add_idea(&mut self, code: &str, text: &str, author: &str) -> Result<Idea, SessionError> {
        let session = self.require_mut(code)?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::NotAcceptingIdeas {
                code: session.id.clone(),
                status: session.status,
            });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyIdea);
        }
        let idea = Idea::new(text, author);
        session.ideas.push(idea.clone());
        Ok(idea)
    }

    /// Add a display name to the participant set and return the new count.
    pub fn join(&mut self, code: &str, name: &str) -> Result<usize, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        let session = self.require_mut(code)?;
        if session.status == SessionStatus::Ended {
            return Err(SessionError::NotJoinable {
                code: session.id.clone(),
            });
        }
        session.participants.insert(name.to_string());
        Ok(session.participants.len())
    }

    /// Remove a display name. Returns the new count, or `None` if the
    /// session does not exist.
    pub fn leave(&mut self, code: &str, name: &str) -> Option<usize> {
        let session = self.get_session_mut(code)?;
        session.participants.remove(name);
        Some(session.participants.len())
    }

    /// `Active -> Generating`. Requires at least one idea.
    pub fn begin_generation(&mut self, code: &str) -> Result<(), SessionError> {
        let session = self.require_mut(code)?;
        if session.status == SessionStatus::Active && session.ideas.is_empty() {
            return Err(SessionError::NoIdeas);
        }
        session.transition(&[SessionStatus::Active], SessionStatus::Generating)
    }

    /// `Generating -> Complete`, recording where the mindmap was written.
    pub fn complete_generation(&mut self, code: &str, path: PathBuf) -> Result<(), SessionError> {
        let session = self.require_mut(code)?;
        session.transition(&[SessionStatus::Generating], SessionStatus::Complete)?;
        session.mindmap_path = Some(path);
        Ok(())
    }

    /// `Generating -> Active`, after a failed generation.
    pub fn fail_generation(&mut self, code: &str) -> Result<(), SessionError> {
        self.require_mut(code)?
            .transition(&[SessionStatus::Generating], SessionStatus::Active)
    }

    /// `Active | Complete -> Ended`.
    pub fn end_session(&mut self, code: &str) -> Result<(), SessionError> {
        self.require_mut(code)?.transition(
            &[SessionStatus::Active, SessionStatus::Complete],
            SessionStatus::Ended,
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Random uppercase alphanumeric code.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// 16 random bytes, url-safe base64 without padding.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
