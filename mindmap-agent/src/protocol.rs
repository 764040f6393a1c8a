// Message types shared between the WebSocket layer, the app orchestrator,
// and the LLM client.
//
// Client and server messages are JSON objects tagged by a `"type"` field.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::{Idea, SessionStatus};

/// Identifier assigned to each accepted WebSocket connection.
pub type ConnId = u64;

// ---------------------------------------------------------------------------
// LLM provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmProvider {
    Anthropic,
    #[serde(rename = "OpenAI")]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub const ALL: [LlmProvider; 3] = [LlmProvider::Anthropic, LlmProvider::OpenAi, LlmProvider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAi => "OpenAI",
            LlmProvider::Gemini => "Gemini",
        }
    }

    /// Model used when the config does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-6",
            LlmProvider::OpenAi => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(format!("unknown LLM provider `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages sent by a UI client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConfigureKey { provider: LlmProvider, api_key: String },
    CreateSession { topic: String },
    JoinSession { code: String },
    SetName { name: String },
    SubmitIdea { text: String },
    GenerateMindmap,
    EndSession,
    Leave,
    GetMindmap { code: String },
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Events fanned out to every member of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    #[serde(rename = "idea")]
    IdeaSubmitted { text: String, author: String },
    #[serde(rename = "participants")]
    ParticipantCount { count: usize },
    #[serde(rename = "status")]
    StatusChanged { status: SessionStatus, text: String },
    MindmapReady { session_id: String, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Participant,
}

/// Direct replies to a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    KeyStatus {
        ok: bool,
        message: String,
    },
    SessionCreated {
        session_id: String,
        topic: String,
        moderator_token: String,
    },
    NamePrompt {
        session_id: String,
        topic: String,
        role: Role,
    },
    Room {
        session_id: String,
        topic: String,
        status: SessionStatus,
        ideas: Vec<Idea>,
        participant_count: usize,
        is_moderator: bool,
    },
    Mindmap {
        session_id: String,
        topic: String,
        path: PathBuf,
        markdown: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Anything written to a client socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Reply(ServerMessage),
    Event(SessionEvent),
}

impl From<ServerMessage> for Outbound {
    fn from(msg: ServerMessage) -> Self {
        Outbound::Reply(msg)
    }
}

impl From<SessionEvent> for Outbound {
    fn from(event: SessionEvent) -> Self {
        Outbound::Event(event)
    }
}

// ---------------------------------------------------------------------------
// Internal events
// ---------------------------------------------------------------------------

/// Streaming output of an LLM request. Every event carries the generation
/// counter of the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    Token {
        text: String,
        generation: u64,
    },
    Complete {
        full_text: String,
        input_tokens: u32,
        output_tokens: u32,
        stop_reason: Option<String>,
        generation: u64,
    },
    Error {
        message: String,
        generation: u64,
    },
}

impl LlmEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LlmEvent::Token { generation, .. }
            | LlmEvent::Complete { generation, .. }
            | LlmEvent::Error { generation, .. } => *generation,
        }
    }
}

/// Commands delivered to the app loop from outside the WebSocket path.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Result of an asynchronous API key check started by `configure_key`.
    KeyValidated {
        conn_id: ConnId,
        provider: LlmProvider,
        api_key: String,
        result: Result<(), String>,
    },
    /// A mindmap page finished writing (or failed to) for a generation.
    MindmapWritten {
        generation: u64,
        result: Result<PathBuf, String>,
    },
    /// A reply prepared off the loop, delivered to one connection.
    Reply {
        conn_id: ConnId,
        message: ServerMessage,
    },
    Shutdown,
}
