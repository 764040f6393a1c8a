// Application state and orchestration logic.
//
// The central event loop owns every session and every connection. It routes
// client messages, fans session events out through the broadcaster, and
// drives mindmap generation through the LLM client. Nothing here is shared
// behind a lock; other tasks talk to the loop only through channels.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{spawn_forwarder, Broadcaster};
use crate::config::Config;
use crate::llm::analysis::{parse_analysis, Analysis, AnalysisError};
use crate::llm::client::{self, LlmClient, ProviderClient};
use crate::llm::prompt;
use crate::mindmap;
use crate::protocol::{
    AppCommand, ClientMessage, ConnId, LlmEvent, LlmProvider, Outbound, Role, ServerMessage,
    SessionEvent,
};
use crate::session::{Session, SessionError, SessionStatus, SessionStore};
use crate::ws_server::WsEvent;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STATUS_GENERATING: &str = "Generating mindmap…";
pub const STATUS_ENDED: &str = "Session ended by moderator.";
pub const LLM_TIMEOUT_MESSAGE: &str = "LLM request timed out";

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Why a generation attempt failed. The message is shown to the room.
#[derive(Debug, Error)]
enum GenerationError {
    #[error("{0}")]
    Llm(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("{0}")]
    Render(String),
}

/// State kept for one WebSocket client.
pub struct Connection {
    pub addr: String,
    outbound: mpsc::Sender<Outbound>,
    /// Session picked in the lobby (created or joined), if any.
    pub session_id: Option<String>,
    /// Display name. Set once the client has entered the room.
    pub name: Option<String>,
    pub is_moderator: bool,
    forwarder: Option<JoinHandle<()>>,
}

impl Connection {
    fn new(addr: String, outbound: mpsc::Sender<Outbound>) -> Self {
        Connection {
            addr,
            outbound,
            session_id: None,
            name: None,
            is_moderator: false,
            forwarder: None,
        }
    }

    /// Queue a message without waiting; a client that stops reading loses
    /// messages rather than stalling the loop.
    fn send(&self, msg: impl Into<Outbound>) {
        if let Err(e) = self.outbound.try_send(msg.into()) {
            warn!("Dropping message for {}: {}", self.addr, e);
        }
    }

    /// `(session_id, name)` when the client is inside a room.
    fn room(&self) -> Option<(String, String)> {
        Some((self.session_id.clone()?, self.name.clone()?))
    }

    fn is_in_room(&self) -> bool {
        self.forwarder.is_some()
    }
}

/// An in-flight generation and the session it belongs to. `task` is the LLM
/// request, then the page write once `rendering` is set.
struct PendingGeneration {
    session_id: String,
    task: JoinHandle<()>,
    rendering: bool,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub broadcaster: Broadcaster,
    pub connections: HashMap<ConnId, Connection>,
    pub llm_client: Arc<LlmClient>,
    /// Spawned LLM tasks stream their events back through this sender.
    pub llm_tx: mpsc::Sender<LlmEvent>,
    /// Incremented for every request. Events whose generation is not
    /// pending are discarded.
    pub llm_generation: u64,
    /// Overrides the provider host for key checks and newly installed keys.
    pub llm_base_url: Option<String>,
    pending: HashMap<u64, PendingGeneration>,
    cmd_tx: mpsc::Sender<AppCommand>,
}

impl AppState {
    pub fn new(
        config: Config,
        llm_client: LlmClient,
        llm_tx: mpsc::Sender<LlmEvent>,
        cmd_tx: mpsc::Sender<AppCommand>,
    ) -> Self {
        let sessions = SessionStore::new(config.session.code_length);
        AppState {
            config,
            sessions,
            broadcaster: Broadcaster::new(),
            connections: HashMap::new(),
            llm_client: Arc::new(llm_client),
            llm_tx,
            llm_generation: 0,
            llm_base_url: None,
            pending: HashMap::new(),
            cmd_tx,
        }
    }

    pub fn with_llm_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.llm_base_url = Some(base_url.into());
        self
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.output.dir)
    }

    pub fn pending_generations(&self) -> usize {
        self.pending.len()
    }

    fn reply(&self, conn_id: ConnId, msg: impl Into<Outbound>) {
        if let Some(conn) = self.connections.get(&conn_id) {
            conn.send(msg);
        }
    }

    fn reply_error(&self, conn_id: ConnId, message: impl Into<String>) {
        self.reply(conn_id, ServerMessage::error(message));
    }

    /// Replace the LLM client with one for `provider` and `api_key`.
    pub fn install_key(&mut self, provider: LlmProvider, api_key: String) {
        if provider != self.config.llm.provider {
            self.config.llm.provider = provider;
            self.config.llm.model = None;
        }
        let mut client = ProviderClient::new(provider, api_key, self.config.model());
        if let Some(url) = &self.llm_base_url {
            client = client.with_base_url(url.clone());
        }
        info!("LLM client configured for {} ({})", provider, client.model());
        self.llm_client = Arc::new(LlmClient::Active(client));
    }

    /// Take the connection out of its room: drop the name from the
    /// participant set, stop forwarding, and tell the rest of the room.
    /// The connection stays attached to its lobby selection.
    fn exit_room(&mut self, conn_id: ConnId) {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return;
        };
        if let Some(handle) = conn.forwarder.take() {
            handle.abort();
        }
        let Some((session_id, name)) = conn.room() else {
            return;
        };
        conn.name = None;

        if let Some(count) = self.sessions.leave(&session_id, &name) {
            info!("{} left session {} ({} remaining)", name, session_id, count);
            self.broadcaster
                .publish(&session_id, SessionEvent::ParticipantCount { count });
        }
        self.broadcaster.prune();
    }

    /// Back to the lobby with no session selected.
    fn return_to_lobby(&mut self, conn_id: ConnId) {
        self.exit_room(conn_id);
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.session_id = None;
            conn.is_moderator = false;
        }
    }

    /// Spawn the LLM request for a session already moved to `Generating`.
    fn spawn_generation(&mut self, session_id: &str) {
        let Some(session) = self.sessions.get_session(session_id) else {
            return;
        };
        let session_id = session.id.clone();
        let system = prompt::system_prompt();
        let user_content = prompt::build_analysis_prompt(&session.topic, &session.ideas);
        let idea_count = session.ideas.len();

        let max_tokens = self.config.llm.max_tokens;
        let timeout = self.config.llm.timeout();
        let client = Arc::clone(&self.llm_client);
        let tx = self.llm_tx.clone();

        self.llm_generation += 1;
        let generation = self.llm_generation;

        // A provider that never answers must still release the session.
        let task = tokio::spawn(async move {
            let request =
                client.stream_message(&system, &user_content, max_tokens, tx.clone(), generation);
            let message = match tokio::time::timeout(timeout, request).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    warn!("LLM analysis task failed: {}", e);
                    e.to_string()
                }
                Err(_) => {
                    warn!("LLM request timed out after {:?} (gen: {})", timeout, generation);
                    LLM_TIMEOUT_MESSAGE.to_string()
                }
            };
            let _ = tx.send(LlmEvent::Error { message, generation }).await;
        });

        info!(
            "Started mindmap generation for {} ({} ideas, gen: {})",
            session_id, idea_count, generation
        );
        self.pending.insert(
            generation,
            PendingGeneration {
                session_id,
                task,
                rendering: false,
            },
        );
    }

    /// Write the mindmap page on the blocking pool. The result comes back as
    /// `AppCommand::MindmapWritten`.
    fn spawn_render(&mut self, generation: u64, analysis: Analysis) {
        let Some(session_id) = self.pending.get(&generation).map(|p| p.session_id.clone()) else {
            return;
        };
        let topic = self
            .sessions
            .get_session(&session_id)
            .map(|s| s.topic.clone())
            .unwrap_or_default();
        let output_dir = self.output_dir().to_path_buf();
        let cmd_tx = self.cmd_tx.clone();

        let task = tokio::task::spawn_blocking(move || {
            let result = mindmap::render_mindmap_html(&session_id, &topic, &analysis, &output_dir)
                .map_err(|e| e.to_string());
            let _ = cmd_tx.blocking_send(AppCommand::MindmapWritten { generation, result });
        });
        if let Some(pending) = self.pending.get_mut(&generation) {
            pending.task = task;
            pending.rendering = true;
        }
    }

    /// Abort background work. Called when the loop exits.
    pub fn shutdown(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
        for conn in self.connections.values_mut() {
            if let Some(handle) = conn.forwarder.take() {
                handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on three channels using `tokio::select!`:
/// 1. WebSocket events from the transport
/// 2. LLM streaming events
/// 3. Internal commands (key check results, shutdown)
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut llm_rx: mpsc::Receiver<LlmEvent>,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    // When the LLM channel closes, stop polling it so select! never spins.
    let mut llm_open = true;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(event) => handle_ws_event(&mut state, event),
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            llm_event = llm_rx.recv(), if llm_open => {
                match llm_event {
                    Some(event) => handle_llm_event(&mut state, event),
                    None => {
                        info!("LLM channel closed");
                        llm_open = false;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(AppCommand::Shutdown) => {
                        info!("Shutdown command received");
                        break;
                    }
                    Some(cmd) => handle_command(&mut state, cmd),
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    state.shutdown();
    info!("Application event loop exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// WebSocket events
// ---------------------------------------------------------------------------

pub fn handle_ws_event(state: &mut AppState, event: WsEvent) {
    match event {
        WsEvent::Connected {
            conn_id,
            addr,
            outbound,
            join_code,
        } => {
            info!("Client {} connected from {}", conn_id, addr);
            let conn = Connection::new(addr, outbound);
            if state.llm_client.is_configured() {
                conn.send(ServerMessage::KeyStatus {
                    ok: true,
                    message: "Key configured".to_string(),
                });
            }
            state.connections.insert(conn_id, conn);
            if let Some(code) = join_code {
                debug!("Client {} opened a link to session {}", conn_id, code);
                join_session(state, conn_id, &code);
            }
        }
        WsEvent::Message { conn_id, text } => {
            if !state.connections.contains_key(&conn_id) {
                warn!("Message from unknown connection {}", conn_id);
                return;
            }
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(state, conn_id, msg),
                Err(e) => {
                    warn!("Failed to parse client message: {}", e);
                    state.reply_error(conn_id, format!("Invalid message: {e}"));
                }
            }
        }
        WsEvent::Disconnected { conn_id } => {
            state.exit_room(conn_id);
            if state.connections.remove(&conn_id).is_some() {
                info!("Client {} disconnected", conn_id);
            }
        }
    }
}

fn handle_client_message(state: &mut AppState, conn_id: ConnId, msg: ClientMessage) {
    debug!("Client {} sent {:?}", conn_id, msg);
    match msg {
        ClientMessage::ConfigureKey { provider, api_key } => {
            configure_key(state, conn_id, provider, api_key)
        }
        ClientMessage::CreateSession { topic } => create_session(state, conn_id, &topic),
        ClientMessage::JoinSession { code } => join_session(state, conn_id, &code),
        ClientMessage::SetName { name } => set_name(state, conn_id, &name),
        ClientMessage::SubmitIdea { text } => submit_idea(state, conn_id, &text),
        ClientMessage::GenerateMindmap => generate_mindmap(state, conn_id),
        ClientMessage::EndSession => end_session(state, conn_id),
        ClientMessage::Leave => state.return_to_lobby(conn_id),
        ClientMessage::GetMindmap { code } => get_mindmap(state, conn_id, &code),
    }
}

fn configure_key(state: &mut AppState, conn_id: ConnId, provider: LlmProvider, api_key: String) {
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        state.reply(
            conn_id,
            ServerMessage::KeyStatus {
                ok: false,
                message: "Please enter an API key.".to_string(),
            },
        );
        return;
    }

    let cmd_tx = state.cmd_tx.clone();
    let base_url = state.llm_base_url.clone();
    tokio::spawn(async move {
        let result = match base_url {
            Some(url) => client::validate_key_at(provider, &api_key, &url).await,
            None => client::validate_key(provider, &api_key).await,
        };
        let _ = cmd_tx
            .send(AppCommand::KeyValidated {
                conn_id,
                provider,
                api_key,
                result,
            })
            .await;
    });
}

fn create_session(state: &mut AppState, conn_id: ConnId, topic: &str) {
    if !state.llm_client.is_configured() {
        state.reply_error(conn_id, "Please configure an API key first.");
        return;
    }
    let topic = topic.trim();
    if topic.is_empty() {
        state.reply_error(conn_id, "Please enter a topic.");
        return;
    }

    state.return_to_lobby(conn_id);
    let session = state.sessions.create_session(topic);
    let created = ServerMessage::SessionCreated {
        session_id: session.id.clone(),
        topic: session.topic.clone(),
        moderator_token: session.moderator_token.clone(),
    };
    let prompt = ServerMessage::NamePrompt {
        session_id: session.id.clone(),
        topic: session.topic.clone(),
        role: Role::Moderator,
    };
    let session_id = session.id.clone();
    info!("Client {} created session {} ({:?})", conn_id, session_id, topic);

    if let Some(conn) = state.connections.get_mut(&conn_id) {
        conn.session_id = Some(session_id);
        conn.is_moderator = true;
        conn.send(created);
        conn.send(prompt);
    }
}

fn join_session(state: &mut AppState, conn_id: ConnId, code: &str) {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() {
        state.reply_error(conn_id, "Please enter a session code.");
        return;
    }
    let Some(session) = state.sessions.get_session(&code) else {
        state.reply_error(conn_id, format!("Session '{code}' not found."));
        return;
    };
    if !session.is_enterable() {
        state.reply_error(conn_id, format!("Session '{code}' is no longer active."));
        return;
    }
    let prompt = ServerMessage::NamePrompt {
        session_id: session.id.clone(),
        topic: session.topic.clone(),
        role: Role::Participant,
    };

    state.return_to_lobby(conn_id);
    if let Some(conn) = state.connections.get_mut(&conn_id) {
        conn.session_id = Some(code);
        conn.is_moderator = false;
        conn.send(prompt);
    }
}

fn set_name(state: &mut AppState, conn_id: ConnId, name: &str) {
    let Some(conn) = state.connections.get(&conn_id) else {
        return;
    };
    let Some(session_id) = conn.session_id.clone() else {
        state.reply_error(conn_id, "Create or join a session first.");
        return;
    };
    if conn.is_in_room() {
        state.reply_error(conn_id, "You are already in the room.");
        return;
    }

    let name = name.trim();
    let count = match state.sessions.join(&session_id, name) {
        Ok(count) => count,
        Err(SessionError::EmptyName) => {
            state.reply_error(conn_id, "Please enter your name.");
            return;
        }
        Err(e) => {
            state.reply_error(conn_id, e.to_string());
            return;
        }
    };

    let rx = state.broadcaster.subscribe(&session_id);
    let Some(conn) = state.connections.get_mut(&conn_id) else {
        return;
    };
    conn.forwarder = Some(spawn_forwarder(rx, conn.outbound.clone()));
    conn.name = Some(name.to_string());
    let is_moderator = conn.is_moderator;

    if let Some(session) = state.sessions.get_session(&session_id) {
        state.reply(conn_id, room_snapshot(session, is_moderator));
    }
    info!("{} entered session {} ({} participants)", name, session_id, count);
    state
        .broadcaster
        .publish(&session_id, SessionEvent::ParticipantCount { count });
}

fn submit_idea(state: &mut AppState, conn_id: ConnId, text: &str) {
    let Some((session_id, name)) = state.connections.get(&conn_id).and_then(Connection::room)
    else {
        state.reply_error(conn_id, "Join a session first.");
        return;
    };

    match state.sessions.add_idea(&session_id, text, &name) {
        Ok(idea) => {
            debug!("Idea from {} in {}: {}", name, session_id, idea.text);
            state.broadcaster.publish(
                &session_id,
                SessionEvent::IdeaSubmitted {
                    text: idea.text,
                    author: idea.author,
                },
            );
        }
        Err(e) => state.reply_error(conn_id, e.to_string()),
    }
}

/// Session id of a moderator connection, or an error reply.
fn moderated_session(state: &AppState, conn_id: ConnId) -> Option<String> {
    let conn = state.connections.get(&conn_id)?;
    match (&conn.session_id, conn.is_moderator) {
        (Some(session_id), true) => Some(session_id.clone()),
        _ => {
            state.reply_error(conn_id, "Only the moderator can do that.");
            None
        }
    }
}

fn generate_mindmap(state: &mut AppState, conn_id: ConnId) {
    let Some(session_id) = moderated_session(state, conn_id) else {
        return;
    };
    let Some(session) = state.sessions.get_session(&session_id) else {
        state.reply_error(conn_id, format!("Session '{session_id}' not found."));
        return;
    };
    if session.status == SessionStatus::Active && session.ideas.is_empty() {
        state.reply_error(conn_id, "No ideas to analyse yet!");
        return;
    }
    if !state.llm_client.is_configured() {
        state.reply_error(conn_id, "No API key configured! Go back and set one.");
        return;
    }
    if let Err(e) = state.sessions.begin_generation(&session_id) {
        state.reply_error(conn_id, e.to_string());
        return;
    }

    state.broadcaster.publish(
        &session_id,
        SessionEvent::StatusChanged {
            status: SessionStatus::Generating,
            text: STATUS_GENERATING.to_string(),
        },
    );
    state.spawn_generation(&session_id);
}

fn end_session(state: &mut AppState, conn_id: ConnId) {
    let Some(session_id) = moderated_session(state, conn_id) else {
        return;
    };
    if let Err(e) = state.sessions.end_session(&session_id) {
        state.reply_error(conn_id, e.to_string());
        return;
    }
    info!("Session {} ended by moderator", session_id);
    state.broadcaster.publish(
        &session_id,
        SessionEvent::StatusChanged {
            status: SessionStatus::Ended,
            text: STATUS_ENDED.to_string(),
        },
    );
}

fn get_mindmap(state: &mut AppState, conn_id: ConnId, code: &str) {
    let code = code.trim().to_ascii_uppercase();
    let Some(session) = state.sessions.get_session(&code) else {
        state.reply_error(conn_id, format!("Session '{code}' not found."));
        return;
    };
    let Some(path) = session.mindmap_path.clone() else {
        state.reply_error(conn_id, format!("No mindmap has been generated for '{code}' yet."));
        return;
    };
    let session_id = session.id.clone();
    let topic = session.topic.clone();
    let cmd_tx = state.cmd_tx.clone();
    tokio::task::spawn_blocking(move || {
        let message = ServerMessage::Mindmap {
            session_id,
            topic,
            markdown: mindmap::read_markdown_preview(&path),
            path,
        };
        let _ = cmd_tx.blocking_send(AppCommand::Reply { conn_id, message });
    });
}

fn room_snapshot(session: &Session, is_moderator: bool) -> ServerMessage {
    ServerMessage::Room {
        session_id: session.id.clone(),
        topic: session.topic.clone(),
        status: session.status,
        ideas: session.ideas.clone(),
        participant_count: session.participant_count(),
        is_moderator,
    }
}

// ---------------------------------------------------------------------------
// LLM events
// ---------------------------------------------------------------------------

pub fn handle_llm_event(state: &mut AppState, event: LlmEvent) {
    let generation = event.generation();
    match state.pending.get(&generation) {
        Some(pending) if !pending.rendering => {}
        _ => {
            debug!("Discarding stale LLM event (gen: {})", generation);
            return;
        }
    }

    match event {
        LlmEvent::Token { .. } => {}
        LlmEvent::Complete {
            full_text,
            input_tokens,
            output_tokens,
            stop_reason,
            ..
        } => {
            info!(
                "Analysis complete ({} in / {} out tokens, stop: {:?}, gen: {})",
                input_tokens, output_tokens, stop_reason, generation
            );
            match parse_reply(&full_text, stop_reason.as_deref()) {
                Ok(analysis) => state.spawn_render(generation, analysis),
                Err(e) => finish_generation(state, generation, Err(e.into())),
            }
        }
        LlmEvent::Error { message, .. } => {
            finish_generation(state, generation, Err(GenerationError::Llm(message)))
        }
    }
}

/// Settle a pending generation: `Complete` with the written page, or back
/// to `Active` with the error shown to the room.
fn finish_generation(
    state: &mut AppState,
    generation: u64,
    outcome: Result<PathBuf, GenerationError>,
) {
    let Some(pending) = state.pending.remove(&generation) else {
        debug!("No pending generation {}", generation);
        return;
    };
    let session_id = pending.session_id;
    match outcome {
        Ok(path) => {
            if let Err(e) = state.sessions.complete_generation(&session_id, path.clone()) {
                warn!("Could not complete session {}: {}", session_id, e);
                return;
            }
            info!("Mindmap for {} ready at {}", session_id, path.display());
            let ready = SessionEvent::MindmapReady {
                session_id: session_id.clone(),
                path,
            };
            state.broadcaster.publish(&session_id, ready);
        }
        Err(e) => {
            warn!("Mindmap generation for {} failed: {}", session_id, e);
            if let Err(err) = state.sessions.fail_generation(&session_id) {
                warn!("Could not reset session {}: {}", session_id, err);
                return;
            }
            state.broadcaster.publish(
                &session_id,
                SessionEvent::StatusChanged {
                    status: SessionStatus::Active,
                    text: format!("Error: {e}"),
                },
            );
        }
    }
}

fn parse_reply(full_text: &str, stop_reason: Option<&str>) -> Result<Analysis, AnalysisError> {
    if hit_token_limit(stop_reason) {
        return Err(AnalysisError::Truncated);
    }
    parse_analysis(full_text)
}

/// Stop reasons meaning the reply was cut off, across providers.
fn hit_token_limit(stop_reason: Option<&str>) -> bool {
    matches!(stop_reason, Some("max_tokens" | "length" | "MAX_TOKENS"))
}

// ---------------------------------------------------------------------------
// Internal commands
// ---------------------------------------------------------------------------

pub fn handle_command(state: &mut AppState, cmd: AppCommand) {
    match cmd {
        AppCommand::KeyValidated {
            conn_id,
            provider,
            api_key,
            result,
        } => {
            let reply = match result {
                Ok(()) => {
                    state.install_key(provider, api_key);
                    ServerMessage::KeyStatus {
                        ok: true,
                        message: format!("Key valid ({provider})"),
                    }
                }
                Err(e) => {
                    info!("Rejected {} key: {}", provider, e);
                    ServerMessage::KeyStatus {
                        ok: false,
                        message: format!("Invalid key: {e}"),
                    }
                }
            };
            state.reply(conn_id, reply);
        }
        AppCommand::MindmapWritten { generation, result } => {
            finish_generation(state, generation, result.map_err(GenerationError::Render))
        }
        AppCommand::Reply { conn_id, message } => state.reply(conn_id, message),
        AppCommand::Shutdown => {
            // Handled in the main loop
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
