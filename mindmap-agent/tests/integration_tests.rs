// Integration tests for the mindmap agent.
//
// These tests exercise the full system end-to-end through the library
// crate's public API: a real WebSocket server on loopback, the app event
// loop, and a mock LLM provider speaking HTTP/SSE over a raw TcpListener.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mindmap_agent::app::{self, AppState};
use mindmap_agent::config::{self, *};
use mindmap_agent::llm::client::{LlmClient, ProviderClient};
use mindmap_agent::protocol::{AppCommand, LlmProvider};
use mindmap_agent::ws_server;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ANALYSIS: &str = r#"{
  "summary": "The team wants lighter rituals.",
  "categories": [
    {
      "name": "Demos",
      "description": "Showing work",
      "ideas": [{"text": "Weekly demo day", "authors": ["bob"], "original_count": 1}]
    },
    {
      "name": "Support",
      "ideas": [{"text": "Rotate on-call fairly", "authors": ["mod"], "note": "Merged 2 ideas"}]
    }
  ],
  "dependencies": [{"from": "Weekly demo day", "to": "Rotate on-call fairly"}],
  "uncategorised": []
}"#;

// ===========================================================================
// Test helpers
// ===========================================================================

fn project_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    if cwd.join("defaults").exists() {
        cwd
    } else if cwd.join("mindmap-agent/defaults").exists() {
        cwd.join("mindmap-agent")
    } else {
        panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
    }
}

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mindmap_it_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_config(output_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 8000,
        },
        session: SessionConfig { code_length: 6 },
        llm: LlmConfig {
            provider: LlmProvider::Anthropic,
            model: None,
            max_tokens: 4096,
            timeout_secs: 120,
        },
        output: OutputConfig {
            dir: output_dir.to_string_lossy().into_owned(),
        },
        credentials: CredentialsConfig::default(),
    }
}

/// Read one HTTP request (headers plus Content-Length body) and return the
/// request line and headers.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return head;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Mock provider: answers GET (key checks) with `get_response` and POST
/// (streaming requests) with `post_response`, one request per connection.
async fn mock_provider(get_response: String, post_response: String) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let get_response = get_response.clone();
            let post_response = post_response.clone();
            tokio::spawn(async move {
                let head = read_request(&mut socket).await;
                let response = if head.starts_with("GET") {
                    get_response
                } else {
                    post_response
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            });
        }
    });
    (format!("http://{addr}"), handle)
}

fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Anthropic-style SSE stream delivering `text` as one delta.
fn anthropic_stream(text: &str) -> String {
    let delta = json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": text}
    });
    format!(
        "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
\r\n\
event: message_start\r\n\
data: {{\"type\":\"message_start\",\"message\":{{\"id\":\"msg_1\",\"usage\":{{\"input_tokens\":42}}}}}}\r\n\
\r\n\
event: content_block_delta\r\n\
data: {delta}\r\n\
\r\n\
event: message_delta\r\n\
data: {{\"type\":\"message_delta\",\"delta\":{{\"stop_reason\":\"end_turn\"}},\"usage\":{{\"output_tokens\":99}}}}\r\n\
\r\n\
event: message_stop\r\n\
data: {{\"type\":\"message_stop\"}}\r\n\
\r\n"
    )
}

struct Server {
    url: String,
    cmd_tx: mpsc::Sender<AppCommand>,
    ws_handle: JoinHandle<()>,
    app_handle: JoinHandle<anyhow::Result<()>>,
}

impl Server {
    async fn shutdown(self) {
        let _ = self.cmd_tx.send(AppCommand::Shutdown).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.app_handle).await;
        self.ws_handle.abort();
    }
}

/// Start the WebSocket server and app loop on an ephemeral port.
async fn start_server(
    output_dir: &Path,
    client: LlmClient,
    llm_base_url: Option<String>,
) -> Server {
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (llm_tx, llm_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let mut state = AppState::new(test_config(output_dir), client, llm_tx, cmd_tx.clone());
    if let Some(url) = llm_base_url {
        state = state.with_llm_base_url(url);
    }

    let listener = ws_server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ws_handle = tokio::spawn(async move {
        let _ = ws_server::run(listener, ws_tx).await;
    });
    let app_handle = tokio::spawn(app::run(ws_rx, llm_rx, cmd_rx, state));

    Server {
        url: format!("ws://{addr}"),
        cmd_tx,
        ws_handle,
        app_handle,
    }
}

fn mock_client(base_url: &str) -> LlmClient {
    LlmClient::Active(
        ProviderClient::new(LlmProvider::Anthropic, "sk-test".into(), "m".into())
            .with_base_url(base_url),
    )
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, msg: Value) {
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

/// Next JSON text frame from the server.
async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("server closed the connection")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn recv_type(ws: &mut Client, expected: &str) -> Value {
    let msg = recv(ws).await;
    assert_eq!(msg["type"], expected, "unexpected message: {msg}");
    msg
}

/// Create a session as moderator "mod" and enter the room. Returns the code.
async fn moderator_enters(ws: &mut Client, topic: &str) -> String {
    send(ws, json!({"type": "create_session", "topic": topic})).await;
    let created = recv_type(ws, "session_created").await;
    let code = created["session_id"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let prompt = recv_type(ws, "name_prompt").await;
    assert_eq!(prompt["role"], "moderator");

    send(ws, json!({"type": "set_name", "name": "mod"})).await;
    let room = recv_type(ws, "room").await;
    assert_eq!(room["is_moderator"], true);
    assert_eq!(room["status"], "active");
    assert_eq!(recv_type(ws, "participants").await["count"], 1);
    code
}

async fn participant_enters(ws: &mut Client, code: &str, name: &str) -> Value {
    send(ws, json!({"type": "join_session", "code": code.to_lowercase()})).await;
    let prompt = recv_type(ws, "name_prompt").await;
    assert_eq!(prompt["role"], "participant");
    send(ws, json!({"type": "set_name", "name": name})).await;
    recv_type(ws, "room").await
}

// ===========================================================================
// End-to-end over WebSocket
// ===========================================================================

#[tokio::test]
async fn brainstorm_to_mindmap_over_websocket() {
    let output = test_dir("e2e");
    let (llm_url, llm_handle) = mock_provider(
        json_response("200 OK", "{}"),
        anthropic_stream(ANALYSIS),
    )
    .await;
    let server = start_server(&output, mock_client(&llm_url), None).await;

    let mut moderator = connect(&server.url).await;
    let status = recv_type(&mut moderator, "key_status").await;
    assert_eq!(status["ok"], true);
    let code = moderator_enters(&mut moderator, "Team rituals").await;

    let mut bob = connect(&server.url).await;
    recv_type(&mut bob, "key_status").await;
    let room = participant_enters(&mut bob, &code, "bob").await;
    assert_eq!(room["participant_count"], 2);
    assert_eq!(room["ideas"], json!([]));
    assert_eq!(recv_type(&mut bob, "participants").await["count"], 2);
    assert_eq!(recv_type(&mut moderator, "participants").await["count"], 2);

    send(&mut bob, json!({"type": "submit_idea", "text": "Weekly demo day"})).await;
    for ws in [&mut moderator, &mut bob] {
        let idea = recv_type(ws, "idea").await;
        assert_eq!(idea["text"], "Weekly demo day");
        assert_eq!(idea["author"], "bob");
    }
    send(&mut moderator, json!({"type": "submit_idea", "text": "Rotate on-call fairly"})).await;
    for ws in [&mut moderator, &mut bob] {
        assert_eq!(recv_type(ws, "idea").await["author"], "mod");
    }

    send(&mut moderator, json!({"type": "generate_mindmap"})).await;
    for ws in [&mut moderator, &mut bob] {
        let status = recv_type(ws, "status").await;
        assert_eq!(status["status"], "generating");
        assert_eq!(status["text"], app::STATUS_GENERATING);
        let ready = recv_type(ws, "mindmap_ready").await;
        assert_eq!(ready["session_id"], code.as_str());
    }

    let html_path = output.join(format!("{code}.html"));
    let html = std::fs::read_to_string(&html_path).unwrap();
    assert!(html.contains("<title>Mindmap: Team rituals</title>"));
    assert!(html.contains("The team wants lighter rituals."));

    send(&mut bob, json!({"type": "get_mindmap", "code": code})).await;
    let mindmap = recv_type(&mut bob, "mindmap").await;
    assert_eq!(mindmap["topic"], "Team rituals");
    let markdown = mindmap["markdown"].as_str().unwrap();
    assert!(markdown.starts_with("# Team rituals"));
    assert!(markdown.contains("## Demos\n  - *Showing work*\n  - Weekly demo day\n    - by: bob"));
    assert!(markdown.contains("    - *Merged 2 ideas*"));
    assert!(markdown.contains("  - Weekly demo day \u{2192} Rotate on-call fairly"));

    // Completed sessions can still be entered from the lobby.
    let mut carol = connect(&server.url).await;
    recv_type(&mut carol, "key_status").await;
    let room = participant_enters(&mut carol, &code, "carol").await;
    assert_eq!(room["status"], "complete");
    assert_eq!(room["ideas"].as_array().unwrap().len(), 2);

    server.shutdown().await;
    llm_handle.abort();
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn provider_error_returns_session_to_active() {
    let output = test_dir("provider_error");
    let (llm_url, llm_handle) = mock_provider(
        json_response("200 OK", "{}"),
        json_response(
            "500 Internal Server Error",
            r#"{"type":"error","error":{"type":"api_error","message":"Overloaded"}}"#,
        ),
    )
    .await;
    let server = start_server(&output, mock_client(&llm_url), None).await;

    let mut moderator = connect(&server.url).await;
    recv_type(&mut moderator, "key_status").await;
    moderator_enters(&mut moderator, "Retro").await;

    send(&mut moderator, json!({"type": "submit_idea", "text": "More snacks"})).await;
    recv_type(&mut moderator, "idea").await;
    send(&mut moderator, json!({"type": "generate_mindmap"})).await;
    assert_eq!(recv_type(&mut moderator, "status").await["status"], "generating");

    let failed = recv_type(&mut moderator, "status").await;
    assert_eq!(failed["status"], "active");
    assert!(failed["text"].as_str().unwrap().starts_with("Error: "), "{failed}");

    // Ideas are accepted again after a failed generation.
    send(&mut moderator, json!({"type": "submit_idea", "text": "Fewer meetings"})).await;
    assert_eq!(recv_type(&mut moderator, "idea").await["text"], "Fewer meetings");

    server.shutdown().await;
    llm_handle.abort();
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn key_must_be_configured_before_creating_sessions() {
    let output = test_dir("configure_key");
    let (llm_url, llm_handle) = mock_provider(
        json_response("200 OK", r#"{"data":[]}"#),
        anthropic_stream(ANALYSIS),
    )
    .await;
    let server = start_server(&output, LlmClient::Disabled, Some(llm_url)).await;

    let mut ws = connect(&server.url).await;
    send(&mut ws, json!({"type": "create_session", "topic": "Ideas"})).await;
    assert_eq!(
        recv_type(&mut ws, "error").await["message"],
        "Please configure an API key first."
    );

    send(
        &mut ws,
        json!({"type": "configure_key", "provider": "Anthropic", "api_key": "sk-ant-test"}),
    )
    .await;
    let status = recv_type(&mut ws, "key_status").await;
    assert_eq!(status["ok"], true);
    assert_eq!(status["message"], "Key valid (Anthropic)");

    moderator_enters(&mut ws, "Ideas").await;

    server.shutdown().await;
    llm_handle.abort();
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn rejected_key_reports_provider_message() {
    let output = test_dir("rejected_key");
    let (llm_url, llm_handle) = mock_provider(
        json_response(
            "401 Unauthorized",
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        ),
        String::new(),
    )
    .await;
    let server = start_server(&output, LlmClient::Disabled, Some(llm_url)).await;

    let mut ws = connect(&server.url).await;
    send(
        &mut ws,
        json!({"type": "configure_key", "provider": "Anthropic", "api_key": "sk-wrong"}),
    )
    .await;
    let status = recv_type(&mut ws, "key_status").await;
    assert_eq!(status["ok"], false);
    assert_eq!(status["message"], "Invalid key: invalid x-api-key");

    send(&mut ws, json!({"type": "create_session", "topic": "Ideas"})).await;
    recv_type(&mut ws, "error").await;

    server.shutdown().await;
    llm_handle.abort();
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn disconnect_updates_participant_count() {
    let output = test_dir("disconnect");
    let server = start_server(&output, mock_client("http://127.0.0.1:9"), None).await;

    let mut moderator = connect(&server.url).await;
    recv_type(&mut moderator, "key_status").await;
    let code = moderator_enters(&mut moderator, "Offsite").await;

    let mut bob = connect(&server.url).await;
    recv_type(&mut bob, "key_status").await;
    participant_enters(&mut bob, &code, "bob").await;
    assert_eq!(recv_type(&mut moderator, "participants").await["count"], 2);

    bob.close(None).await.unwrap();
    drop(bob);
    assert_eq!(recv_type(&mut moderator, "participants").await["count"], 1);

    server.shutdown().await;
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn session_link_prompts_for_name() {
    let output = test_dir("session_link");
    let server = start_server(&output, mock_client("http://127.0.0.1:9"), None).await;

    let mut moderator = connect(&server.url).await;
    recv_type(&mut moderator, "key_status").await;
    let code = moderator_enters(&mut moderator, "Offsite").await;

    let mut dana = connect(&format!("{}/session/{}", server.url, code.to_lowercase())).await;
    recv_type(&mut dana, "key_status").await;
    let prompt = recv_type(&mut dana, "name_prompt").await;
    assert_eq!(prompt["session_id"], code.as_str());
    assert_eq!(prompt["topic"], "Offsite");
    assert_eq!(prompt["role"], "participant");

    send(&mut dana, json!({"type": "set_name", "name": "dana"})).await;
    assert_eq!(recv_type(&mut dana, "room").await["participant_count"], 2);

    let mut lost = connect(&format!("{}/session/NOPE42", server.url)).await;
    recv_type(&mut lost, "key_status").await;
    assert_eq!(recv_type(&mut lost, "error").await["message"], "Session 'NOPE42' not found.");

    server.shutdown().await;
    let _ = std::fs::remove_dir_all(&output);
}

#[tokio::test]
async fn unknown_session_and_bad_json_get_errors() {
    let output = test_dir("errors");
    let server = start_server(&output, LlmClient::Disabled, None).await;

    let mut ws = connect(&server.url).await;
    send(&mut ws, json!({"type": "join_session", "code": "nope42"})).await;
    assert_eq!(recv_type(&mut ws, "error").await["message"], "Session 'NOPE42' not found.");

    ws.send(Message::Text("{\"type\":\"dance\"}".into())).await.unwrap();
    let err = recv_type(&mut ws, "error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Invalid message"));

    send(&mut ws, json!({"type": "get_mindmap", "code": "NOPE42"})).await;
    recv_type(&mut ws, "error").await;

    server.shutdown().await;
    let _ = std::fs::remove_dir_all(&output);
}

// ===========================================================================
// Configuration
// ===========================================================================

#[test]
fn first_run_copies_defaults_and_loads() {
    let base = test_dir("config_first_run");
    let defaults = base.join("defaults");
    std::fs::create_dir_all(&defaults).unwrap();
    for entry in std::fs::read_dir(project_root().join("defaults")).unwrap() {
        let path = entry.unwrap().path();
        std::fs::copy(&path, defaults.join(path.file_name().unwrap())).unwrap();
    }

    let copied = config::ensure_config_files(&base).unwrap();
    assert!(copied.iter().any(|p| p.ends_with("server.toml")));
    assert!(!base.join("config/credentials.toml.example").exists());

    let config = config::load_config_from(&base).unwrap();
    assert_eq!(config.server.bind_addr(), "127.0.0.1:8000");
    assert_eq!(config.session.code_length, 6);
    assert_eq!(config.llm.provider, LlmProvider::Anthropic);
    assert_eq!(config.llm.max_tokens, 4096);
    assert_eq!(config.llm.timeout_secs, 120);
    assert_eq!(config.model(), LlmProvider::Anthropic.default_model());
    assert_eq!(config.output.dir, "output");

    // A second run copies nothing.
    assert!(config::ensure_config_files(&base).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(&base);
}
