//! Integration tests for spanwire-client.
//!
//! A fake debug server drives a real session over an in-memory duplex
//! stream, through the public API only.

use std::time::Duration as StdDuration;

use bytes::{BufMut, BytesMut};
use spanwire_client::observe::ErrorQueue;
use spanwire_client::pipeline::MemoryStore;
use spanwire_client::protocol::{
    build_frame, frame_message, ClientConfig, ClientMessage, ClientRecord, Duration,
    HandshakeMessage, Level, Message, Metadata, Project, ServerConfig, SpanAlloc, SpanDataset,
    SpanEvent, SpanParent, SpanUpdate, Target, HELLO_SIZE,
};
use spanwire_client::session::{
    NegotiationPolicy, Session, SessionConfig, SessionManager, SessionState, StreamPhase,
    LOST_CONNECTION,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const SECOND: u64 = Duration::NANOS_PER_SEC;
const WAIT: StdDuration = StdDuration::from_secs(2);

struct FakeServer {
    stream: DuplexStream,
}

impl FakeServer {
    /// Send the hello and check the client echoes it.
    async fn handshake(&mut self) {
        let hello = HandshakeMessage::expected().encode();
        self.stream.write_all(&hello).await.unwrap();

        let mut echo = [0u8; HELLO_SIZE];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut echo))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echo, hello);
    }

    async fn send(&mut self, message: Message) {
        self.stream.write_all(&frame_message(&message)).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn recv(&mut self) -> ClientMessage {
        let len = tokio::time::timeout(WAIT, self.stream.read_u32_le())
            .await
            .unwrap()
            .unwrap();
        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body).await.unwrap();
        ClientMessage::decode(&body).unwrap()
    }
}

fn connect(manager: &SessionManager, config: &SessionConfig) -> (Session, FakeServer, MemoryStore) {
    let (client, server) = duplex(256 * 1024);
    let store = MemoryStore::new();
    let session = manager
        .attach(client, config, Box::new(store.clone()))
        .unwrap();
    (session, FakeServer { stream: server }, store)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_state(session: &Session, wanted: SessionState) {
    let mut rx = session.state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == wanted))
        .await
        .unwrap()
        .unwrap();
}

fn notices(errors: &ErrorQueue) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(notice) = errors.current() {
        out.push(notice.description);
        errors.dismiss();
    }
    out
}

fn project() -> Message {
    Message::Project(Project {
        app_name: "bench".into(),
        name: "bench".into(),
        version: "1.2.0".into(),
        command_line: "bench --fast".into(),
        target: Target {
            os: "linux".into(),
            family: "unix".into(),
            arch: "aarch64".into(),
        },
        cpu: None,
    })
}

fn alloc(id: u32, name: &str) -> Message {
    Message::SpanAlloc(SpanAlloc {
        id,
        metadata: Metadata {
            level: Level::Debug,
            line: Some(12),
            name: name.into(),
            target: "bench".into(),
            module_path: Some("bench::work".into()),
            file: Some("src/work.rs".into()),
        },
    })
}

#[tokio::test]
async fn test_full_session_scenario() {
    let mut policy = NegotiationPolicy::default();
    policy.auto_negotiate = true;
    let manager = SessionManager::new(policy);
    let (session, mut server, store) = connect(&manager, &SessionConfig::default());

    server.handshake().await;
    server
        .send(Message::ServerConfig(ServerConfig {
            max_rows: 3,
            min_period: 500,
        }))
        .await;

    let ClientMessage::Config(config) = server.recv().await else {
        panic!("expected a client config");
    };
    assert_eq!(config.record, ClientRecord::start(3));
    assert_eq!(config.period, 500);
    wait_state(&session, SessionState::Streaming(StreamPhase::Recording)).await;

    server.send(project()).await;
    server.send(alloc(1, "work")).await;
    server.send(alloc(2, "sub")).await;
    server.send(Message::SpanParent(SpanParent { id: 2, parent: 1 })).await;
    server
        .send(Message::SpanEvent(SpanEvent {
            id: 2,
            timestamp: 1_700_000_000,
            level: Level::Warning,
            message: "cache miss,key=7,bench::work,bench".into(),
        }))
        .await;
    server
        .send(Message::SpanDataset(SpanDataset {
            id: 2,
            run_count: 3,
            content: "r1,1,0\nr2,2,0\nr3,3,0\n".into(),
        }))
        .await;
    server
        .send(Message::SpanUpdate(SpanUpdate {
            id: 2,
            run_count: 3,
            average: Duration::from_parts(2, 0),
            min: Duration::from_parts(1, 0),
            max: Duration::from_parts(3, 0),
        }))
        .await;

    wait_state(&session, SessionState::Streaming(StreamPhase::Idle)).await;
    eventually(|| store.span(2).is_some_and(|s| s.stats.average.is_some())).await;

    let project = store.current_project().unwrap();
    assert_eq!(project.project.command_line, "bench --fast");
    assert_eq!(project.span(1).unwrap().path, "work");

    let span = store.span(2).unwrap();
    assert_eq!(span.path, "work/sub");
    assert_eq!(span.metadata.module_path.as_deref(), Some("bench::work"));

    let event = &span.events[0];
    assert_eq!(event.sequence, 0);
    assert_eq!(event.level, Level::Warning);
    assert_eq!(event.message, "cache miss");
    assert_eq!(event.variables, vec!["key=7".to_string()]);
    assert_eq!(event.module, "bench::work");
    assert_eq!(event.target, "bench");

    let dataset = &span.datasets[0];
    assert_eq!(dataset.runs.len(), 3);
    assert_eq!(dataset.median.nanoseconds, 2 * SECOND);
    assert_eq!(dataset.min.nanoseconds, SECOND);
    assert_eq!(span.stats.max.unwrap().nanoseconds, 3 * SECOND);

    assert!(manager.errors().is_empty());
    assert!(manager.progress().is_empty());
}

#[tokio::test]
async fn test_manual_configuration_and_recording() {
    let manager = SessionManager::default();
    let (session, mut server, store) = connect(&manager, &SessionConfig::default());

    server.handshake().await;
    server
        .send(Message::ServerConfig(ServerConfig {
            max_rows: 100,
            min_period: 10,
        }))
        .await;
    server.send(project()).await;
    // Messages are applied in order, so the server config is in too.
    eventually(|| store.current_project().is_some()).await;
    assert_eq!(
        session.current_state(),
        SessionState::Streaming(StreamPhase::AwaitingConfig)
    );

    let config = ClientConfig {
        max_average_points: 20,
        max_level: Level::Debug,
        record: ClientRecord::stop(),
        period: 250,
    };
    session.send_config(config).await.unwrap();
    assert_eq!(server.recv().await, ClientMessage::Config(config));
    wait_state(&session, SessionState::Streaming(StreamPhase::Idle)).await;

    session.send_record(ClientRecord::start(10)).await.unwrap();
    assert_eq!(
        server.recv().await,
        ClientMessage::Record(ClientRecord::start(10))
    );
    wait_state(&session, SessionState::Streaming(StreamPhase::Recording)).await;
}

#[tokio::test]
async fn test_handshake_rejected() {
    let manager = SessionManager::default();
    let (mut session, mut server, store) = connect(&manager, &SessionConfig::default());

    let mut hello = HandshakeMessage::expected().encode();
    hello[0] = b'X';
    server.send_raw(&hello).await;

    tokio::time::timeout(WAIT, session.wait_for_close())
        .await
        .unwrap();
    assert!(session.current_state().is_closed());
    assert!(store.projects().is_empty());

    // No hello echo, just EOF.
    let mut rest = Vec::new();
    server.stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    assert_eq!(
        notices(manager.errors()),
        vec![
            LOST_CONNECTION.to_string(),
            "Handshake with debug server failed".to_string()
        ]
    );
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let manager = SessionManager::default();
    let (session, mut server, store) = connect(&manager, &SessionConfig::default());

    server.handshake().await;
    let mut body = BytesMut::new();
    body.put_u8(99);
    body.put_u32_le(0);
    server.send_raw(&build_frame(&body)).await;
    server.send(project()).await;

    eventually(|| store.current_project().is_some()).await;
    assert!(session.current_state().is_streaming());

    let notice = manager.errors().current().unwrap();
    assert_eq!(notice.description, "Received a malformed message");
    assert!(notice.reason.unwrap().contains("unknown message type: 99"));
}

#[tokio::test]
async fn test_oversized_frame_closes() {
    let manager = SessionManager::default();
    let config = SessionConfig {
        max_frame_size: 16,
        ..SessionConfig::default()
    };
    let (mut session, mut server, _store) = connect(&manager, &config);

    server.handshake().await;
    server.send_raw(&1_000u32.to_le_bytes()).await;

    tokio::time::timeout(WAIT, session.wait_for_close())
        .await
        .unwrap();
    assert_eq!(
        notices(manager.errors()),
        vec![
            LOST_CONNECTION.to_string(),
            "Received an oversized frame".to_string()
        ]
    );
}

#[tokio::test]
async fn test_frames_ahead_of_oversized_prefix_are_applied() {
    let manager = SessionManager::default();
    let (mut session, mut server, store) = connect(&manager, &SessionConfig::default());

    server.handshake().await;
    let mut data = frame_message(&project()).to_vec();
    data.extend_from_slice(&u32::MAX.to_le_bytes());
    server.send_raw(&data).await;

    tokio::time::timeout(WAIT, session.wait_for_close())
        .await
        .unwrap();
    assert_eq!(
        store.current_project().unwrap().project.command_line,
        "bench --fast"
    );
    assert_eq!(
        notices(manager.errors()),
        vec![
            LOST_CONNECTION.to_string(),
            "Received an oversized frame".to_string()
        ]
    );
}

#[tokio::test]
async fn test_peer_disconnect_resets_and_frees_link() {
    let manager = SessionManager::default();
    let (mut session, mut server, store) = connect(&manager, &SessionConfig::default());

    server.handshake().await;
    server.send(project()).await;
    server.send(alloc(1, "work")).await;
    eventually(|| store.span(1).is_some()).await;

    drop(server);
    tokio::time::timeout(WAIT, session.wait_for_close())
        .await
        .unwrap();

    assert!(!manager.is_connected());
    assert_eq!(
        manager.errors().current().unwrap().description,
        LOST_CONNECTION
    );

    // A fresh link starts a fresh project.
    let (_session, mut server, store2) = connect(&manager, &SessionConfig::default());
    server.handshake().await;
    server.send(alloc(1, "orphan")).await;
    server.send(project()).await;
    eventually(|| store2.current_project().is_some()).await;
    assert!(store2.span(1).is_none());
}

#[tokio::test]
async fn test_custom_delimiter() {
    let manager = SessionManager::default();
    let config = SessionConfig {
        delimiter: ';',
        ..SessionConfig::default()
    };
    let (_session, mut server, store) = connect(&manager, &config);

    server.handshake().await;
    server.send(project()).await;
    server.send(alloc(4, "io")).await;
    server
        .send(Message::SpanDataset(SpanDataset {
            id: 4,
            run_count: 2,
            content: "read;a,b;0;500\nread;c;0;700\n".into(),
        }))
        .await;

    eventually(|| store.span(4).is_some_and(|s| !s.datasets.is_empty())).await;
    let dataset = &store.span(4).unwrap().datasets[0];
    assert_eq!(dataset.runs[0].variables, vec!["a,b".to_string()]);
    assert_eq!(dataset.average.nanoseconds, 600);
}
