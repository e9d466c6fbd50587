//! Test harness: an in-process server on an ephemeral port and a framed
//! client speaking the game protocol.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use surviveler_server::config::{Cli, Config, FileSettings};
use surviveler_server::game::data::GameData;
use surviveler_server::net::codec::{encode_frame, CodecError, MessageRegistry};
use surviveler_server::net::protocol::{Join, Message, MobileEntityState};

/// 2x2 fully walkable map, players spawn on the first tile
pub const SMALL_MAP: &str = r#"{
    "scale_factor": 1.0,
    "matrix": [[255, 255], [255, 255]],
    "spawn": {
        "players": [[0.5, 0.5]],
        "enemies": [[1.5, 1.5]]
    }
}"#;

pub const LOGIC_TICK_MS: u64 = 10;
pub const SEND_TICK_MS: u64 = 50;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(SMALL_MAP).await
    }

    pub async fn start_with(map: &str) -> Self {
        let cli = Cli {
            logic_tick_period: Some(LOGIC_TICK_MS),
            send_tick_period: Some(SEND_TICK_MS),
            // midday, no zombies come out during a test
            game_starting_time: Some(720),
            seed: Some(7),
            ..Cli::default()
        };
        let config = Config::from_parts(cli, FileSettings::default()).unwrap();
        let data = GameData::from_json(map).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(surviveler_server::run(config, data, listener, None, async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            stop: Some(stop_tx),
            task,
        }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

pub struct TestClient {
    stream: TcpStream,
    registry: MessageRegistry,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            registry: MessageRegistry::standard(),
        }
    }

    pub async fn send(&mut self, msg: &Message) {
        let frame = encode_frame(msg).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn join(&mut self, name: &str, entity_type: u8) {
        self.send(&Message::Join(Join {
            name: name.to_string(),
            r#type: entity_type,
        }))
        .await;
    }

    /// Next message, `None` on timeout
    pub async fn recv_within(&mut self, timeout: Duration) -> Option<Result<Message, CodecError>> {
        tokio::time::timeout(timeout, self.registry.read_message(&mut self.stream))
            .await
            .ok()
    }

    pub async fn recv(&mut self) -> Message {
        match self.recv_within(RECV_TIMEOUT).await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => panic!("read failed: {e}"),
            None => panic!("no message within {RECV_TIMEOUT:?}"),
        }
    }

    /// Skip messages until one satisfies `pred`
    pub async fn recv_until<F>(&mut self, mut pred: F) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_within(left).await {
                Some(Ok(msg)) if pred(&msg) => return msg,
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("read failed: {e}"),
                None => panic!("expected message not received within {RECV_TIMEOUT:?}"),
            }
        }
    }

    /// Non-snapshot messages received within `window`
    pub async fn drain_events(&mut self, window: Duration) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + window;
        let mut seen = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_within(left).await {
                Some(Ok(Message::GameState(_))) => continue,
                Some(Ok(msg)) => seen.push(msg),
                Some(Err(_)) | None => return seen,
            }
        }
    }

    /// Wait until the server closes the connection
    pub async fn expect_closed(&mut self) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_within(left).await {
                Some(Err(e)) => {
                    assert!(e.is_disconnect(), "unexpected read error: {e}");
                    return;
                }
                Some(Ok(_)) => continue,
                None => panic!("connection still open after {RECV_TIMEOUT:?}"),
            }
        }
    }
}

/// State of mobile entity `id` in a snapshot message
pub fn mobile_in(msg: &Message, id: u32) -> Option<&MobileEntityState> {
    match msg {
        Message::GameState(snapshot) => snapshot.entities.get(&id),
        _ => None,
    }
}
