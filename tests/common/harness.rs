//! tests/common/harness.rs
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use bytes::Bytes;
use chime::callback::SEQUENCE_HEADER;
use chime::config::Config;
use chime::node::TimerNode;
use chime::timer::NodeId;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "chime=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// One callback as seen by the sink.
#[derive(Debug, Clone)]
pub struct Received {
    pub name: String,
    pub sequence_number: u64,
    pub body: Bytes,
    pub at: Instant,
}

/// A callback endpoint on loopback. `POST /cb/{name}` is recorded and
/// answered with 200, `POST /fail` always answers 500.
pub struct CallbackSink {
    pub addr: SocketAddr,
    pub received: mpsc::UnboundedReceiver<Received>,
    _server: JoinHandle<()>,
}

impl CallbackSink {
    pub async fn start() -> Self {
        let (tx, received) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/cb/{name}", post(record))
            .route("/fail", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(tx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            received,
            _server: server,
        }
    }

    pub fn uri(&self, name: &str) -> String {
        format!("http://{}/cb/{name}", self.addr)
    }

    /// Waits for the next callback, failing the test after `limit`.
    pub async fn next(&mut self, limit: Duration) -> Received {
        timeout(limit, self.received.recv())
            .await
            .expect("no callback in time")
            .expect("sink stopped")
    }

    /// Everything received within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Received> {
        let deadline = Instant::now() + window;
        let mut all = Vec::new();
        while let Ok(Some(received)) = tokio::time::timeout_at(deadline, self.received.recv()).await {
            all.push(received);
        }
        all
    }
}

async fn record(
    State(tx): State<mpsc::UnboundedSender<Received>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(sequence_number) = headers
        .get(SEQUENCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
    else {
        return StatusCode::BAD_REQUEST;
    };
    let _ = tx.send(Received {
        name,
        sequence_number,
        body,
        at: Instant::now(),
    });
    StatusCode::OK
}

/// A node served on loopback.
pub struct TestNode {
    pub addr: SocketAddr,
    pub node: Arc<TimerNode>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<chime::error::Result<()>>,
}

impl TestNode {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Stops the node's scheduler at once, then the server.
    pub async fn stop(mut self) {
        self.node.shutdown().await;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if timeout(Duration::from_secs(5), &mut self.server).await.is_err() {
            self.server.abort();
        }
    }
}

/// Reserves a loopback address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Configuration tuned for fast tests: short windows and stagger.
pub fn test_config(local: SocketAddr, members: &[SocketAddr], instance_id: u8) -> Config {
    let mut config = Config::default();
    config.node.bind_address = local;
    config.node.advertise = NodeId::from(local.to_string());
    config.node.instance_id = instance_id;
    config.cluster.nodes = members.iter().map(|a| NodeId::from(a.to_string())).collect();
    config.replication.default_factor = 1;
    config.replication.create_window = Duration::from_millis(500);
    config.replication.update_window = Duration::from_millis(300);
    config.replication.ack_timeout = Duration::from_millis(200);
    config.replication.replica_stagger = Duration::from_millis(500);
    config.replication.retry.initial_backoff = Duration::from_millis(20);
    config.replication.resync_on_start = false;
    config.callback.retry.initial_backoff = Duration::from_millis(20);
    config
}

/// Starts `size` nodes that all know each other. `tweak` adjusts each config.
pub async fn spawn_cluster(size: usize, tweak: impl Fn(&mut Config)) -> Vec<TestNode> {
    init_tracing();
    let mut listeners = Vec::new();
    for _ in 0..size {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let members: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

    let mut nodes = Vec::new();
    for (i, listener) in listeners.into_iter().enumerate() {
        let mut config = test_config(members[i], &members, i as u8);
        tweak(&mut config);
        nodes.push(serve(listener, config));
    }
    nodes
}

/// Serves one node with `config` on `listener`.
pub fn serve(listener: TcpListener, config: Config) -> TestNode {
    let addr = listener.local_addr().unwrap();
    let node = Arc::new(TimerNode::start(config));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = tokio::spawn(chime::server::serve(listener, node.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    TestNode {
        addr,
        node,
        shutdown_tx: Some(shutdown_tx),
        server,
    }
}

/// Body of `POST /timers`.
pub fn create_body(uri: &str, interval_ms: u64, repeat_for_ms: u64, factor: u32) -> serde_json::Value {
    serde_json::json!({
        "timing": { "interval": interval_ms, "repeat-for": repeat_for_ms },
        "callback": { "http": { "uri": uri, "opaque": "Hello World!" } },
        "reliability": { "replication-factor": factor }
    })
}
