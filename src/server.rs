//! HTTP服务器
//! HTTP server
//!
//! Serves the API of one node on a listener until the shutdown signal
//! resolves, then stops the node.

use crate::api;
use crate::config::Config;
use crate::error::Result;
use crate::node::TimerNode;
use crate::replication::PeerTransport;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 在已绑定的监听器上为节点提供服务
/// Serve a node on an already bound listener
///
/// Binding is left to the caller so that a cluster's addresses can be known
/// before any of its nodes starts.
pub async fn serve<P: PeerTransport>(
    listener: TcpListener,
    node: Arc<TimerNode<P>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = api::router(node.clone()).layer(TraceLayer::new_for_http());
    info!(address = %listener.local_addr()?, node = %node.local(), "Listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    node.shutdown().await;
    Ok(())
}

/// 绑定配置中的地址，启动节点并提供服务
/// Bind the configured address, start a node and serve it
pub async fn run(config: Config, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = TcpListener::bind(config.node.bind_address).await?;
    let node = Arc::new(TimerNode::start(config));
    serve(listener, node, shutdown).await
}
