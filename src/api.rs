//! HTTP API
//!
//! 客户端和对端节点使用的路由：
//! Routes used by clients and peer nodes:
//!
//! - `POST /timers` - create a timer
//! - `GET /timers?node-for-replicas=<node>` - replica documents held for `<node>`
//! - `PUT /timers/{id}` - replication upsert
//! - `GET /timers/{id}` - timer view
//! - `DELETE /timers/{id}` - delete a timer
//! - `GET /stats` - node statistics

mod error;

#[cfg(test)]
mod tests;

pub use error::{ApiError, ProblemDetails};

use crate::node::{NodeStats, TimerNode};
use crate::replication::PeerTransport;
use crate::timer::{
    CreateTimerRequest, CreatedTimer, NodeId, ReplicaDocument, ReplicaListing, TimerId, TimerView,
    UpsertResponse,
};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// 构建节点的路由
/// Build the node's router
pub fn router<P: PeerTransport>(node: Arc<TimerNode<P>>) -> Router {
    Router::new()
        .route("/timers", get(list_replicas::<P>).post(create_timer::<P>))
        .route(
            "/timers/{id}",
            get(get_timer::<P>)
                .put(upsert_timer::<P>)
                .delete(delete_timer::<P>),
        )
        .route("/stats", get(stats::<P>))
        .with_state(node)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReplicasQuery {
    node_for_replicas: NodeId,
}

/// POST /timers
async fn create_timer<P: PeerTransport>(
    State(node): State<Arc<TimerNode<P>>>,
    body: Bytes,
) -> ApiResult<Response> {
    let spec = CreateTimerRequest::from_slice(&body)?
        .into_spec(node.config().replication.default_factor)?;
    let timer = node.create(spec).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, timer.id.path())],
        Json(CreatedTimer { id: timer.id }),
    )
        .into_response())
}

/// GET /timers?node-for-replicas=<node>
async fn list_replicas<P: PeerTransport>(
    State(node): State<Arc<TimerNode<P>>>,
    Query(query): Query<ReplicasQuery>,
) -> ApiResult<Json<ReplicaListing>> {
    let timers = node.replicas_for(query.node_for_replicas).await?;
    Ok(Json(ReplicaListing { timers }))
}

/// PUT /timers/{id}
async fn upsert_timer<P: PeerTransport>(
    State(node): State<Arc<TimerNode<P>>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<UpsertResponse>> {
    let id: TimerId = id.parse()?;
    let document: ReplicaDocument = serde_json::from_slice(&body)
        .map_err(|e| crate::error::Error::InvalidSpec(e.to_string()))?;
    let outcome = node.upsert(id, document).await?;
    Ok(Json(UpsertResponse {
        applied: outcome.applied(),
    }))
}

/// GET /timers/{id}
async fn get_timer<P: PeerTransport>(
    State(node): State<Arc<TimerNode<P>>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TimerView>> {
    let timer = node.get(id.parse()?).await?;
    Ok(Json(TimerView::from(&timer)))
}

/// DELETE /timers/{id}
async fn delete_timer<P: PeerTransport>(
    State(node): State<Arc<TimerNode<P>>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    node.delete(id.parse()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /stats
async fn stats<P: PeerTransport>(State(node): State<Arc<TimerNode<P>>>) -> ApiResult<Json<NodeStats>> {
    Ok(Json(node.stats().await?))
}
