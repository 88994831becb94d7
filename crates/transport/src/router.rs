use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use crossrun_core_types::{MessageId, SessionToken};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::codec::ScriptBody;
use crate::errors::{TransportError, TransportResult};
use crate::hub::SessionHub;
use crate::link::LinkEnd;

/// `/ws` for client connections and `/exec/{token}/{id}` for exec scripts.
pub fn router(hub: Arc<SessionHub>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/exec/:token/:id", get(exec_script))
        .with_state(hub)
}

async fn websocket_handler(
    State(hub): State<Arc<SessionHub>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_socket(hub, socket).await;
    })
}

async fn handle_socket(hub: Arc<SessionHub>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (to_hub, hub_rx) = mpsc::unbounded_channel::<String>();
    let (hub_tx, mut to_socket) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = to_socket.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if to_hub.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(target: "ws", ?frame, "websocket closed by client");
                    break;
                }
                Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(err) => {
                    error!(?err, "websocket error");
                    break;
                }
            }
        }
    });

    hub.serve_link(LinkEnd {
        tx: hub_tx,
        rx: hub_rx,
    })
    .await;
    reader.abort();
    let _ = writer.await;
}

async fn exec_script(
    State(hub): State<Arc<SessionHub>>,
    Path((token, id)): Path<(String, MessageId)>,
) -> TransportResult<Json<ScriptBody>> {
    let token: SessionToken = token
        .parse()
        .map_err(|_| TransportError::NoSuchSession(token.clone()))?;
    hub.scripts().fetch(&token, id).map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn serves_exec_scripts_once() {
        let hub = SessionHub::new(HubConfig::default());
        let token: SessionToken = "a1b2".parse().unwrap();
        let url = hub
            .scripts()
            .insert(&token, 9, "document.title = 'x'", vec![], false);

        let app = router(hub.clone());
        let response = app
            .clone()
            .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let again = app
            .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }
}
