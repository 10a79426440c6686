use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::Gateway;
use crate::protocol::Outbound;
use crate::server::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}

async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, state.gateway).await;
    })
}

async fn handle_socket(socket: WebSocket, gateway: Gateway) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            if sink.send(Message::Text(reply.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection = gateway.connect(tx);
    let session = connection.session();
    let (inbound, queue) = mpsc::unbounded_channel::<String>();
    let hangup = CancellationToken::new();

    let reader = {
        let hangup = hangup.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        debug!(target: "ws", %session, "ignoring binary frame")
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(err) => {
                        warn!(target: "ws", %session, %err, "socket error");
                        break;
                    }
                }
            }
            hangup.cancel();
        })
    };

    // commands run one at a time; the reader keeps watching for the client leaving
    connection.run(queue, hangup).await;
    reader.abort();
    writer.abort();
}
