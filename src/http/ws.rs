//! Websocket bridge between a browser and the chat room

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;

use super::server::HttpState;
use crate::chat::{ChatError, ChatEvent, ChatRoom, ChatSession, ClientFrame, ClientState};

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

pub async fn ws_handler(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, peer, socket))
}

async fn handle_socket(state: HttpState, peer: SocketAddr, socket: WebSocket) {
    let mut lifecycle = ClientState::Connecting;
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();

    let joined = tokio::select! {
        _ = shutdown.cancelled() => None,
        joined = timeout(
            state.config.join_timeout,
            await_join(&state, peer, &mut sender, &mut receiver),
        ) => joined.ok().flatten(),
    };

    let Some(mut session) = joined else {
        lifecycle.advance(ClientState::Closed);
        let _ = sender.send(Message::Close(None)).await;
        tracing::debug!(peer = %peer, "Websocket closed before joining");
        return;
    };
    lifecycle.advance(ClientState::Joined);

    loop {
        tokio::select! {
            event = session.recv() => {
                let Some(event) = event else { break };
                let last = matches!(event, ChatEvent::Shutdown { .. });
                if !send_event(&state, &mut sender, &event).await || last {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_frame(&state.chat, &session, &text).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    lifecycle.advance(ClientState::Leaving);
    state.chat.leave(session.id).await;
    let _ = sender.send(Message::Close(None)).await;
    lifecycle.advance(ClientState::Closed);
    tracing::debug!(peer = %peer, client_id = session.id, state = ?lifecycle, "Websocket closed");
}

/// Wait for a usable join frame
///
/// A rejected name is reported and the client may try again; a closed room
/// or a closed socket ends the wait.
async fn await_join(
    state: &HttpState,
    peer: SocketAddr,
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
) -> Option<ChatSession> {
    while let Some(Ok(message)) = receiver.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            _ => continue,
        };
        let Ok(ClientFrame::Join { name }) = serde_json::from_str::<ClientFrame>(&text) else {
            continue;
        };

        match state.chat.join(peer, &name).await {
            Ok(session) => return Some(session),
            Err(ChatError::RoomClosed) => return None,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Chat join rejected");
                let event = ChatEvent::Error {
                    text: crate::chat::emotes::escape_html(&e.to_string()),
                };
                if !send_event(state, sender, &event).await {
                    return None;
                }
            }
        }
    }
    None
}

async fn handle_frame(chat: &ChatRoom, session: &ChatSession, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Message { text }) => {
            // Rejections were already reported to the client by the room
            let _ = chat.dispatch(session.id, &text).await;
        }
        Ok(ClientFrame::Join { .. }) => {}
        Err(e) => {
            tracing::debug!(client_id = session.id, error = %e, "Malformed chat frame");
        }
    }
}

async fn send_event(state: &HttpState, sender: &mut WsSender, event: &ChatEvent) -> bool {
    let frame = Message::Text(event.to_json());
    matches!(
        timeout(state.config.write_timeout, sender.send(frame)).await,
        Ok(Ok(()))
    )
}
