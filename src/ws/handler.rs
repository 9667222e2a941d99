//! WebSocket upgrade handler and per-connection session loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::coordinator::PositionUpdate;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, RoomStatus, ServerMsg};

/// WebSocket upgrade handler. Connections are anonymous; the minted
/// UUID is the connection's identity for its whole lifetime.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "new WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound queue: the registry (and through it the tick loop)
    // pushes here, the writer task drains to the socket
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMsg>();
    state.connections.register(conn_id, outbound_tx);

    let writer_conn_id = conn_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %writer_conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    state.connections.send_to(
        conn_id,
        ServerMsg::Welcome {
            conn_id,
            server_time: unix_millis(),
        },
    );

    // New clients see the current leaderboard right away; a dead
    // leaderboard backend never blocks gameplay
    match state.scores.top().await {
        Ok(entries) => state
            .connections
            .send_to(conn_id, ServerMsg::Leaderboard { entries }),
        Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to fetch leaderboard"),
    }

    let rate_limiter = ConnectionRateLimiter::new();

    // Reader loop: WebSocket -> coordinator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "rate limited inbound message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => dispatch(&state, conn_id, client_msg),
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnect: pull the player out of its room and notify whoever
    // remains; an unknown caller is a normal no-op
    if let Some(snapshot) = state.coordinator.leave(conn_id) {
        state.connections.broadcast_room(&snapshot);
    }
    state.connections.unregister(conn_id);
    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Route one inbound action into the coordinator and broadcast the
/// resulting room state. Wrong-state and stale messages fall through
/// silently per the rejection contract.
fn dispatch(state: &AppState, conn_id: Uuid, msg: ClientMsg) {
    match msg {
        ClientMsg::Join => {
            let (snapshot, is_new) = state.coordinator.join(conn_id);
            if is_new {
                info!(conn_id = %conn_id, room_id = snapshot.room_id, "matchmaking opened a room");
            }
            state.connections.broadcast_room(&snapshot);
        }

        ClientMsg::Ready => {
            if !state.coordinator.set_ready(conn_id) {
                return;
            }
            let Some(snapshot) = state.coordinator.room_for(conn_id) else {
                return;
            };
            if state.coordinator.all_ready(snapshot.room_id) {
                if let Some(countdown) = state.coordinator.start_countdown(snapshot.room_id) {
                    state.connections.broadcast_room(&countdown);
                    return;
                }
            }
            state.connections.broadcast_room(&snapshot);
        }

        ClientMsg::SelectColor { tint } => {
            if state.coordinator.set_color(conn_id, tint) {
                if let Some(snapshot) = state.coordinator.room_for(conn_id) {
                    state.connections.broadcast_room(&snapshot);
                }
            }
        }

        ClientMsg::Move {
            x,
            y,
            direction,
            action,
            frame,
        } => {
            state.coordinator.update_position(
                conn_id,
                PositionUpdate {
                    x,
                    y,
                    direction,
                    action,
                    frame,
                },
            );
            // Discarded updates (stale, wrong state) don't re-broadcast
            if let Some(snapshot) = state.coordinator.room_for(conn_id) {
                if snapshot.status == RoomStatus::Playing {
                    state.connections.broadcast_room(&snapshot);
                }
            }
        }

        ClientMsg::Finish => {
            let Some(result) = state.coordinator.finish(conn_id) else {
                return;
            };
            let room_conns: Vec<Uuid> = result.snapshot.players.keys().copied().collect();

            state.connections.broadcast_room(&result.snapshot);
            state.connections.broadcast_to(
                room_conns.iter().copied(),
                &ServerMsg::RaceFinished {
                    winner_id: result.winner.to_string(),
                    time_ms: result.time_ms,
                    players: result.snapshot.players.clone(),
                },
            );

            // Persist off the hot path; the room is already GameOver
            // and stays that way whatever the leaderboard does
            let scores = state.scores.clone();
            let connections = state.connections.clone();
            tokio::spawn(async move {
                match scores.record(result.winner, result.time_ms).await {
                    Ok(entries) => {
                        connections.broadcast_to(
                            room_conns.into_iter(),
                            &ServerMsg::Leaderboard { entries },
                        );
                    }
                    Err(e) => {
                        warn!(winner = %result.winner, error = %e, "failed to record race score");
                    }
                }
            });
        }

        ClientMsg::Restart => {
            if state.coordinator.request_restart(conn_id) {
                if let Some(snapshot) = state.coordinator.room_for(conn_id) {
                    state.connections.broadcast_room(&snapshot);
                }
            }
        }

        ClientMsg::Ping { t } => {
            state.connections.send_to(conn_id, ServerMsg::Pong { t });
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
