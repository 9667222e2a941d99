//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::game::room::{PlayerView, RoomSnapshot};
use crate::store::scores::ScoreEntry;

/// Facing direction of a player sprite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Default for Direction {
    fn default() -> Self {
        Self::East
    }
}

/// Animation state reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerAction {
    Idle,
    Walk,
}

impl Default for PlayerAction {
    fn default() -> Self {
        Self::Idle
    }
}

/// Sprite color tint; assigned by join order, overridable by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTint {
    None,
    Yellow,
    Blue,
}

impl Default for ColorTint {
    fn default() -> Self {
        Self::None
    }
}

/// Room status as seen on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    ReadyCheck,
    Countdown,
    Playing,
    GameOver,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request matchmaking into a room
    Join,

    /// Mark the sender as ready for the next race
    Ready,

    /// Pick a sprite tint while in the lobby
    SelectColor { tint: ColorTint },

    /// Client-reported movement for the current frame
    Move {
        x: f32,
        y: f32,
        direction: Direction,
        action: PlayerAction,
        frame: u32,
    },

    /// The sender crossed the finish line
    Finish,

    /// Request another race after game over
    Restart,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { conn_id: Uuid, server_time: u64 },

    /// Full room state, pushed after every state-affecting event
    RoomUpdate {
        status: RoomStatus,
        players: HashMap<Uuid, PlayerView>,
        #[serde(rename = "countdownStartTimeMs")]
        countdown_start_time_ms: u64,
        #[serde(rename = "raceStartTimeMs")]
        race_start_time_ms: u64,
        /// Empty string until a winner exists
        #[serde(rename = "finishedPlayerId")]
        finished_player_id: String,
    },

    /// Fired exactly once per race, when the first player finishes
    RaceFinished {
        #[serde(rename = "winnerId")]
        winner_id: String,
        #[serde(rename = "timeMs")]
        time_ms: u64,
        players: HashMap<Uuid, PlayerView>,
    },

    /// Current top-N finish times
    Leaderboard { entries: Vec<ScoreEntry> },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    /// Build the broadcast view of a room snapshot
    pub fn room_update(snapshot: &RoomSnapshot) -> Self {
        Self::RoomUpdate {
            status: snapshot.status,
            players: snapshot.players.clone(),
            countdown_start_time_ms: snapshot.countdown_start_ms,
            race_start_time_ms: snapshot.race_start_ms,
            finished_player_id: snapshot
                .finished_player
                .map(|id| id.to_string())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_lowercase_single_words() {
        let cases = [
            (RoomStatus::Waiting, "\"waiting\""),
            (RoomStatus::ReadyCheck, "\"readycheck\""),
            (RoomStatus::Countdown, "\"countdown\""),
            (RoomStatus::Playing, "\"playing\""),
            (RoomStatus::GameOver, "\"gameover\""),
        ];
        for (status, expected) in cases {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }

    #[test]
    fn room_update_encodes_camel_case_and_empty_winner() {
        let snapshot = RoomSnapshot {
            room_id: 1,
            status: RoomStatus::Waiting,
            players: HashMap::new(),
            countdown_start_ms: 0,
            race_start_ms: 0,
            finished_player: None,
        };

        let json = serde_json::to_value(ServerMsg::room_update(&snapshot)).unwrap();
        assert_eq!(json["type"], "room_update");
        assert_eq!(json["countdownStartTimeMs"], 0);
        assert_eq!(json["raceStartTimeMs"], 0);
        assert_eq!(json["finishedPlayerId"], "");
    }

    #[test]
    fn player_view_uses_client_field_names() {
        let view = PlayerView {
            x: 100.0,
            y: 0.0,
            direction: Direction::East,
            action: PlayerAction::Idle,
            current_frame: 0,
            color_tint: ColorTint::Yellow,
            is_ready: false,
        };

        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["currentFrame"], 0);
        assert_eq!(json["colorTint"], "yellow");
        assert_eq!(json["isReady"], false);
        assert_eq!(json["direction"], "east");
        assert_eq!(json["action"], "idle");
    }

    #[test]
    fn client_move_parses_from_tagged_json() {
        let raw =
            r#"{"type":"move","x":140.5,"y":1.0,"direction":"east","action":"walk","frame":3}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Move { x, frame, .. } => {
                assert_eq!(x, 140.5);
                assert_eq!(frame, 3);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
