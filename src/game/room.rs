//! Room and player state for a two-player race

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{ColorTint, Direction, PlayerAction, RoomStatus};

use super::{COUNTDOWN_MS, ROOM_CAPACITY, START_X};

/// Per-connection player state (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub x: f32,
    /// Lane index, 0.0 or 1.0
    pub y: f32,
    pub direction: Direction,
    pub action: PlayerAction,
    pub current_frame: u32,
    pub color_tint: ColorTint,
    pub is_ready: bool,
}

impl Player {
    /// Seed a player for the given lane; the first occupant of a room
    /// takes lane 0 and yellow, the second lane 1 and blue.
    pub fn new(id: Uuid, lane: usize) -> Self {
        let color_tint = if lane == 0 {
            ColorTint::Yellow
        } else {
            ColorTint::Blue
        };
        Self {
            id,
            x: START_X,
            y: lane as f32,
            direction: Direction::default(),
            action: PlayerAction::default(),
            current_frame: 0,
            color_tint,
            is_ready: false,
        }
    }
}

/// Serialized player record inside a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub action: PlayerAction,
    pub current_frame: u32,
    pub color_tint: ColorTint,
    pub is_ready: bool,
}

impl From<&Player> for PlayerView {
    fn from(p: &Player) -> Self {
        Self {
            x: p.x,
            y: p.y,
            direction: p.direction,
            action: p.action,
            current_frame: p.current_frame,
            color_tint: p.color_tint,
            is_ready: p.is_ready,
        }
    }
}

/// A matchmaking/game unit holding up to two players and one race's
/// shared state. Persists across race cycles; destroyed when empty.
#[derive(Debug)]
pub struct Room {
    pub id: u64,
    pub players: HashMap<Uuid, Player>,
    pub status: RoomStatus,
    /// Epoch ms, 0 when no countdown is in flight
    pub countdown_start_ms: u64,
    /// Epoch ms, always countdown_start_ms + 3000 within a cycle
    pub race_start_ms: u64,
    pub finished_player: Option<Uuid>,
    /// Winner's elapsed race duration
    pub finish_time_ms: u64,
}

impl Room {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            players: HashMap::new(),
            status: RoomStatus::Waiting,
            countdown_start_ms: 0,
            race_start_ms: 0,
            finished_player: None,
            finish_time_ms: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= ROOM_CAPACITY
    }

    /// Whether a matchmaking scan may place a new player here
    pub fn is_open(&self) -> bool {
        !self.is_full()
            && matches!(self.status, RoomStatus::Waiting | RoomStatus::ReadyCheck)
    }

    /// True when at least one player is present and every present
    /// player has confirmed readiness. An empty room is never ready.
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.is_ready)
    }

    /// Enter the countdown phase: stamp the timers, move everyone back
    /// to the start line, and clear the previous race's outcome.
    pub fn begin_countdown(&mut self, now_ms: u64) {
        self.status = RoomStatus::Countdown;
        self.countdown_start_ms = now_ms;
        self.race_start_ms = now_ms + COUNTDOWN_MS;
        self.finished_player = None;
        self.finish_time_ms = 0;
        for player in self.players.values_mut() {
            player.x = START_X;
            player.is_ready = false;
        }
    }

    pub fn clear_readiness(&mut self) {
        for player in self.players.values_mut() {
            player.is_ready = false;
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id,
            status: self.status,
            players: self
                .players
                .values()
                .map(|p| (p.id, PlayerView::from(p)))
                .collect(),
            countdown_start_ms: self.countdown_start_ms,
            race_start_ms: self.race_start_ms,
            finished_player: self.finished_player,
        }
    }
}

/// Point-in-time view of a room, safe to hand out and broadcast after
/// the room lock is released
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: u64,
    pub status: RoomStatus,
    pub players: HashMap<Uuid, PlayerView>,
    pub countdown_start_ms: u64,
    pub race_start_ms: u64,
    pub finished_player: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_second_lane_seeding() {
        let p0 = Player::new(Uuid::new_v4(), 0);
        assert_eq!(p0.x, START_X);
        assert_eq!(p0.y, 0.0);
        assert_eq!(p0.color_tint, ColorTint::Yellow);
        assert!(!p0.is_ready);

        let p1 = Player::new(Uuid::new_v4(), 1);
        assert_eq!(p1.x, START_X);
        assert_eq!(p1.y, 1.0);
        assert_eq!(p1.color_tint, ColorTint::Blue);
    }

    #[test]
    fn empty_room_is_never_all_ready() {
        let room = Room::new(1);
        assert!(!room.all_ready());
    }

    #[test]
    fn all_ready_requires_every_player() {
        let mut room = Room::new(1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        room.players.insert(a, Player::new(a, 0));
        room.players.insert(b, Player::new(b, 1));
        assert!(!room.all_ready());

        room.players.get_mut(&a).unwrap().is_ready = true;
        assert!(!room.all_ready());

        room.players.get_mut(&b).unwrap().is_ready = true;
        assert!(room.all_ready());
    }

    #[test]
    fn begin_countdown_stamps_timers_and_resets() {
        let mut room = Room::new(1);
        let a = Uuid::new_v4();
        room.players.insert(a, Player::new(a, 0));
        let player = room.players.get_mut(&a).unwrap();
        player.x = 512.0;
        player.is_ready = true;
        room.finished_player = Some(a);
        room.finish_time_ms = 9999;

        room.begin_countdown(50_000);

        assert_eq!(room.status, RoomStatus::Countdown);
        assert_eq!(room.countdown_start_ms, 50_000);
        assert_eq!(room.race_start_ms, 50_000 + COUNTDOWN_MS);
        assert_eq!(room.finished_player, None);
        assert_eq!(room.finish_time_ms, 0);
        let player = &room.players[&a];
        assert_eq!(player.x, START_X);
        assert!(!player.is_ready);
    }
}
