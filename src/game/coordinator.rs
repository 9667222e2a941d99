//! Session coordinator - owns all rooms and the connection index
//!
//! Every inbound player action lands here, as does the periodic tick
//! that promotes countdown rooms into the playing phase. Rooms are
//! independent units of concurrency: the dashmap entry lock serializes
//! mutation per room, and nothing here locks across rooms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::{ColorTint, Direction, PlayerAction, RoomStatus};

use super::room::{Player, Room, RoomSnapshot};
use super::{CLAMPED_STEP_X, MAX_STEP_X, TICK_INTERVAL_MS};

/// Outbound broadcast seam. The gateway's connection registry
/// implements this; tests substitute a recording stub so the state
/// machine runs without a live transport.
pub trait SnapshotSink: Send + Sync {
    /// Push a room snapshot to every connection in the room
    fn room_update(&self, snapshot: &RoomSnapshot);
}

/// A client-reported movement update, applied only while playing
#[derive(Debug, Clone, Copy)]
pub struct PositionUpdate {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub action: PlayerAction,
    pub frame: u32,
}

/// A race outcome, produced at most once per room per race
#[derive(Debug, Clone)]
pub struct RaceResult {
    pub winner: Uuid,
    pub time_ms: u64,
    pub snapshot: RoomSnapshot,
}

/// One long-lived instance owns every room in the process
pub struct SessionCoordinator {
    rooms: DashMap<u64, Room>,
    /// Connection -> room membership, 1:1 with room player maps
    index: DashMap<Uuid, u64>,
    /// Monotonic room id mint; ids are never reused
    next_room_id: AtomicU64,
    sink: Arc<dyn SnapshotSink>,
}

impl SessionCoordinator {
    pub fn new(sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            rooms: DashMap::new(),
            index: DashMap::new(),
            next_room_id: AtomicU64::new(1),
            sink,
        }
    }

    /// Admit a connection: first-match scan over open rooms, else mint
    /// a new one. Returns the room snapshot and whether a room was
    /// created (callers use the flag for logging only).
    pub fn join(&self, conn: Uuid) -> (RoomSnapshot, bool) {
        // Re-join from a connection we already seated is idempotent
        if let Some(room_id) = self.index.get(&conn).map(|r| *r) {
            if let Some(room) = self.rooms.get(&room_id) {
                return (room.snapshot(), false);
            }
        }

        let candidates: Vec<u64> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| *entry.key())
            .collect();

        for room_id in candidates {
            if let Some(mut room) = self.rooms.get_mut(&room_id) {
                // Re-check under the entry lock; a concurrent join may
                // have filled the room since the scan
                if !room.is_open() {
                    continue;
                }
                let lane = room.players.len();
                room.players.insert(conn, Player::new(conn, lane));
                if room.is_full() && room.status == RoomStatus::Waiting {
                    room.status = RoomStatus::ReadyCheck;
                }
                self.index.insert(conn, room_id);
                info!(room_id, conn_id = %conn, "player joined room");
                return (room.snapshot(), false);
            }
        }

        let room_id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        let mut room = Room::new(room_id);
        room.players.insert(conn, Player::new(conn, 0));
        let snapshot = room.snapshot();
        self.rooms.insert(room_id, room);
        self.index.insert(conn, room_id);
        info!(room_id, conn_id = %conn, "created room for player");
        (snapshot, true)
    }

    /// Remove a connection from its room. Returns the snapshot to
    /// notify the remaining player with, or None when the caller was
    /// unknown or the room emptied and was destroyed.
    pub fn leave(&self, conn: Uuid) -> Option<RoomSnapshot> {
        let (_, room_id) = self.index.remove(&conn)?;

        let snapshot = {
            let mut room = self.rooms.get_mut(&room_id)?;
            room.players.remove(&conn);
            if room.players.is_empty() {
                None
            } else {
                // A mid-game disconnect drops the survivor back to the
                // lobby; a finished room keeps its result on screen
                if room.status != RoomStatus::GameOver {
                    room.status = RoomStatus::Waiting;
                    room.clear_readiness();
                }
                Some(room.snapshot())
            }
        };

        if snapshot.is_none() {
            // The guard dropped above, so a concurrent join may have
            // seated someone in the meantime. Re-check emptiness under
            // the entry lock; a re-populated room survives.
            if self
                .rooms
                .remove_if(&room_id, |_, room| room.players.is_empty())
                .is_some()
            {
                info!(room_id, conn_id = %conn, "last player left, room destroyed");
            }
        } else {
            info!(room_id, conn_id = %conn, "player left room");
        }
        snapshot
    }

    pub fn room_for(&self, conn: Uuid) -> Option<RoomSnapshot> {
        let room_id = *self.index.get(&conn)?;
        self.rooms.get(&room_id).map(|room| room.snapshot())
    }

    /// Mark a player ready. Accepted only in the lobby phases.
    pub fn set_ready(&self, conn: Uuid) -> bool {
        let Some(room_id) = self.index.get(&conn).map(|r| *r) else {
            return false;
        };
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if !matches!(room.status, RoomStatus::Waiting | RoomStatus::ReadyCheck) {
            return false;
        }
        match room.players.get_mut(&conn) {
            Some(player) => {
                player.is_ready = true;
                true
            }
            None => false,
        }
    }

    /// Pick a sprite tint. Last write wins between racing calls.
    pub fn set_color(&self, conn: Uuid, tint: ColorTint) -> bool {
        let Some(room_id) = self.index.get(&conn).map(|r| *r) else {
            return false;
        };
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if !matches!(room.status, RoomStatus::Waiting | RoomStatus::ReadyCheck) {
            return false;
        }
        match room.players.get_mut(&conn) {
            Some(player) => {
                player.color_tint = tint;
                true
            }
            None => false,
        }
    }

    pub fn all_ready(&self, room_id: u64) -> bool {
        self.rooms
            .get(&room_id)
            .map(|room| room.all_ready())
            .unwrap_or(false)
    }

    /// Begin the 3 second countdown. Callers invoke this after
    /// confirming `all_ready`; anything but a lobby phase is ignored so
    /// duplicate ready messages cannot double-start a race.
    pub fn start_countdown(&self, room_id: u64) -> Option<RoomSnapshot> {
        let mut room = self.rooms.get_mut(&room_id)?;
        if !matches!(room.status, RoomStatus::Waiting | RoomStatus::ReadyCheck) {
            return None;
        }
        room.begin_countdown(unix_millis());
        info!(room_id, race_start_ms = room.race_start_ms, "countdown started");
        Some(room.snapshot())
    }

    /// Apply a client-reported movement update.
    ///
    /// Silently ignored unless the room is playing; stale updates after
    /// game over are an expected race, not an error. A single-update
    /// forward jump beyond `MAX_STEP_X` is not trusted and advances the
    /// player by a fixed small step instead.
    pub fn update_position(&self, conn: Uuid, update: PositionUpdate) {
        let Some(room_id) = self.index.get(&conn).map(|r| *r) else {
            return;
        };
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if room.status != RoomStatus::Playing {
            return;
        }
        let Some(player) = room.players.get_mut(&conn) else {
            return;
        };

        let delta_x = update.x - player.x;
        if delta_x > MAX_STEP_X {
            debug!(
                room_id,
                conn_id = %conn,
                delta_x,
                "movement jump too large, clamping"
            );
            player.x += CLAMPED_STEP_X;
        } else {
            player.x = update.x;
        }
        player.y = update.y;
        player.direction = update.direction;
        player.action = update.action;
        player.current_frame = update.frame;
    }

    /// Record the first finisher and flip the room to game over.
    /// Idempotent per race: any later call is a no-op returning None,
    /// so two near-simultaneous finish reports produce one winner.
    pub fn finish(&self, conn: Uuid) -> Option<RaceResult> {
        let room_id = *self.index.get(&conn)?;
        let mut room = self.rooms.get_mut(&room_id)?;
        if room.status != RoomStatus::Playing {
            return None;
        }

        let time_ms = unix_millis().saturating_sub(room.race_start_ms);
        room.status = RoomStatus::GameOver;
        room.finished_player = Some(conn);
        room.finish_time_ms = time_ms;
        info!(room_id, winner = %conn, time_ms, "race finished");

        Some(RaceResult {
            winner: conn,
            time_ms,
            snapshot: room.snapshot(),
        })
    }

    /// Route a finished room back to the lobby: ReadyCheck with two
    /// players, Waiting with one. Positions reset at the next countdown.
    pub fn request_restart(&self, conn: Uuid) -> bool {
        let Some(room_id) = self.index.get(&conn).map(|r| *r) else {
            return false;
        };
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if room.status != RoomStatus::GameOver {
            return false;
        }
        room.clear_readiness();
        room.status = if room.players.len() == 2 {
            RoomStatus::ReadyCheck
        } else {
            RoomStatus::Waiting
        };
        info!(room_id, status = ?room.status, "room restarted");
        true
    }

    /// One pass of the background scan: promote every countdown room
    /// whose race start time has arrived. A pure check-and-flip, so
    /// overlapping or repeated ticks are harmless.
    pub fn tick(&self, now_ms: u64) -> Vec<RoomSnapshot> {
        let candidates: Vec<u64> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().status == RoomStatus::Countdown)
            .map(|entry| *entry.key())
            .collect();

        let mut transitioned = Vec::new();
        for room_id in candidates {
            if let Some(mut room) = self.rooms.get_mut(&room_id) {
                if room.status == RoomStatus::Countdown && now_ms >= room.race_start_ms {
                    room.status = RoomStatus::Playing;
                    info!(room_id, "race started");
                    transitioned.push(room.snapshot());
                }
            }
        }
        transitioned
    }

    /// Drive `tick` every 100 ms until shutdown, broadcasting each
    /// transitioned room through the snapshot sink.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick_interval = interval(Duration::from_millis(TICK_INTERVAL_MS));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("session tick loop started");
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    for snapshot in self.tick(unix_millis()) {
                        self.sink.room_update(&snapshot);
                    }
                }
                _ = shutdown.changed() => {
                    info!("session tick loop stopped");
                    break;
                }
            }
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_players(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{COUNTDOWN_MS, START_X};
    use std::sync::Mutex;

    /// Records tick-driven broadcasts instead of touching a transport
    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<RoomSnapshot>>,
    }

    impl SnapshotSink for RecordingSink {
        fn room_update(&self, snapshot: &RoomSnapshot) {
            self.updates.lock().unwrap().push(snapshot.clone());
        }
    }

    fn coordinator() -> SessionCoordinator {
        SessionCoordinator::new(Arc::new(RecordingSink::default()))
    }

    fn walk_update(x: f32) -> PositionUpdate {
        PositionUpdate {
            x,
            y: 0.0,
            direction: Direction::East,
            action: PlayerAction::Walk,
            frame: 1,
        }
    }

    /// Join two players, ready both, start the countdown, and tick the
    /// room into the playing phase. Returns the room id.
    fn start_race(coord: &SessionCoordinator, a: Uuid, b: Uuid) -> u64 {
        coord.join(a);
        let (snap, _) = coord.join(b);
        let room_id = snap.room_id;
        assert!(coord.set_ready(a));
        assert!(coord.set_ready(b));
        assert!(coord.all_ready(room_id));
        let snap = coord.start_countdown(room_id).unwrap();
        let started = coord.tick(snap.race_start_ms);
        assert_eq!(started.len(), 1);
        room_id
    }

    #[test]
    fn third_join_creates_a_new_room() {
        let coord = coordinator();
        let (first, created) = coord.join(Uuid::new_v4());
        assert!(created);
        let (second, created) = coord.join(Uuid::new_v4());
        assert!(!created);
        assert_eq!(second.room_id, first.room_id);
        assert_eq!(second.players.len(), 2);

        let (third, created) = coord.join(Uuid::new_v4());
        assert!(created);
        assert_ne!(third.room_id, first.room_id);
        assert_eq!(coord.active_rooms(), 2);
    }

    #[test]
    fn join_assigns_lanes_colors_and_start_position() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        coord.join(a);
        let (snap, _) = coord.join(b);

        let pa = &snap.players[&a];
        assert_eq!(pa.y, 0.0);
        assert_eq!(pa.color_tint, ColorTint::Yellow);
        assert_eq!(pa.x, START_X);

        let pb = &snap.players[&b];
        assert_eq!(pb.y, 1.0);
        assert_eq!(pb.color_tint, ColorTint::Blue);
        assert_eq!(pb.x, START_X);
    }

    #[test]
    fn second_join_moves_waiting_room_to_ready_check() {
        let coord = coordinator();
        let (snap, _) = coord.join(Uuid::new_v4());
        assert_eq!(snap.status, RoomStatus::Waiting);
        let (snap, _) = coord.join(Uuid::new_v4());
        assert_eq!(snap.status, RoomStatus::ReadyCheck);
    }

    #[test]
    fn rejoin_is_idempotent() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (first, _) = coord.join(a);
        let (again, created) = coord.join(a);
        assert!(!created);
        assert_eq!(again.room_id, first.room_id);
        assert_eq!(again.players.len(), 1);
    }

    #[test]
    fn all_ready_tracks_every_present_player() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        coord.join(a);
        let (snap, _) = coord.join(b);
        let room_id = snap.room_id;

        assert!(!coord.all_ready(room_id));
        assert!(coord.set_ready(a));
        assert!(!coord.all_ready(room_id));
        assert!(coord.set_ready(b));
        assert!(coord.all_ready(room_id));

        // Unknown room is never ready
        assert!(!coord.all_ready(9999));
    }

    #[test]
    fn countdown_stamps_race_start_and_resets_positions() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let room_id = start_race(&coord, a, b);

        coord.update_position(a, walk_update(150.0));
        assert!(coord.finish(a).is_some());
        assert!(coord.request_restart(a));
        assert!(coord.set_ready(a));
        assert!(coord.set_ready(b));

        let snap = coord.start_countdown(room_id).unwrap();
        assert_eq!(snap.status, RoomStatus::Countdown);
        assert_eq!(snap.race_start_ms, snap.countdown_start_ms + COUNTDOWN_MS);
        assert_eq!(snap.finished_player, None);
        for player in snap.players.values() {
            assert_eq!(player.x, START_X);
            assert!(!player.is_ready);
        }
    }

    #[test]
    fn sole_ready_player_can_start_countdown_from_waiting() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (snap, _) = coord.join(a);
        assert!(coord.set_ready(a));
        assert!(coord.all_ready(snap.room_id));
        let snap = coord.start_countdown(snap.room_id).unwrap();
        assert_eq!(snap.status, RoomStatus::Countdown);
    }

    #[test]
    fn countdown_cannot_start_twice() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (snap, _) = coord.join(a);
        coord.set_ready(a);
        assert!(coord.start_countdown(snap.room_id).is_some());
        assert!(coord.start_countdown(snap.room_id).is_none());
    }

    #[test]
    fn small_movement_is_accepted_verbatim() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (snap, _) = coord.join(a);
        coord.set_ready(a);
        let snap = coord.start_countdown(snap.room_id).unwrap();
        coord.tick(snap.race_start_ms);

        coord.update_position(a, walk_update(START_X + MAX_STEP_X));
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.players[&a].x, START_X + MAX_STEP_X);
    }

    #[test]
    fn teleport_movement_is_clamped_to_fixed_step() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);

        coord.update_position(a, walk_update(START_X + MAX_STEP_X + 0.5));
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.players[&a].x, START_X + CLAMPED_STEP_X);
    }

    #[test]
    fn movement_outside_playing_is_ignored() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        coord.join(a);

        coord.update_position(a, walk_update(150.0));
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.players[&a].x, START_X);

        // Unknown connection is a no-op, not a panic
        coord.update_position(Uuid::new_v4(), walk_update(150.0));
    }

    #[test]
    fn movement_carries_unvalidated_fields() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);

        coord.update_position(
            a,
            PositionUpdate {
                x: 120.0,
                y: 1.0,
                direction: Direction::North,
                action: PlayerAction::Walk,
                frame: 7,
            },
        );
        let view = &coord.room_for(a).unwrap().players[&a];
        assert_eq!(view.y, 1.0);
        assert_eq!(view.direction, Direction::North);
        assert_eq!(view.action, PlayerAction::Walk);
        assert_eq!(view.current_frame, 7);
    }

    #[test]
    fn first_finish_wins_and_second_is_a_no_op() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);

        let result = coord.finish(a).unwrap();
        assert_eq!(result.winner, a);
        assert_eq!(result.snapshot.status, RoomStatus::GameOver);

        assert!(coord.finish(b).is_none());
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.finished_player, Some(a));
    }

    #[test]
    fn finish_outside_playing_is_a_no_op() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        coord.join(a);
        assert!(coord.finish(a).is_none());
        assert!(coord.finish(Uuid::new_v4()).is_none());
    }

    #[test]
    fn last_leave_destroys_the_room() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (first, _) = coord.join(a);
        assert!(coord.leave(a).is_none());
        assert_eq!(coord.active_rooms(), 0);

        let (next, created) = coord.join(Uuid::new_v4());
        assert!(created);
        assert_ne!(next.room_id, first.room_id);
    }

    #[test]
    fn leave_mid_game_resets_survivor_to_waiting() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);
        coord.set_ready(b); // ignored while playing, readiness stays false anyway

        let snap = coord.leave(a).unwrap();
        assert_eq!(snap.status, RoomStatus::Waiting);
        assert!(!snap.players[&b].is_ready);
        assert_eq!(snap.players.len(), 1);
    }

    #[test]
    fn leave_after_game_over_keeps_the_result() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);
        coord.finish(a);

        let snap = coord.leave(b).unwrap();
        assert_eq!(snap.status, RoomStatus::GameOver);
        assert_eq!(snap.finished_player, Some(a));
    }

    #[test]
    fn leave_for_unknown_connection_is_none() {
        let coord = coordinator();
        assert!(coord.leave(Uuid::new_v4()).is_none());
    }

    #[test]
    fn leave_racing_join_never_orphans_a_connection() {
        // A join can re-seat an emptied room between leave's player
        // removal and the room teardown; the teardown must re-check
        // emptiness under the entry lock so the newcomer survives
        for _ in 0..500 {
            let coord = Arc::new(coordinator());
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            coord.join(a);

            let joiner = {
                let coord = coord.clone();
                std::thread::spawn(move || {
                    coord.join(b);
                })
            };
            coord.leave(a);
            joiner.join().unwrap();

            let snap = coord
                .room_for(b)
                .expect("joined connection must resolve to a live room");
            assert!(snap.players.contains_key(&b));
        }
    }

    #[test]
    fn restart_with_two_players_returns_to_ready_check() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);
        coord.finish(a);

        assert!(coord.request_restart(b));
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.status, RoomStatus::ReadyCheck);
        assert!(snap.players.values().all(|p| !p.is_ready));
    }

    #[test]
    fn restart_with_one_player_returns_to_waiting() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);
        coord.finish(a);
        coord.leave(b);

        assert!(coord.request_restart(a));
        let snap = coord.room_for(a).unwrap();
        assert_eq!(snap.status, RoomStatus::Waiting);
    }

    #[test]
    fn restart_outside_game_over_is_rejected() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        coord.join(a);
        assert!(!coord.request_restart(a));
        assert!(!coord.request_restart(Uuid::new_v4()));
    }

    #[test]
    fn ready_is_rejected_outside_lobby_phases() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        start_race(&coord, a, b);
        assert!(!coord.set_ready(a));
        coord.finish(a);
        assert!(!coord.set_ready(a));
        assert!(!coord.set_ready(Uuid::new_v4()));
    }

    #[test]
    fn color_selection_in_lobby_only_last_write_wins() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        coord.join(a);
        assert!(coord.set_color(a, ColorTint::Blue));
        assert!(coord.set_color(a, ColorTint::Yellow));
        assert_eq!(
            coord.room_for(a).unwrap().players[&a].color_tint,
            ColorTint::Yellow
        );

        let snap = coord.room_for(a).unwrap();
        coord.set_ready(a);
        coord.start_countdown(snap.room_id);
        assert!(!coord.set_color(a, ColorTint::Blue));
        assert!(!coord.set_color(Uuid::new_v4(), ColorTint::Blue));
    }

    #[test]
    fn tick_promotes_countdown_rooms_only_when_due() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let (snap, _) = coord.join(a);
        coord.set_ready(a);
        let snap = coord.start_countdown(snap.room_id).unwrap();

        assert!(coord.tick(snap.race_start_ms - 1).is_empty());
        let started = coord.tick(snap.race_start_ms);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].status, RoomStatus::Playing);

        // Already playing: the next tick has nothing to do
        assert!(coord.tick(snap.race_start_ms + TICK_INTERVAL_MS).is_empty());
    }

    #[test]
    fn end_to_end_two_player_race_cycle() {
        let coord = coordinator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        coord.join(a);
        let (snap, _) = coord.join(b);
        let room_id = snap.room_id;
        assert_eq!(snap.status, RoomStatus::ReadyCheck);

        assert!(coord.set_ready(a));
        assert!(coord.set_ready(b));
        assert!(coord.all_ready(room_id));
        let snap = coord.start_countdown(room_id).unwrap();

        // No client action after this point; the tick alone starts play
        let started = coord.tick(snap.race_start_ms + 1);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].status, RoomStatus::Playing);

        coord.update_position(a, walk_update(180.0));
        let result = coord.finish(a).unwrap();
        assert_eq!(result.winner, a);

        assert!(coord.request_restart(b));
        assert_eq!(coord.room_for(a).unwrap().status, RoomStatus::ReadyCheck);
    }

    #[tokio::test(start_paused = true)]
    async fn run_broadcasts_transitions_and_stops_on_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let coord = Arc::new(SessionCoordinator::new(sink.clone()));

        let a = Uuid::new_v4();
        let (snap, _) = coord.join(a);
        coord.set_ready(a);
        coord.start_countdown(snap.room_id);

        // Backdate the race start so the very first wall-clock read in
        // the loop sees an expired countdown
        {
            let mut room = coord.rooms.get_mut(&snap.room_id).unwrap();
            room.countdown_start_ms = 0;
            room.race_start_ms = 0;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coord.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(2 * TICK_INTERVAL_MS)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(coord.room_for(a).unwrap().status, RoomStatus::Playing);
        let updates = sink.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, RoomStatus::Playing);
    }
}
