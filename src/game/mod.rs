//! Game core: rooms, players, and the session coordinator

pub mod coordinator;
pub mod room;

pub use coordinator::{SessionCoordinator, SnapshotSink};
pub use room::{Player, Room, RoomSnapshot};

/// Maximum players per room
pub const ROOM_CAPACITY: usize = 2;

/// Starting x coordinate for every racer
pub const START_X: f32 = 100.0;

/// Delay between countdown start and race start
pub const COUNTDOWN_MS: u64 = 3000;

/// Period of the background room scan
pub const TICK_INTERVAL_MS: u64 = 100;

/// Largest forward jump accepted from a single movement update
pub const MAX_STEP_X: f32 = 200.0;

/// Fallback advance applied when a movement update exceeds `MAX_STEP_X`
pub const CLAMPED_STEP_X: f32 = 20.0;
