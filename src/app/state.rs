//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::SessionCoordinator;
use crate::store::{ScoreStore, SupabaseClient};
use crate::ws::ConnectionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionRegistry>,
    pub coordinator: Arc<SessionCoordinator>,
    pub scores: ScoreStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize Supabase-backed leaderboard
        let supabase = SupabaseClient::new(&config);
        let scores = ScoreStore::new(supabase, config.leaderboard_limit);

        // The registry doubles as the coordinator's broadcast sink
        let connections = Arc::new(ConnectionRegistry::new());
        let coordinator = Arc::new(SessionCoordinator::new(connections.clone()));

        Self {
            config,
            connections,
            coordinator,
            scores,
        }
    }
}
