//! Leaderboard of best race finish times

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::{SupabaseClient, SupabaseError};

/// One leaderboard row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: Uuid,
    pub player_id: String,
    pub time_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// New score for insertion
#[derive(Debug, Clone, Serialize)]
struct NewScore {
    player_id: String,
    time_ms: u64,
}

/// Score store operations against the `race_scores` table.
/// Consulted only to record and query finish times; it never decides
/// game state, and callers swallow its failures.
#[derive(Clone)]
pub struct ScoreStore {
    client: SupabaseClient,
    /// Number of entries the leaderboard exposes
    limit: usize,
}

impl ScoreStore {
    pub fn new(client: SupabaseClient, limit: usize) -> Self {
        Self { client, limit }
    }

    /// Fetch the current top-N fastest finishes
    pub async fn top(&self) -> Result<Vec<ScoreEntry>, SupabaseError> {
        let query = format!("select=*&order=time_ms.asc&limit={}", self.limit);
        self.client.get("race_scores", &query).await
    }

    /// Persist a finish time, then return the refreshed top-N
    pub async fn record(
        &self,
        winner: Uuid,
        time_ms: u64,
    ) -> Result<Vec<ScoreEntry>, SupabaseError> {
        let score = NewScore {
            player_id: winner.to_string(),
            time_ms,
        };
        let _inserted: ScoreEntry = self.client.insert("race_scores", &score).await?;
        self.top().await
    }
}
