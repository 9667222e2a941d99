//! Data store modules for the Supabase leaderboard

pub mod scores;
pub mod supabase;

pub use scores::ScoreStore;
pub use supabase::SupabaseClient;
