mod hash;
mod memory;
mod postgres;

pub use hash::integrity_hash;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::{HistoryEntry, Session, SessionSummary};
use deepresearch_common::{Result, SessionId};

/// Durable session state plus history (§4.5). A plain trait rather than a
/// concrete struct so the Orchestrator and its tests can run against
/// [`InMemoryStore`] without a live Postgres instance.
pub trait Store: Send + Sync {
    /// Insert a new session row, or update an existing one and append a
    /// history entry for `iteration` — branching on whether `session.session_id`
    /// already has a row, not on any nullable id (ids are always present
    /// once a `Session` exists; the insert/update distinction is the
    /// store's existence check, matching the "allocate `_id` on first
    /// save" rule in spirit).
    fn save<'a>(&'a self, session: &'a Session, iteration: i32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn load<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>>;

    fn list<'a>(&'a self, user_id: Option<&'a str>) -> Pin<Box<dyn Future<Output = Result<Vec<SessionSummary>>> + Send + 'a>>;

    fn delete<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Load and return the latest session state; the caller resumes from
    /// `current_iteration` by issuing a *new* research run (§9 — partial
    /// iterations are never resumed mid-link).
    fn resume<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        self.load(id)
    }

    fn history<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>>;

    /// Find the *latest* history entry with `iteration == target_iteration`
    /// (scanning from the end — the last matching snapshot wins), overwrite
    /// `data`/`current_iteration` from it, and recompute the integrity hash.
    fn rollback<'a>(&'a self, id: SessionId, target_iteration: i32) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>>;

    /// Recompute every session's integrity hash and compare to the stored
    /// value, logging mismatches. Advisory only: never deletes or blocks
    /// reads, only excludes mismatching sessions from `list`'s summary
    /// cache (here: flags them, since `list` always reads live from the
    /// store rather than a cache layer of its own).
    fn verify_integrity<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
