//! Election state. An election starts open and can be closed once; it never
//! reopens.

use sqlx::SqlitePool;

use crate::db::{self, Insertion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

impl CloseOutcome {
    pub fn already_closed(self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }
}

/// Closes the election. Closing a closed election succeeds and reports
/// [`CloseOutcome::AlreadyClosed`].
pub async fn close_election(pool: &SqlitePool) -> Result<CloseOutcome, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let outcome = match db::insert_end_of_election(&mut conn).await? {
        Insertion::Created => {
            tracing::info!("Election closed");
            CloseOutcome::Closed
        }
        Insertion::AlreadyExists => {
            tracing::debug!("Election was already closed");
            CloseOutcome::AlreadyClosed
        }
    };
    Ok(outcome)
}

pub async fn is_election_closed(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    db::exists_end_of_election(&mut conn).await
}
