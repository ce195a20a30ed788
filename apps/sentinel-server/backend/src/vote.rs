//! Vote submission.
//!
//! Votes are not stored locally. Each accepted vote is written to the ledger
//! under a fresh time-ordered key, with the payload exactly as the voter sent
//! it so the ring signature inside it still verifies.

use sqlx::SqlitePool;
use types_rs::votes::VotePayload;
use uuid::Uuid;

use crate::{election, ledger::Ledger};

#[derive(Debug, thiserror::Error)]
pub enum SubmitVoteError {
    #[error("invalid vote: {0}")]
    Invalid(String),

    #[error("the election is closed")]
    ElectionClosed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] ledger_gateway_client::Error),
}

/// Submits a signed vote to the ledger, returning the key it was stored
/// under. The vote is written at most once; a ledger failure is returned
/// without retrying.
pub async fn submit_vote(
    pool: &SqlitePool,
    ledger: &dyn Ledger,
    raw_payload: &[u8],
) -> Result<Uuid, SubmitVoteError> {
    if raw_payload.is_empty() {
        return Err(SubmitVoteError::Invalid("empty payload".to_owned()));
    }
    let payload = std::str::from_utf8(raw_payload)
        .map_err(|e| SubmitVoteError::Invalid(format!("payload is not UTF-8: {e}")))?;
    let vote = VotePayload::validate(raw_payload).map_err(SubmitVoteError::Invalid)?;

    if election::is_election_closed(pool).await? {
        return Err(SubmitVoteError::ElectionClosed);
    }

    let key = Uuid::now_v7();
    ledger.put_vote(&key.to_string(), payload).await?;
    tracing::info!(
        "Recorded vote {key} for constituency {constituency:?}",
        constituency = vote.constituency
    );

    Ok(key)
}
