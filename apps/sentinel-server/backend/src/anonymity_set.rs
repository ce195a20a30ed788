//! Builds the anonymity set ring signatures are made over.
//!
//! The set is folded from every registered voter's public key, in the order
//! the voters were created, and stored exactly once. Keys registered after
//! folding are not part of the set.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    crypto::{CryptoError, DynRingCrypto},
    db::{self, Insertion},
    ledger::Ledger,
};

#[derive(Debug, thiserror::Error)]
pub enum FoldError {
    #[error("the public keys have already been folded")]
    AlreadyFolded,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("folding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Folds the registered public keys and stores the result without recording
/// it on the ledger.
pub async fn fold_and_persist(pool: &SqlitePool, crypto: &DynRingCrypto) -> Result<String, FoldError> {
    let mut conn = pool.acquire().await?;

    if db::exists_folded_public_keys(&mut conn).await? {
        return Err(FoldError::AlreadyFolded);
    }

    let public_keys = db::get_public_keys(&mut conn).await?;
    tracing::info!("Folding {} public key(s)", public_keys.len());

    let crypto = Arc::clone(crypto);
    let folded =
        tokio::task::spawn_blocking(move || crypto.fold_public_keys(&public_keys)).await??;

    match db::insert_folded_public_keys(&mut conn, &folded).await? {
        Insertion::Created => Ok(folded),
        Insertion::AlreadyExists => {
            tracing::warn!("Public keys were folded concurrently; discarding this result");
            Err(FoldError::AlreadyFolded)
        }
    }
}

/// Folds the registered public keys, stores the result, and anchors it on the
/// ledger.
///
/// Anchoring is best-effort: if the ledger write fails the error is logged
/// and the stored set is kept.
pub async fn fold_anonymity_set(
    pool: &SqlitePool,
    crypto: &DynRingCrypto,
    ledger: &dyn Ledger,
) -> Result<String, FoldError> {
    let folded = fold_and_persist(pool, crypto).await?;
    anchor(ledger, &folded).await;
    Ok(folded)
}

/// Records the folded public keys on the ledger, returning whether it worked.
pub async fn anchor(ledger: &dyn Ledger, folded_public_keys: &str) -> bool {
    match ledger.put_folded_public_keys(folded_public_keys).await {
        Ok(()) => {
            tracing::info!("Anchored folded public keys on the ledger");
            true
        }
        Err(e) => {
            tracing::error!("Failed to anchor folded public keys on the ledger: {e}");
            false
        }
    }
}

pub async fn folded_public_keys(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    db::get_folded_public_keys(&mut conn).await
}

pub async fn folded_public_keys_exist(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    db::exists_folded_public_keys(&mut conn).await
}
