//! The append-only ledger votes and the folded anonymity set are recorded on.

use std::sync::Arc;

/// Writes to the ledger. Implementations must not retry: every call is one
/// attempt, and a failure is reported to the caller.
#[axum::async_trait]
pub trait Ledger: Send + Sync {
    async fn put_folded_public_keys(
        &self,
        folded_public_keys: &str,
    ) -> Result<(), ledger_gateway_client::Error>;

    async fn put_vote(&self, key: &str, payload: &str) -> Result<(), ledger_gateway_client::Error>;
}

pub type DynLedger = Arc<dyn Ledger>;

#[axum::async_trait]
impl Ledger for ledger_gateway_client::Client {
    async fn put_folded_public_keys(
        &self,
        folded_public_keys: &str,
    ) -> Result<(), ledger_gateway_client::Error> {
        ledger_gateway_client::Client::put_folded_public_keys(self, folded_public_keys).await
    }

    async fn put_vote(&self, key: &str, payload: &str) -> Result<(), ledger_gateway_client::Error> {
        ledger_gateway_client::Client::put_vote(self, key, payload).await
    }
}
