use sqlx::SqlitePool;
use types_rs::election::Profile;

use crate::{credentials::DynPasswordHasher, crypto::DynRingCrypto, ledger::DynLedger};

/// Contains the application state, used by request handlers.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection pool, sized when the database was provisioned.
    pub pool: SqlitePool,

    /// Profile the database was provisioned for. Decides whether submitted
    /// private keys are kept.
    pub profile: Profile,

    pub crypto: DynRingCrypto,
    pub hasher: DynPasswordHasher,
    pub ledger: DynLedger,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pool", &self.pool)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}
