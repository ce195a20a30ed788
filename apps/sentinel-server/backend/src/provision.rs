//! Creates and seeds the database for a run of the server.
//!
//! Every run starts from an empty database sized for the expected number of
//! users. Seeding creates three named accounts and fills the rest with
//! synthetic voters; non-production profiles also issue every voter a key
//! pair and fold the anonymity set up front.

use std::fmt::Debug;

use color_eyre::eyre::WrapErr;
use sqlx::SqlitePool;
use tracing::Level;
use types_rs::election::{Profile, UserCount};
use uuid::Uuid;

use crate::{
    anonymity_set,
    credentials::{DynPasswordHasher, PasswordHasher},
    crypto::{self, DynRingCrypto, RingCrypto},
    db::{self, DatabaseLocation, NewUser},
    ledger::Ledger,
};

pub const MIN_POOL_SIZE: u32 = 4;
pub const MAX_POOL_SIZE: u32 = 1000;

pub const CENTRAL_AUTHORITY_EMAIL: &str = "admin@sentinelvote.tech";
pub const FIRST_VOTER_EMAIL: &str = "user1@sentinelvote.tech";
pub const SECOND_VOTER_EMAIL: &str = "user2@sentinelvote.tech";

/// Accounts created regardless of the requested user count.
const NAMED_ACCOUNTS: u32 = 3;

const FIRST_NAMES: &[&str] = &[
    "Aarav", "Aisyah", "Amir", "Chloe", "Daniel", "Divya", "Farah", "Gabriel", "Hui Min",
    "Ishaan", "Jia Hui", "Kumar", "Li Ting", "Marcus", "Nurul", "Priya", "Rachel", "Siti",
    "Wei Ming", "Zhi Hao",
];

const LAST_NAMES: &[&str] = &[
    "Abdullah", "Chan", "Goh", "Ho", "Ismail", "Koh", "Lee", "Lim", "Menon", "Ng", "Ong",
    "Pillai", "Rahman", "Singh", "Tan", "Teo", "Wong", "Yeo",
];

const CONSTITUENCIES: &[&str] = &[
    "Aljunied",
    "Ang Mo Kio",
    "Bishan-Toa Payoh",
    "East Coast",
    "Holland-Bukit Timah",
    "Jalan Besar",
    "Jurong",
    "Marine Parade",
    "Pasir Ris-Punggol",
    "Sembawang",
    "Tampines",
    "Tanjong Pagar",
    "West Coast",
];

/// Number of pooled connections for `total_users`: three quarters of the
/// users, kept within [`MIN_POOL_SIZE`] and [`MAX_POOL_SIZE`].
pub fn pool_size(total_users: UserCount) -> u32 {
    let scaled = (u64::from(total_users.get()) * 3).div_ceil(4);
    scaled.clamp(u64::from(MIN_POOL_SIZE), u64::from(MAX_POOL_SIZE)) as u32
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub location: DatabaseLocation,
    pub profile: Profile,
    pub total_users: UserCount,

    /// Shared by `user2` and every synthetic voter.
    pub default_password: String,

    /// Used by the central authority and `user1`.
    pub non_default_password: String,
}

impl Debug for ProvisionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionOptions")
            .field("location", &self.location)
            .field("profile", &self.profile)
            .field("total_users", &self.total_users)
            .finish_non_exhaustive()
    }
}

/// Creates a fresh database and seeds it for `options.profile`.
///
/// On failure nothing is left behind: the pool is closed and any database
/// files are removed.
pub async fn provision(
    options: &ProvisionOptions,
    crypto: &DynRingCrypto,
    hasher: &DynPasswordHasher,
    ledger: &dyn Ledger,
) -> color_eyre::Result<SqlitePool> {
    let max_connections = pool_size(options.total_users);
    tracing::info!(
        "Provisioning {profile} database at {location:?} for {users} user(s) with {max_connections} connection(s)",
        profile = options.profile,
        location = options.location,
        users = options.total_users,
    );

    let pool = match db::setup(&options.location, max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database setup failed: {e}");
            discard(None, &options.location).await;
            return Err(e.wrap_err("failed to create database"));
        }
    };

    match seed(&pool, options, crypto, hasher, ledger).await {
        Ok(()) => Ok(pool),
        Err(e) => {
            tracing::error!("Provisioning failed: {e}");
            discard(Some(&pool), &options.location).await;
            Err(e)
        }
    }
}

async fn discard(pool: Option<&SqlitePool>, location: &DatabaseLocation) {
    if let Some(pool) = pool {
        pool.close().await;
    }
    if let DatabaseLocation::File(path) = location {
        if let Err(e) = db::remove_database_files(path) {
            tracing::error!("Failed to remove {}: {e}", path.display());
        }
    }
}

async fn seed(
    pool: &SqlitePool,
    options: &ProvisionOptions,
    crypto: &DynRingCrypto,
    hasher: &DynPasswordHasher,
    ledger: &dyn Ledger,
) -> color_eyre::Result<()> {
    let users = {
        let options = options.clone();
        let crypto = DynRingCrypto::clone(crypto);
        let hasher = DynPasswordHasher::clone(hasher);
        tokio::task::spawn_blocking(move || {
            let _entered = tracing::span!(Level::DEBUG, "Generating users").entered();
            build_users(&options, crypto.as_ref(), hasher.as_ref())
        })
        .await??
    };

    let mut txn = pool.begin().await?;
    db::insert_users(&mut txn, &users)
        .await
        .wrap_err("failed to insert users")?;
    txn.commit().await?;
    tracing::info!("Seeded {} user(s)", users.len());

    if options.profile.folds_at_seed_time() {
        let folded = anonymity_set::fold_and_persist(pool, crypto)
            .await
            .wrap_err("failed to fold public keys")?;
        if options.profile.anchors_at_seed_time() {
            anonymity_set::anchor(ledger, &folded).await;
        }
    }

    Ok(())
}

fn build_users(
    options: &ProvisionOptions,
    ring: &(dyn RingCrypto + Send + Sync),
    hasher: &(dyn PasswordHasher + Send + Sync),
) -> color_eyre::Result<Vec<NewUser>> {
    let persist_private_key = |private_key: String| {
        if options.profile.persists_private_keys() {
            private_key
        } else {
            String::new()
        }
    };

    // every default-password account shares one hash
    let default_hash = hasher.hash_password(&options.default_password)?;

    let total = options.total_users.get();
    let mut users = Vec::with_capacity(total as usize);

    users.push(NewUser {
        uuid: Uuid::now_v7(),
        email: CENTRAL_AUTHORITY_EMAIL.to_owned(),
        password: hasher.hash_password(&options.non_default_password)?,
        first_name: "Central".to_owned(),
        last_name: "Authority".to_owned(),
        constituency: String::new(),
        is_central_authority: true,
        public_key: String::new(),
        private_key: String::new(),
        is_default_password: false,
    });

    for (email, password, is_default_password, first_name, constituency) in [
        (
            FIRST_VOTER_EMAIL,
            hasher.hash_password(&options.non_default_password)?,
            false,
            "Alice",
            "Bishan-Toa Payoh",
        ),
        (
            SECOND_VOTER_EMAIL,
            default_hash.clone(),
            true,
            "Bob",
            "Jurong",
        ),
    ] {
        let key_pair = crypto::generate_key_pair(ring)?;
        users.push(NewUser {
            uuid: Uuid::now_v7(),
            email: email.to_owned(),
            password,
            first_name: first_name.to_owned(),
            last_name: "Tan".to_owned(),
            constituency: constituency.to_owned(),
            is_central_authority: false,
            public_key: key_pair.public_key,
            private_key: persist_private_key(key_pair.private_key),
            is_default_password,
        });
    }

    for n in 0..total.saturating_sub(NAMED_ACCOUNTS) as usize {
        let (public_key, private_key) = if options.profile.issues_keys_at_seed_time() {
            let key_pair = crypto::generate_key_pair(ring)?;
            (key_pair.public_key, persist_private_key(key_pair.private_key))
        } else {
            (String::new(), String::new())
        };

        users.push(NewUser {
            uuid: Uuid::now_v7(),
            email: format!("voter{}@sentinelvote.tech", n + 1),
            password: default_hash.clone(),
            first_name: FIRST_NAMES[n % FIRST_NAMES.len()].to_owned(),
            last_name: LAST_NAMES[(n / FIRST_NAMES.len()) % LAST_NAMES.len()].to_owned(),
            constituency: CONSTITUENCIES[n % CONSTITUENCIES.len()].to_owned(),
            is_central_authority: false,
            public_key,
            private_key,
            is_default_password: true,
        });
    }

    Ok(users)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        credentials::{Argon2Hasher, Argon2Params},
        crypto::{CryptoError, MockRingCrypto, OpensslRingCrypto},
        election,
        ledger::testing::RecordingLedger,
    };

    fn options(profile: Profile, total_users: u32) -> ProvisionOptions {
        ProvisionOptions {
            location: DatabaseLocation::Memory,
            profile,
            total_users: UserCount::try_from(total_users).unwrap(),
            default_password: "password".to_owned(),
            non_default_password: "Password1!".to_owned(),
        }
    }

    fn hasher() -> DynPasswordHasher {
        Arc::new(Argon2Hasher::with_params(Argon2Params {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }))
    }

    fn crypto() -> DynRingCrypto {
        Arc::new(OpensslRingCrypto::default())
    }

    async fn voters(pool: &SqlitePool) -> Vec<db::User> {
        db::get_voters(&mut pool.acquire().await.unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_pool_size() {
        let size = |users| pool_size(UserCount::clamped(users));
        assert_eq!(size(3), 4);
        assert_eq!(size(4), 4);
        assert_eq!(size(6), 5);
        assert_eq!(size(1000), 750);
        assert_eq!(size(1333), 1000);
        assert_eq!(size(1334), 1000);
        assert_eq!(size(1_000_000), 1000);
        assert_eq!(size(u64::MAX), 1000);
    }

    proptest! {
        #[test]
        fn test_pool_size_is_bounded_and_monotonic(users in 3u32..=1_000_000) {
            let count = UserCount::try_from(users).unwrap();
            let size = pool_size(count);
            prop_assert!((MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size));
            prop_assert!(u64::from(size) * 4 >= (u64::from(users) * 3).min(4000));
            if users < UserCount::MAX {
                let next = UserCount::try_from(users + 1).unwrap();
                prop_assert!(pool_size(next) >= size);
            }
        }
    }

    #[tokio::test]
    async fn test_production_seeding() {
        let ledger = RecordingLedger::default();
        let pool = provision(&options(Profile::Production, 5), &crypto(), &hasher(), &ledger)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(db::count_users(&mut conn).await.unwrap(), 5);
        assert!(!db::exists_folded_public_keys(&mut conn).await.unwrap());
        drop(conn);
        assert!(!election::is_election_closed(&pool).await.unwrap());

        let voters = voters(&pool).await;
        let emails: Vec<_> = voters.iter().map(|voter| voter.email.as_str()).collect();
        assert_eq!(
            emails,
            vec![
                FIRST_VOTER_EMAIL,
                SECOND_VOTER_EMAIL,
                "voter1@sentinelvote.tech",
                "voter2@sentinelvote.tech",
            ]
        );
        assert!(voters[0].has_public_key());
        assert!(voters[1].has_public_key());
        assert!(!voters[2].has_public_key());
        assert!(voters.iter().all(|voter| voter.private_key.is_empty()));
        assert!(!voters[0].is_default_password);
        assert!(voters[1..].iter().all(|voter| voter.is_default_password));
        assert!(voters[1..]
            .iter()
            .all(|voter| voter.password == voters[1].password));

        assert!(ledger.folded_public_keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_authority_and_first_voter_have_their_own_hashes() {
        let hasher = hasher();
        let pool = provision(
            &options(Profile::Production, 3),
            &crypto(),
            &hasher,
            &RecordingLedger::default(),
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let admin = db::get_user_by_email(&mut conn, CENTRAL_AUTHORITY_EMAIL)
            .await
            .unwrap()
            .unwrap();
        let user1 = db::get_user_by_email(&mut conn, FIRST_VOTER_EMAIL)
            .await
            .unwrap()
            .unwrap();

        assert!(admin.is_central_authority);
        assert!(!admin.is_default_password);
        assert_ne!(admin.password, user1.password);
        assert!(hasher.verify_password("Password1!", &admin.password).unwrap());
        assert!(hasher.verify_password("Password1!", &user1.password).unwrap());
    }

    #[tokio::test]
    async fn test_simulation_seeding_folds_without_anchoring() {
        let ledger = RecordingLedger::default();
        let pool = provision(&options(Profile::Simulation, 6), &crypto(), &hasher(), &ledger)
            .await
            .unwrap();

        let voters = voters(&pool).await;
        assert_eq!(voters.len(), 5);
        assert!(voters.iter().all(|voter| voter.has_public_key()));
        assert!(voters.iter().all(|voter| !voter.private_key.is_empty()));

        let folded = anonymity_set::folded_public_keys(&pool).await.unwrap();
        assert!(folded.unwrap().contains("KeyCount: 5\n"));
        assert!(ledger.folded_public_keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_simulation_anchors_the_folded_set() {
        let ledger = RecordingLedger::default();
        let pool = provision(
            &options(Profile::SimulationFull, 4),
            &crypto(),
            &hasher(),
            &ledger,
        )
        .await
        .unwrap();

        let folded = anonymity_set::folded_public_keys(&pool).await.unwrap();
        assert_eq!(*ledger.folded_public_keys.lock().unwrap(), vec![folded.unwrap()]);
    }

    #[tokio::test]
    async fn test_anchor_failure_does_not_abort_provisioning() {
        let pool = provision(
            &options(Profile::SimulationFull, 3),
            &crypto(),
            &hasher(),
            &RecordingLedger::failing(),
        )
        .await
        .unwrap();

        assert!(anonymity_set::folded_public_keys_exist(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_provisioning_removes_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("election.db");

        let mut crypto = MockRingCrypto::new();
        crypto
            .expect_generate_private_key()
            .returning(|| Ok("private".to_owned()));
        crypto
            .expect_derive_public_key()
            .returning(|private_key| Ok(format!("public-of-{private_key}")));
        crypto.expect_fold_public_keys().returning(|keys| {
            Err(CryptoError::InsufficientKeys {
                required: keys.len() + 1,
                found: keys.len(),
            })
        });
        let crypto: DynRingCrypto = Arc::new(crypto);

        let result = provision(
            &ProvisionOptions {
                location: DatabaseLocation::File(path.clone()),
                ..options(Profile::Simulation, 3)
            },
            &crypto,
            &hasher(),
            &RecordingLedger::default(),
        )
        .await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_setup_leaves_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, "").unwrap();
        let path = blocker.join("election.db");

        let mut crypto = MockRingCrypto::new();
        crypto.expect_generate_private_key().never();
        let crypto: DynRingCrypto = Arc::new(crypto);

        let result = provision(
            &ProvisionOptions {
                location: DatabaseLocation::File(path.clone()),
                ..options(Profile::Production, 3)
            },
            &crypto,
            &hasher(),
            &RecordingLedger::default(),
        )
        .await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_debug_hides_passwords() {
        let debug = format!("{:?}", options(Profile::Production, 3));
        assert!(!debug.contains("Password1!"), "{debug}");
    }
}
