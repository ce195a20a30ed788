//! Voter accounts: login, key registration, and the has-voted flag.

use std::sync::Arc;

use sqlx::SqlitePool;
use types_rs::{
    auth::{Email, LoginRequest, LoginResponse},
    election::Profile,
};

use crate::{
    credentials::{CredentialError, DynPasswordHasher},
    crypto::{self, CryptoError, DynRingCrypto, KeyPair},
    db::{self, User},
};

pub use crate::db::HasVoted;

#[derive(Debug, thiserror::Error)]
pub enum VoterError {
    #[error("{0}")]
    InvalidEmail(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("no user with email {0}")]
    NotFound(Email),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn parse_email(email: &str) -> Result<Email, VoterError> {
    email.parse().map_err(VoterError::InvalidEmail)
}

/// Checks a user's password. An unknown email and a wrong password are
/// indistinguishable to the caller.
pub async fn login(
    pool: &SqlitePool,
    hasher: &DynPasswordHasher,
    LoginRequest { email, password }: LoginRequest,
) -> Result<LoginResponse, VoterError> {
    let email = parse_email(&email)?;

    let user = {
        let mut conn = pool.acquire().await?;
        db::get_user_by_email(&mut conn, email.as_str()).await?
    };
    let Some(user) = user else {
        tracing::debug!("Login attempt for unknown user {email}");
        return Err(VoterError::InvalidCredentials);
    };

    let hasher = Arc::clone(hasher);
    let hash = user.password.clone();
    let verified =
        tokio::task::spawn_blocking(move || hasher.verify_password(&password, &hash)).await??;
    if !verified {
        tracing::debug!("Wrong password for {email}");
        return Err(VoterError::InvalidCredentials);
    }

    Ok(LoginResponse {
        success: true,
        has_public_key: user.has_public_key(),
        email,
        constituency: user.constituency,
        is_central_authority: user.is_central_authority,
    })
}

pub async fn generate_key_pair(crypto: &DynRingCrypto) -> Result<KeyPair, VoterError> {
    let ring = Arc::clone(crypto);
    Ok(tokio::task::spawn_blocking(move || crypto::generate_key_pair(ring.as_ref())).await??)
}

/// Signs `message` with a linkable ring signature over the folded public keys.
pub async fn sign(
    crypto: &DynRingCrypto,
    folded_public_keys: String,
    private_key: String,
    message: String,
) -> Result<String, VoterError> {
    let ring = Arc::clone(crypto);
    Ok(tokio::task::spawn_blocking(move || {
        ring.sign(&folded_public_keys, &private_key, message.as_bytes())
    })
    .await??)
}

/// Registers a voter's keys. The private key is only kept when `profile`
/// allows it.
pub async fn store_keys(
    pool: &SqlitePool,
    profile: Profile,
    email: &str,
    public_key: &str,
    private_key: Option<&str>,
) -> Result<(), VoterError> {
    let email = parse_email(email)?;

    let private_key = match private_key.filter(|key| !key.is_empty()) {
        Some(key) if profile.persists_private_keys() => Some(key),
        Some(_) => {
            tracing::warn!("Discarding private key for {email}: not stored in {profile}");
            None
        }
        None => None,
    };

    let mut conn = pool.acquire().await?;
    if !db::update_keys_by_email(&mut conn, email.as_str(), public_key, private_key).await? {
        return Err(VoterError::NotFound(email));
    }

    tracing::info!("Stored public key for {email}");
    Ok(())
}

pub async fn record_has_voted(pool: &SqlitePool, email: &str) -> Result<HasVoted, VoterError> {
    let email = parse_email(email)?;
    let mut conn = pool.acquire().await?;
    db::mark_has_voted(&mut conn, email.as_str())
        .await?
        .ok_or(VoterError::NotFound(email))
}

pub async fn get_user(pool: &SqlitePool, email: &str) -> Result<User, VoterError> {
    let email = parse_email(email)?;
    let mut conn = pool.acquire().await?;
    db::get_user_by_email(&mut conn, email.as_str())
        .await?
        .ok_or(VoterError::NotFound(email))
}

pub async fn get_voters(pool: &SqlitePool) -> Result<Vec<User>, VoterError> {
    let mut conn = pool.acquire().await?;
    Ok(db::get_voters(&mut conn).await?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::{
        credentials::{Argon2Hasher, Argon2Params, MockPasswordHasher},
        crypto::{MockRingCrypto, OpensslRingCrypto},
        db::NewUser,
    };

    fn hasher() -> DynPasswordHasher {
        Arc::new(Argon2Hasher::with_params(Argon2Params {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }))
    }

    async fn seed(pool: &SqlitePool, hasher: &DynPasswordHasher) {
        let user = NewUser {
            uuid: Uuid::now_v7(),
            email: "user1@sentinelvote.tech".to_owned(),
            password: hasher.hash_password("Password1!").unwrap(),
            first_name: "Nur".to_owned(),
            last_name: "Aisyah".to_owned(),
            constituency: "Sembawang".to_owned(),
            is_central_authority: false,
            public_key: String::new(),
            private_key: String::new(),
            is_default_password: false,
        };
        db::insert_users(&mut pool.acquire().await.unwrap(), &[user])
            .await
            .unwrap();
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        }
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_login(pool: SqlitePool) {
        let hasher = hasher();
        seed(&pool, &hasher).await;

        let response = login(
            &pool,
            &hasher,
            login_request("user1@sentinelvote.tech", "Password1!"),
        )
        .await
        .unwrap();
        assert_eq!(
            response,
            LoginResponse {
                success: true,
                email: "user1@sentinelvote.tech".parse().unwrap(),
                constituency: "Sembawang".to_owned(),
                is_central_authority: false,
                has_public_key: false,
            }
        );
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_login_failures_look_the_same(pool: SqlitePool) {
        let hasher = hasher();
        seed(&pool, &hasher).await;

        let wrong_password = login(
            &pool,
            &hasher,
            login_request("user1@sentinelvote.tech", "password"),
        )
        .await
        .unwrap_err();
        let unknown_user = login(
            &pool,
            &hasher,
            login_request("nobody@sentinelvote.tech", "Password1!"),
        )
        .await
        .unwrap_err();

        assert!(matches!(wrong_password, VoterError::InvalidCredentials));
        assert!(matches!(unknown_user, VoterError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_login_validates_email_before_lookup(pool: SqlitePool) {
        let mut hasher = MockPasswordHasher::new();
        hasher.expect_verify_password().never();
        let hasher: DynPasswordHasher = Arc::new(hasher);

        assert!(matches!(
            login(&pool, &hasher, login_request("not-an-email", "x")).await,
            Err(VoterError::InvalidEmail(_))
        ));
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_store_keys_drops_private_key_in_production(pool: SqlitePool) {
        seed(&pool, &hasher()).await;

        store_keys(
            &pool,
            Profile::Production,
            "user1@sentinelvote.tech",
            "public",
            Some("private"),
        )
        .await
        .unwrap();

        let user = get_user(&pool, "user1@sentinelvote.tech").await.unwrap();
        assert_eq!(user.public_key, "public");
        assert_eq!(user.private_key, "");
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_store_keys_keeps_private_key_in_simulation(pool: SqlitePool) {
        seed(&pool, &hasher()).await;

        store_keys(
            &pool,
            Profile::Simulation,
            "user1@sentinelvote.tech",
            "public",
            Some("private"),
        )
        .await
        .unwrap();

        let user = get_user(&pool, "user1@sentinelvote.tech").await.unwrap();
        assert_eq!(user.private_key, "private");
        assert!(serde_json::to_value(&user).unwrap()["privateKey"].is_string());
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_store_keys_for_unknown_user(pool: SqlitePool) {
        assert!(matches!(
            store_keys(
                &pool,
                Profile::Production,
                "nobody@sentinelvote.tech",
                "public",
                None
            )
            .await,
            Err(VoterError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_record_has_voted(pool: SqlitePool) {
        seed(&pool, &hasher()).await;

        assert_eq!(
            record_has_voted(&pool, "user1@sentinelvote.tech")
                .await
                .unwrap(),
            HasVoted::Recorded
        );
        assert_eq!(
            record_has_voted(&pool, "user1@sentinelvote.tech")
                .await
                .unwrap(),
            HasVoted::AlreadyVoted
        );
        assert!(get_user(&pool, "user1@sentinelvote.tech")
            .await
            .unwrap()
            .has_voted);
        assert!(matches!(
            record_has_voted(&pool, "nobody@sentinelvote.tech").await,
            Err(VoterError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "db/migrations")]
    async fn test_user_json_omits_secrets(pool: SqlitePool) {
        seed(&pool, &hasher()).await;

        let voters = get_voters(&pool).await.unwrap();
        let json = serde_json::to_value(&voters[0]).unwrap();
        assert_eq!(json["email"], "user1@sentinelvote.tech");
        assert_eq!(json["hasVoted"], false);
        assert!(json.get("password").is_none());
        assert!(json.get("privateKey").is_none());
    }

    #[tokio::test]
    async fn test_generate_key_pair() {
        let crypto: DynRingCrypto = Arc::new(OpensslRingCrypto::default());
        let key_pair = generate_key_pair(&crypto).await.unwrap();
        assert_eq!(
            crypto.derive_public_key(&key_pair.private_key).unwrap(),
            key_pair.public_key
        );
    }

    #[tokio::test]
    async fn test_sign() {
        let mut crypto = MockRingCrypto::new();
        crypto
            .expect_sign()
            .withf(|folded, private_key, message| {
                folded == "folded" && private_key == "private" && message == b"candidate-1"
            })
            .times(1)
            .returning(|_, _, _| Ok("signature".to_owned()));
        let crypto: DynRingCrypto = Arc::new(crypto);

        let signature = sign(
            &crypto,
            "folded".to_owned(),
            "private".to_owned(),
            "candidate-1".to_owned(),
        )
        .await
        .unwrap();
        assert_eq!(signature, "signature");
    }

    #[tokio::test]
    async fn test_sign_failure_is_surfaced() {
        let mut crypto = MockRingCrypto::new();
        crypto
            .expect_sign()
            .returning(|_, _, _| Err(CryptoError::SignerNotInRing));
        let crypto: DynRingCrypto = Arc::new(crypto);

        assert!(matches!(
            sign(
                &crypto,
                "folded".to_owned(),
                "private".to_owned(),
                "candidate-1".to_owned()
            )
            .await,
            Err(VoterError::Crypto(CryptoError::SignerNotInRing))
        ));
    }
}
