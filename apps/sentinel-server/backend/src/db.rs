//! Database access for the application.
//!
//! All direct use of [SQLx][`sqlx`] queries should be in this module. Queries
//! are checked at runtime rather than with the `query!` macros, so building
//! does not require a live database or offline query metadata.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Serialize;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult,
        SqliteSynchronous,
    },
    QueryBuilder, Sqlite, SqliteConnection, SqlitePool,
};
use tracing::Level;
use uuid::Uuid;

/// Rows per `INSERT` statement when seeding users. Each row binds ten
/// parameters, which keeps a batch under SQLite's bound-parameter limit.
const INSERT_BATCH_SIZE: usize = 1000;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// A private in-memory database that lives as long as its pool.
    Memory,

    /// A database file. Its `-wal` and `-shm` side files live next to it.
    File(PathBuf),
}

impl DatabaseLocation {
    fn connect_options(&self) -> Result<SqliteConnectOptions, sqlx::Error> {
        match self {
            // every `sqlite::memory:` pool gets its own shared-cache database
            Self::Memory => SqliteConnectOptions::from_str("sqlite::memory:"),
            Self::File(path) => Ok(SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5))),
        }
    }
}

/// Creates a fresh database at `location` and runs all migrations, returning
/// the pool to be used by the app.
///
/// This is destructive: an existing database file and its side files are
/// removed first.
pub async fn setup(location: &DatabaseLocation, max_connections: u32) -> color_eyre::Result<SqlitePool> {
    let _entered = tracing::span!(Level::DEBUG, "Setting up database").entered();

    if let DatabaseLocation::File(path) = location {
        remove_database_files(path)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(location.connect_options()?)
        .await?;
    if let Err(e) = sqlx::migrate!("db/migrations").run(&pool).await {
        pool.close().await;
        return Err(e.into());
    }
    Ok(pool)
}

/// Removes a database file along with its `-wal` and `-shm` side files.
/// Files that do not exist are ignored.
pub fn remove_database_files(path: &Path) -> std::io::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file: OsString = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::debug!("Removed {}", PathBuf::from(file).display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Outcome of inserting into a table that admits at most one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Created,
    AlreadyExists,
}

fn classify_insertion(
    result: Result<SqliteQueryResult, sqlx::Error>,
) -> Result<Insertion, sqlx::Error> {
    match result {
        Ok(_) => Ok(Insertion::Created),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(Insertion::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// A user row to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uuid: Uuid,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub constituency: String,
    pub is_central_authority: bool,
    pub public_key: String,
    pub private_key: String,
    pub is_default_password: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uuid: String,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub constituency: String,
    pub is_central_authority: bool,
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    pub has_voted: bool,
    pub is_default_password: bool,
}

impl User {
    pub fn has_public_key(&self) -> bool {
        !self.public_key.is_empty()
    }
}

const USER_COLUMNS: &str = r#"
    uuid,
    email,
    password,
    first_name,
    last_name,
    constituency,
    is_central_authority,
    public_key,
    private_key,
    has_voted,
    is_default_password
"#;

/// Inserts `users` in batches. Callers wanting all-or-nothing semantics
/// should pass a transaction.
pub async fn insert_users(
    connection: &mut SqliteConnection,
    users: &[NewUser],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for batch in users.chunks(INSERT_BATCH_SIZE) {
        let mut query_builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"
            INSERT INTO users (
                uuid,
                email,
                password,
                first_name,
                last_name,
                constituency,
                is_central_authority,
                public_key,
                private_key,
                is_default_password
            )
            "#,
        );
        query_builder.push_values(batch, |mut row, user| {
            row.push_bind(user.uuid.to_string())
                .push_bind(&user.email)
                .push_bind(&user.password)
                .push_bind(&user.first_name)
                .push_bind(&user.last_name)
                .push_bind(&user.constituency)
                .push_bind(user.is_central_authority)
                .push_bind(&user.public_key)
                .push_bind(&user.private_key)
                .push_bind(user.is_default_password);
        });
        inserted += query_builder
            .build()
            .execute(&mut *connection)
            .await?
            .rows_affected();
    }

    tracing::debug!("Inserted {inserted} user(s)");
    Ok(inserted)
}

pub async fn count_users(connection: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(connection)
        .await
}

pub async fn get_user_by_email(
    connection: &mut SqliteConnection,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(email)
        .fetch_optional(connection)
        .await
}

/// Gets all voters, those with a registered public key first, each group in
/// insertion order.
pub async fn get_voters(connection: &mut SqliteConnection) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE is_central_authority = FALSE
        ORDER BY public_key = '', rowid
        "#
    ))
    .fetch_all(connection)
    .await
}

/// Gets the registered public keys of all voters in insertion order. This
/// order determines the folded anonymity set.
pub async fn get_public_keys(connection: &mut SqliteConnection) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT public_key
        FROM users
        WHERE is_central_authority = FALSE AND public_key != ''
        ORDER BY rowid
        "#,
    )
    .fetch_all(connection)
    .await
}

/// Sets a user's public key, and their private key when one is given.
/// Returns `false` if no user has the given email.
pub async fn update_keys_by_email(
    connection: &mut SqliteConnection,
    email: &str,
    public_key: &str,
    private_key: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET public_key = ?, private_key = COALESCE(?, private_key)
        WHERE email = ?
        "#,
    )
    .bind(public_key)
    .bind(private_key)
    .bind(email)
    .execute(connection)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Outcome of recording that a voter has voted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasVoted {
    Recorded,
    AlreadyVoted,
}

/// Flips a voter's has-voted flag. The flag is never cleared. Returns `None`
/// if no user has the given email.
pub async fn mark_has_voted(
    connection: &mut SqliteConnection,
    email: &str,
) -> Result<Option<HasVoted>, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET has_voted = TRUE WHERE email = ? AND has_voted = FALSE")
        .bind(email)
        .execute(&mut *connection)
        .await?;

    if result.rows_affected() > 0 {
        return Ok(Some(HasVoted::Recorded));
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(email)
        .fetch_one(connection)
        .await?;
    Ok(exists.then_some(HasVoted::AlreadyVoted))
}

pub async fn exists_folded_public_keys(
    connection: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM folded_public_keys)")
        .fetch_one(connection)
        .await
}

pub async fn get_folded_public_keys(
    connection: &mut SqliteConnection,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT folded_public_keys FROM folded_public_keys WHERE singleton = 1")
        .fetch_optional(connection)
        .await
}

/// Stores the folded public keys. An existing set is never replaced.
pub async fn insert_folded_public_keys(
    connection: &mut SqliteConnection,
    folded_public_keys: &str,
) -> Result<Insertion, sqlx::Error> {
    classify_insertion(
        sqlx::query("INSERT INTO folded_public_keys (singleton, folded_public_keys) VALUES (1, ?)")
            .bind(folded_public_keys)
            .execute(connection)
            .await,
    )
}

pub async fn exists_end_of_election(connection: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM is_end_of_election)")
        .fetch_one(connection)
        .await
}

pub async fn insert_end_of_election(
    connection: &mut SqliteConnection,
) -> Result<Insertion, sqlx::Error> {
    classify_insertion(
        sqlx::query("INSERT INTO is_end_of_election (singleton, is_end_of_election) VALUES (1, TRUE)")
            .execute(connection)
            .await,
    )
}
