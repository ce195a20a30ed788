//! Application configuration.

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use lazy_static::lazy_static;
use ledger_gateway_client::Credentials;
use regex::Regex;
use types_rs::election::{Profile, UserCount};

use crate::{db::DatabaseLocation, provision::ProvisionOptions};

const TEN_MB: usize = 10 * 1024 * 1024;

pub const MAX_REQUEST_SIZE: usize = TEN_MB;

lazy_static! {
    static ref DATABASE_NAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_\-]+$").unwrap();
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Config {
    /// Database to create: `memory` for an in-memory database, or an
    /// alphanumeric file name without extension (`.db` is appended).
    #[arg(long, env = "DATABASE_URI", default_value = "sqlite3.db")]
    pub uri: DatabaseUri,

    /// Directory database files are created in.
    #[arg(long, env = "DATA_DIR", default_value = "public")]
    pub data_dir: PathBuf,

    /// Deployment profile: `production`, `simulation`, or `simulation-full`.
    #[arg(long, env = "SCHEMA", default_value = "production")]
    pub schema: Profile,

    /// Number of users to create, clamped to between 3 and 1000000.
    #[arg(long, env = "TOTAL_USERS", default_value_t = 3)]
    pub users: u64,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Log level.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,

    /// Base URL of the ledger gateway, e.g. `http://localhost:8801`.
    #[arg(long, env = "LEDGER_URL", default_value = "http://localhost:8801")]
    pub ledger_url: reqwest::Url,

    /// Ledger channel votes are recorded on.
    #[arg(long, env = "LEDGER_CHANNEL", default_value = "vote-channel")]
    pub ledger_channel: String,

    /// Chaincode contract invoked on the channel.
    #[arg(long, env = "LEDGER_CONTRACT", default_value = "SentinelVote")]
    pub ledger_contract: String,

    /// Identity enrolled with the gateway before every invocation.
    #[arg(long, env = "LEDGER_ADMIN_ID", default_value = "admin")]
    pub ledger_admin_id: String,

    /// Secret for `--ledger-admin-id`.
    #[arg(long, env = "LEDGER_ADMIN_SECRET", default_value = "adminpw")]
    pub ledger_admin_secret: String,

    /// Password shared by all synthetic users.
    #[arg(long, env = "DEFAULT_PASSWORD", default_value = "password")]
    pub default_password: String,

    /// Password of the central authority and the first named voter.
    #[arg(long, env = "NON_DEFAULT_PASSWORD", default_value = "Password1!")]
    pub non_default_password: String,

    /// Ceiling applied to every request handler, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn database_location(&self) -> DatabaseLocation {
        match &self.uri {
            DatabaseUri::Memory => DatabaseLocation::Memory,
            DatabaseUri::Named(name) => DatabaseLocation::File(self.data_dir.join(name)),
        }
    }

    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            location: self.database_location(),
            profile: self.schema,
            total_users: UserCount::clamped(self.users),
            default_password: self.default_password.clone(),
            non_default_password: self.non_default_password.clone(),
        }
    }

    pub fn ledger_client(&self) -> ledger_gateway_client::Client {
        ledger_gateway_client::Client::new(
            self.ledger_url.clone(),
            self.ledger_channel.clone(),
            self.ledger_contract.clone(),
            Credentials::new(
                self.ledger_admin_id.clone(),
                self.ledger_admin_secret.clone(),
            ),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The `--uri` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUri {
    Memory,

    /// A file name, including the `.db` extension.
    Named(String),
}

impl FromStr for DatabaseUri {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" | ":memory:" | "file::memory:?mode=memory" => Ok(Self::Memory),
            "sqlite3.db" => Ok(Self::Named(s.to_owned())),
            name if DATABASE_NAME_REGEX.is_match(name) => Ok(Self::Named(format!("{name}.db"))),
            _ => Err(format!(
                "invalid database uri '{s}': use 'memory' or letters, digits, '_' and '-'"
            )),
        }
    }
}
