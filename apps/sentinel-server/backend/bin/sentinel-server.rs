use std::sync::Arc;

use clap::Parser;
use sentinel_server::{
    app,
    config::Config,
    credentials::{Argon2Hasher, DynPasswordHasher},
    crypto::{DynRingCrypto, OpensslRingCrypto},
    ledger::DynLedger,
    log, provision,
    state::AppState,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    let config = Config::parse();
    log::setup(&config)?;

    let crypto: DynRingCrypto = Arc::new(OpensslRingCrypto::default());
    let hasher: DynPasswordHasher = Arc::new(Argon2Hasher::default());
    let ledger: DynLedger = Arc::new(config.ledger_client());

    let options = config.provision_options();
    let pool = provision::provision(&options, &crypto, &hasher, ledger.as_ref()).await?;

    let state = AppState {
        pool,
        profile: options.profile,
        crypto,
        hasher,
        ledger,
    };
    app::run(app::setup(state, config.request_timeout()), &config).await
}
