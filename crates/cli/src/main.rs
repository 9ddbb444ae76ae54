use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use adminkit_cli::{Cli, Stores, execute};
use adminkit_core::SystemClock;
use adminkit_infra::{KvLockoutStore, RedisKeyValueStore, RuntimeConfig, SessionStore};
use adminkit_observability::LogFormat;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    adminkit_observability::tracing::init(LogFormat::Pretty);
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env()?;
    if let Some(url) = &cli.redis_url {
        config.redis_url = url.clone();
    }

    let kv = Arc::new(
        RedisKeyValueStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("connecting to {}", config.redis_url))?,
    );
    let store = &config.session_store;
    let stores = Stores {
        sessions: Arc::new(SessionStore::new(kv.clone(), store.clone())),
        lockouts: Arc::new(KvLockoutStore::new(kv, store.key_prefix.clone(), store.op_timeout)),
        clock: Arc::new(SystemClock),
    };

    let mut stdout = std::io::stdout();
    let outcome = execute(&cli.command, &stores, cli.format, &mut stdout).await;
    stores.sessions.close().await?;
    outcome
}
