use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use tg_relay::accounts::{Account, AccountPool};
use tg_relay::config::Config;
use tg_relay::delivery::{DeliveryEngine, TokioSleeper};
use tg_relay::error::Error;
use tg_relay::filter::{AdFilter, Classifier, QualityFilter};
use tg_relay::platform::{PlatformClient, telegram::TelegramClient};
use tg_relay::service::{CommitGate, RelayService};
use tg_relay::store::{DedupStore, ForwardLedger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TG_RELAY_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());

    let config = Arc::new(Config::load(&config_path)?);

    // Console plus a log file; RUST_LOG overrides the default level.
    let file_appender = tracing_appender::rolling::never(".", &config.files.log);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    eprintln!("📡 tg-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config_path);
    eprintln!("   Sources: {}", config.source_channels.len());
    eprintln!("   Target: {}", config.target_channel);
    eprintln!("   Accounts: {}", config.accounts.len());
    eprintln!("   Log: {}\n", config.files.log);

    // One client per enabled account. `TG_RELAY_TOKEN_<NAME>` overrides the
    // token from the config file.
    let accounts: Vec<Arc<Account>> = config
        .accounts
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| {
            let env_key = format!("TG_RELAY_TOKEN_{}", entry.name.to_uppercase());
            let token = std::env::var(&env_key)
                .map(secrecy::SecretString::from)
                .unwrap_or_else(|_| entry.token.clone());
            let client: Arc<dyn PlatformClient> =
                Arc::new(TelegramClient::new(&entry.name, token));
            Arc::new(Account::new(&entry.name, client))
        })
        .collect();
    let pool = Arc::new(AccountPool::new(accounts));

    // Startup connect failures disable the account rather than aborting; only
    // an all-dead pool is fatal.
    for account in pool.accounts() {
        match account.client.connect().await {
            Ok(()) => info!(account = %account.name, "Account connected"),
            Err(e) => {
                warn!(account = %account.name, error = %e, "Startup connect failed, disabling account");
                pool.disable(&account.name);
            }
        }
    }
    let startup_account = pool.current().map_err(Error::Config)?;

    // Resolve channel identifiers once, up front, on the starting account.
    let mut sources = Vec::new();
    for raw in &config.source_channels {
        let entity = startup_account
            .client
            .resolve(raw)
            .await
            .map_err(Error::Client)?;
        info!(channel = %entity.display_name, id = %entity.canonical_id, "Source resolved");
        sources.push(entity);
    }
    let destination = startup_account
        .client
        .resolve(&config.target_channel)
        .await
        .map_err(Error::Client)?;
    info!(channel = %destination.display_name, id = %destination.canonical_id, "Target resolved");

    let classifier = Classifier::new(
        AdFilter::from_config(&config.ad_filter).map_err(Error::Config)?,
        QualityFilter::from_config(&config.quality_filter),
    );
    let ledger = ForwardLedger::load(&config.files.ledger).await;
    let dedup = DedupStore::load(&config.files.dedup, config.dedup_enabled).await;
    let gate = Arc::new(CommitGate::new(ledger, dedup));
    let delivery = DeliveryEngine::new(config.delivery_config(), Arc::new(TokioSleeper));

    let service = RelayService::new(
        Arc::clone(&config),
        Arc::clone(&pool),
        classifier,
        gate,
        delivery,
        sources,
        destination,
    );

    let stop = service.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = stop.send(true);
        }
    });

    if let Err(e) = service.run().await {
        error!(error = %e, "Relay exited with error");
        return Err(e.into());
    }

    for account in pool.accounts() {
        account.client.disconnect().await;
    }

    Ok(())
}
