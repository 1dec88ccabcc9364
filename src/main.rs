mod api;
mod prices;

use clap::{Parser, Subcommand};
use shamba_core::config::{self, Config};
use shamba_core::message::MessageCategory;
use shamba_core::phone;
use shamba_engine::{
    CommandEngine, ConversationStore, InboundPipeline, Outbox, PriceProvider, SmsSender,
};
use shamba_gateway::GatewayClient;
use shamba_ingest::{Poller, ReceivedSource, WebhookRouter};
use shamba_store::Store;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "shamba",
    version,
    about = "Shamba — two-way SMS gateway for farm price alerts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: webhook API, polling loop, conversation sweeper.
    Serve,
    /// Send one logged SMS through the vendor gateway.
    Send {
        /// Recipient phone number (07..., 2547..., +2547...).
        to: String,
        /// Message text.
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
        /// Category recorded on the log row.
        #[arg(long, default_value = "general")]
        category: String,
    },
    /// Show the vendor account balance.
    Balance,
    /// Run one poll of the vendor's received-messages list.
    PollOnce,
    /// Check config, database, and gateway health.
    Status,
}

/// Everything `serve` and the one-shot commands wire together.
struct App {
    store: Store,
    conversations: Arc<ConversationStore>,
    outbox: Arc<Outbox>,
    webhook: Arc<WebhookRouter>,
    poller: Arc<Poller>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

impl App {
    async fn build(cfg: &Config) -> anyhow::Result<Self> {
        if cfg.gateway.api_key.is_empty() {
            anyhow::bail!(
                "gateway.api_key is empty. Set it in config.toml or the \
                 SHAMBA_SMS_API_KEY env var."
            );
        }
        if cfg.gateway.device_id.is_empty() {
            anyhow::bail!("gateway.device_id is empty. Set it in config.toml.");
        }

        let store = Store::new(&config::shellexpand(&cfg.store.db_path)).await?;
        let gateway = Arc::new(GatewayClient::new(&cfg.gateway)?);
        let conversations = Arc::new(ConversationStore::new());

        let bulk_delay = std::time::Duration::from_millis(cfg.gateway.bulk_delay_ms);
        let outbox = || {
            Outbox::new(
                store.clone(),
                Arc::clone(&gateway) as Arc<dyn SmsSender>,
                None,
                bulk_delay,
            )
        };

        let price_provider: Arc<dyn PriceProvider> = if cfg.prices.base_url.is_empty() {
            info!("no price API configured; location queries answer 'no data'");
            Arc::new(prices::NoPriceData)
        } else {
            Arc::new(prices::HttpPriceProvider::new(&cfg.prices)?)
        };

        let engine = CommandEngine::new(
            store.clone(),
            outbox(),
            price_provider,
            Arc::clone(&conversations),
        );
        let pipeline = Arc::new(InboundPipeline::new(
            &cfg.classifier,
            store.clone(),
            Arc::clone(&conversations),
            engine,
        )?);

        let secret = if cfg.webhook.secret.is_empty() {
            None
        } else {
            Some(cfg.webhook.secret.clone())
        };
        let webhook = Arc::new(WebhookRouter::new(
            Arc::clone(&pipeline),
            store.clone(),
            secret,
            cfg.webhook.max_skew_secs,
        ));

        let poller = Arc::new(Poller::new(
            Arc::clone(&gateway) as Arc<dyn ReceivedSource>,
            pipeline,
            cfg.polling.fetch_limit,
        ));

        let outbox = Arc::new(outbox());

        Ok(Self {
            store,
            conversations,
            outbox,
            webhook,
            poller,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_build_wires_all_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.gateway.api_key = "test-key".to_string();
        cfg.gateway.device_id = "test-device".to_string();
        cfg.classifier.self_number = "254700000001".to_string();
        cfg.store.db_path = dir.path().join("shamba.db").to_str().unwrap().to_string();

        let app = App::build(&cfg).await.unwrap();
        assert!(!app.poller.stats().is_running);
        assert!(app.conversations.is_empty());

        let (accepted, rejected) = app.store.inbound_counts().await.unwrap();
        assert_eq!((accepted, rejected), (0, 0));
        assert_eq!(Arc::strong_count(&app.outbox), 1);
        let _ = &app.webhook;
    }

    #[tokio::test]
    async fn test_app_build_refuses_missing_gateway_credentials() {
        let cfg = Config::default();
        let err = App::build(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load(&cli.config)?;
            if !cfg.api.enabled {
                anyhow::bail!(
                    "api.enabled = false leaves no webhook endpoint; enable the API \
                     or run poll-once from cron"
                );
            }
            let app = App::build(&cfg).await?;

            ConversationStore::spawn_sweeper(Arc::clone(&app.conversations));

            if cfg.polling.enabled {
                app.poller.start(cfg.polling.interval_secs);
            }

            tokio::spawn(api::serve(
                cfg.api.clone(),
                Arc::clone(&app.webhook),
                Arc::clone(&app.poller),
                Arc::clone(&app.conversations),
                Arc::clone(&app.outbox),
                app.store.clone(),
                Instant::now(),
            ));

            info!("shamba gateway running, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            if app.poller.stats().is_running {
                app.poller.stop();
            }
        }
        Commands::Send {
            to,
            message,
            category,
        } => {
            if message.is_empty() {
                anyhow::bail!("no message provided. Usage: shamba send <phone> <message>");
            }

            let cfg = config::load(&cli.config)?;
            if cfg.gateway.api_key.is_empty() || cfg.gateway.device_id.is_empty() {
                anyhow::bail!("gateway api_key/device_id not configured");
            }

            let store = Store::new(&config::shellexpand(&cfg.store.db_path)).await?;
            let gateway = Arc::new(GatewayClient::new(&cfg.gateway)?);
            let outbox = Outbox::new(
                store,
                gateway as Arc<dyn SmsSender>,
                None,
                std::time::Duration::from_millis(cfg.gateway.bulk_delay_ms),
            );

            let phone = phone::normalize(&to)?;
            let category = MessageCategory::from_str(&category)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let text = message.join(" ");

            let (id, outcome) = outbox.send_logged(&phone, &text, category).await?;
            if outcome.accepted {
                println!("Sent to {phone} (log id {id})");
            } else {
                anyhow::bail!(
                    "gateway rejected send to {phone}: {}",
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Balance => {
            let cfg = config::load(&cli.config)?;
            if cfg.gateway.api_key.is_empty() {
                anyhow::bail!("gateway.api_key is empty");
            }
            let gateway = GatewayClient::new(&cfg.gateway)?;
            let balance = gateway.get_balance().await?;
            println!("Account balance: {balance:.2}");
        }
        Commands::PollOnce => {
            let cfg = config::load(&cli.config)?;
            let app = App::build(&cfg).await?;
            let processed = app.poller.poll_once().await?;
            println!("Processed {processed} new message(s)");
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            println!("Shamba — Status Check\n");
            println!("Config: {}", cli.config);
            println!();

            let db_path = config::shellexpand(&cfg.store.db_path);
            match Store::new(&db_path).await {
                Ok(store) => {
                    let (accepted, rejected) = store.inbound_counts().await?;
                    println!("  db: ok ({db_path})");
                    println!("    inbound: {accepted} accepted, {rejected} rejected");
                    for (status, count) in store.outbound_status_counts().await? {
                        println!("    outbound {status}: {count}");
                    }
                }
                Err(e) => println!("  db: error ({e})"),
            }

            if cfg.gateway.api_key.is_empty() || cfg.gateway.device_id.is_empty() {
                println!("  gateway: not configured (missing api_key or device_id)");
            } else {
                let gateway = GatewayClient::new(&cfg.gateway)?;
                match gateway.get_balance().await {
                    Ok(balance) => println!("  gateway: ok (balance {balance:.2})"),
                    Err(e) => println!("  gateway: error ({e})"),
                }
            }

            println!(
                "  classifier self_number: {}",
                if cfg.classifier.self_number.is_empty() {
                    "NOT SET (serve will refuse to start)"
                } else {
                    &cfg.classifier.self_number
                }
            );
            println!(
                "  webhook secret: {}",
                if cfg.webhook.secret.is_empty() {
                    "not set (signature checks skipped)"
                } else {
                    "set"
                }
            );
        }
    }

    Ok(())
}
