// slack-bridge: bridges Slack workspaces into Matrix rooms.

use bridge::config;
use bridge::connector::Connector;
use bridge::db::Db;
use bridge::emoji::EmojiCache;
use bridge::portal::BridgeContext;
use bridge::puppets::Puppets;
use sb_matrix::Homeserver;
use sb_matrix::appservice::AppserviceClient;
use sb_slack::SlackClient;
use sb_slack::http::HttpSlackClient;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "/etc/slack-bridge/config.toml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "slack-bridge starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let cfg = match config::load_config_from_path(Path::new(&config_path)) {
        Ok(cfg) => {
            info!(
                domain = %cfg.homeserver.domain,
                database = %cfg.database.sqlite_path,
                backfill = cfg.backfill.enable,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let db = match Db::open(Path::new(&cfg.database.sqlite_path)) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("FATAL: failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let homeserver: Arc<dyn Homeserver> = Arc::new(AppserviceClient::new(
        &cfg.homeserver.address,
        &cfg.homeserver.as_token,
        &cfg.homeserver.domain,
        &cfg.homeserver.bot_username,
        cfg.homeserver.batch_send,
        cfg.homeserver.auto_join_invites,
    ));
    let emoji = Arc::new(EmojiCache::new(Arc::clone(&db), Arc::clone(&homeserver)));
    let puppets = Arc::new(Puppets::new(
        Arc::clone(&db),
        Arc::clone(&homeserver),
        cfg.bridge.clone(),
    ));
    let ctx = Arc::new(BridgeContext {
        db,
        homeserver,
        emoji,
        puppets,
        config: cfg,
        client_factory: Box::new(|login| {
            let client: Arc<dyn SlackClient> = Arc::new(HttpSlackClient::new(
                login.token.as_deref().unwrap_or_default(),
                login.cookie_token.as_deref(),
            ));
            client
        }),
    });

    let connector = Connector::new(ctx);
    if let Err(e) = connector.start().await {
        eprintln!("FATAL: failed to start: {}", e);
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => info!(error = %e, "signal listener failed, shutting down"),
    }
    connector.shutdown().await;
}
