use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gamenight_webhooks::envelope::GamePayload;
use gamenight_webhooks::server::{self, AppState, InboundHandler, Messenger};
use gamenight_webhooks::{
    init_tracing, ChatId, Config, Dispatcher, Envelope, GameMetadata, HandlerError, InMemoryStore,
    MetadataError, MetadataLookup, RateLimiter, Subscription,
};
use tokio::net::TcpListener;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Builds board-game links without calling upstream.
struct LinkOnlyLookup;

#[async_trait]
impl MetadataLookup for LinkOnlyLookup {
    async fn game_info(&self, id: i64, fallback_name: &str) -> Result<GameMetadata, MetadataError> {
        Ok(GameMetadata {
            name: Some(fallback_name.to_string()),
            url: Some(format!("https://boardgamegeek.com/boardgame/{}", id)),
            image_url: None,
            max_players: None,
        })
    }
}

/// Logs every applied envelope. Stands in for the bot's own services.
struct LoggingHandler {
    metadata: Arc<dyn MetadataLookup>,
}

impl LoggingHandler {
    async fn log_game(&self, game: &GamePayload) {
        let Some(bgg_id) = game.bgg.id else {
            return;
        };
        match self.metadata.game_info(bgg_id, &game.name).await {
            Ok(info) => tracing::info!(game = %game.name, url = ?info.url, "linked board game"),
            Err(err) => tracing::warn!(game = %game.name, error = %err, "board game lookup failed"),
        }
    }
}

#[async_trait]
impl InboundHandler for LoggingHandler {
    async fn handle(&self, subscription: &Subscription, envelope: Envelope) -> Result<(), HandlerError> {
        if let Envelope::NewGame(game) | Envelope::UpdateGame(game) = &envelope {
            self.log_game(game).await;
        }
        tracing::info!(chat_id = %subscription.chat_id, kind = %envelope.kind(), "applied inbound webhook");
        Ok(())
    }
}

struct LoggingMessenger;

#[async_trait]
impl Messenger for LoggingMessenger {
    async fn send(&self, chat_id: ChatId, thread_id: Option<i64>, text: &str) -> Result<(), HandlerError> {
        tracing::info!(chat_id = %chat_id, thread_id = ?thread_id, text, "chat message");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("webhook-server");

    let config = Config::from_env()?;
    let store = Arc::new(InMemoryStore::new());

    let dispatcher = Dispatcher::new(config.dispatcher(), store.clone());
    let registry = config.registry(store.clone());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit()));
    let sweeper = limiter.spawn_sweeper(SWEEP_INTERVAL);

    if let Some(url) = &config.webhook_url {
        let chat_id = ChatId(config.webhook_chat_id);
        let subscription = registry.register(chat_id, None, url).await?;
        tracing::info!(
            chat_id = %chat_id,
            webhook_id = %subscription.id,
            secret = %subscription.secret,
            "startup webhook registered; share the secret with the subscriber"
        );
        dispatcher.send_test(chat_id, "webhook registered").await;
    }

    let state = AppState {
        subscriptions: store.clone(),
        events: store,
        limiter,
        handler: Arc::new(LoggingHandler {
            metadata: Arc::new(config.metadata(LinkOnlyLookup)),
        }),
        messenger: Arc::new(LoggingMessenger),
        verifier: config.verifier(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for webhooks");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown();
    sweeper.abort();
    tracing::info!("webhook server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
