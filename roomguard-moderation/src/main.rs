use std::sync::Arc;

use roomguard_moderation::clock::SystemClock;
use roomguard_moderation::config::{AppConfig, StoreBackend};
use roomguard_moderation::identity::{Identity, ModerationKey};
use roomguard_moderation::markers::{DeviceMarkers, MemoryKeyValue, RedisMarkers, SendMarkers};
use roomguard_moderation::moderation;
use roomguard_moderation::relay::CommandRelay;
use roomguard_moderation::store::{DocumentStore, MemoryStore, RedisStore, WriteBatch};
use roomguard_moderation::{routes, AppState};
use roomguard_shared::clients::redis::RedisClient;
use roomguard_shared::middleware::jwt_secret;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    roomguard_shared::middleware::init_tracing("roomguard-moderation");

    let config = AppConfig::load()?;
    let port = config.port;

    let metrics = roomguard_shared::middleware::init_metrics()?;

    let (docs, markers): (Arc<dyn DocumentStore>, Arc<dyn SendMarkers>) = match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(DeviceMarkers::new(Arc::new(MemoryKeyValue::new()))),
            )
        }
        StoreBackend::Redis => {
            let client = RedisClient::connect(&config.redis_url).await?;
            let store = RedisStore::connect(client.clone(), config.redis_namespace.clone()).await?;
            let markers = RedisMarkers::new(client, config.redis_namespace.clone(), config.marker_ttl_secs);
            (Arc::new(store), Arc::new(markers))
        }
    };

    let operator = Identity::new(config.relay_operator_email.clone(), config.relay_operator_uid.clone());
    let relay_active = config.relay_active(&jwt_secret());
    if config.relay_enabled && !relay_active {
        tracing::warn!("ROOMGUARD_JWT_SECRET is not set; command relay disabled and its operator not granted admin");
    }

    let mut seed = WriteBatch::new();
    for admin in config.seed_admin_list() {
        moderation::grant_admin(&mut seed, &ModerationKey::from_identity(&admin));
    }
    if relay_active {
        moderation::grant_admin(&mut seed, &operator.key());
    }
    if !seed.is_empty() {
        let count = seed.len();
        docs.apply(seed).await?;
        tracing::info!(count, "seeded admin allow-list");
    }

    let state = AppState::new(config, docs.clone(), markers, Arc::new(SystemClock)).with_metrics(metrics);

    if relay_active {
        CommandRelay::new(docs, state.admin.clone(), operator)
            .mark_unknown_processed(state.config.relay_mark_unknown_processed)
            .spawn();
    }

    let app = routes::router(Arc::new(state));

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("roomguard listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
