use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use rallypoint::cache::{Cache, MemCache, RedisCache};
use rallypoint::config;
use rallypoint::http;
use rallypoint::identity::{IdentityVerifier, SharedSecretVerifier, TicketVerifier};
use rallypoint::metrics;
use rallypoint::provider::{FakeProvider, FleetApiClient, MachineProvider};
use rallypoint::state::AppState;
use rallypoint::storage::FsObjectStore;
use rallypoint::store::{MemStore, PgStore, Store};
use rallypoint::tasks::HttpTaskQueue;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let settings = config::settings();

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await.expect("postgres store")),
        None => {
            log::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(MemStore::new())
        }
    };

    let cache: Arc<dyn Cache> = match &settings.redis_url {
        Some(url) => Arc::new(RedisCache::open(url).expect("redis cache")),
        None => {
            log::warn!("REDIS_URL not set; using the in-memory cache");
            Arc::new(MemCache::new())
        }
    };

    let provider: Arc<dyn MachineProvider> = if settings.provider_access_key.is_empty() {
        log::warn!("no provider credentials; using the stub provider");
        Arc::new(FakeProvider::new())
    } else {
        Arc::new(FleetApiClient::new(settings.provider_base_url.as_str()).expect("provider client"))
    };

    let identity: Arc<dyn IdentityVerifier> = if settings.identity_enabled {
        Arc::new(
            TicketVerifier::new(
                settings.identity_api_url.as_str(),
                settings.identity_app_id.as_str(),
                settings.identity_api_key.as_str(),
            )
            .expect("identity client"),
        )
    } else {
        Arc::new(SharedSecretVerifier::new(settings.shared_auth_token.as_str()))
    };

    let state = AppState {
        store,
        cache,
        tasks: Arc::new(
            HttpTaskQueue::new(settings.task_base_url.as_str(), settings.retry_header.as_str())
                .expect("task queue"),
        ),
        provider,
        identity,
        storage: Arc::new(FsObjectStore::new(&settings.storage_root)),
    };

    log::info!("coordinator listening on {}", settings.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(metrics::METRICS.clone())
            .app_data(web::Data::new(state.clone()))
            .configure(http::routes::init_routes)
    })
    .bind(&settings.bind_addr)?
    .run()
    .await
}
