//! Simple liveness / readiness probe

use actix_web::{get, web, HttpResponse, Responder};

use crate::model::GameServer;
use crate::state::AppState;
use crate::store::{Entity, Query};

#[get("/healthz")]
pub async fn healthz(state: web::Data<AppState>) -> impl Responder {
    // Cheap round-trips through both backends.
    if state
        .store
        .count(&Query::new(GameServer::KIND).limit(1))
        .await
        .is_err()
    {
        return HttpResponse::ServiceUnavailable().body("store");
    }
    if state.cache.get("healthz").await.is_err() {
        return HttpResponse::ServiceUnavailable().body("cache");
    }
    HttpResponse::Ok().body("ok")
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz);
}
