use crate::http;
use actix_web::web;

/// Mount every HTTP sub-module at the root, where the schedulers, task
/// queues, clients and game servers expect them.
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(http::queue::init_routes)
        .configure(http::joinmatch::init_routes)
        .configure(http::fleet::init_routes)
        .configure(http::heartbeat::init_routes)
        .configure(http::stats::init_routes)
        .configure(http::health::init_routes);
}
