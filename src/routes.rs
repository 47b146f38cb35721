use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    handlers::{
        download_transfer, health_check, limit_redemptions, revoke_transfer, transfer_info,
        upload_transfer,
    },
    state::AppState,
};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(state.config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    // Every route that takes a code counts as a redemption attempt
    let redemption = Router::new()
        .route("/api/transfers/{code}", get(download_transfer).delete(revoke_transfer))
        .route("/api/transfers/{code}/info", get(transfer_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_redemptions));

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/transfers/upload",
            post(upload_transfer).layer(DefaultBodyLimit::max(body_limit)),
        )
        .merge(redemption)
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
