use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::service::TransferService;

/// Central application state shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Upload and redemption of transfers.
    pub service: TransferService,

    /// Per-client limiter consulted before every redemption attempt.
    pub limiter: RateLimiter,

    /// Application configuration loaded from environment variables or `.env`.
    pub config: Config,
}
