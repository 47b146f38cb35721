pub mod client_ip;
pub mod code;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod service;
pub mod state;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod utils;
