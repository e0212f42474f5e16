pub mod app;
pub mod carrier;
pub mod config;
pub mod error;
pub mod flow;
pub mod handler;
pub mod preflight;
pub mod storage;
pub mod store;
pub mod utils;
pub mod version;
