pub mod config;
pub mod credentials;
pub mod display;
pub mod fetcher;
pub mod models;
pub mod parser;
pub mod poller;
pub mod status;
