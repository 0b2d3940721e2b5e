pub mod app;
pub mod auth;
pub mod client;
pub mod collect;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod input;
pub mod output;
pub mod planner;
pub mod progress;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod writer;
