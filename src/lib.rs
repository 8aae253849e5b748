pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fs_util;
pub mod listing;
pub mod orchestrator;
pub mod output;
pub mod resolver;
pub mod resolvers;
pub mod retry;
