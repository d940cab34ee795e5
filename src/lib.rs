pub mod cache;
pub mod collector;
pub mod completion;
pub mod config;
pub mod error;
pub mod extract;
pub mod frequency;
pub mod gateway;
pub mod language;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod security;
pub mod selector;
pub mod singleflight;
pub mod startup;
pub mod store;
pub mod wikipedia;
pub mod worker;
