pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod store;
