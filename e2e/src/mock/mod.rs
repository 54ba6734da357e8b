pub mod aggregator;
pub mod client;
pub mod sync_backend;
