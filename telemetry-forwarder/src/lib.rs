pub mod attributes;
pub mod config;
pub mod dedup;
pub mod device;
pub mod error;
pub mod identity;
pub mod keys;
pub mod mqtt;
pub mod pipeline;
pub mod server;
pub mod snapshot;
pub mod time;
pub mod topic;
