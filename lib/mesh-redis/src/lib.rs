//! Redis-backed service registry
pub mod client;
pub mod store;

pub use client::RedisClient;
pub use store::RedisRegistryStore;
