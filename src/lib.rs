pub mod acl;
pub mod blob_store;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connection_pool;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ids;
pub mod metadata_store;
pub mod tenant;
pub mod workers;
