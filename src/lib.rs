pub mod app;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod metadata_cache;
pub mod networks;
pub mod normalize;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod transport;
pub mod version;
