pub mod app;
pub mod config;
pub mod domain;
pub mod earthdata;
pub mod error;
pub mod filename;
pub mod granule;
pub mod metadata;
pub mod mgrs;
pub mod output;
pub mod store;
pub mod table;
pub mod upload;
