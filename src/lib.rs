pub mod args;
pub mod clean;
pub mod common;
pub mod config;
pub mod constants;
pub mod expand;
pub mod export;
pub mod geo;
pub mod notification;
pub mod parquet_writer;
pub mod pipeline;
pub mod record;
pub mod satellites;
pub mod store;
