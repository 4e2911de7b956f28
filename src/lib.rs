pub mod app;
pub mod archive;
pub mod cgd;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod executor;
pub mod export;
pub mod fixtures;
pub mod fs_util;
pub mod import;
pub mod meta;
pub mod output;
pub mod pixelset;
pub mod store;
pub mod template;
pub mod workflow;
