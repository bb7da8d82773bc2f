//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML crawl configuration files.
//!
//! # Example
//!
//! ```no_run
//! use webapi_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawling {}", config.service.service_url);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{CacheConfig, Config, RateControlConfig, ServiceConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
