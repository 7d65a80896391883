//! SQLi Spider - autonomous SQL injection crawler
//!
//! Crawls a target site, discovers attack surfaces (query strings, forms,
//! links with parameters) and confirms SQL injection through error
//! signatures, boolean differential analysis, response timing and UNION
//! extraction. Findings stream out through an injected [`events::Reporter`].

pub mod config;
pub mod crawler;
pub mod error;
pub mod events;
pub mod http;
pub mod models;
pub mod report;
pub mod scanner;

pub use crawler::{CrawlSession, Spider};
pub use error::{Result, SpiderError};
