//! HTTP plumbing: the request client and the shared retry helper

pub mod client;
pub mod retry;
pub use client::HttpClient;
