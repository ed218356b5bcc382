//! HTTP surface: health and version probes

pub mod http;

pub use http::run;
