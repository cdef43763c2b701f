//! Shared utility functions.

pub mod url;

pub use url::extract_domain;
