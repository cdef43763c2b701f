//! Concrete recipe sources.

mod json_api;

pub use json_api::{JsonApiSource, JsonApiSourceConfig};
