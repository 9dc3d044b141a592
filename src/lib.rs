#![forbid(unsafe_code)]

//! Building blocks of the YouTube proxy: settings, identifier parsing, the two
//! upstream strategies and the axum dispatcher tying them together.

pub mod config;
pub mod embedded_json;
pub mod innertube;
pub mod proxy;
pub mod upstream;
pub mod video_id;
