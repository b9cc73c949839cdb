//! Pure, side-effect-free format parsers.
//!
//! Every parser here takes raw bytes/text and returns a parsed
//! intermediate shape — no network I/O, no destination writes. Adapters
//! call into these and then convert the result through
//! [`crate::normalize`] into canonical entities.

pub mod html_anyrun;
pub mod json;
pub mod rss;
pub mod yaml_atlas;
