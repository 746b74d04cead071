//! Helpers shared by the application and API layers.
//!
//! - [`url_normalizer`] - canonical form of destination URLs

pub mod url_normalizer;
