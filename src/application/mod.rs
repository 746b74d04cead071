//! Application layer services implementing business logic.
//!
//! Services coordinate repository calls, the short code allocator and
//! validation, and give HTTP handlers a narrow API.
//!
//! # Available Services
//!
//! - [`services::link_service::LinkService`] - Short link creation and resolution

pub mod services;
