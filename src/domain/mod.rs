//! Domain layer containing business entities and logic.
//!
//! Independent of infrastructure and presentation concerns.
//!
//! # Architecture
//!
//! - [`entities`] - Core business data structures
//! - [`repositories`] - Data access trait definitions
//! - [`allocation`] - Short code allocation (code space, range allocator, facade)
//!
//! # Design Principles
//!
//! - Repository traits define contracts implemented by the infrastructure layer
//! - The allocator is an explicitly constructed instance shared through
//!   application state, never a process-wide singleton

pub mod allocation;
pub mod entities;
pub mod repositories;
