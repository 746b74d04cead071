//! Shared application state injected into handlers.

use std::sync::Arc;

use crate::application::services::LinkService;
use crate::domain::allocation::CodeAllocator;

#[derive(Clone)]
pub struct AppState {
    pub link_service: Arc<LinkService>,
    /// Same allocator the link service draws codes from; read for health stats.
    pub code_allocator: Arc<CodeAllocator>,
    pub base_url: String,
}
