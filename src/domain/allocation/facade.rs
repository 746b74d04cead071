//! "Give me the next code": range allocator + encoder behind one call.

use async_trait::async_trait;
use tracing::debug;

use super::allocator::RangeAllocator;
use super::code_space::CodeSpace;
use super::error::AllocationError;

/// Source of fresh short codes, consumed by the link service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShortCodeSource: Send + Sync {
    /// Returns a short code that has never been issued by this deployment.
    async fn next_code(&self) -> Result<String, AllocationError>;
}

/// Issues globally unique fixed-length codes.
///
/// Each call borrows a range, draws exactly one counter, persists the new
/// watermark while releasing the range and only then encodes the counter.
pub struct CodeAllocator {
    allocator: RangeAllocator,
    space: CodeSpace,
}

impl CodeAllocator {
    pub fn new(allocator: RangeAllocator, space: CodeSpace) -> Self {
        Self { allocator, space }
    }

    /// Allocates the next short code.
    ///
    /// # Errors
    ///
    /// Propagates every [`AllocationError`] from borrowing or releasing the
    /// range. No code is returned unless its counter was persisted.
    pub async fn next_code(&self) -> Result<String, AllocationError> {
        let mut lease = self.allocator.borrow().await?;
        let counter = lease.next()?;
        lease.release().await?;

        metrics::counter!("shortcode_codes_issued_total").increment(1);
        let code = self.space.encode(counter);
        debug!(%code, "Short code allocated");
        Ok(code)
    }

    pub fn allocator(&self) -> &RangeAllocator {
        &self.allocator
    }

    pub fn space(&self) -> &CodeSpace {
        &self.space
    }
}

#[async_trait]
impl ShortCodeSource for CodeAllocator {
    async fn next_code(&self) -> Result<String, AllocationError> {
        CodeAllocator::next_code(self).await
    }
}
