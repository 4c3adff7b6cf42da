//! Convergence verification.
//!
//! After a sync, the replica should hold exactly the origin's pages. This
//! compares two stores page by page through their fingerprints.

use pagesync_core::PageNumber;
use pagesync_store::PageStore;

use crate::error::Result;

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold identical pages.
    Converged,
    /// The stores use different page sizes.
    PageSizeMismatch { left: u32, right: u32 },
    /// The stores hold different numbers of pages.
    PageCountMismatch { left: u32, right: u32 },
    /// The first page whose content differs.
    PageMismatch { pgno: u32 },
}

impl ConvergenceResult {
    /// Check if the stores have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two stores page by page.
///
/// The lock-byte page reported by `left` is skipped, since a sync never
/// transfers it.
pub async fn verify_convergence<A, B>(left: &A, right: &B) -> Result<ConvergenceResult>
where
    A: PageStore,
    B: PageStore,
{
    let left_count = left.page_count().await?;
    let right_count = right.page_count().await?;
    if left_count == 0 && right_count == 0 {
        return Ok(ConvergenceResult::Converged);
    }

    let left_size = left.page_size().await?;
    let right_size = right.page_size().await?;
    if left_size != right_size {
        return Ok(ConvergenceResult::PageSizeMismatch {
            left: left_size.get(),
            right: right_size.get(),
        });
    }
    if left_count != right_count {
        return Ok(ConvergenceResult::PageCountMismatch {
            left: left_count,
            right: right_count,
        });
    }

    let lock_page = left.lock_byte_page(left_size);
    for pgno in PageNumber::range_to(left_count) {
        if Some(pgno) == lock_page {
            continue;
        }
        if left.fingerprint_page(pgno).await? != right.fingerprint_page(pgno).await? {
            return Ok(ConvergenceResult::PageMismatch { pgno: pgno.get() });
        }
    }
    Ok(ConvergenceResult::Converged)
}
