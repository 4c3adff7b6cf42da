//! Page geometry newtypes.
//!
//! Page sizes and page numbers are newtypes so that a raw `u32` from the
//! wire cannot be used as either without validation.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::{CoreError, Result};

/// A database page size: a power of two between 512 and 32768 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageSize(u32);

impl PageSize {
    /// Smallest page size accepted.
    pub const MIN: u32 = 512;
    /// Largest page size accepted.
    pub const MAX: u32 = 32768;
    /// Page size of a freshly created SQLite database.
    pub const DEFAULT: Self = Self(4096);

    /// Validate a page size in bytes.
    pub const fn new(bytes: u32) -> Result<Self> {
        if bytes < Self::MIN || bytes > Self::MAX || !bytes.is_power_of_two() {
            return Err(CoreError::InvalidPageSize(bytes));
        }
        Ok(Self(bytes))
    }

    /// Decode from the single-byte `log2` form used on the wire.
    pub fn from_log2(exponent: u8) -> Result<Self> {
        if exponent == 0 || exponent >= 32 {
            return Err(CoreError::InvalidPageSizeLog2(exponent));
        }
        Self::new(1u32 << exponent)
    }

    /// The single-byte `log2` form used on the wire.
    pub const fn log2(self) -> u8 {
        self.0.trailing_zeros() as u8
    }

    /// Size in bytes.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Size in bytes as a `usize`, for buffer allocation.
    pub const fn bytes(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageSize({})", self.0)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for PageSize {
    type Error = CoreError;

    fn try_from(bytes: u32) -> Result<Self> {
        Self::new(bytes)
    }
}

/// A 1-based page number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    /// The first page of a database.
    pub const FIRST: Self = match NonZeroU32::new(1) {
        Some(one) => Self(one),
        None => unreachable!(),
    };

    /// Validate a raw page number.
    pub fn new(pgno: u32) -> Result<Self> {
        NonZeroU32::new(pgno)
            .map(Self)
            .ok_or(CoreError::InvalidPageNumber(pgno))
    }

    /// The raw page number.
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The following page, or `None` past `u32::MAX`.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Iterate over `1..=count`.
    pub fn range_to(count: u32) -> impl Iterator<Item = PageNumber> {
        (1..=count).filter_map(NonZeroU32::new).map(Self)
    }
}

impl fmt::Debug for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageNumber({})", self.0)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for PageNumber {
    type Error = CoreError;

    fn try_from(pgno: u32) -> Result<Self> {
        Self::new(pgno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_bounds() {
        assert!(PageSize::new(512).is_ok());
        assert!(PageSize::new(4096).is_ok());
        assert!(PageSize::new(32768).is_ok());
        assert_eq!(PageSize::new(256), Err(CoreError::InvalidPageSize(256)));
        assert_eq!(PageSize::new(65536), Err(CoreError::InvalidPageSize(65536)));
        assert_eq!(PageSize::new(4000), Err(CoreError::InvalidPageSize(4000)));
    }

    #[test]
    fn test_page_size_log2() {
        let size = PageSize::new(4096).unwrap();
        assert_eq!(size.log2(), 12);
        assert_eq!(PageSize::from_log2(12).unwrap(), size);
        assert_eq!(
            PageSize::from_log2(0),
            Err(CoreError::InvalidPageSizeLog2(0))
        );
        assert_eq!(
            PageSize::from_log2(32),
            Err(CoreError::InvalidPageSizeLog2(32))
        );
        // In the wire range but too small for a database page.
        assert_eq!(PageSize::from_log2(4), Err(CoreError::InvalidPageSize(16)));
    }

    #[test]
    fn test_page_number() {
        assert_eq!(PageNumber::FIRST.get(), 1);
        assert_eq!(PageNumber::new(0), Err(CoreError::InvalidPageNumber(0)));
        assert_eq!(PageNumber::new(7).unwrap().next().unwrap().get(), 8);
        assert!(PageNumber::new(u32::MAX).unwrap().next().is_none());
    }

    #[test]
    fn test_page_number_range() {
        let pages: Vec<u32> = PageNumber::range_to(4).map(PageNumber::get).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert_eq!(PageNumber::range_to(0).count(), 0);
    }
}
