//! Proptest generators for property-based testing.

use proptest::prelude::*;

use pagesync_core::{Fingerprint, PageSize, FINGERPRINT_LEN};

use crate::fixtures::StorePair;

/// Generate a valid page size.
pub fn page_size() -> impl Strategy<Value = PageSize> {
    (9u8..=15).prop_map(|log2| PageSize::from_log2(log2).expect("9..=15 is in range"))
}

/// Generate a small page size, to keep page-heavy properties fast.
pub fn small_page_size() -> impl Strategy<Value = PageSize> {
    (9u8..=10).prop_map(|log2| PageSize::from_log2(log2).expect("9..=10 is in range"))
}

/// Generate a random Fingerprint.
pub fn fingerprint() -> impl Strategy<Value = Fingerprint> {
    any::<[u8; FINGERPRINT_LEN]>().prop_map(Fingerprint::from_bytes)
}

/// Generate diagnostic text, including multi-byte characters.
pub fn message_text() -> impl Strategy<Value = String> {
    "[ -~äöü→]{0,200}".prop_map(String::from)
}

/// Generate a database file name an endpoint might carry.
pub fn file_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-][A-Za-z0-9_. '\"$-]{0,23}".prop_map(String::from)
}

/// Generate an argument with arbitrary printable characters, including the
/// ones shells treat specially.
pub fn shell_arg() -> impl Strategy<Value = String> {
    "[ -~]{0,32}".prop_map(String::from)
}

/// The shape of a divergent origin/replica pair.
#[derive(Debug, Clone)]
pub struct PagePlan {
    pub page_size: PageSize,
    /// Pages in the origin.
    pub origin_pages: u32,
    /// Pages in the replica before the sync.
    pub replica_pages: u32,
    /// Replica pages whose content differs from the origin.
    pub changed: Vec<u32>,
}

impl PagePlan {
    /// Build the stores this plan describes.
    pub fn build(&self) -> StorePair {
        let pair = StorePair::new(self.page_size, self.origin_pages);
        let mut pair = if self.replica_pages == 0 {
            pair
        } else {
            pair.with_replica_pages(self.replica_pages)
        };
        for &pgno in &self.changed {
            pair = pair.with_replica_page_changed(pgno);
        }
        pair
    }

    /// Pages the origin must send: changed pages it has, plus every page
    /// past the replica's end.
    pub fn expected_pages(&self) -> Vec<u32> {
        let mut expected: Vec<u32> = self
            .changed
            .iter()
            .copied()
            .filter(|&p| p <= self.origin_pages)
            .collect();
        expected.extend(self.replica_pages.min(self.origin_pages) + 1..=self.origin_pages);
        expected.sort_unstable();
        expected.dedup();
        expected
    }
}

/// Generate a divergent pair: any origin size, any replica size, and a set
/// of changed replica pages.
pub fn divergent_pages() -> impl Strategy<Value = PagePlan> {
    (small_page_size(), 1u32..=24, 0u32..=24)
        .prop_flat_map(|(page_size, origin_pages, replica_pages)| {
            let changed = if replica_pages == 0 {
                Just(Vec::new()).boxed()
            } else {
                prop::collection::btree_set(1..=replica_pages, 0..=replica_pages as usize)
                    .prop_map(|set| set.into_iter().collect())
                    .boxed()
            };
            (
                Just(page_size),
                Just(origin_pages),
                Just(replica_pages),
                changed,
            )
        })
        .prop_map(|(page_size, origin_pages, replica_pages, changed)| PagePlan {
            page_size,
            origin_pages,
            replica_pages,
            changed,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_generated_page_sizes_valid(size in page_size()) {
            prop_assert!(size.get() >= PageSize::MIN);
            prop_assert!(size.get() <= PageSize::MAX);
            prop_assert!(size.get().is_power_of_two());
        }

        #[test]
        fn test_plans_are_consistent(plan in divergent_pages()) {
            prop_assert!(plan.changed.iter().all(|&p| p >= 1 && p <= plan.replica_pages));
            let expected = plan.expected_pages();
            prop_assert!(expected.iter().all(|&p| p <= plan.origin_pages));
            prop_assert!(expected.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
