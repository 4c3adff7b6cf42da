//! Golden test vectors for the page fingerprint.
//!
//! Both peers compare fingerprints byte-for-byte, so any change to the hash
//! breaks interoperability. These vectors pin it down.

use pagesync_core::fingerprint;

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the input bytes.
    pub input: fn() -> Vec<u8>,
    /// Expected fingerprint (hex).
    pub expected: &'static str,
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "empty input",
            input: Vec::new,
            expected: "529a7cd1ae4ddaca9c6e82e8614a92c77b7866f3",
        },
        GoldenVector {
            name: "abc",
            input: || b"abc".to_vec(),
            expected: "4817bbcb6c37e212a298c81ea7d7177fb6a2929e",
        },
        GoldenVector {
            name: "159 zero bytes (single-byte padding)",
            input: || vec![0u8; 159],
            expected: "5ca7254551c03da4b64fab47786368d4a9e1a978",
        },
        GoldenVector {
            name: "160 zero bytes (one full block)",
            input: || vec![0u8; 160],
            expected: "72ed9e1b3a3a4f041f706606fe88541da86080a0",
        },
        GoldenVector {
            name: "512-byte zero page",
            input: || vec![0u8; 512],
            expected: "fbb0a31a41af6c56db94c3c405dc85645fb0e43f",
        },
        GoldenVector {
            name: "4096-byte zero page",
            input: || vec![0u8; 4096],
            expected: "c07127abe39bfa63a4362c74315422d88f98a9d2",
        },
        GoldenVector {
            name: "4096-byte patterned page",
            input: || patterned(4096),
            expected: "604e4ea4c6079efe6a53f685b252baa3c5182da9",
        },
    ]
}

/// Check every vector; returns the names of those that fail.
pub fn verify_all_vectors() -> Vec<&'static str> {
    all_vectors()
        .into_iter()
        .filter(|v| fingerprint(&(v.input)()).to_hex() != v.expected)
        .map(|v| v.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        assert_eq!(verify_all_vectors(), Vec::<&str>::new());
    }

    #[test]
    fn test_vectors_are_distinct() {
        let vectors = all_vectors();
        for (i, a) in vectors.iter().enumerate() {
            for b in &vectors[i + 1..] {
                assert_ne!(a.expected, b.expected, "{} vs {}", a.name, b.name);
            }
        }
    }
}
