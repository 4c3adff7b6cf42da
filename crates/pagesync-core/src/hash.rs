//! Page fingerprints.
//!
//! A fingerprint is computed by a Keccak-style sponge over a 1600-bit state
//! (25 lanes of 64 bits) with a 160-bit output and a 160-byte rate. The
//! permutation runs only 6 rounds, so this is *not* SHA3: it only has to catch
//! accidental page differences, and both peers must compute exactly the same
//! function because fingerprints are compared byte-for-byte on the wire.
//!
//! Lanes always hold their bytes in little-endian order (`from_le_bytes` /
//! `to_le_bytes`), so the digest is the same on every target.

use std::fmt;

use crate::error::CoreError;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 20;

/// Bytes absorbed per permutation: (1600 - 2 * 160) / 8.
const RATE: usize = 160;

/// Number of permutation rounds per block.
const ROUNDS: usize = 6;

const ROUND_CONSTANTS: [u64; ROUNDS] = [
    0x0000_0000_0000_0001,
    0x0000_0000_0000_8082,
    0x8000_0000_0000_808a,
    0x8000_0000_8000_8000,
    0x0000_0000_0000_808b,
    0x0000_0000_8000_0001,
];

/// One rho/pi/chi group: the five `(lane, rotation)` inputs feeding
/// `b[0..5]`, and the five lanes that receive `b[j] ^ (!b[j+1] & b[j+2])`.
///
/// Every round reuses this same lane assignment. The peer's permutation does
/// the same, so the groups must not be "corrected" to the per-round
/// rotation of standard Keccak-f.
struct ChiGroup {
    inputs: [(usize, u32); 5],
    outputs: [usize; 5],
}

const CHI_GROUPS: [ChiGroup; 5] = [
    ChiGroup {
        inputs: [(0, 0), (6, 44), (12, 43), (18, 21), (24, 14)],
        outputs: [0, 6, 12, 18, 24],
    },
    ChiGroup {
        inputs: [(3, 28), (9, 20), (10, 3), (16, 45), (22, 61)],
        outputs: [10, 16, 22, 3, 9],
    },
    ChiGroup {
        inputs: [(1, 1), (7, 6), (13, 25), (19, 8), (20, 18)],
        outputs: [20, 1, 7, 13, 19],
    },
    ChiGroup {
        inputs: [(4, 27), (5, 36), (11, 10), (17, 15), (23, 56)],
        outputs: [5, 11, 17, 23, 4],
    },
    ChiGroup {
        inputs: [(2, 62), (8, 55), (14, 39), (15, 41), (21, 2)],
        outputs: [15, 21, 2, 8, 14],
    },
];

fn permute(state: &mut [u64; 25]) {
    for rc in ROUND_CONSTANTS {
        let mut c = [0u64; 5];
        for (x, column) in c.iter_mut().enumerate() {
            *column = state[x] ^ state[x + 5] ^ state[x + 10] ^ state[x + 15] ^ state[x + 20];
        }
        let mut d = [0u64; 5];
        for (x, delta) in d.iter_mut().enumerate() {
            *delta = c[(x + 4) % 5] ^ c[(x + 1) % 5].rotate_left(1);
        }

        for (index, group) in CHI_GROUPS.iter().enumerate() {
            let mut b = [0u64; 5];
            for (slot, &(lane, rotation)) in b.iter_mut().zip(group.inputs.iter()) {
                *slot = (state[lane] ^ d[lane % 5]).rotate_left(rotation);
            }
            for (j, &lane) in group.outputs.iter().enumerate() {
                state[lane] = b[j] ^ (!b[(j + 1) % 5] & b[(j + 2) % 5]);
            }
            if index == 0 {
                state[0] ^= rc;
            }
        }
    }
}

/// Streaming fingerprint computation.
///
/// ```
/// use pagesync_core::{fingerprint, Hasher};
///
/// let mut hasher = Hasher::new();
/// hasher.update(b"page ");
/// hasher.update(b"content");
/// assert_eq!(hasher.finalize(), fingerprint(b"page content"));
/// ```
#[derive(Clone)]
pub struct Hasher {
    state: [u64; 25],
    /// Bytes absorbed into the current block.
    loaded: usize,
}

impl Hasher {
    /// Create a hasher with an all-zero state.
    pub fn new() -> Self {
        Self {
            state: [0u64; 25],
            loaded: 0,
        }
    }

    fn absorb_byte(&mut self, byte: u8) {
        self.state[self.loaded / 8] ^= u64::from(byte) << (8 * (self.loaded % 8));
        self.loaded += 1;
        if self.loaded == RATE {
            permute(&mut self.state);
            self.loaded = 0;
        }
    }

    /// Absorb more input.
    pub fn update(&mut self, mut data: &[u8]) {
        // Whole lanes at a time while aligned to a lane boundary.
        if self.loaded % 8 == 0 {
            while data.len() >= 8 {
                let (lane, rest) = data.split_at(8);
                let mut word = [0u8; 8];
                word.copy_from_slice(lane);
                self.state[self.loaded / 8] ^= u64::from_le_bytes(word);
                self.loaded += 8;
                if self.loaded == RATE {
                    permute(&mut self.state);
                    self.loaded = 0;
                }
                data = rest;
            }
        }
        for &byte in data {
            self.absorb_byte(byte);
        }
    }

    /// Apply the `0x06 .. 0x80` padding and squeeze out the fingerprint.
    pub fn finalize(mut self) -> Fingerprint {
        if self.loaded == RATE - 1 {
            self.absorb_byte(0x86);
        } else {
            self.absorb_byte(0x06);
            self.loaded = RATE - 1;
            self.absorb_byte(0x80);
        }

        let mut out = [0u8; FINGERPRINT_LEN];
        for (chunk, lane) in out.chunks_mut(8).zip(self.state.iter()) {
            chunk.copy_from_slice(&lane.to_le_bytes()[..chunk.len()]);
        }
        Fingerprint(out)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint a whole buffer in one call.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// A 20-byte page fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Fingerprint {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; FINGERPRINT_LEN] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidFingerprintLength(slice.len()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hex_of(data: &[u8]) -> String {
        fingerprint(data).to_hex()
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(hex_of(b""), "529a7cd1ae4ddaca9c6e82e8614a92c77b7866f3");
    }

    #[test]
    fn test_short_input() {
        assert_eq!(hex_of(b"abc"), "4817bbcb6c37e212a298c81ea7d7177fb6a2929e");
    }

    #[test]
    fn test_padding_boundary() {
        // 159 bytes leaves one free byte in the block: the 0x86 padding path.
        assert_eq!(
            hex_of(&[0u8; 159]),
            "5ca7254551c03da4b64fab47786368d4a9e1a978"
        );
        assert_eq!(
            hex_of(&[0u8; 160]),
            "72ed9e1b3a3a4f041f706606fe88541da86080a0"
        );
    }

    #[test]
    fn test_full_page() {
        assert_eq!(
            hex_of(&[0u8; 4096]),
            "c07127abe39bfa63a4362c74315422d88f98a9d2"
        );
        let page: Vec<u8> = (0..4096u32).map(|i| (i * 7 + 3) as u8).collect();
        assert_eq!(hex_of(&page), "604e4ea4c6079efe6a53f685b252baa3c5182da9");
    }

    #[test]
    fn test_single_bit_changes_fingerprint() {
        let mut page = vec![0u8; 4096];
        let before = fingerprint(&page);
        page[2048] ^= 0x01;
        assert_ne!(before, fingerprint(&page));
    }

    #[test]
    fn test_fingerprint_try_from_slice() {
        let fp = Fingerprint::try_from(&[7u8; 20][..]).unwrap();
        assert_eq!(fp.as_bytes(), &[7u8; 20]);
        assert_eq!(
            Fingerprint::try_from(&[7u8; 19][..]),
            Err(CoreError::InvalidFingerprintLength(19))
        );
    }

    #[test]
    fn test_fingerprint_debug_is_truncated() {
        let debug = format!("{:?}", fingerprint(b""));
        assert_eq!(debug, "Fingerprint(529a7cd1ae4ddaca)");
    }

    proptest! {
        #[test]
        fn streaming_matches_one_shot(data in prop::collection::vec(any::<u8>(), 0..1024), split in 0usize..1024) {
            let split = split.min(data.len());
            let mut hasher = Hasher::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finalize(), fingerprint(&data));
        }

        #[test]
        fn fingerprint_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..2048)) {
            prop_assert_eq!(fingerprint(&data), fingerprint(&data));
        }
    }
}
