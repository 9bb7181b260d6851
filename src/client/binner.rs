//! Deterministic bin assignment.
//!
//! Each client assigns every (domain, country, date) key to one of a fixed
//! number of bins, using a keyed hash with a secret local salt. The
//! collector counts distinct bins per key to establish a lower bound on the
//! number of distinct clients reporting it. Because the date is part of the
//! hash input, assignments are re-randomized every day, so clients cannot be
//! linked across days, even weakly.

use std::io::{Read, Write};

use derive_more::{Display, Error, From};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::report::{Key, DATE_FORMAT};

/// Number of bytes of local salt for bin assignments.
pub const SALT_SIZE: usize = 16;

/// See `encodeStd` in RFC 4648. Standard base-32 codecs pad their output to
/// byte boundaries with '=' characters, which are invalid in DNS labels, so
/// the encoding is done by hand here.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Display, From, Error)]
pub enum BinnerError {
    #[display(fmt = "users must be assigned to at least one bin")]
    NoBins,
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, BinnerError>;

/// Given a report key, computes a pseudorandom, consistent label.
pub trait Binner: Send + Sync {
    fn bin(&self, key: &Key) -> String;
}

/// Counts the characters required to represent `val` in base 32.
fn base32_size(val: u64) -> usize {
    if val == 0 {
        // Representing "0" requires one character, not zero.
        return 1;
    }
    let mut size = 0;
    let mut v = val;
    while v != 0 {
        size += 1;
        v >>= 5;
    }
    size
}

/// Implements [`Binner`] using HMAC-SHA-256 with a secret local salt.
pub struct HashBinner {
    salt: [u8; SALT_SIZE],
    bins: u64,
}

impl HashBinner {
    /// Constructs a binner whose salt lives in `storage`.
    ///
    /// Reads up to [`SALT_SIZE`] bytes of salt. If the stream ends first, the
    /// missing suffix is drawn from the system's secure random source and
    /// appended to `storage`, so the first-ever call populates the salt file
    /// and every later call reads it back unchanged. A read error other than
    /// end-of-stream is fatal.
    pub fn new<S: Read + Write>(storage: &mut S, bins: u64) -> Result<HashBinner> {
        if bins == 0 {
            return Err(BinnerError::NoBins);
        }

        let mut salt = [0u8; SALT_SIZE];
        let mut filled = 0;
        while filled < SALT_SIZE {
            let n = storage.read(&mut salt[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < SALT_SIZE {
            OsRng.fill_bytes(&mut salt[filled..]);
            storage.write_all(&salt[filled..])?;
        }

        Ok(HashBinner { salt, bins })
    }
}

impl Binner for HashBinner {
    fn bin(&self, key: &Key) -> String {
        // The assignment can be arbitrary, so long as it is pseudorandom and
        // depends only on the domain, country and date.
        let input = format!(
            "{};{};{}",
            key.domain,
            key.country,
            key.date.format(DATE_FORMAT)
        );
        let mut mac = HmacSha256::new_from_slice(&self.salt)
            .expect("HMAC can take a key of any size");
        mac.update(input.as_bytes());
        let code = mac.finalize().into_bytes();

        let mut head = [0u8; 8];
        head.copy_from_slice(&code[..8]);
        let mut bin = u64::from_le_bytes(head) % self.bins;

        // Fixed-width encoding: every key gets a label of the same length
        // for a given bin count.
        let size = base32_size(self.bins - 1);
        let mut chars = vec![0u8; size];
        for slot in chars.iter_mut().rev() {
            *slot = BASE32_ALPHABET[(bin & 0x1F) as usize];
            bin >>= 5;
        }
        chars.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::NaiveDate;

    use super::*;

    fn test_key(domain: &str) -> Key {
        Key {
            domain: domain.to_string(),
            country: "zz".to_string(),
            date: NaiveDate::from_ymd_opt(2020, 2, 3).unwrap(),
        }
    }

    #[test]
    fn test_base32_size() {
        assert_eq!(base32_size(0), 1);
        assert_eq!(base32_size(31), 1);
        assert_eq!(base32_size(32), 2);
        assert_eq!(base32_size(1023), 2);
        assert_eq!(base32_size(1024), 3);
    }

    #[test]
    fn test_zero_bins_rejected() {
        let mut storage = Cursor::new(Vec::new());
        assert!(matches!(
            HashBinner::new(&mut storage, 0),
            Err(BinnerError::NoBins)
        ));
    }

    #[test]
    fn test_populates_empty_storage() {
        let mut storage = Cursor::new(Vec::new());
        HashBinner::new(&mut storage, 32).unwrap();

        let salt = storage.into_inner();
        assert_eq!(salt.len(), SALT_SIZE);
        assert!(salt.iter().any(|&b| b != 0), "salt is all zeros");
    }

    #[test]
    fn test_extends_partial_storage() {
        let mut storage = Cursor::new(vec![7u8; 10]);
        HashBinner::new(&mut storage, 32).unwrap();

        let salt = storage.into_inner();
        assert_eq!(salt.len(), SALT_SIZE);
        assert_eq!(&salt[..10], &[7u8; 10]);
    }

    #[test]
    fn test_reuses_full_storage() {
        let mut storage = Cursor::new(vec![7u8; SALT_SIZE]);
        HashBinner::new(&mut storage, 32).unwrap();
        assert_eq!(storage.into_inner().len(), SALT_SIZE);
    }

    #[test]
    fn test_deterministic_for_shared_salt() {
        let salt = {
            let mut storage = Cursor::new(Vec::new());
            HashBinner::new(&mut storage, 32).unwrap();
            storage.into_inner()
        };

        let b1 = HashBinner::new(&mut Cursor::new(salt.clone()), 32).unwrap();
        let b2 = HashBinner::new(&mut Cursor::new(salt), 32).unwrap();
        for i in 0..100 {
            let key = test_key(&format!("domain{}.test", i));
            assert_eq!(b1.bin(&key), b2.bin(&key));
        }
    }

    #[test]
    fn test_different_salts_diverge() {
        let b1 = HashBinner::new(&mut Cursor::new(vec![1u8; SALT_SIZE]), 1 << 20).unwrap();
        let b2 = HashBinner::new(&mut Cursor::new(vec![2u8; SALT_SIZE]), 1 << 20).unwrap();
        let diverged = (0..20)
            .map(|i| test_key(&format!("domain{}.test", i)))
            .any(|key| b1.bin(&key) != b2.bin(&key));
        assert!(diverged);
    }

    #[test]
    fn test_bin_label_length() {
        for bins in 1..=255u64 {
            let binner = HashBinner::new(&mut Cursor::new(vec![9u8; SALT_SIZE]), bins).unwrap();
            let label = binner.bin(&test_key("destination.example"));
            let expected = if bins <= 32 { 1 } else { 2 };
            assert_eq!(label.len(), expected, "bins={}", bins);
        }
    }

    #[test]
    fn test_bin_label_length_boundary() {
        for (bins, expected) in [(1024u64, 2usize), (1025, 3)] {
            let binner = HashBinner::new(&mut Cursor::new(vec![9u8; SALT_SIZE]), bins).unwrap();
            let label = binner.bin(&test_key("destination.example"));
            assert_eq!(label.len(), expected, "bins={}", bins);
        }
    }

    #[test]
    fn test_single_bin() {
        let binner = HashBinner::new(&mut Cursor::new(vec![9u8; SALT_SIZE]), 1).unwrap();
        assert_eq!(binner.bin(&test_key("destination.example")), "a");
    }

    #[test]
    fn test_bin_depends_on_date() {
        let binner = HashBinner::new(&mut Cursor::new(vec![9u8; SALT_SIZE]), 1 << 30).unwrap();
        let mut key = test_key("destination.example");
        let day1 = binner.bin(&key);
        key.date = NaiveDate::from_ymd_opt(2020, 2, 4).unwrap();
        let day2 = binner.bin(&key);
        assert_ne!(day1, day2);
    }
}
