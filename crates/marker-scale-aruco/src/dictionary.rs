//! Dictionary metadata and packed marker codes.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum DictionaryError {
    #[error("marker_size {marker_size} implies {bits} bits (max 64)")]
    TooManyBits { marker_size: usize, bits: usize },
    #[error("dictionary `{0}` has no codes")]
    Empty(String),
    #[error("code {code:#x} for id {id} does not fit in {bits} bits")]
    CodeOutOfRange { id: usize, code: u64, bits: usize },
    #[error("ids {first}..{end} are outside dictionary `{name}` ({len} codes)")]
    RangeOutOfBounds {
        name: String,
        first: usize,
        end: usize,
        len: usize,
    },
    #[error("unknown built-in dictionary `{0}`")]
    UnknownBuiltin(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An ArUco-style dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Human-readable name (for debugging/logging).
    pub name: String,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    #[serde(default)]
    pub max_correction_bits: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order with **black = 1**.
    pub codes: Vec<u64>,
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Check that every code fits the declared marker size.
    pub fn validate(&self) -> Result<(), DictionaryError> {
        let bits = self.bit_count();
        if bits > 64 {
            return Err(DictionaryError::TooManyBits {
                marker_size: self.marker_size,
                bits,
            });
        }
        if self.codes.is_empty() {
            return Err(DictionaryError::Empty(self.name.clone()));
        }
        if bits < 64 {
            if let Some((id, &code)) = self
                .codes
                .iter()
                .enumerate()
                .find(|(_, &c)| c >> bits != 0)
            {
                return Err(DictionaryError::CodeOutOfRange { id, code, bits });
            }
        }
        Ok(())
    }

    /// Ids `first..first + count` as a dictionary of their own, renumbered
    /// from zero.
    pub fn subset(&self, first: usize, count: usize) -> Result<Self, DictionaryError> {
        let end = first + count;
        let codes = self
            .codes
            .get(first..end)
            .ok_or_else(|| DictionaryError::RangeOutOfBounds {
                name: self.name.clone(),
                first,
                end,
                len: self.codes.len(),
            })?;
        Ok(Self {
            name: format!("{}[{first}..{end}]", self.name),
            marker_size: self.marker_size,
            max_correction_bits: self.max_correction_bits,
            codes: codes.to_vec(),
        })
    }

    /// Load a dictionary from JSON (`name`, `marker_size`,
    /// `max_correction_bits`, `codes`).
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let file = File::open(path)?;
        let dict: Self = serde_json::from_reader(BufReader::new(file))?;
        dict.validate()?;
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tiny() -> Dictionary {
        Dictionary {
            name: "tiny".to_string(),
            marker_size: 3,
            max_correction_bits: 1,
            codes: vec![0b000_010_000, 0b111_000_101, 0b010_111_010],
        }
    }

    #[test]
    fn subset_renumbers_ids() {
        let sub = tiny().subset(1, 2).expect("subset");
        assert_eq!(sub.codes, vec![0b111_000_101, 0b010_111_010]);
        assert_eq!(sub.name, "tiny[1..3]");
        assert!(tiny().subset(2, 2).is_err());
    }

    #[test]
    fn validate_rejects_wide_codes() {
        let mut dict = tiny();
        dict.codes.push(1 << 9);
        assert!(matches!(
            dict.validate(),
            Err(DictionaryError::CodeOutOfRange { id: 3, .. })
        ));
    }

    #[test]
    fn loads_from_json() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp");
        write!(
            file,
            r#"{{"name":"custom","marker_size":3,"codes":[16,273]}}"#
        )
        .expect("write");
        let dict = Dictionary::load_json(file.path()).expect("load");
        assert_eq!(dict.name, "custom");
        assert_eq!(dict.max_correction_bits, 0);
        assert_eq!(dict.codes, vec![16, 273]);
    }
}
