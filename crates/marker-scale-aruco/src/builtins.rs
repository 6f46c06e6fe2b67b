//! Built-in dictionaries.
//!
//! The original 1024-marker ArUco set is generated rather than embedded: each
//! of the five rows carries two id bits, expanded to one of four 5-bit words.

use crate::{Dictionary, DictionaryError};

/// Names accepted by [`builtin_dictionary`].
pub const BUILTIN_DICTIONARY_NAMES: &[&str] = &["ARUCO_ORIGINAL", "DICT_ARUCO_ORIGINAL"];

const ORIGINAL_ROW_WORDS: [u64; 4] = [0x10, 0x17, 0x09, 0x0e];
const ORIGINAL_SIZE: usize = 5;
const ORIGINAL_COUNT: usize = 1024;

fn original_code(id: usize) -> u64 {
    let mut code = 0u64;
    for y in 0..ORIGINAL_SIZE {
        let word = ORIGINAL_ROW_WORDS[(id >> (2 * (4 - y))) & 3];
        for x in 0..ORIGINAL_SIZE {
            let white = (word >> (4 - x)) & 1 == 1;
            if !white {
                code |= 1u64 << (y * ORIGINAL_SIZE + x);
            }
        }
    }
    code
}

/// The classic ArUco dictionary (5x5 bits, ids `0..1024`).
pub fn aruco_original() -> Dictionary {
    Dictionary {
        name: "ARUCO_ORIGINAL".to_string(),
        marker_size: ORIGINAL_SIZE,
        max_correction_bits: 0,
        codes: (0..ORIGINAL_COUNT).map(original_code).collect(),
    }
}

/// Look up a built-in dictionary by name (case-insensitive).
pub fn builtin_dictionary(name: &str) -> Result<Dictionary, DictionaryError> {
    let upper = name.to_ascii_uppercase();
    if BUILTIN_DICTIONARY_NAMES.contains(&upper.as_str()) {
        Ok(aruco_original())
    } else {
        Err(DictionaryError::UnknownBuiltin(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn original_has_unique_codes() {
        let dict = aruco_original();
        dict.validate().expect("valid");
        assert_eq!(dict.len(), 1024);
        let unique: HashSet<u64> = dict.codes.iter().copied().collect();
        assert_eq!(unique.len(), 1024);
    }

    #[test]
    fn id_zero_rows_are_white_then_black() {
        let code = aruco_original().codes[0];
        for y in 0..5 {
            assert_eq!(code >> (y * 5) & 1, 0, "row {y} first cell should be white");
            for x in 1..5 {
                assert_eq!(code >> (y * 5 + x) & 1, 1);
            }
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(builtin_dictionary("dict_aruco_original").is_ok());
        assert!(matches!(
            builtin_dictionary("DICT_4X4_50"),
            Err(DictionaryError::UnknownBuiltin(_))
        ));
    }
}
