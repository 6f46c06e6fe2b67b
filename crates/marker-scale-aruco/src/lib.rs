//! Square fiducial marker detection.
//!
//! This crate covers:
//! - ArUco-style dictionaries (the built-in original set, or JSON files),
//! - matching observed marker codes against a dictionary in all four rotations,
//! - finding candidate quads in a grayscale image and decoding their bits.
//!
//! Detected corners are reported in marker order (top-left, top-right,
//! bottom-right, bottom-left) regardless of how the marker is rotated in the
//! image.

pub mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quad;
mod threshold;

pub use builtins::{aruco_original, builtin_dictionary, BUILTIN_DICTIONARY_NAMES};
pub use decode::DecodeConfig;
pub use detector::{ArucoDetector, ArucoDetectorParams, DetectedMarker};
pub use dictionary::{Dictionary, DictionaryError};
pub use matcher::{rotate_code_u64, Match, Matcher};
