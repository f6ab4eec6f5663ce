//! Core abstractions for sensorscope's GPU picking system.
//!
//! This crate holds the CPU-side model shared by the renderer and its callers:
//! - The identifier color codec ([`encode_id`] / [`decode_id`]) and the
//!   background sentinel [`BACKGROUND_ID`]
//! - [`EncodeKey`], the feature key that selects an identifier-encoding
//!   material variant
//! - [`PickerOptions`] configuration
//! - [`PickError`], the picking error taxonomy

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod features;
pub mod options;
pub mod pick;

pub use error::{PickError, Result};
pub use features::EncodeKey;
pub use options::PickerOptions;
pub use pick::{debug_scramble, decode_id, encode_id, encode_id_normalized, BACKGROUND_ID};
