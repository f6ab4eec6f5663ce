//! Error types for the picking system.

use thiserror::Error;

/// Errors that can occur while configuring or running a pick.
#[derive(Error, Debug)]
pub enum PickError {
    /// The configured offscreen target size is unusable. The window must be
    /// odd so a single center texel corresponds to the requested point.
    #[error("pick target size {0} is invalid: size must be odd and non-zero")]
    InvalidTargetSize(u32),

    /// `pick` was called on a disposed picker.
    #[error("picker has been disposed")]
    Disposed,

    /// An encode material reached the draw loop without its identifier-color
    /// uniform. Skipping the item would silently produce a wrong pick result,
    /// so the whole pick halts instead.
    #[error("encode material for object {object_id} is missing its identifier-color uniform")]
    MissingColorUniform {
        /// Identifier of the draw item whose material was misconfigured.
        object_id: u32,
    },

    /// Mapping the readback buffer failed.
    #[error("pick readback failed: {0}")]
    ReadbackFailed(String),

    /// A debug-overlay operation was requested but the picker was built
    /// without `debug` enabled.
    #[error("debug overlay is not enabled for this picker")]
    DebugOverlayDisabled,
}

/// A specialized Result type for picking operations.
pub type Result<T> = std::result::Result<T, PickError>;
