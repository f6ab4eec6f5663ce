//! wgpu-based rendering and GPU identifier picking for sensorscope.
//!
//! The engine renders a [`Scene`](scene::Scene) through a [`Camera`] and
//! retains per-frame [`RenderLists`](scene::RenderLists); the [`Picker`]
//! re-submits those lists with identifier-encoding materials to resolve the
//! object under a viewport point.

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod camera;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod picker;
pub mod scene;

pub use camera::{Camera, ViewOffset};
pub use engine::RenderEngine;
pub use error::{RenderError, RenderResult};
pub use geometry::{Geometry, GeometryKind, InstanceTransform, Vertex};
pub use picker::{EncodeMaterial, Picker, ENCODE_FORMAT};
pub use scene::{
    BlendCategory, DrawItem, PickSettings, RenderLists, RenderObject, Scene, SpriteParams,
};
