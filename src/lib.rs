//! # Stratum
//!
//! Declarative map layer reconciliation and load tracking.
//!
//! An interactive map client describes *what* should be visible as an
//! ordered list of immutable layer descriptors; the rendering engine holds
//! long-lived, stateful native layer objects. This crate bridges the two:
//! it flattens the descriptor list into a concrete render plan (splitting
//! theme layers along their sublayer lists, honoring scale visibility),
//! reconciles the plan against the realized native objects through
//! per-layer-type factories, derives a per-layer `loading` flag from the
//! engine's asynchronous load events, and drives the swipe comparison
//! overlay via draw hooks on the top-most layer.
//!
//! The rendering engine itself, the factories, and the application state
//! store are external collaborators behind the traits in [`engine`] and
//! [`layers::factory`]. An in-memory reference engine is provided in
//! [`engine::memory`].

pub mod compose;
pub mod core;
pub mod engine;
pub mod layers;
pub mod loading;
pub mod plan;
pub mod prelude;
pub mod swipe;

// Re-export public API
pub use crate::core::{
    descriptor::{LayerDescriptor, LayerKind, LayerRole, RequestParams, ScaleRange, ThemeContents},
    view::{scale_for_zoom, MapView},
};

pub use compose::Composer;
pub use engine::{DrawHook, DrawSurface, MapEngine, NativeGroup, NativeLayer, SourceKind};
pub use layers::{FactoryRegistry, GeneratedOptions, LayerFactory};
pub use loading::{LoadHandle, LoadState, LoadTracker, LoadingUpdate};
pub use plan::{flatten, RenderPlanEntry};
pub use swipe::{SwipeClip, SwipeOverlay};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, LayerError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("no factory registered for layer type {0}")]
    UnknownLayerType(crate::core::descriptor::LayerKind),

    #[error("factory error for layer {id}: {message}")]
    Factory { id: String, message: String },

    #[error("native object for layer {0} is no longer valid")]
    InvalidNative(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
