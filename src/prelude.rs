//! Prelude module for common stratum types and traits
//!
//! Re-exports the most commonly used types, traits, and functions for easy
//! importing with `use stratum::prelude::*;`

pub use crate::compose::Composer;

pub use crate::core::{
    descriptor::{
        LayerDescriptor, LayerKind, LayerRole, RequestParams, ScaleRange, ThemeContents,
    },
    view::{scale_for_zoom, MapView},
};

pub use crate::engine::{
    DrawHook, DrawSurface, MapEngine, MemoryEngine, MemoryFactory, MemoryLayer, NativeGroup,
    NativeLayer, SourceKind,
};

pub use crate::layers::factory::{FactoryRegistry, GeneratedOptions, LayerFactory};

pub use crate::loading::{LoadHandle, LoadState, LoadTracker, LoadingUpdate};

pub use crate::plan::{flatten, RenderPlanEntry};

pub use crate::swipe::{SwipeClip, SwipeOverlay};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};
