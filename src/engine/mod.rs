//! Rendering-engine boundary.
//!
//! The engine that actually draws layers is an external collaborator; this
//! module defines the trait surface the reconciler consumes: native layer
//! objects with cheap property mutation, group containers, load-event
//! attachment and pre/post draw hooks, plus the handful of map-level
//! primitives (add/remove, render requests, extent fit).

pub mod memory;

use std::any::Any;
use std::sync::Arc;

use crate::loading::LoadHandle;

pub use memory::{
    EngineOp, MemoryEngine, MemoryFactory, MemoryGroup, MemoryLayer, MemorySurface, SurfaceOp,
};

/// Shape of a native layer's data source, fixed at creation time.
///
/// This replaces probing the native object for tile-loading capabilities at
/// event-binding time: the factory knows what it built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Issues many concurrent tile requests per draw; loading is counted.
    Tiled,
    /// Single in-flight image request per draw; loading is a binary flag.
    Image,
    /// No asynchronous source (in-memory vector data, group containers).
    Static,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Tiled => write!(f, "tiled"),
            SourceKind::Image => write!(f, "image"),
            SourceKind::Static => write!(f, "static"),
        }
    }
}

/// 2D drawing surface handed to draw hooks by the engine.
pub trait DrawSurface {
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    /// Pushes the current clip/transform state.
    fn save(&mut self);
    /// Pops back to the previously saved state.
    fn restore(&mut self);
    /// Intersects the current clip region with the given rectangle.
    fn clip_rect(&mut self, x: f64, y: f64, width: f64, height: f64);
}

/// Pre/post draw hook installed on a native layer.
pub trait DrawHook: Send + Sync {
    fn before_draw(&self, surface: &mut dyn DrawSurface);
    fn after_draw(&self, surface: &mut dyn DrawSurface);
}

/// Ordered child collection of a native group container.
pub trait NativeGroup {
    /// Inserts a child at `index` (clamped to the current length).
    fn insert_child(&mut self, index: usize, child: Box<dyn NativeLayer>);
    /// Swaps the child with the given id for a rebuilt native object.
    fn replace_child(&mut self, id: &str, child: Box<dyn NativeLayer>)
        -> Option<Box<dyn NativeLayer>>;
    fn remove_child(&mut self, id: &str) -> Option<Box<dyn NativeLayer>>;
    fn child_mut(&mut self, id: &str) -> Option<&mut dyn NativeLayer>;
    fn child_ids(&self) -> Vec<String>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A stateful drawable object owned by the rendering engine.
///
/// Exactly one native object exists per realized plan entry; the reconciler
/// owns it for its whole lifetime and mutates it surgically instead of
/// rebuilding it on every state change.
pub trait NativeLayer {
    /// Composite id assigned at creation.
    fn id(&self) -> &str;

    fn set_visible(&mut self, visible: bool);
    /// Opacity as a 0.0-1.0 fraction.
    fn set_opacity(&mut self, opacity: f64);
    fn set_z_index(&mut self, z_index: i32);

    /// Source shape, fixed at creation time.
    fn source_kind(&self) -> SourceKind;

    /// True for layers that manage their own registration with the engine
    /// and must not be added or removed through [`MapEngine`].
    fn managed_removal(&self) -> bool {
        false
    }

    /// Tears down a self-managing layer. Only called when
    /// [`managed_removal`](NativeLayer::managed_removal) is true.
    fn remove_self(&mut self) {}

    /// Wires the engine's source load events to the given handle. The
    /// engine keeps a clone and invokes it from its source callbacks.
    fn attach_load_listener(&mut self, handle: LoadHandle);

    /// Drops all attached load handles.
    fn detach_load_listeners(&mut self);

    /// Installs or clears the pre/post draw hook.
    fn set_draw_hook(&mut self, hook: Option<Arc<dyn DrawHook>>);

    /// Data extent in map units, once the source knows it.
    fn extent(&self) -> Option<[f64; 4]> {
        None
    }

    /// Child collection access for group containers.
    fn as_group_mut(&mut self) -> Option<&mut dyn NativeGroup> {
        None
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Map-level primitives of the rendering engine.
pub trait MapEngine {
    /// Registers a realized layer with the map, by composite id.
    fn add_layer(&mut self, id: &str);
    /// Unregisters a layer from the map.
    fn remove_layer(&mut self, id: &str);
    /// Creates an empty native group container.
    fn create_group(&mut self, id: &str, z_index: i32) -> Box<dyn NativeLayer>;
    /// Asks the engine to redraw, e.g. after the swipe fraction changed.
    fn request_render(&mut self);
    /// Fits the viewport to the given extent `[minx, miny, maxx, maxy]`.
    fn fit_extent(&mut self, extent: [f64; 4]);
}
