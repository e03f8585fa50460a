//! In-memory rendering engine.
//!
//! A headless [`MapEngine`] implementation that records every operation it
//! is asked to perform. It backs the crate's own tests and doubles as a
//! reference for wiring a real engine: every trait obligation is spelled
//! out here in its simplest form.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{DrawHook, DrawSurface, MapEngine, NativeGroup, NativeLayer, SourceKind};
use crate::layers::factory::{GeneratedOptions, LayerFactory};
use crate::loading::LoadHandle;
use crate::prelude::HashMap;
use crate::{LayerError, Result};

/// One recorded engine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOp {
    LayerAdded(String),
    LayerRemoved(String),
    GroupCreated(String),
    RenderRequested,
    ExtentFit([f64; 4]),
}

/// Headless engine that records operations instead of drawing.
#[derive(Default)]
pub struct MemoryEngine {
    ops: Vec<EngineOp>,
    attached: Vec<String>,
    groups: HashMap<String, MemoryLayer>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations recorded since construction or the last
    /// [`take_ops`](MemoryEngine::take_ops).
    pub fn ops(&self) -> &[EngineOp] {
        &self.ops
    }

    /// Drains the recorded operations.
    pub fn take_ops(&mut self) -> Vec<EngineOp> {
        std::mem::take(&mut self.ops)
    }

    /// Ids currently registered with the map, in registration order.
    pub fn attached_ids(&self) -> &[String] {
        &self.attached
    }

    /// Shared-state handle of a group container created by this engine.
    pub fn group(&self, id: &str) -> Option<MemoryLayer> {
        self.groups.get(id).cloned()
    }
}

impl MapEngine for MemoryEngine {
    fn add_layer(&mut self, id: &str) {
        self.attached.push(id.to_string());
        self.ops.push(EngineOp::LayerAdded(id.to_string()));
    }

    fn remove_layer(&mut self, id: &str) {
        self.attached.retain(|attached| attached != id);
        self.ops.push(EngineOp::LayerRemoved(id.to_string()));
    }

    fn create_group(&mut self, id: &str, z_index: i32) -> Box<dyn NativeLayer> {
        let group = MemoryGroup::new(id);
        let mut handle = group.handle();
        handle.set_z_index_internal(z_index);
        self.groups.insert(id.to_string(), group.handle());
        self.ops.push(EngineOp::GroupCreated(id.to_string()));
        Box::new(group)
    }

    fn request_render(&mut self) {
        self.ops.push(EngineOp::RenderRequested);
    }

    fn fit_extent(&mut self, extent: [f64; 4]) {
        self.ops.push(EngineOp::ExtentFit(extent));
    }
}

#[derive(Default)]
struct LayerState {
    visible: bool,
    opacity: f64,
    z_index: i32,
    removed: bool,
    extent: Option<[f64; 4]>,
    listeners: Vec<LoadHandle>,
    draw_hook: Option<Arc<dyn DrawHook>>,
}

/// Native layer of the in-memory engine.
///
/// Clones share state, so a test can keep a handle to a layer the
/// reconciler owns and inspect or drive it from the outside.
#[derive(Clone)]
pub struct MemoryLayer {
    id: String,
    kind: SourceKind,
    managed_removal: bool,
    state: Arc<Mutex<LayerState>>,
}

impl MemoryLayer {
    pub fn new(id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            managed_removal: false,
            state: Arc::new(Mutex::new(LayerState {
                visible: true,
                opacity: 1.0,
                ..LayerState::default()
            })),
        }
    }

    /// Marks this layer as managing its own engine registration.
    pub fn with_managed_removal(mut self) -> Self {
        self.managed_removal = true;
        self
    }

    /// Shared-state handle to this layer.
    pub fn handle(&self) -> MemoryLayer {
        self.clone()
    }

    pub fn visible(&self) -> bool {
        self.state.lock().expect("layer state poisoned").visible
    }

    pub fn opacity(&self) -> f64 {
        self.state.lock().expect("layer state poisoned").opacity
    }

    pub fn z_index(&self) -> i32 {
        self.state.lock().expect("layer state poisoned").z_index
    }

    /// True after [`remove_self`](NativeLayer::remove_self).
    pub fn removed(&self) -> bool {
        self.state.lock().expect("layer state poisoned").removed
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().expect("layer state poisoned").listeners.len()
    }

    pub fn draw_hook(&self) -> Option<Arc<dyn DrawHook>> {
        self.state
            .lock()
            .expect("layer state poisoned")
            .draw_hook
            .clone()
    }

    /// Sets the extent the source would report once loaded.
    pub fn set_extent(&self, extent: [f64; 4]) {
        self.state.lock().expect("layer state poisoned").extent = Some(extent);
    }

    fn set_z_index_internal(&mut self, z_index: i32) {
        self.state.lock().expect("layer state poisoned").z_index = z_index;
    }

    fn listeners(&self) -> Vec<LoadHandle> {
        self.state
            .lock()
            .expect("layer state poisoned")
            .listeners
            .clone()
    }

    /// Simulates the engine starting a load request on this layer's source.
    pub fn begin_load(&self) {
        for listener in self.listeners() {
            listener.load_started();
        }
    }

    /// Simulates a load request completing.
    pub fn finish_load(&self) {
        for listener in self.listeners() {
            listener.load_finished();
        }
    }

    /// Simulates a load request failing.
    pub fn fail_load(&self) {
        for listener in self.listeners() {
            listener.load_failed();
        }
    }

    /// Simulates the engine drawing this layer through the given surface.
    pub fn draw(&self, surface: &mut dyn DrawSurface) {
        let hook = self.draw_hook();
        if let Some(hook) = &hook {
            hook.before_draw(surface);
        }
        if let Some(hook) = &hook {
            hook.after_draw(surface);
        }
    }
}

impl NativeLayer for MemoryLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_visible(&mut self, visible: bool) {
        self.state.lock().expect("layer state poisoned").visible = visible;
    }

    fn set_opacity(&mut self, opacity: f64) {
        self.state.lock().expect("layer state poisoned").opacity = opacity.clamp(0.0, 1.0);
    }

    fn set_z_index(&mut self, z_index: i32) {
        self.set_z_index_internal(z_index);
    }

    fn source_kind(&self) -> SourceKind {
        self.kind
    }

    fn managed_removal(&self) -> bool {
        self.managed_removal
    }

    fn remove_self(&mut self) {
        self.state.lock().expect("layer state poisoned").removed = true;
    }

    fn attach_load_listener(&mut self, handle: LoadHandle) {
        self.state
            .lock()
            .expect("layer state poisoned")
            .listeners
            .push(handle);
    }

    fn detach_load_listeners(&mut self) {
        self.state
            .lock()
            .expect("layer state poisoned")
            .listeners
            .clear();
    }

    fn set_draw_hook(&mut self, hook: Option<Arc<dyn DrawHook>>) {
        self.state.lock().expect("layer state poisoned").draw_hook = hook;
    }

    fn extent(&self) -> Option<[f64; 4]> {
        self.state.lock().expect("layer state poisoned").extent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Native group container of the in-memory engine. Property mutations are
/// shared with the handle returned by [`MemoryGroup::handle`]; the child
/// collection is owned directly.
pub struct MemoryGroup {
    base: MemoryLayer,
    children: Vec<Box<dyn NativeLayer>>,
}

impl MemoryGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            base: MemoryLayer::new(id, SourceKind::Static),
            children: Vec::new(),
        }
    }

    /// Shared-state handle to the group's layer properties.
    pub fn handle(&self) -> MemoryLayer {
        self.base.handle()
    }
}

impl NativeLayer for MemoryGroup {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn set_visible(&mut self, visible: bool) {
        self.base.set_visible(visible);
    }

    fn set_opacity(&mut self, opacity: f64) {
        self.base.set_opacity(opacity);
    }

    fn set_z_index(&mut self, z_index: i32) {
        self.base.set_z_index(z_index);
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Static
    }

    fn attach_load_listener(&mut self, handle: LoadHandle) {
        self.base.attach_load_listener(handle);
    }

    fn detach_load_listeners(&mut self) {
        self.base.detach_load_listeners();
        for child in &mut self.children {
            child.detach_load_listeners();
        }
    }

    fn set_draw_hook(&mut self, hook: Option<Arc<dyn DrawHook>>) {
        self.base.set_draw_hook(hook);
    }

    fn as_group_mut(&mut self) -> Option<&mut dyn NativeGroup> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl NativeGroup for MemoryGroup {
    fn insert_child(&mut self, index: usize, child: Box<dyn NativeLayer>) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    fn replace_child(
        &mut self,
        id: &str,
        child: Box<dyn NativeLayer>,
    ) -> Option<Box<dyn NativeLayer>> {
        let position = self.children.iter().position(|c| c.id() == id)?;
        Some(std::mem::replace(&mut self.children[position], child))
    }

    fn remove_child(&mut self, id: &str) -> Option<Box<dyn NativeLayer>> {
        let position = self.children.iter().position(|c| c.id() == id)?;
        Some(self.children.remove(position))
    }

    fn child_mut(&mut self, id: &str) -> Option<&mut dyn NativeLayer> {
        self.children
            .iter_mut()
            .find(|c| c.id() == id)
            .map(|c| c.as_mut() as &mut dyn NativeLayer)
    }

    fn child_ids(&self) -> Vec<String> {
        self.children.iter().map(|c| c.id().to_string()).collect()
    }

    fn len(&self) -> usize {
        self.children.len()
    }
}

/// Recording drawing surface for exercising draw hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Save,
    Restore,
    Clip { x: f64, y: f64, width: f64, height: f64 },
}

/// Fixed-size surface that records save/restore/clip calls.
pub struct MemorySurface {
    width: f64,
    height: f64,
    ops: Vec<SurfaceOp>,
}

impl MemorySurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }
}

impl DrawSurface for MemorySurface {
    fn width(&self) -> f64 {
        self.width
    }

    fn height(&self) -> f64 {
        self.height
    }

    fn save(&mut self) {
        self.ops.push(SurfaceOp::Save);
    }

    fn restore(&mut self) {
        self.ops.push(SurfaceOp::Restore);
    }

    fn clip_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.ops.push(SurfaceOp::Clip {
            x,
            y,
            width,
            height,
        });
    }
}

/// Factory producing [`MemoryLayer`]s, with knobs for driving failure and
/// rebuild paths from tests.
#[derive(Clone)]
pub struct MemoryFactory {
    kind: SourceKind,
    rebuild_on_update: bool,
    managed_removal: bool,
    extent: Option<[f64; 4]>,
    created: Arc<Mutex<Vec<MemoryLayer>>>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    fail_next_create: Arc<AtomicBool>,
    valid: Arc<AtomicBool>,
}

impl MemoryFactory {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            rebuild_on_update: false,
            managed_removal: false,
            extent: None,
            created: Arc::new(Mutex::new(Vec::new())),
            create_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            fail_next_create: Arc::new(AtomicBool::new(false)),
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every structural update discard and rebuild the native object,
    /// like factories whose sources cannot be reconfigured in place.
    pub fn with_rebuild_on_update(mut self) -> Self {
        self.rebuild_on_update = true;
        self
    }

    /// Makes every created layer report the given source extent.
    pub fn with_extent(mut self, extent: [f64; 4]) -> Self {
        self.extent = Some(extent);
        self
    }

    /// Makes every created layer manage its own engine registration.
    pub fn with_managed_removal(mut self) -> Self {
        self.managed_removal = true;
        self
    }

    /// Handles of every layer this factory created, in creation order.
    pub fn created(&self) -> Vec<MemoryLayer> {
        self.created.lock().expect("factory state poisoned").clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Makes the next create call fail.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Controls the validity predicate for every layer of this factory.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    fn build(&self, options: &GeneratedOptions) -> MemoryLayer {
        let mut layer = MemoryLayer::new(&options.descriptor.id, self.kind);
        if self.managed_removal {
            layer = layer.with_managed_removal();
        }
        layer.set_z_index_internal(options.z_index);
        if let Some(extent) = self.extent {
            layer.set_extent(extent);
        }
        let created = layer.handle();
        self.created
            .lock()
            .expect("factory state poisoned")
            .push(created);
        layer
    }
}

impl LayerFactory for MemoryFactory {
    fn create(&self, options: &GeneratedOptions) -> Result<Box<dyn NativeLayer>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(LayerError::Factory {
                id: options.descriptor.id.clone(),
                message: "synthetic create failure".to_string(),
            });
        }
        Ok(Box::new(self.build(options)))
    }

    fn update(
        &self,
        native: &mut dyn NativeLayer,
        new: &GeneratedOptions,
        _old: &GeneratedOptions,
    ) -> Result<Option<Box<dyn NativeLayer>>> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.rebuild_on_update {
            return Ok(Some(Box::new(self.build(new))));
        }
        native.set_z_index(new.z_index);
        Ok(None)
    }

    fn is_valid(&self, _native: &dyn NativeLayer) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}
