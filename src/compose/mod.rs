//! Layer lifecycle reconciliation.
//!
//! The [`Composer`] owns exactly one native rendering-engine object per
//! realized plan entry and reconciles each new render plan against them:
//! new composite ids are created through the factory registry, persisting
//! ids are updated surgically (cheap property mutations where possible,
//! factory updates for structural changes), and vanished ids are torn down
//! with their listeners detached first. There is no "re-render everything"
//! fallback; surgical updates are what avoids flicker and redundant
//! network requests.

use crossbeam_channel::Sender;

use crate::core::descriptor::{LayerDescriptor, LayerKind};
use crate::core::view::MapView;
use crate::engine::{MapEngine, NativeLayer};
use crate::layers::factory::{FactoryRegistry, GeneratedOptions};
use crate::loading::{LoadHandle, LoadTracker, LoadingUpdate};
use crate::plan::{flatten, RenderPlanEntry};
use crate::prelude::{HashMap, HashSet};
use crate::swipe::SwipeOverlay;
use crate::{LayerError, Result};

/// One realized plan entry: the owned native object plus the descriptor
/// state it was last reconciled against.
struct RealizedLayer {
    native: Box<dyn NativeLayer>,
    fragment: LayerDescriptor,
    z_index: i32,
    projection: String,
    load: LoadHandle,
    /// Realized children of a group container, in item order.
    children: Vec<RealizedChild>,
}

struct RealizedChild {
    /// Child descriptor id, the key within the native group collection.
    child_id: String,
    /// `parentId#childId`, the logical id child load events attribute to.
    composite_id: String,
    fragment: LayerDescriptor,
    load: LoadHandle,
}

/// Reconciles declarative layer state against the rendering engine.
pub struct Composer {
    registry: FactoryRegistry,
    tracker: LoadTracker,
    swipe: SwipeOverlay,
    realized: HashMap<String, RealizedLayer>,
}

impl Composer {
    /// Creates a composer publishing loading transitions to `updates`.
    pub fn new(registry: FactoryRegistry, updates: Sender<LoadingUpdate>) -> Self {
        Self {
            registry,
            tracker: LoadTracker::new(updates),
            swipe: SwipeOverlay::new(),
            realized: HashMap::default(),
        }
    }

    /// The load tracker deriving per-layer loading flags.
    pub fn tracker(&self) -> &LoadTracker {
        &self.tracker
    }

    /// Composite ids of all currently realized layers.
    pub fn realized_ids(&self) -> Vec<String> {
        self.realized.keys().cloned().collect()
    }

    pub fn contains(&self, composite_id: &str) -> bool {
        self.realized.contains_key(composite_id)
    }

    pub fn len(&self) -> usize {
        self.realized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realized.is_empty()
    }

    /// Composite id of the layer currently carrying the swipe clip hook.
    pub fn swipe_holder(&self) -> Option<&str> {
        self.swipe.holder()
    }

    pub fn swipe_fraction(&self) -> Option<f64> {
        self.swipe.fraction()
    }

    /// Runs one full reconciliation pass: flattens `layers` for the current
    /// view, diffs the plan against the realized objects, and rebinds the
    /// swipe hook to the top-most entry. Idempotent for unchanged input.
    pub fn apply(
        &mut self,
        engine: &mut dyn MapEngine,
        layers: &[LayerDescriptor],
        view: &MapView,
        swipe: Option<f64>,
    ) {
        let plan = flatten(layers, view.scale);
        log::debug!(
            "reconciling {} plan entries against {} realized layers",
            plan.len(),
            self.realized.len()
        );

        // Tear down vanished ids first so a composite id reused by a new
        // layer can never inherit the old native object or its events.
        let keep: HashSet<&str> = plan.iter().map(|e| e.composite_id.as_str()).collect();
        let stale: Vec<String> = self
            .realized
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.destroy(engine, &id);
        }

        for entry in &plan {
            self.apply_entry(engine, entry, view);
        }

        self.rebind_swipe(plan.first().map(|e| e.composite_id.clone()));
        if self.swipe.set_fraction(swipe) {
            engine.request_render();
        }
    }

    /// Updates only the swipe fraction, requesting a render when it changed.
    pub fn set_swipe(&mut self, engine: &mut dyn MapEngine, fraction: Option<f64>) {
        if self.swipe.set_fraction(fraction) {
            engine.request_render();
        }
    }

    fn apply_entry(&mut self, engine: &mut dyn MapEngine, entry: &RenderPlanEntry, view: &MapView) {
        let kind = entry.fragment.kind;
        if kind != LayerKind::Group && !self.registry.contains(kind) {
            log::warn!(
                "no factory registered for layer type {kind}, skipping {}",
                entry.composite_id
            );
            return;
        }

        if let Some(existing) = self.realized.get(&entry.composite_id) {
            let valid = match kind {
                LayerKind::Group => true,
                _ => self
                    .registry
                    .get(kind)
                    .map(|factory| factory.is_valid(existing.native.as_ref()))
                    .unwrap_or(true),
            };
            if !valid {
                log::warn!(
                    "native object for {} is no longer valid, recreating",
                    entry.composite_id
                );
                self.destroy(engine, &entry.composite_id);
            }
        }

        if self.realized.contains_key(&entry.composite_id) {
            self.update_entry(engine, entry, view);
        } else {
            self.create_entry(engine, entry, view);
        }
    }

    fn create_entry(&mut self, engine: &mut dyn MapEngine, entry: &RenderPlanEntry, view: &MapView) {
        let built = if entry.fragment.kind == LayerKind::Group {
            self.create_group(engine, entry, view)
        } else {
            let options =
                GeneratedOptions::new(entry.fragment.clone(), entry.z_index, view.projection.clone());
            self.registry
                .require(entry.fragment.kind)
                .and_then(|factory| factory.create(&options))
                .map(|native| (native, Vec::new()))
        };
        let (mut native, children) = match built {
            Ok(built) => built,
            Err(err) => {
                // Not retried on a timer; the next state-driven pass will.
                log::warn!("failed to create layer {}: {err}", entry.composite_id);
                return;
            }
        };

        native.set_visible(entry.fragment.visibility);
        native.set_opacity(entry.fragment.opacity_fraction());
        native.set_z_index(entry.z_index);
        let load = self.tracker.bind(entry.logical_id(), native.source_kind());
        native.attach_load_listener(load.clone());
        if !native.managed_removal() {
            engine.add_layer(&entry.composite_id);
        }
        if entry.fragment.zoom_to_extent {
            if let Some(extent) = native.extent() {
                engine.fit_extent(extent);
            }
        }
        log::debug!(
            "created layer {} (type {})",
            entry.composite_id,
            entry.fragment.kind
        );

        self.realized.insert(
            entry.composite_id.clone(),
            RealizedLayer {
                native,
                fragment: entry.fragment.clone(),
                z_index: entry.z_index,
                projection: view.projection.clone(),
                load,
                children,
            },
        );
    }

    fn create_group(
        &self,
        engine: &mut dyn MapEngine,
        entry: &RenderPlanEntry,
        view: &MapView,
    ) -> Result<(Box<dyn NativeLayer>, Vec<RealizedChild>)> {
        let mut native = engine.create_group(&entry.composite_id, entry.z_index);
        let mut children = Vec::new();
        {
            let Some(group) = native.as_group_mut() else {
                return Err(LayerError::InvalidNative(entry.composite_id.clone()));
            };
            for item in &entry.fragment.items {
                if let Some((child_native, child)) = Self::create_child(
                    &self.registry,
                    &self.tracker,
                    &entry.fragment.id,
                    item,
                    entry.z_index,
                    view,
                ) {
                    let index = group.len();
                    group.insert_child(index, child_native);
                    children.push(child);
                }
            }
        }
        Ok((native, children))
    }

    fn create_child(
        registry: &FactoryRegistry,
        tracker: &LoadTracker,
        parent_id: &str,
        item: &LayerDescriptor,
        z_index: i32,
        view: &MapView,
    ) -> Option<(Box<dyn NativeLayer>, RealizedChild)> {
        if item.kind == LayerKind::Group {
            log::warn!("nested group {} inside {parent_id} is not supported, skipping", item.id);
            return None;
        }
        let Some(factory) = registry.get(item.kind) else {
            log::warn!(
                "no factory registered for layer type {}, skipping group child {}",
                item.kind,
                item.id
            );
            return None;
        };
        let options = GeneratedOptions::new(item.clone(), z_index, view.projection.clone());
        let mut native = match factory.create(&options) {
            Ok(native) => native,
            Err(err) => {
                log::warn!("failed to create group child {parent_id}#{}: {err}", item.id);
                return None;
            }
        };
        native.set_visible(item.visibility);
        native.set_opacity(item.opacity_fraction());
        let composite_id = format!("{parent_id}#{}", item.id);
        let load = tracker.bind(&composite_id, native.source_kind());
        native.attach_load_listener(load.clone());
        Some((
            native,
            RealizedChild {
                child_id: item.id.clone(),
                composite_id,
                fragment: item.clone(),
                load,
            },
        ))
    }

    fn update_entry(&mut self, engine: &mut dyn MapEngine, entry: &RenderPlanEntry, view: &MapView) {
        let mut failed = false;
        {
            let Some(realized) = self.realized.get_mut(&entry.composite_id) else {
                return;
            };

            // Cheap property updates bypass the factory entirely.
            if entry.fragment.visibility != realized.fragment.visibility {
                realized.native.set_visible(entry.fragment.visibility);
            }
            if entry.fragment.opacity != realized.fragment.opacity {
                realized.native.set_opacity(entry.fragment.opacity_fraction());
            }
            if entry.z_index != realized.z_index {
                realized.native.set_z_index(entry.z_index);
            }

            let structural = view.projection != realized.projection
                || structural_change(&realized.fragment, &entry.fragment);
            if structural {
                if entry.fragment.kind == LayerKind::Group {
                    Self::update_group_children(
                        &self.registry,
                        &self.tracker,
                        realized,
                        entry,
                        view,
                    );
                } else if let Some(factory) = self.registry.get(entry.fragment.kind) {
                    let new_opts = GeneratedOptions::new(
                        entry.fragment.clone(),
                        entry.z_index,
                        view.projection.clone(),
                    );
                    let old_opts = GeneratedOptions::new(
                        realized.fragment.clone(),
                        realized.z_index,
                        realized.projection.clone(),
                    );
                    match factory.update(realized.native.as_mut(), &new_opts, &old_opts) {
                        Ok(None) => {}
                        Ok(Some(mut rebuilt)) => {
                            log::debug!(
                                "factory rebuilt native object for {}",
                                entry.composite_id
                            );
                            // The wrapper survives a rebuild; listeners do not.
                            realized.load.detach();
                            realized.native.detach_load_listeners();
                            rebuilt.set_visible(entry.fragment.visibility);
                            rebuilt.set_opacity(entry.fragment.opacity_fraction());
                            rebuilt.set_z_index(entry.z_index);
                            let load =
                                self.tracker.bind(entry.logical_id(), rebuilt.source_kind());
                            rebuilt.attach_load_listener(load.clone());
                            realized.native = rebuilt;
                            realized.load = load;
                            if self.swipe.holder() == Some(entry.composite_id.as_str()) {
                                realized.native.set_draw_hook(Some(self.swipe.hook()));
                            }
                        }
                        Err(err) => {
                            log::warn!(
                                "factory update failed for {}: {err}",
                                entry.composite_id
                            );
                            failed = true;
                        }
                    }
                }
            }

            if !failed {
                realized.fragment = entry.fragment.clone();
                realized.z_index = entry.z_index;
                realized.projection = view.projection.clone();
            }
        }
        if failed {
            // No partial state: tear the entry down; the next pass recreates it.
            self.destroy(engine, &entry.composite_id);
        }
    }

    fn update_group_children(
        registry: &FactoryRegistry,
        tracker: &LoadTracker,
        realized: &mut RealizedLayer,
        entry: &RenderPlanEntry,
        view: &MapView,
    ) {
        let parent_projection = realized.projection.clone();
        let parent_z_index = realized.z_index;
        let Some(group) = realized.native.as_group_mut() else {
            return;
        };
        let mut previous: HashMap<String, RealizedChild> = realized
            .children
            .drain(..)
            .map(|child| (child.child_id.clone(), child))
            .collect();
        let mut next = Vec::with_capacity(entry.fragment.items.len());

        for (index, item) in entry.fragment.items.iter().enumerate() {
            if item.kind == LayerKind::Group {
                log::warn!(
                    "nested group {} inside {} is not supported, skipping",
                    item.id,
                    entry.fragment.id
                );
                continue;
            }
            match previous.remove(&item.id) {
                Some(mut child) => {
                    if let Some(native) = group.child_mut(&item.id) {
                        if item.visibility != child.fragment.visibility {
                            native.set_visible(item.visibility);
                        }
                        if item.opacity != child.fragment.opacity {
                            native.set_opacity(item.opacity_fraction());
                        }
                    }
                    let structural = view.projection != parent_projection
                        || structural_change(&child.fragment, item);
                    if structural {
                        if let Some(factory) = registry.get(item.kind) {
                            let new_opts = GeneratedOptions::new(
                                item.clone(),
                                entry.z_index,
                                view.projection.clone(),
                            );
                            let old_opts = GeneratedOptions::new(
                                child.fragment.clone(),
                                parent_z_index,
                                parent_projection.clone(),
                            );
                            let outcome = group
                                .child_mut(&item.id)
                                .map(|native| factory.update(native, &new_opts, &old_opts));
                            match outcome {
                                Some(Ok(Some(mut rebuilt))) => {
                                    child.load.detach();
                                    rebuilt.set_visible(item.visibility);
                                    rebuilt.set_opacity(item.opacity_fraction());
                                    let load =
                                        tracker.bind(&child.composite_id, rebuilt.source_kind());
                                    rebuilt.attach_load_listener(load.clone());
                                    child.load = load;
                                    group.replace_child(&item.id, rebuilt);
                                }
                                Some(Err(err)) => {
                                    log::warn!(
                                        "factory update failed for group child {}: {err}",
                                        child.composite_id
                                    );
                                    child.load.detach();
                                    if let Some(mut native) = group.remove_child(&item.id) {
                                        native.detach_load_listeners();
                                    }
                                    continue;
                                }
                                Some(Ok(None)) | None => {}
                            }
                        }
                    }
                    child.fragment = item.clone();
                    next.push(child);
                }
                None => {
                    if let Some((native, child)) = Self::create_child(
                        registry,
                        tracker,
                        &entry.fragment.id,
                        item,
                        entry.z_index,
                        view,
                    ) {
                        group.insert_child(index.min(group.len()), native);
                        next.push(child);
                    }
                }
            }
        }

        for (_, removed) in previous {
            removed.load.detach();
            if let Some(mut native) = group.remove_child(&removed.child_id) {
                native.detach_load_listeners();
            }
            log::debug!("destroyed group child {}", removed.composite_id);
        }
        realized.children = next;
    }

    fn destroy(&mut self, engine: &mut dyn MapEngine, composite_id: &str) {
        let Some(mut realized) = self.realized.remove(composite_id) else {
            return;
        };
        if self.swipe.holder() == Some(composite_id) {
            realized.native.set_draw_hook(None);
            self.swipe.set_holder(None);
        }
        // Listeners go before the native object so in-flight events of a
        // removed layer cannot reach a reused composite id.
        for child in &realized.children {
            child.load.detach();
        }
        realized.load.detach();
        realized.native.detach_load_listeners();
        if realized.native.managed_removal() {
            realized.native.remove_self();
        } else {
            engine.remove_layer(composite_id);
        }
        log::debug!("destroyed layer {composite_id}");
    }

    fn rebind_swipe(&mut self, top: Option<String>) {
        if self.swipe.holder() == top.as_deref() {
            return;
        }
        if let Some(previous) = self.swipe.holder().map(str::to_string) {
            if let Some(realized) = self.realized.get_mut(&previous) {
                realized.native.set_draw_hook(None);
            }
        }
        let mut holder = None;
        if let Some(top_id) = top {
            // The top entry may have failed to realize; stay unhooked then.
            if let Some(realized) = self.realized.get_mut(&top_id) {
                realized.native.set_draw_hook(Some(self.swipe.hook()));
                holder = Some(top_id);
            }
        }
        self.swipe.set_holder(holder);
    }
}

/// True when the two fragments differ in anything beyond the cheap
/// properties (visibility, opacity, z-index) and the derived `loading`
/// member of the options bag.
fn structural_change(old: &LayerDescriptor, new: &LayerDescriptor) -> bool {
    normalized(old) != normalized(new)
}

fn normalized(descriptor: &LayerDescriptor) -> LayerDescriptor {
    let mut normalized = descriptor.clone();
    normalized.visibility = true;
    normalized.opacity = 255;
    normalized.z_index = None;
    if let serde_json::Value::Object(map) = &mut normalized.options {
        map.remove("loading");
        // An options bag that only carried `loading` compares equal to no bag.
        if map.is_empty() {
            normalized.options = serde_json::Value::Null;
        }
    }
    normalized
}
