//! Per-layer load tracking.
//!
//! The rendering engine reports load lifecycle events per data source; this
//! module folds them into one boolean `loading` flag per logical layer id
//! and publishes every transition over a channel for the application state
//! store to consume. Tiled sources are counted (many concurrent tile
//! requests per layer), image sources are a binary in-flight flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::engine::SourceKind;
use crate::prelude::HashMap;

/// A published loading transition for one logical layer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingUpdate {
    pub layer_id: String,
    pub loading: bool,
}

/// Load state of one logical layer id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadState {
    /// Outstanding tile requests. Never goes negative; decrements for
    /// events the tracker no longer knows about clamp at zero.
    pub pending: usize,
    pub loading: bool,
}

#[derive(Default)]
struct Bucket {
    state: LoadState,
    /// Live handles referencing this bucket. Split entries of one theme
    /// layer share a bucket, so the bucket outlives any single handle.
    refs: usize,
}

struct TrackerState {
    buckets: HashMap<String, Bucket>,
    updates: Sender<LoadingUpdate>,
}

impl TrackerState {
    fn publish(&self, layer_id: &str, loading: bool) {
        let _ = self.updates.send(LoadingUpdate {
            layer_id: layer_id.to_string(),
            loading,
        });
    }

    fn set_loading(&mut self, layer_id: &str, loading: bool) {
        let changed = match self.buckets.get_mut(layer_id) {
            Some(bucket) if bucket.state.loading != loading => {
                bucket.state.loading = loading;
                true
            }
            _ => false,
        };
        if changed {
            self.publish(layer_id, loading);
        }
    }
}

/// Derives per-layer loading flags from engine load events.
///
/// Cloning is cheap and shares the underlying state; the tracker is handed
/// a sender at construction and publishes on every flag transition, the way
/// the tile loader reports completed downloads to its channel.
#[derive(Clone)]
pub struct LoadTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl LoadTracker {
    pub fn new(updates: Sender<LoadingUpdate>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                buckets: HashMap::default(),
                updates,
            })),
        }
    }

    /// Binds a handle for one realized native object. Handles bound for the
    /// same logical id share one bucket; the bucket lives until the last
    /// handle is detached.
    pub fn bind(&self, layer_id: &str, kind: SourceKind) -> LoadHandle {
        let mut state = self.state.lock().expect("load tracker poisoned");
        state.buckets.entry(layer_id.to_string()).or_default().refs += 1;
        LoadHandle {
            inner: Arc::new(HandleInner {
                tracker: Arc::clone(&self.state),
                layer_id: layer_id.to_string(),
                kind,
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Current load state of a logical layer id, if tracked.
    pub fn state(&self, layer_id: &str) -> Option<LoadState> {
        let state = self.state.lock().expect("load tracker poisoned");
        state.buckets.get(layer_id).map(|b| b.state)
    }

    /// True while the layer has outstanding requests.
    pub fn is_loading(&self, layer_id: &str) -> bool {
        self.state(layer_id).map(|s| s.loading).unwrap_or(false)
    }
}

struct HandleInner {
    tracker: Arc<Mutex<TrackerState>>,
    layer_id: String,
    kind: SourceKind,
    alive: AtomicBool,
}

/// Event sink bound to one realized native object.
///
/// The rendering engine invokes the load lifecycle methods from its source
/// callbacks. Clones share one detach flag, so detaching the reconciler's
/// handle also silences the clones held by the native object; events
/// arriving after detach are ignored, which keeps in-flight loads of a
/// destroyed layer from being attributed to a later layer reusing the id.
#[derive(Clone)]
pub struct LoadHandle {
    inner: Arc<HandleInner>,
}

impl LoadHandle {
    pub fn layer_id(&self) -> &str {
        &self.inner.layer_id
    }

    pub fn source_kind(&self) -> SourceKind {
        self.inner.kind
    }

    pub fn is_detached(&self) -> bool {
        !self.inner.alive.load(Ordering::SeqCst)
    }

    /// A load request started.
    pub fn load_started(&self) {
        if self.is_detached() {
            return;
        }
        let mut state = self.inner.tracker.lock().expect("load tracker poisoned");
        match self.inner.kind {
            SourceKind::Tiled => {
                let transitioned = match state.buckets.get_mut(&self.inner.layer_id) {
                    Some(bucket) => {
                        bucket.state.pending += 1;
                        bucket.state.pending == 1
                    }
                    None => false,
                };
                if transitioned {
                    state.set_loading(&self.inner.layer_id, true);
                }
            }
            SourceKind::Image | SourceKind::Static => {
                state.set_loading(&self.inner.layer_id, true);
            }
        }
    }

    /// A load request completed.
    pub fn load_finished(&self) {
        self.settle();
    }

    /// A load request failed. Failures only stop counting as pending; they
    /// are not surfaced as errors.
    pub fn load_failed(&self) {
        self.settle();
    }

    fn settle(&self) {
        if self.is_detached() {
            return;
        }
        let mut state = self.inner.tracker.lock().expect("load tracker poisoned");
        match self.inner.kind {
            SourceKind::Tiled => {
                let settled = match state.buckets.get_mut(&self.inner.layer_id) {
                    Some(bucket) => {
                        bucket.state.pending = bucket.state.pending.saturating_sub(1);
                        bucket.state.pending == 0
                    }
                    None => false,
                };
                if settled {
                    state.set_loading(&self.inner.layer_id, false);
                }
            }
            SourceKind::Image | SourceKind::Static => {
                state.set_loading(&self.inner.layer_id, false);
            }
        }
    }

    /// Silences this handle and all its clones and releases its bucket
    /// reference. Idempotent. When the last handle for an id detaches, the
    /// bucket is dropped; a final `loading=false` is published if it was
    /// still loading so UI indicators cannot stick.
    pub fn detach(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.tracker.lock().expect("load tracker poisoned");
        let released = match state.buckets.get_mut(&self.inner.layer_id) {
            Some(bucket) => {
                bucket.refs = bucket.refs.saturating_sub(1);
                bucket.refs == 0
            }
            None => false,
        };
        if released {
            let was_loading = state
                .buckets
                .remove(&self.inner.layer_id)
                .map(|b| b.state.loading)
                .unwrap_or(false);
            if was_loading {
                state.publish(&self.inner.layer_id, false);
            }
        }
    }
}
