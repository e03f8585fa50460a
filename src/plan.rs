//! Render plan derivation.
//!
//! Flattens the ordered top-level layer descriptor list into the concrete
//! sequence of native objects to realize. Theme layers are split along
//! their comma-joined sublayer lists: sublayers overridden by an external
//! service become entries of their own (subject to scale visibility), while
//! runs of adjacent native-request sublayers are compacted back into a
//! single entry so one upstream request covers them all.

use crate::core::descriptor::{LayerDescriptor, LayerRole, ThemeContents};
use crate::prelude::HashSet;

/// One native layer object to realize, derived from the descriptor list.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlanEntry {
    /// Stable key of the realized object. `parentId` for pass-through
    /// layers, `parentId-index` for native-request split entries (index of
    /// the seeding sublayer), `parentId#name` for external sublayers.
    pub composite_id: String,
    /// Descriptor fragment the factory realizes.
    pub fragment: LayerDescriptor,
    /// Fully resolved stacking position.
    pub z_index: i32,
}

impl RenderPlanEntry {
    /// Logical layer id load events are attributed to. Split entries keep
    /// their parent's id, so they share one loading bucket.
    pub fn logical_id(&self) -> &str {
        &self.fragment.id
    }
}

/// Flattens `layers` (ordered, first = top-most) into the render plan for
/// the given map scale. Pure and idempotent; the output preserves the
/// input order.
pub fn flatten(layers: &[LayerDescriptor], scale: f64) -> Vec<RenderPlanEntry> {
    let total = layers.len();
    let mut plan = Vec::with_capacity(total);
    let mut seen: HashSet<String> = HashSet::default();

    for (position, layer) in layers.iter().enumerate() {
        // First layer renders on top; the dense z-index base counts from
        // the bottom of the stack so explicit and derived values can mix.
        let stack_index = (total - 1 - position) as i32;
        let entries = match &layer.theme {
            Some(theme) if layer.role == LayerRole::Theme => flatten_theme(layer, theme, scale),
            _ => vec![(layer.id.clone(), layer.clone())],
        };

        for (offset, (composite_id, fragment)) in entries.into_iter().enumerate() {
            if !seen.insert(composite_id.clone()) {
                log::warn!("duplicate composite id {composite_id} in render plan, dropping entry");
                continue;
            }
            let z_index = fragment
                .z_index
                .unwrap_or(stack_index * total as i32 + offset as i32);
            plan.push(RenderPlanEntry {
                composite_id,
                fragment,
                z_index,
            });
        }
    }
    plan
}

fn flatten_theme(
    layer: &LayerDescriptor,
    theme: &ThemeContents,
    scale: f64,
) -> Vec<(String, LayerDescriptor)> {
    let mut entries: Vec<(String, LayerDescriptor)> = Vec::new();

    for (index, (name, opacity)) in layer.params.sublayers().into_iter().enumerate() {
        if let Some(external) = theme.external.get(name) {
            let invisible = theme
                .scales
                .get(name)
                .is_some_and(|range| range.excludes(scale));
            if invisible {
                continue;
            }
            let mut fragment = external.clone();
            fragment.opacity = opacity;
            fragment.visibility = true;
            entries.push((format!("{}#{}", layer.id, name), fragment));
        } else if let Some((_, previous)) = entries
            .last_mut()
            .filter(|(_, fragment)| fragment.id == layer.id)
        {
            // Adjacent native-request sublayers compact into one entry.
            previous.params.push_sublayer(name, opacity);
        } else {
            let mut fragment = layer.clone();
            fragment.params.layers = name.to_string();
            fragment.params.opacities = opacity.to_string();
            entries.push((format!("{}-{}", layer.id, index), fragment));
        }
    }
    entries
}
