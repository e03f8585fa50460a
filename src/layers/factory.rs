use crate::core::descriptor::{LayerDescriptor, LayerKind};
use crate::engine::NativeLayer;
use crate::prelude::HashMap;
use crate::Result;

/// Fully generated option set handed to a factory: the descriptor fragment
/// plus the derived stacking and projection context.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOptions {
    pub descriptor: LayerDescriptor,
    pub z_index: i32,
    pub projection: String,
}

impl GeneratedOptions {
    pub fn new(descriptor: LayerDescriptor, z_index: i32, projection: String) -> Self {
        Self {
            descriptor,
            z_index,
            projection,
        }
    }
}

/// Per-layer-type capability set.
///
/// Factories own every protocol-specific concern (request construction,
/// source configuration); the reconciler only drives them through this
/// uniform contract.
pub trait LayerFactory {
    /// Builds a native layer object from a generated option set.
    fn create(&self, options: &GeneratedOptions) -> Result<Box<dyn NativeLayer>>;

    /// Applies a structural option change to an existing native object.
    /// Receives both the new and the previous option sets so it can decide
    /// what actually changed. Returning `Some` means the factory discarded
    /// its native object and built a replacement; the caller swaps it in
    /// and rebinds listeners.
    fn update(
        &self,
        native: &mut dyn NativeLayer,
        new: &GeneratedOptions,
        old: &GeneratedOptions,
    ) -> Result<Option<Box<dyn NativeLayer>>> {
        let _ = (native, new, old);
        Ok(None)
    }

    /// Whether the native object is still usable. An invalid object is
    /// treated as absent and recreated.
    fn is_valid(&self, _native: &dyn NativeLayer) -> bool {
        true
    }
}

/// Maps a layer-type tag to its factory.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<LayerKind, Box<dyn LayerFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for a layer kind, replacing any previous one.
    pub fn register(&mut self, kind: LayerKind, factory: Box<dyn LayerFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: LayerKind) -> Option<&dyn LayerFactory> {
        self.factories.get(&kind).map(|f| f.as_ref())
    }

    /// Like [`get`](FactoryRegistry::get), but failing with
    /// [`LayerError`](crate::LayerError) when no factory is registered.
    pub fn require(&self, kind: LayerKind) -> Result<&dyn LayerFactory> {
        self.get(kind)
            .ok_or(crate::LayerError::UnknownLayerType(kind))
    }

    pub fn contains(&self, kind: LayerKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryFactory, SourceKind};

    #[test]
    fn test_registry_dispatch() {
        let mut registry = FactoryRegistry::new();
        assert!(!registry.contains(LayerKind::Wms));
        registry.register(LayerKind::Wms, Box::new(MemoryFactory::new(SourceKind::Tiled)));
        assert!(registry.contains(LayerKind::Wms));
        assert!(registry.get(LayerKind::Wms).is_some());
        assert!(registry.get(LayerKind::Vector).is_none());
        assert!(registry.require(LayerKind::Wms).is_ok());
        assert!(matches!(
            registry.require(LayerKind::Mvt),
            Err(crate::LayerError::UnknownLayerType(LayerKind::Mvt))
        ));
    }

    #[test]
    fn test_default_validity() {
        let factory = MemoryFactory::new(SourceKind::Image);
        let options = GeneratedOptions::new(
            LayerDescriptor::new("l", LayerKind::Wms),
            0,
            "EPSG:3857".to_string(),
        );
        let layer = factory.create(&options).unwrap();
        assert!(factory.is_valid(layer.as_ref()));
    }
}
