//! Per-layer-type factories and their registry.

pub mod factory;

pub use factory::{FactoryRegistry, GeneratedOptions, LayerFactory};
