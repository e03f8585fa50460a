//! Core value types: layer descriptors and viewport state.

pub mod descriptor;
pub mod view;

pub use descriptor::{
    LayerDescriptor, LayerKind, LayerRole, RequestParams, ScaleRange, ThemeContents,
};
pub use view::{scale_for_zoom, MapView};
