use serde::{Deserialize, Serialize};

use crate::prelude::HashMap;

/// Tag selecting the factory responsible for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Wms,
    Wmts,
    Mvt,
    Vector,
    Group,
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerKind::Wms => write!(f, "wms"),
            LayerKind::Wmts => write!(f, "wmts"),
            LayerKind::Mvt => write!(f, "mvt"),
            LayerKind::Vector => write!(f, "vector"),
            LayerKind::Group => write!(f, "group"),
        }
    }
}

/// Role of a layer within the configured stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerRole {
    Background,
    Theme,
    User,
    Overlay,
}

impl Default for LayerRole {
    fn default() -> Self {
        LayerRole::User
    }
}

/// Upstream request parameters of a theme layer. The sublayer and opacity
/// lists are comma-joined and strictly parallel; positional contiguity is
/// part of the contract for run-length merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(rename = "LAYERS", default)]
    pub layers: String,
    #[serde(rename = "OPACITIES", default)]
    pub opacities: String,
    #[serde(rename = "MAP", default)]
    pub map: String,
}

impl RequestParams {
    /// Splits the comma-joined sublayer list, paired with the parallel
    /// opacity list. Missing opacity slots default to fully opaque.
    pub fn sublayers(&self) -> Vec<(&str, u8)> {
        if self.layers.is_empty() {
            return Vec::new();
        }
        let opacities: Vec<&str> = self.opacities.split(',').collect();
        self.layers
            .split(',')
            .enumerate()
            .map(|(i, name)| {
                let opacity = opacities
                    .get(i)
                    .and_then(|o| o.parse().ok())
                    .unwrap_or(255);
                (name, opacity)
            })
            .collect()
    }

    /// Appends one sublayer to the comma-joined lists.
    pub fn push_sublayer(&mut self, name: &str, opacity: u8) {
        if self.layers.is_empty() {
            self.layers = name.to_string();
            self.opacities = opacity.to_string();
        } else {
            self.layers.push(',');
            self.layers.push_str(name);
            self.opacities.push(',');
            self.opacities.push_str(&opacity.to_string());
        }
    }
}

/// Scale-dependent visibility bounds of a theme sublayer. A sublayer is
/// invisible when the map scale falls outside the defined bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    #[serde(rename = "minScale", default)]
    pub min_scale: Option<f64>,
    #[serde(rename = "maxScale", default)]
    pub max_scale: Option<f64>,
}

impl ScaleRange {
    /// True when `scale` is outside the defined bounds.
    pub fn excludes(&self, scale: f64) -> bool {
        self.min_scale.is_some_and(|min| scale < min)
            || self.max_scale.is_some_and(|max| scale > max)
    }
}

/// Theme-specific contents of a layer descriptor: which sublayers are
/// rendered through their own external service rather than the theme's
/// native request, and the scale bounds declared per sublayer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeContents {
    /// Sublayer name -> external layer descriptor fragment. A name with no
    /// entry here renders via the parent theme layer's own request.
    #[serde(default)]
    pub external: HashMap<String, LayerDescriptor>,
    /// Sublayer name -> scale visibility bounds.
    #[serde(default)]
    pub scales: HashMap<String, ScaleRange>,
}

fn default_visibility() -> bool {
    true
}

fn default_opacity() -> u8 {
    255
}

/// Immutable, declarative specification of one configured layer.
///
/// Descriptors are produced by the application state store and fully
/// replaced on every state change; the engine never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    #[serde(default)]
    pub role: LayerRole,
    #[serde(default = "default_visibility")]
    pub visibility: bool,
    /// 0 (transparent) to 255 (opaque).
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    #[serde(rename = "zIndex", default)]
    pub z_index: Option<i32>,
    #[serde(default)]
    pub params: RequestParams,
    /// Type-specific options bag, passed through to the factory. A
    /// `loading` member is derived state and ignored by change detection.
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub theme: Option<ThemeContents>,
    /// Ordered children of a group layer, one level deep.
    #[serde(default)]
    pub items: Vec<LayerDescriptor>,
    #[serde(rename = "zoomToExtent", default)]
    pub zoom_to_extent: bool,
}

impl LayerDescriptor {
    /// Minimal descriptor with defaults matching a freshly configured layer.
    pub fn new(id: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id: id.into(),
            kind,
            role: LayerRole::default(),
            visibility: true,
            opacity: 255,
            z_index: None,
            params: RequestParams::default(),
            options: serde_json::Value::Null,
            theme: None,
            items: Vec::new(),
            zoom_to_extent: false,
        }
    }

    /// Opacity as the 0.0-1.0 fraction the rendering engine consumes.
    pub fn opacity_fraction(&self) -> f64 {
        f64::from(self.opacity) / 255.0
    }
}
