/// Viewport state consumed by one reconciliation pass: the current map
/// projection code and the denominator of the current map scale.
#[derive(Debug, Clone, PartialEq)]
pub struct MapView {
    /// Projection code, e.g. "EPSG:3857".
    pub projection: String,
    /// Current map scale denominator, derived from zoom and the scale table.
    pub scale: f64,
}

impl MapView {
    pub fn new(projection: impl Into<String>, scale: f64) -> Self {
        Self {
            projection: projection.into(),
            scale,
        }
    }
}

impl Default for MapView {
    fn default() -> Self {
        Self::new("EPSG:3857", 0.0)
    }
}

/// Looks up the scale denominator for a zoom level in the map's scale
/// table. Fractional zoom levels round to the nearest entry and values
/// outside the table clamp to its ends. An empty table yields 0.
pub fn scale_for_zoom(scales: &[f64], zoom: f64) -> f64 {
    if scales.is_empty() {
        return 0.0;
    }
    let index = zoom.round().max(0.0) as usize;
    scales[index.min(scales.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALES: [f64; 4] = [1000000.0, 500000.0, 250000.0, 100000.0];

    #[test]
    fn test_scale_for_zoom_rounds() {
        assert_eq!(scale_for_zoom(&SCALES, 0.0), 1000000.0);
        assert_eq!(scale_for_zoom(&SCALES, 1.4), 500000.0);
        assert_eq!(scale_for_zoom(&SCALES, 1.6), 250000.0);
    }

    #[test]
    fn test_scale_for_zoom_clamps() {
        assert_eq!(scale_for_zoom(&SCALES, -2.0), 1000000.0);
        assert_eq!(scale_for_zoom(&SCALES, 10.0), 100000.0);
    }

    #[test]
    fn test_scale_for_zoom_empty_table() {
        assert_eq!(scale_for_zoom(&[], 3.0), 0.0);
    }
}
