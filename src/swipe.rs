//! Swipe comparison overlay.
//!
//! Clips the top-most layer's drawing to the left fraction of the viewport
//! so two layer stacks can be compared side by side. One shared clip hook
//! exists per overlay; the reconciler moves it between native objects as
//! the top-most layer changes identity.

use std::sync::{Arc, Mutex};

use crate::engine::{DrawHook, DrawSurface};

/// Shared swipe fraction, read by the clip hook at draw time.
#[derive(Default)]
pub struct SwipeState {
    fraction: Mutex<Option<f64>>,
}

impl SwipeState {
    /// Current fraction in percent, if swipe is active.
    pub fn fraction(&self) -> Option<f64> {
        *self.fraction.lock().expect("swipe state poisoned")
    }
}

/// Draw hook clipping to the left `fraction`% of the surface.
///
/// When no fraction is set the hook degenerates to a balanced save/restore
/// pair, so leaving it installed is side-effect free.
pub struct SwipeClip {
    state: Arc<SwipeState>,
}

impl DrawHook for SwipeClip {
    fn before_draw(&self, surface: &mut dyn DrawSurface) {
        surface.save();
        if let Some(fraction) = self.state.fraction() {
            let width = surface.width() * (fraction / 100.0);
            surface.clip_rect(0.0, 0.0, width, surface.height());
        }
    }

    fn after_draw(&self, surface: &mut dyn DrawSurface) {
        surface.restore();
    }
}

/// Owns the swipe fraction and tracks which realized layer currently
/// carries the clip hook.
pub struct SwipeOverlay {
    state: Arc<SwipeState>,
    hook: Arc<SwipeClip>,
    holder: Option<String>,
}

impl SwipeOverlay {
    pub fn new() -> Self {
        let state = Arc::new(SwipeState::default());
        let hook = Arc::new(SwipeClip {
            state: Arc::clone(&state),
        });
        Self {
            state,
            hook,
            holder: None,
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        self.state.fraction()
    }

    /// Sets the fraction (clamped to 0-100). Returns whether the value
    /// changed, so the caller knows to request a render.
    pub fn set_fraction(&mut self, fraction: Option<f64>) -> bool {
        let fraction = fraction.map(|f| f.clamp(0.0, 100.0));
        let mut current = self.state.fraction.lock().expect("swipe state poisoned");
        if *current == fraction {
            return false;
        }
        *current = fraction;
        true
    }

    /// The shared clip hook, for installing on a native layer.
    pub fn hook(&self) -> Arc<dyn DrawHook> {
        Arc::clone(&self.hook) as Arc<dyn DrawHook>
    }

    /// Composite id of the layer currently carrying the hook.
    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    pub(crate) fn set_holder(&mut self, holder: Option<String>) {
        self.holder = holder;
    }
}

impl Default for SwipeOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{MemorySurface, SurfaceOp};

    #[test]
    fn test_clip_covers_left_fraction() {
        let mut overlay = SwipeOverlay::new();
        assert!(overlay.set_fraction(Some(25.0)));
        let hook = overlay.hook();

        let mut surface = MemorySurface::new(800.0, 600.0);
        hook.before_draw(&mut surface);
        hook.after_draw(&mut surface);
        assert_eq!(
            surface.ops(),
            &[
                SurfaceOp::Save,
                SurfaceOp::Clip {
                    x: 0.0,
                    y: 0.0,
                    width: 200.0,
                    height: 600.0
                },
                SurfaceOp::Restore,
            ]
        );
    }

    #[test]
    fn test_no_fraction_is_a_noop_pair() {
        let overlay = SwipeOverlay::new();
        let hook = overlay.hook();
        let mut surface = MemorySurface::new(800.0, 600.0);
        hook.before_draw(&mut surface);
        hook.after_draw(&mut surface);
        assert_eq!(surface.ops(), &[SurfaceOp::Save, SurfaceOp::Restore]);
    }

    #[test]
    fn test_set_fraction_reports_changes_and_clamps() {
        let mut overlay = SwipeOverlay::new();
        assert!(!overlay.set_fraction(None));
        assert!(overlay.set_fraction(Some(50.0)));
        assert!(!overlay.set_fraction(Some(50.0)));
        assert!(overlay.set_fraction(Some(150.0)));
        assert_eq!(overlay.fraction(), Some(100.0));
        assert!(overlay.set_fraction(None));
        assert_eq!(overlay.fraction(), None);
    }
}
