use glam::Vec3;
use std::sync::Arc;

use crate::model::{Color, ColorMap, PixelSet};
use crate::spatial::{OverlayId, SpatialModel};

/// Drawn above every group overlay.
pub const SELECTION_OVERLAY_PRIORITY: usize = 2;

/// Pixels the operator has picked but not yet turned into a group.
pub struct ActiveSelection {
    overlay: OverlayId,
    pixels: PixelSet,
    color: Color,
}

impl ActiveSelection {
    pub fn new(model: &mut SpatialModel, color: Color) -> Self {
        Self {
            overlay: model.create_overlay(SELECTION_OVERLAY_PRIORITY),
            pixels: PixelSet::new(),
            color,
        }
    }

    pub fn pixels(&self) -> &PixelSet {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn overlay_id(&self) -> OverlayId {
        self.overlay
    }

    fn repaint(&self, model: &mut SpatialModel) {
        let colors: ColorMap = self.pixels.iter().map(|&i| (i, self.color)).collect();
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.restore(Arc::new(colors));
        }
    }

    /// Out-of-range indices are ignored. Returns how many pixels were new.
    pub fn add<'p>(&mut self, model: &mut SpatialModel, pixels: impl IntoIterator<Item = &'p usize>) -> usize {
        let before = self.pixels.len();
        let limit = model.pixel_count();
        self.pixels.extend(pixels.into_iter().copied().filter(|&i| i < limit));
        let added = self.pixels.len() - before;
        if added > 0 {
            self.repaint(model);
        }
        added
    }

    pub fn remove<'p>(&mut self, model: &mut SpatialModel, pixels: impl IntoIterator<Item = &'p usize>) -> usize {
        let before = self.pixels.len();
        for i in pixels {
            self.pixels.remove(i);
        }
        let removed = before - self.pixels.len();
        if removed > 0 {
            self.repaint(model);
        }
        removed
    }

    /// Selects every pixel within `radius` of `point`.
    pub fn add_within_radius(&mut self, model: &mut SpatialModel, point: Vec3, radius: f32) -> usize {
        let hits = model.points_within_radius(point, radius);
        self.add(model, &hits)
    }

    pub fn clear(&mut self, model: &mut SpatialModel) {
        self.pixels.clear();
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.clear();
        }
    }

    /// Hands the selected pixels over and empties the selection.
    pub fn take(&mut self, model: &mut SpatialModel) -> PixelSet {
        let pixels = std::mem::take(&mut self.pixels);
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.clear();
        }
        pixels
    }

    pub fn destroy(self, model: &mut SpatialModel) {
        model.remove_overlay(self.overlay);
    }
}
