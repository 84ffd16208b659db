//! Pixel positions and the overlay compositor
//!
//! The spatial model owns the loaded point cloud (one position per LED,
//! numbered strip by strip) and the buffer of colors currently shown for
//! each pixel.
//!
//! # Compositing
//!
//! Colors are never written to the buffer directly. Anything that wants to
//! tint pixels registers an [`Overlay`] at some priority and edits it through
//! [`OverlayMut`]. After every edit the whole buffer is rebuilt:
//!
//! 1. Every pixel is reset to the default color of its strip
//! 2. Overlays are applied in ascending priority; within one priority in
//!    the order they were created
//! 3. Each overlay entry overwrites whatever an earlier overlay wrote
//! 4. The finished buffer is pushed to the [`Renderer`], one call per pixel
//!
//! This is a full recompute on every change. Overlay edits happen at
//! operator speed, so the cost is paid a handful of times per second at most.

use glam::Vec3;
use log::{debug, warn};
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

use crate::colors::DEFAULT_STRIP_COLORS;
use crate::model::{Color, ColorMap, PixelIndex, PixelSet, PointCloudFile};

/// Receives the composited color buffer.
pub trait Renderer {
    fn set_color(&mut self, index: PixelIndex, color: Color);

    /// Called once after a full buffer has been pushed.
    fn colors_changed(&mut self) {}
}

/// Radius queries over pixel positions.
pub trait SpatialIndex {
    fn points_within_radius(&self, point: Vec3, radius: f32) -> PixelSet;
}

/// Brute-force index. Fine for the few thousand pixels of a typical rig.
pub struct LinearIndex {
    positions: Vec<Vec3>,
}

impl LinearIndex {
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self { positions }
    }
}

impl SpatialIndex for LinearIndex {
    fn points_within_radius(&self, point: Vec3, radius: f32) -> PixelSet {
        let r2 = radius * radius;
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance_squared(point) <= r2)
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn set_color(&mut self, _index: PixelIndex, _color: Color) {}
}

#[derive(Debug, Default)]
pub struct RenderLog {
    pub colors: Vec<Color>,
    pub set_calls: usize,
    pub flushes: usize,
}

/// Renderer that keeps a copy of everything it is sent. Clones share state,
/// so a host can keep one handle and give the other to the model.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    log: Rc<RefCell<RenderLog>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Ref<'_, RenderLog> {
        self.log.borrow()
    }
}

impl Renderer for RecordingRenderer {
    fn set_color(&mut self, index: PixelIndex, color: Color) {
        let mut log = self.log.borrow_mut();
        if log.colors.len() <= index {
            log.colors.resize(index + 1, [0, 0, 0]);
        }
        log.colors[index] = color;
        log.set_calls += 1;
    }

    fn colors_changed(&mut self) {
        self.log.borrow_mut().flushes += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

/// Sparse pixel -> color assignment at a fixed priority.
#[derive(Clone, Debug)]
pub struct Overlay {
    id: OverlayId,
    priority: usize,
    colors: Arc<ColorMap>,
}

impl Overlay {
    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, index: PixelIndex) -> Option<Color> {
        self.colors.get(&index).copied()
    }

    pub fn colors(&self) -> &ColorMap {
        &self.colors
    }

    pub fn pixels(&self) -> PixelSet {
        self.colors.keys().copied().collect()
    }

    /// Shares the current color map; later edits copy on write.
    pub fn snapshot(&self) -> Arc<ColorMap> {
        Arc::clone(&self.colors)
    }
}

/// Write access to one registered overlay. Every mutation recomposites.
pub struct OverlayMut<'a> {
    model: &'a mut SpatialModel,
    id: OverlayId,
}

impl<'a> OverlayMut<'a> {
    fn edit<R>(&mut self, f: impl FnOnce(&mut ColorMap, usize) -> R) -> R {
        let pixel_count = self.model.pixel_count();
        let result = match self.model.overlays.get_mut(&self.id) {
            Some(overlay) => f(Arc::make_mut(&mut overlay.colors), pixel_count),
            None => f(&mut ColorMap::new(), pixel_count),
        };
        self.model.recomposite();
        result
    }

    /// Returns `false` (and changes nothing) for an out-of-range pixel.
    pub fn set(&mut self, index: PixelIndex, color: Color) -> bool {
        if index >= self.model.pixel_count() {
            debug!("[MODEL] Ignoring overlay write to pixel {} (out of range)", index);
            return false;
        }
        self.edit(|colors, _| {
            colors.insert(index, color);
        });
        true
    }

    pub fn unset(&mut self, index: PixelIndex) {
        self.edit(|colors, _| {
            colors.remove(&index);
        });
    }

    /// Merges another overlay's entries into this one.
    pub fn set_all(&mut self, other: &ColorMap) {
        self.edit(|colors, n| {
            colors.extend(other.iter().filter(|&(&i, _)| i < n).map(|(&i, &c)| (i, c)));
        });
    }

    /// Removes every pixel the other overlay assigns.
    pub fn unset_all(&mut self, other: &ColorMap) {
        self.edit(|colors, _| {
            for i in other.keys() {
                colors.remove(i);
            }
        });
    }

    pub fn set_all_from_set<'p>(&mut self, pixels: impl IntoIterator<Item = &'p PixelIndex>, color: Color) {
        self.edit(|colors, n| {
            colors.extend(pixels.into_iter().filter(|&&i| i < n).map(|&i| (i, color)));
        });
    }

    pub fn clear(&mut self) {
        self.edit(|colors, _| colors.clear());
    }

    /// Replaces the whole color map with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: Arc<ColorMap>) {
        if let Some(overlay) = self.model.overlays.get_mut(&self.id) {
            overlay.colors = snapshot;
        }
        self.model.recomposite();
    }
}

pub struct SpatialModel {
    positions: Vec<Vec3>,
    /// `strip_offsets[s]..strip_offsets[s + 1]` are the pixels of strip `s`.
    strip_offsets: Vec<usize>,
    strip_colors: Vec<Color>,
    colors: Vec<Color>,
    overlays: HashMap<OverlayId, Overlay>,
    buckets: Vec<Vec<OverlayId>>,
    next_overlay_id: u64,
    index: Box<dyn SpatialIndex>,
    renderer: Box<dyn Renderer>,
}

impl SpatialModel {
    /// Builds a model from per-strip positions. Pixels are numbered strip by
    /// strip in the order given.
    pub fn from_strips(strips: Vec<Vec<Vec3>>, strip_colors: Vec<Color>, renderer: Box<dyn Renderer>) -> Self {
        let mut positions = Vec::new();
        let mut strip_offsets = vec![0];
        for strip in strips {
            positions.extend(strip);
            strip_offsets.push(positions.len());
        }
        let strip_colors = if strip_colors.is_empty() {
            DEFAULT_STRIP_COLORS.to_vec()
        } else {
            strip_colors
        };

        let mut model = Self {
            colors: vec![[0, 0, 0]; positions.len()],
            index: Box::new(LinearIndex::new(positions.clone())),
            positions,
            strip_offsets,
            strip_colors,
            overlays: HashMap::new(),
            buckets: Vec::new(),
            next_overlay_id: 0,
            renderer,
        };
        debug!(
            "[MODEL] Loaded {} pixels on {} strips",
            model.pixel_count(),
            model.strip_count()
        );
        model.recomposite();
        model
    }

    pub fn from_point_cloud(file: PointCloudFile, strip_colors: Vec<Color>, renderer: Box<dyn Renderer>) -> Self {
        let total: usize = file.strips.iter().map(Vec::len).sum();
        if file.num_pixels != 0 && file.num_pixels != total {
            warn!(
                "[MODEL] Point cloud declares {} pixels but lists {}; using the listed positions",
                file.num_pixels, total
            );
        }
        let strips = file
            .strips
            .into_iter()
            .map(|s| s.into_iter().map(Vec3::from).collect())
            .collect();
        Self::from_strips(strips, strip_colors, renderer)
    }

    /// Swaps the brute-force radius index for an external one.
    pub fn set_index(&mut self, index: Box<dyn SpatialIndex>) {
        self.index = index;
    }

    pub fn pixel_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, index: PixelIndex) -> Option<Vec3> {
        self.positions.get(index).copied()
    }

    pub fn points_within_radius(&self, point: Vec3, radius: f32) -> PixelSet {
        self.index.points_within_radius(point, radius)
    }

    pub fn strip_count(&self) -> usize {
        self.strip_offsets.len() - 1
    }

    pub fn strip_of(&self, index: PixelIndex) -> Option<usize> {
        if index >= self.pixel_count() {
            return None;
        }
        // First offset strictly greater than index closes the strip.
        Some(self.strip_offsets.partition_point(|&start| start <= index) - 1)
    }

    pub fn strip_range(&self, strip: usize) -> Option<Range<usize>> {
        let start = *self.strip_offsets.get(strip)?;
        let end = *self.strip_offsets.get(strip + 1)?;
        Some(start..end)
    }

    pub fn default_color(&self, strip: usize) -> Color {
        self.strip_colors[strip % self.strip_colors.len()]
    }

    /// The buffer last pushed to the renderer.
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn create_overlay(&mut self, priority: usize) -> OverlayId {
        let id = OverlayId(self.next_overlay_id);
        self.next_overlay_id += 1;

        if self.buckets.len() <= priority {
            self.buckets.resize_with(priority + 1, Vec::new);
        }
        self.buckets[priority].push(id);
        self.overlays.insert(
            id,
            Overlay {
                id,
                priority,
                colors: Arc::default(),
            },
        );
        self.recomposite();
        id
    }

    /// Detaches an overlay. Returns `false` if it was already gone.
    pub fn remove_overlay(&mut self, id: OverlayId) -> bool {
        let Some(overlay) = self.overlays.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(overlay.priority) {
            bucket.retain(|o| *o != id);
        }
        self.recomposite();
        true
    }

    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    pub fn overlay_mut(&mut self, id: OverlayId) -> Option<OverlayMut<'_>> {
        if !self.overlays.contains_key(&id) {
            return None;
        }
        Some(OverlayMut { model: self, id })
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    /// Rebuilds the displayed buffer from strip defaults and every overlay.
    pub fn recomposite(&mut self) {
        for strip in 0..self.strip_count() {
            let color = self.default_color(strip);
            let range = self.strip_offsets[strip]..self.strip_offsets[strip + 1];
            self.colors[range].fill(color);
        }

        for bucket in &self.buckets {
            for id in bucket {
                let Some(overlay) = self.overlays.get(id) else { continue };
                for (&i, &color) in overlay.colors.iter() {
                    if let Some(slot) = self.colors.get_mut(i) {
                        *slot = color;
                    }
                }
            }
        }

        for (i, &color) in self.colors.iter().enumerate() {
            self.renderer.set_color(i, color);
        }
        self.renderer.colors_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = [255, 0, 0];
    const BLUE: Color = [0, 0, 255];
    const WHITE: Color = [255, 255, 255];

    /// Two strips of three pixels along +X, the second one raised by 1 on Y.
    fn create_test_model() -> (SpatialModel, RecordingRenderer) {
        let renderer = RecordingRenderer::new();
        let strips = vec![
            (0..3).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect(),
            (0..3).map(|i| Vec3::new(i as f32, 1.0, 0.0)).collect(),
        ];
        let model = SpatialModel::from_strips(strips, vec![[1, 1, 1], [2, 2, 2]], Box::new(renderer.clone()));
        (model, renderer)
    }

    #[test]
    fn test_defaults_come_from_strip() {
        let (model, renderer) = create_test_model();
        let a: Color = [1, 1, 1];
        let b: Color = [2, 2, 2];
        assert_eq!(model.colors().to_vec(), vec![a, a, a, b, b, b]);
        assert_eq!(renderer.log().colors, model.colors(), "Renderer should mirror the buffer");
    }

    #[test]
    fn test_strip_lookup() {
        let (model, _) = create_test_model();
        assert_eq!(model.strip_count(), 2);
        assert_eq!(model.strip_of(0), Some(0));
        assert_eq!(model.strip_of(2), Some(0));
        assert_eq!(model.strip_of(3), Some(1));
        assert_eq!(model.strip_of(6), None);
        assert_eq!(model.strip_range(1), Some(3..6));
        assert_eq!(model.position(4), Some(Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(model.position(6), None);
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_creation_order() {
        let (mut model, _) = create_test_model();
        let high = model.create_overlay(2);
        let low = model.create_overlay(1);

        model.overlay_mut(high).unwrap().set(1, BLUE);
        model.overlay_mut(low).unwrap().set(1, RED);

        assert_eq!(model.colors()[1], BLUE, "Priority 2 overlay should win");
    }

    #[test]
    fn test_same_priority_applies_in_creation_order() {
        let (mut model, _) = create_test_model();
        let first = model.create_overlay(1);
        let second = model.create_overlay(1);

        model.overlay_mut(second).unwrap().set(0, BLUE);
        model.overlay_mut(first).unwrap().set(0, RED);

        assert_eq!(model.colors()[0], BLUE, "Later overlay at the same priority should win");
    }

    #[test]
    fn test_recomposite_is_idempotent() {
        let (mut model, renderer) = create_test_model();
        let o = model.create_overlay(0);
        model.overlay_mut(o).unwrap().set_all_from_set(&[0, 4], RED);

        let before = model.colors().to_vec();
        model.recomposite();
        model.recomposite();
        assert_eq!(model.colors(), before.as_slice());
        assert_eq!(renderer.log().colors, before);
    }

    #[test]
    fn test_every_recomposite_pushes_every_pixel() {
        let (mut model, renderer) = create_test_model();
        let calls_before = renderer.log().set_calls;
        let flushes_before = renderer.log().flushes;
        model.recomposite();
        assert_eq!(renderer.log().set_calls - calls_before, 6);
        assert_eq!(renderer.log().flushes - flushes_before, 1);
    }

    #[test]
    fn test_removing_overlay_restores_defaults() {
        let (mut model, _) = create_test_model();
        let o = model.create_overlay(1);
        model.overlay_mut(o).unwrap().set(3, WHITE);
        assert_eq!(model.colors()[3], WHITE);

        assert!(model.remove_overlay(o));
        assert_eq!(model.colors()[3], [2, 2, 2], "Pixel should fall back to its strip color");
        assert!(!model.remove_overlay(o), "Second removal should be a no-op");
        assert!(model.overlay_mut(o).is_none());
    }

    #[test]
    fn test_new_priority_keeps_existing_buckets() {
        let (mut model, _) = create_test_model();
        let low = model.create_overlay(0);
        model.overlay_mut(low).unwrap().set(2, RED);
        let _far = model.create_overlay(5);

        assert_eq!(model.overlay(low).unwrap().priority(), 0);
        assert_eq!(model.colors()[2], RED, "Existing overlay should still apply");
    }

    #[test]
    fn test_out_of_range_writes_are_rejected() {
        let (mut model, _) = create_test_model();
        let o = model.create_overlay(0);
        assert!(!model.overlay_mut(o).unwrap().set(99, RED));
        model.overlay_mut(o).unwrap().set_all_from_set(&[1, 99], RED);
        assert_eq!(model.overlay(o).unwrap().pixels(), PixelSet::from([1]));
    }

    #[test]
    fn test_merge_and_unmerge() {
        let (mut model, _) = create_test_model();
        let a = model.create_overlay(1);
        let b = model.create_overlay(1);
        model.overlay_mut(b).unwrap().set_all_from_set(&[0, 1], BLUE);

        let b_colors = model.overlay(b).unwrap().snapshot();
        model.overlay_mut(a).unwrap().set_all(&b_colors);
        assert_eq!(model.overlay(a).unwrap().len(), 2);

        model.overlay_mut(a).unwrap().unset(0);
        assert_eq!(model.overlay(a).unwrap().get(0), None);

        model.overlay_mut(a).unwrap().unset_all(&b_colors);
        assert!(model.overlay(a).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_edits() {
        let (mut model, _) = create_test_model();
        let o = model.create_overlay(1);
        model.overlay_mut(o).unwrap().set(0, RED);
        let snap = model.overlay(o).unwrap().snapshot();

        model.overlay_mut(o).unwrap().clear();
        assert_eq!(snap.get(&0), Some(&RED), "Snapshot should keep its copy");

        model.overlay_mut(o).unwrap().restore(snap);
        assert_eq!(model.colors()[0], RED);
    }

    #[test]
    fn test_radius_query() {
        let (model, _) = create_test_model();
        let hits = model.points_within_radius(Vec3::new(0.0, 0.0, 0.0), 1.05);
        assert_eq!(hits, PixelSet::from([0, 1, 3]));
    }

    #[test]
    fn test_point_cloud_file() {
        let file = PointCloudFile {
            num_pixels: 3,
            strips: vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], vec![[0.0, 5.0, 0.0]]],
        };
        let model = SpatialModel::from_point_cloud(file, Vec::new(), Box::new(NullRenderer));
        assert_eq!(model.pixel_count(), 3);
        assert_eq!(model.strip_of(2), Some(1));
        assert_eq!(model.colors()[2], DEFAULT_STRIP_COLORS[1]);
    }
}
