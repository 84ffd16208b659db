use glam::Vec2;
use log::{debug, warn};

use crate::error::MapError;
use crate::model::{GroupId, MappingId, MappingKind, MappingSnapshot, PixelIndex, PixelSet, ProjectionPlane, WidgetState};
use crate::projection::{self, CameraPose};
use crate::spatial::SpatialModel;

/// A 2D coordinate system over the pixels of one group.
///
/// Starts out unconfigured (`is_valid() == false`) and becomes valid the first
/// time a plane is computed. Every later save replaces the plane outright.
#[derive(Debug)]
pub struct ProjectionMapping {
    id: MappingId,
    group: GroupId,
    name: String,
    kind: MappingKind,
    plane: Option<ProjectionPlane>,
    valid: bool,
    widget: Option<WidgetState>,
    enabled: bool,
}

impl ProjectionMapping {
    pub(crate) fn new(group: GroupId, id: MappingId) -> Self {
        Self {
            id,
            group,
            name: id.to_string(),
            kind: MappingKind::default(),
            plane: None,
            valid: false,
            widget: None,
            enabled: false,
        }
    }

    pub fn id(&self) -> MappingId {
        self.id
    }

    pub fn group_id(&self) -> GroupId {
        self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tree label id, e.g. `group-0-map-2`.
    pub fn tree_id(&self) -> String {
        format!("{}-{}", self.group, self.id)
    }

    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// True while the operator is editing this mapping's plane.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The saved plane, only while the mapping is valid.
    pub fn plane(&self) -> Option<&ProjectionPlane> {
        self.plane.as_ref().filter(|_| self.valid)
    }

    pub fn widget(&self) -> Option<WidgetState> {
        self.widget
    }

    pub(crate) fn rename(&mut self, name: &str) -> &str {
        self.name = name.to_string();
        &self.name
    }

    /// Switching kind drops validity; the new kind needs a fresh save.
    pub(crate) fn set_kind(&mut self, kind: MappingKind) -> bool {
        if kind == self.kind {
            return false;
        }
        self.kind = kind;
        self.valid = false;
        true
    }

    pub(crate) fn set_widget(&mut self, widget: WidgetState) {
        self.widget = Some(widget);
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Recomputes the plane from the camera and widget placement.
    ///
    /// On degenerate geometry the mapping becomes invalid and the previous
    /// plane is left as it was.
    pub fn compute_plane(&mut self, camera: &CameraPose, widget: WidgetState) -> Result<ProjectionPlane, MapError> {
        self.widget = Some(widget);
        match projection::compute_plane(camera, &widget) {
            Ok(plane) => {
                debug!(
                    "[MAPPING] {} plane origin {:?} normal {:?}",
                    self.tree_id(),
                    plane.origin,
                    plane.normal
                );
                self.plane = Some(plane);
                self.valid = true;
                Ok(plane)
            }
            Err(e) => {
                warn!("[MAPPING] {}: {}; mapping marked invalid", self.tree_id(), e);
                self.valid = false;
                Err(e)
            }
        }
    }

    /// 2D coordinates of one pixel. `None` while unconfigured or out of range.
    pub fn map_point(&self, model: &SpatialModel, index: PixelIndex) -> Option<Vec2> {
        let plane = self.plane()?;
        let Some(position) = model.position(index) else {
            debug!("[MAPPING] {}: pixel {} out of range", self.tree_id(), index);
            return None;
        };
        Some(projection::map_point(self.kind, plane, position))
    }

    /// Mapped coordinates for every pixel of the owning group, in index order.
    pub fn positions(&self, model: &SpatialModel, pixels: &PixelSet) -> Vec<(PixelIndex, Vec2)> {
        if !self.valid {
            return Vec::new();
        }
        pixels
            .iter()
            .filter_map(|&i| self.map_point(model, i).map(|p| (i, p)))
            .collect()
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            widget: self.widget,
            valid: self.valid,
            enabled: self.enabled,
            plane: self.plane,
        }
    }

    pub(crate) fn restore_from(&mut self, snapshot: &MappingSnapshot) {
        self.name = snapshot.name.clone();
        self.kind = snapshot.kind;
        self.widget = snapshot.widget;
        self.valid = snapshot.valid;
        self.plane = snapshot.plane;
        self.enabled = snapshot.enabled;
    }

    /// Leaves edit mode. Returns whether the mapping was being edited.
    pub(crate) fn destroy(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }
}
