//! Group manager
//!
//! Owns every group, hands out shared handles to them, tracks which group
//! and mapping the operator has selected, and enforces that at most one
//! mapping is open for editing at a time. Every structural change ends with a
//! full snapshot pushed to the checkpoint sink; `restore` is the inverse and
//! reconciles the live tree against a snapshot without breaking handles.

use glam::Vec2;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::colors::ColorPool;
use crate::error::MapError;
use crate::events::{EventBus, GroupEvent};
use crate::group::{Group, MappingRef};
use crate::history::CheckpointSink;
use crate::model::{
    Color, GroupId, GroupSnapshot, MappingId, MappingKind, PixelIndex, PixelSet, ProjectionPlane, Snapshot,
    WidgetState,
};
use crate::projection::CameraPose;
use crate::reconcile::{reconcile, Reconciler};
use crate::selection::ActiveSelection;
use crate::spatial::SpatialModel;

pub type GroupRef = Rc<RefCell<Group>>;

/// Which view the host should be rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveView {
    Main,
    Mapping(GroupId, MappingId),
}

/// The parts of the 3D scene the manager drives while a mapping is edited.
pub trait SceneHost {
    fn set_active_view(&mut self, view: ActiveView);
    fn set_model_visible(&mut self, visible: bool);
    /// `None` hides the placement widget.
    fn show_widget(&mut self, widget: Option<WidgetState>);
}

/// Scene host for runs without a viewport.
pub struct HeadlessScene;

impl SceneHost for HeadlessScene {
    fn set_active_view(&mut self, view: ActiveView) {
        debug!("[GROUPS] Active view: {:?}", view);
    }

    fn set_model_visible(&mut self, visible: bool) {
        debug!("[GROUPS] Model visible: {}", visible);
    }

    fn show_widget(&mut self, widget: Option<WidgetState>) {
        debug!("[GROUPS] Widget: {:?}", widget);
    }
}

pub struct GroupManager {
    groups: BTreeMap<GroupId, GroupRef>,
    next_group_id: u64,
    current_group: Option<GroupId>,
    current_mapping: Option<MappingId>,
    editing: Option<(GroupId, MappingId)>,
    default_widget: WidgetState,
    events: EventBus,
    sink: Box<dyn CheckpointSink>,
    scene: Box<dyn SceneHost>,
}

impl GroupManager {
    pub fn new(sink: Box<dyn CheckpointSink>, scene: Box<dyn SceneHost>) -> Self {
        Self {
            groups: BTreeMap::new(),
            next_group_id: 0,
            current_group: None,
            current_mapping: None,
            editing: None,
            default_widget: WidgetState::default(),
            events: EventBus::default(),
            sink,
            scene,
        }
    }

    /// Widget placement used the first time a mapping is opened.
    pub fn with_default_widget(mut self, widget: WidgetState) -> Self {
        self.default_widget = widget;
        self
    }

    pub fn subscribe(&self) -> Receiver<GroupEvent> {
        self.events.subscribe()
    }

    pub fn group(&self, id: GroupId) -> Option<GroupRef> {
        self.groups.get(&id).cloned()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupRef> + '_ {
        self.groups.values()
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn mapping(&self, group: GroupId, mapping: MappingId) -> Option<MappingRef> {
        self.groups.get(&group)?.borrow().mapping(mapping)
    }

    pub fn current_group(&self) -> Option<GroupRef> {
        self.current_group.and_then(|id| self.group(id))
    }

    pub fn current_mapping(&self) -> Option<MappingRef> {
        self.mapping(self.current_group?, self.current_mapping?)
    }

    /// The mapping currently open for editing.
    pub fn editing(&self) -> Option<(GroupId, MappingId)> {
        self.editing
    }

    pub fn snapshot(&self, model: &SpatialModel) -> Snapshot {
        Snapshot {
            groups: self
                .groups
                .iter()
                .map(|(id, g)| (*id, Arc::new(g.borrow().snapshot(model))))
                .collect(),
        }
    }

    fn checkpoint(&mut self, model: &SpatialModel) {
        let snapshot = self.snapshot(model);
        self.sink.checkpoint(snapshot);
    }

    /// Turns a pixel selection into a new, shown group with a random color.
    /// Empty selections create nothing.
    pub fn create_from_selection(&mut self, model: &mut SpatialModel, selected: &PixelSet) -> Option<GroupRef> {
        let limit = model.pixel_count();
        let pixels: PixelSet = selected.iter().copied().filter(|&i| i < limit).collect();
        if pixels.len() != selected.len() {
            warn!(
                "[GROUPS] Dropped {} out-of-range pixels from selection",
                selected.len() - pixels.len()
            );
        }
        if pixels.is_empty() {
            debug!("[GROUPS] Ignoring group creation from an empty selection");
            return None;
        }

        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;

        let group = Group::new(id, id.to_string(), ColorPool::random(), pixels, model);
        group.show(model);
        info!("[GROUPS] Created {} with {} pixels", id, group.pixels().len());
        self.events.emit(GroupEvent::GroupCreated {
            group: id,
            name: group.name().to_string(),
            color: group.color(),
        });

        let group = Rc::new(RefCell::new(group));
        self.groups.insert(id, Rc::clone(&group));
        if self.editing.is_none() {
            self.current_group = Some(id);
            self.current_mapping = None;
        }
        self.checkpoint(model);
        Some(group)
    }

    /// Consumes the active selection into a new group.
    pub fn create_from_active_selection(
        &mut self,
        model: &mut SpatialModel,
        selection: &mut ActiveSelection,
    ) -> Option<GroupRef> {
        if selection.is_empty() {
            debug!("[GROUPS] Ignoring group creation from an empty selection");
            return None;
        }
        let pixels = selection.take(model);
        self.create_from_selection(model, &pixels)
    }

    /// Moves the active selection into an existing group. Returns how many
    /// pixels were new to it.
    pub fn add_selection_to_group(
        &mut self,
        model: &mut SpatialModel,
        group: GroupId,
        selection: &mut ActiveSelection,
    ) -> Result<usize, MapError> {
        let target = self.group(group).ok_or(MapError::UnknownGroup(group))?;
        if selection.is_empty() {
            return Ok(0);
        }
        let pixels = selection.take(model);
        let added = target.borrow_mut().add_pixels(&pixels, model);
        debug!("[GROUPS] Added {} pixels to {}", added, group);
        self.checkpoint(model);
        Ok(added)
    }

    pub fn delete_group(&mut self, model: &mut SpatialModel, id: GroupId) -> bool {
        if !self.groups.contains_key(&id) {
            return false;
        }
        if matches!(self.editing, Some((g, _)) if g == id) {
            self.stop_editing();
        }
        if self.current_group == Some(id) {
            self.current_group = None;
            self.current_mapping = None;
        }
        if let Some(group) = self.groups.remove(&id) {
            group.borrow_mut().destroy(model, &self.events);
        }
        info!("[GROUPS] Deleted {}", id);
        self.checkpoint(model);
        true
    }

    /// Adds an unconfigured mapping and makes it current.
    pub fn add_mapping(&mut self, model: &mut SpatialModel, group: GroupId) -> Result<MappingRef, MapError> {
        let target = self.group(group).ok_or(MapError::UnknownGroup(group))?;
        let mapping = target.borrow_mut().add_mapping(&self.events);
        let id = mapping.borrow().id();
        info!("[GROUPS] Added mapping {}-{}", group, id);
        if self.editing.is_none() {
            self.current_group = Some(group);
            self.current_mapping = Some(id);
        }
        self.checkpoint(model);
        Ok(mapping)
    }

    pub fn delete_mapping(&mut self, model: &mut SpatialModel, group: GroupId, mapping: MappingId) -> bool {
        let Some(target) = self.group(group) else {
            return false;
        };
        if target.borrow().mapping(mapping).is_none() {
            return false;
        }
        if self.editing == Some((group, mapping)) {
            self.stop_editing();
        }
        if self.current_group == Some(group) && self.current_mapping == Some(mapping) {
            self.current_mapping = None;
        }
        target.borrow_mut().remove_mapping(mapping, &self.events);
        self.checkpoint(model);
        true
    }

    pub fn rename_group(&mut self, model: &SpatialModel, id: GroupId, name: &str) -> Result<String, MapError> {
        let group = self.group(id).ok_or(MapError::UnknownGroup(id))?;
        let name = group.borrow_mut().rename(name, &self.events).to_string();
        self.checkpoint(model);
        Ok(name)
    }

    pub fn set_group_color(&mut self, model: &mut SpatialModel, id: GroupId, color: Color) -> Result<Color, MapError> {
        let group = self.group(id).ok_or(MapError::UnknownGroup(id))?;
        let color = group.borrow_mut().set_color(color, model, &self.events);
        self.checkpoint(model);
        Ok(color)
    }

    pub fn show_group(&mut self, model: &mut SpatialModel, id: GroupId) -> Result<(), MapError> {
        let group = self.group(id).ok_or(MapError::UnknownGroup(id))?;
        group.borrow().show(model);
        self.checkpoint(model);
        Ok(())
    }

    pub fn hide_group(&mut self, model: &mut SpatialModel, id: GroupId) -> Result<(), MapError> {
        let group = self.group(id).ok_or(MapError::UnknownGroup(id))?;
        group.borrow().hide(model);
        self.checkpoint(model);
        Ok(())
    }

    pub fn rename_mapping(
        &mut self,
        model: &SpatialModel,
        group: GroupId,
        mapping: MappingId,
        name: &str,
    ) -> Result<String, MapError> {
        let target = self
            .mapping(group, mapping)
            .ok_or(MapError::UnknownMapping(group, mapping))?;
        let name = target.borrow_mut().rename(name).to_string();
        self.events.emit(GroupEvent::MappingRenamed {
            group,
            mapping,
            name: name.clone(),
        });
        self.checkpoint(model);
        Ok(name)
    }

    /// Returns whether the kind changed. A change leaves the mapping invalid.
    pub fn set_mapping_kind(
        &mut self,
        model: &SpatialModel,
        group: GroupId,
        mapping: MappingId,
        kind: MappingKind,
    ) -> Result<bool, MapError> {
        let target = self
            .mapping(group, mapping)
            .ok_or(MapError::UnknownMapping(group, mapping))?;
        let changed = target.borrow_mut().set_kind(kind);
        if changed {
            self.checkpoint(model);
        }
        Ok(changed)
    }

    /// Mapped coordinates of every pixel in the group for one of its mappings.
    pub fn mapped_positions(
        &self,
        model: &SpatialModel,
        group: GroupId,
        mapping: MappingId,
    ) -> Result<Vec<(PixelIndex, Vec2)>, MapError> {
        let owner = self.group(group).ok_or(MapError::UnknownGroup(group))?;
        let owner = owner.borrow();
        let target = owner
            .mapping(mapping)
            .ok_or(MapError::UnknownMapping(group, mapping))?;
        let positions = target.borrow().positions(model, owner.pixels());
        Ok(positions)
    }

    /// Selection is frozen while a mapping is being edited.
    pub fn select_group(&mut self, id: GroupId) -> bool {
        if self.editing.is_some() || !self.groups.contains_key(&id) {
            return false;
        }
        self.current_group = Some(id);
        self.current_mapping = None;
        true
    }

    pub fn select_mapping(&mut self, group: GroupId, mapping: MappingId) -> bool {
        if self.editing.is_some() || self.mapping(group, mapping).is_none() {
            return false;
        }
        self.current_group = Some(group);
        self.current_mapping = Some(mapping);
        true
    }

    pub fn clear_selection(&mut self) -> bool {
        if self.editing.is_some() {
            return false;
        }
        self.current_group = None;
        self.current_mapping = None;
        true
    }

    /// Opens a mapping for editing. Any other open mapping is closed first
    /// without touching its plane.
    pub fn enable_mapping(&mut self, model: &SpatialModel, group: GroupId, mapping: MappingId) -> Result<(), MapError> {
        let target = self
            .mapping(group, mapping)
            .ok_or(MapError::UnknownMapping(group, mapping))?;
        if self.editing == Some((group, mapping)) {
            return Ok(());
        }
        if self.editing.is_some() {
            self.stop_editing();
        }

        let widget = {
            let mut target = target.borrow_mut();
            let widget = target.widget().unwrap_or(self.default_widget);
            target.set_widget(widget);
            target.set_enabled(true);
            widget
        };
        self.open_editing_view(group, mapping, Some(widget));
        self.checkpoint(model);
        Ok(())
    }

    /// Saves the widget placement of the open mapping as its new plane.
    pub fn update_projection(
        &mut self,
        model: &SpatialModel,
        camera: &CameraPose,
        widget: WidgetState,
    ) -> Result<ProjectionPlane, MapError> {
        let (group, mapping) = self.editing.ok_or(MapError::NotEditing)?;
        let target = self
            .mapping(group, mapping)
            .ok_or(MapError::UnknownMapping(group, mapping))?;
        let result = target.borrow_mut().compute_plane(camera, widget);
        self.scene.show_widget(Some(widget));
        self.checkpoint(model);
        result
    }

    /// Closes the open mapping and returns to the main view.
    pub fn save_and_close(&mut self, model: &SpatialModel) -> bool {
        if self.editing.is_none() {
            return false;
        }
        self.stop_editing();
        self.checkpoint(model);
        true
    }

    fn open_editing_view(&mut self, group: GroupId, mapping: MappingId, widget: Option<WidgetState>) {
        self.scene.set_model_visible(false);
        self.scene.set_active_view(ActiveView::Mapping(group, mapping));
        self.scene.show_widget(widget);
        self.editing = Some((group, mapping));
        self.current_group = Some(group);
        self.current_mapping = Some(mapping);
        info!("[GROUPS] Editing {}-{}", group, mapping);
        self.events.emit(GroupEvent::EditingStarted { group, mapping });
    }

    fn close_editing_view(&mut self, group: GroupId, mapping: MappingId) {
        self.scene.show_widget(None);
        self.scene.set_active_view(ActiveView::Main);
        self.scene.set_model_visible(true);
        info!("[GROUPS] Closed {}-{}", group, mapping);
        self.events.emit(GroupEvent::EditingStopped { group, mapping });
    }

    fn stop_editing(&mut self) {
        if let Some((group, mapping)) = self.editing.take() {
            if let Some(target) = self.mapping(group, mapping) {
                target.borrow_mut().set_enabled(false);
            }
            self.close_editing_view(group, mapping);
        }
    }

    /// Brings the live tree in line with `snapshot`.
    ///
    /// Groups and mappings present on both sides keep their identity; the
    /// rest are created or torn down. The snapshot is checked up front so a
    /// bad one leaves the live tree untouched. Does not checkpoint.
    pub fn restore(&mut self, model: &mut SpatialModel, snapshot: &Snapshot) -> Result<(), MapError> {
        validate(model, snapshot)?;

        let mut reconciler = GroupReconciler {
            model,
            events: &self.events,
        };
        reconcile(&mut self.groups, &snapshot.groups, &mut reconciler);

        if let Some(last) = self.groups.keys().next_back() {
            self.next_group_id = self.next_group_id.max(last.0 + 1);
        }

        if let Some(group) = self.current_group {
            if !self.groups.contains_key(&group) {
                self.current_group = None;
                self.current_mapping = None;
            } else if let Some(mapping) = self.current_mapping {
                if self.mapping(group, mapping).is_none() {
                    self.current_mapping = None;
                }
            }
        }

        let target = snapshot.enabled_mappings().first().copied();
        if self.editing != target {
            if let Some((group, mapping)) = self.editing.take() {
                self.close_editing_view(group, mapping);
            }
            if let Some((group, mapping)) = target {
                let widget = self
                    .mapping(group, mapping)
                    .and_then(|m| m.borrow().widget())
                    .unwrap_or(self.default_widget);
                self.open_editing_view(group, mapping, Some(widget));
            }
        }

        info!("[GROUPS] Restored {} groups", self.groups.len());
        Ok(())
    }
}

fn validate(model: &SpatialModel, snapshot: &Snapshot) -> Result<(), MapError> {
    let limit = model.pixel_count();
    for (gid, group) in &snapshot.groups {
        let Some(&last) = group.pixels.iter().next_back() else {
            return Err(MapError::Reconciliation(format!("{} has no pixels", gid)));
        };
        if last >= limit {
            return Err(MapError::Reconciliation(format!(
                "{} contains pixel {} but the model has {}",
                gid, last, limit
            )));
        }
        if let Some(stray) = group.overlay.keys().find(|i| !group.pixels.contains(i)) {
            return Err(MapError::Reconciliation(format!(
                "{} colors pixel {} outside the group",
                gid, stray
            )));
        }
        for (mid, mapping) in &group.mappings {
            if mapping.valid && mapping.plane.is_none() {
                return Err(MapError::Reconciliation(format!(
                    "{}-{} is valid but has no plane",
                    gid, mid
                )));
            }
            if let Some(plane) = &mapping.plane {
                let finite = [plane.origin, plane.x_axis, plane.y_axis, plane.normal]
                    .iter()
                    .all(|v| v.is_finite());
                if !finite {
                    return Err(MapError::Reconciliation(format!(
                        "{}-{} has a non-finite plane",
                        gid, mid
                    )));
                }
            }
        }
    }

    let enabled = snapshot.enabled_mappings();
    if enabled.len() > 1 {
        return Err(MapError::Reconciliation(format!(
            "{} mappings are marked as being edited",
            enabled.len()
        )));
    }
    Ok(())
}

struct GroupReconciler<'a> {
    model: &'a mut SpatialModel,
    events: &'a EventBus,
}

impl Reconciler<GroupId, GroupRef, Arc<GroupSnapshot>> for GroupReconciler<'_> {
    fn create(&mut self, id: GroupId) -> GroupRef {
        let group = Group::new(id, id.to_string(), [0, 0, 0], PixelSet::new(), self.model);
        self.events.emit(GroupEvent::GroupCreated {
            group: id,
            name: group.name().to_string(),
            color: group.color(),
        });
        Rc::new(RefCell::new(group))
    }

    fn restore(&mut self, _id: GroupId, entity: &GroupRef, snapshot: &Arc<GroupSnapshot>) {
        entity.borrow_mut().restore_from(snapshot, self.model, self.events);
    }

    fn destroy(&mut self, _id: GroupId, entity: GroupRef) {
        entity.borrow_mut().destroy(self.model, self.events);
    }
}
