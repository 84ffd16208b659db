use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::events::{EventBus, GroupEvent};
use crate::mapping::ProjectionMapping;
use crate::model::{Color, ColorMap, GroupId, GroupSnapshot, MappingId, MappingSnapshot, PixelSet};
use crate::reconcile::{reconcile, Reconciler};
use crate::spatial::{OverlayId, SpatialModel};

/// Groups draw above the strip colors and below the active selection.
pub const GROUP_OVERLAY_PRIORITY: usize = 1;

pub type MappingRef = Rc<RefCell<ProjectionMapping>>;

/// Named pixel subset with a display color and its projection mappings.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    name: String,
    color: Color,
    pixels: Arc<PixelSet>,
    overlay: OverlayId,
    mappings: BTreeMap<MappingId, MappingRef>,
    next_mapping_id: u64,
}

impl Group {
    pub(crate) fn new(id: GroupId, name: String, color: Color, pixels: PixelSet, model: &mut SpatialModel) -> Self {
        Self {
            id,
            name,
            color,
            pixels: Arc::new(pixels),
            overlay: model.create_overlay(GROUP_OVERLAY_PRIORITY),
            mappings: BTreeMap::new(),
            next_mapping_id: 0,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn tree_id(&self) -> String {
        self.id.to_string()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn pixels(&self) -> &PixelSet {
        &self.pixels
    }

    pub fn overlay_id(&self) -> OverlayId {
        self.overlay
    }

    pub fn mapping(&self, id: MappingId) -> Option<MappingRef> {
        self.mappings.get(&id).cloned()
    }

    pub fn mappings(&self) -> impl Iterator<Item = (MappingId, &MappingRef)> + '_ {
        self.mappings.iter().map(|(id, m)| (*id, m))
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_shown(&self, model: &SpatialModel) -> bool {
        model.overlay(self.overlay).is_some_and(|o| !o.is_empty())
    }

    /// Paints every pixel of the group in its color. Idempotent.
    pub(crate) fn show(&self, model: &mut SpatialModel) {
        let colors: ColorMap = self.pixels.iter().map(|&i| (i, self.color)).collect();
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.restore(Arc::new(colors));
        }
    }

    pub(crate) fn hide(&self, model: &mut SpatialModel) {
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.clear();
        }
    }

    pub(crate) fn rename(&mut self, name: &str, events: &EventBus) -> &str {
        self.name = name.to_string();
        events.emit(GroupEvent::GroupRenamed {
            group: self.id,
            name: self.name.clone(),
        });
        &self.name
    }

    /// Recolors, repainting straight away if the group is currently shown.
    pub(crate) fn set_color(&mut self, color: Color, model: &mut SpatialModel, events: &EventBus) -> Color {
        self.color = color;
        if self.is_shown(model) {
            self.show(model);
        }
        events.emit(GroupEvent::GroupRecolored { group: self.id, color });
        self.color
    }

    /// Adds pixels to the group. Returns how many were new.
    pub(crate) fn add_pixels(&mut self, pixels: &PixelSet, model: &mut SpatialModel) -> usize {
        let before = self.pixels.len();
        Arc::make_mut(&mut self.pixels).extend(pixels.iter().copied());
        let added = self.pixels.len() - before;
        if added > 0 && self.is_shown(model) {
            self.show(model);
        }
        added
    }

    pub(crate) fn add_mapping(&mut self, events: &EventBus) -> MappingRef {
        let id = MappingId(self.next_mapping_id);
        self.next_mapping_id += 1;

        let mapping = ProjectionMapping::new(self.id, id);
        events.emit(GroupEvent::MappingCreated {
            group: self.id,
            mapping: id,
            name: mapping.name().to_string(),
        });
        let mapping = Rc::new(RefCell::new(mapping));
        self.mappings.insert(id, Rc::clone(&mapping));
        mapping
    }

    pub(crate) fn remove_mapping(&mut self, id: MappingId, events: &EventBus) -> Option<MappingRef> {
        let mapping = self.mappings.remove(&id)?;
        mapping.borrow_mut().destroy();
        events.emit(GroupEvent::MappingDestroyed { group: self.id, mapping: id });
        Some(mapping)
    }

    pub fn snapshot(&self, model: &SpatialModel) -> GroupSnapshot {
        GroupSnapshot {
            name: self.name.clone(),
            color: self.color,
            pixels: Arc::clone(&self.pixels),
            overlay: model
                .overlay(self.overlay)
                .map(|o| o.snapshot())
                .unwrap_or_default(),
            mappings: self
                .mappings
                .iter()
                .map(|(id, m)| (*id, Arc::new(m.borrow().snapshot())))
                .collect(),
            next_mapping_id: self.next_mapping_id,
        }
    }

    /// Overwrites this group in place, then reconciles its mapping table.
    pub(crate) fn restore_from(&mut self, snapshot: &GroupSnapshot, model: &mut SpatialModel, events: &EventBus) {
        if self.name != snapshot.name {
            self.rename(&snapshot.name, events);
        }
        if self.color != snapshot.color {
            self.color = snapshot.color;
            events.emit(GroupEvent::GroupRecolored {
                group: self.id,
                color: self.color,
            });
        }
        self.pixels = Arc::clone(&snapshot.pixels);
        if let Some(mut overlay) = model.overlay_mut(self.overlay) {
            overlay.restore(Arc::clone(&snapshot.overlay));
        }

        let mut reconciler = MappingReconciler { group: self.id, events };
        reconcile(&mut self.mappings, &snapshot.mappings, &mut reconciler);

        let past_restored = self.mappings.keys().next_back().map_or(0, |last| last.0 + 1);
        self.next_mapping_id = self
            .next_mapping_id
            .max(snapshot.next_mapping_id)
            .max(past_restored);
    }

    /// Detaches the overlay and tears down every mapping.
    pub(crate) fn destroy(&mut self, model: &mut SpatialModel, events: &EventBus) {
        let ids: Vec<MappingId> = self.mappings.keys().copied().collect();
        for id in ids {
            self.remove_mapping(id, events);
        }
        model.remove_overlay(self.overlay);
        debug!("[GROUPS] Destroyed {}", self.id);
        events.emit(GroupEvent::GroupDestroyed { group: self.id });
    }
}

struct MappingReconciler<'a> {
    group: GroupId,
    events: &'a EventBus,
}

impl Reconciler<MappingId, MappingRef, Arc<MappingSnapshot>> for MappingReconciler<'_> {
    fn create(&mut self, id: MappingId) -> MappingRef {
        let mapping = ProjectionMapping::new(self.group, id);
        self.events.emit(GroupEvent::MappingCreated {
            group: self.group,
            mapping: id,
            name: mapping.name().to_string(),
        });
        Rc::new(RefCell::new(mapping))
    }

    fn restore(&mut self, id: MappingId, entity: &MappingRef, snapshot: &Arc<MappingSnapshot>) {
        let mut mapping = entity.borrow_mut();
        let renamed = mapping.name() != snapshot.name;
        mapping.restore_from(snapshot);
        if renamed {
            self.events.emit(GroupEvent::MappingRenamed {
                group: self.group,
                mapping: id,
                name: snapshot.name.clone(),
            });
        }
    }

    fn destroy(&mut self, id: MappingId, entity: MappingRef) {
        entity.borrow_mut().destroy();
        self.events.emit(GroupEvent::MappingDestroyed { group: self.group, mapping: id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::NullRenderer;
    use glam::Vec3;

    const RED: Color = [255, 0, 0];
    const TEAL: Color = [0, 128, 128];

    fn create_test_model() -> SpatialModel {
        let strip = (0..10).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        SpatialModel::from_strips(vec![strip], vec![[0, 0, 0]], Box::new(NullRenderer))
    }

    fn create_test_group(model: &mut SpatialModel) -> Group {
        Group::new(GroupId(0), "group-0".into(), RED, PixelSet::from([3, 7, 9]), model)
    }

    #[test]
    fn test_show_mirrors_pixel_set() {
        let mut model = create_test_model();
        let group = create_test_group(&mut model);
        assert!(!group.is_shown(&model));

        group.show(&mut model);
        group.show(&mut model);
        let overlay = model.overlay(group.overlay_id()).unwrap();
        assert_eq!(overlay.pixels(), *group.pixels());
        assert!(overlay.colors().values().all(|&c| c == RED));
        assert_eq!(model.colors()[7], RED);

        group.hide(&mut model);
        assert!(!group.is_shown(&model));
        assert_eq!(model.colors()[7], [0, 0, 0]);
    }

    #[test]
    fn test_recolor_repaints_only_when_shown() {
        let mut model = create_test_model();
        let events = EventBus::default();
        let mut group = create_test_group(&mut model);

        group.set_color(TEAL, &mut model, &events);
        assert!(!group.is_shown(&model), "Hidden group stays hidden");

        group.show(&mut model);
        group.set_color(RED, &mut model, &events);
        assert_eq!(model.colors()[3], RED, "Shown group repaints immediately");
    }

    #[test]
    fn test_add_pixels_extends_overlay() {
        let mut model = create_test_model();
        let mut group = create_test_group(&mut model);
        group.show(&mut model);

        assert_eq!(group.add_pixels(&PixelSet::from([1, 3]), &mut model), 1);
        assert_eq!(model.colors()[1], RED);
        assert_eq!(model.overlay(group.overlay_id()).unwrap().len(), 4);
    }

    #[test]
    fn test_mapping_ids_are_not_reused() {
        let mut model = create_test_model();
        let events = EventBus::default();
        let mut group = create_test_group(&mut model);

        let first = group.add_mapping(&events).borrow().id();
        group.remove_mapping(first, &events);
        let second = group.add_mapping(&events).borrow().id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_destroy_detaches_overlay_and_mappings() {
        let mut model = create_test_model();
        let events = EventBus::default();
        let rx = events.subscribe();
        let mut group = create_test_group(&mut model);
        group.show(&mut model);
        group.add_mapping(&events);

        group.destroy(&mut model, &events);
        assert!(model.overlay(group.overlay_id()).is_none());
        assert_eq!(model.colors()[3], [0, 0, 0]);

        let received: Vec<GroupEvent> = rx.try_iter().collect();
        assert!(received.contains(&GroupEvent::MappingDestroyed {
            group: GroupId(0),
            mapping: MappingId(0)
        }));
        assert_eq!(received.last(), Some(&GroupEvent::GroupDestroyed { group: GroupId(0) }));
    }

    #[test]
    fn test_restore_reconciles_mappings() {
        let mut model = create_test_model();
        let events = EventBus::default();
        let mut group = create_test_group(&mut model);
        let kept = group.add_mapping(&events);
        let dropped = group.add_mapping(&events);
        let snap = group.snapshot(&model);

        // Diverge: rename one mapping, add a third, drop the second.
        kept.borrow_mut().rename("changed");
        group.add_mapping(&events);
        group.remove_mapping(MappingId(1), &events);
        group.restore_from(&snap, &mut model, &events);

        assert_eq!(group.mapping_count(), 2);
        assert!(Rc::ptr_eq(&group.mapping(MappingId(0)).unwrap(), &kept));
        assert_eq!(kept.borrow().name(), "map-0");
        assert!(!Rc::ptr_eq(&group.mapping(MappingId(1)).unwrap(), &dropped), "Recreated from snapshot");
        assert!(group.mapping(MappingId(2)).is_none());

        let next = group.add_mapping(&events).borrow().id();
        assert_eq!(next, MappingId(3), "Ids keep counting after a restore");
    }
}
