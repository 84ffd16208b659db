use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Index into the loaded point cloud. Stable for the lifetime of the model.
pub type PixelIndex = usize;

/// RGB, no alpha.
pub type Color = [u8; 3];

pub type PixelSet = BTreeSet<PixelIndex>;
pub type ColorMap = BTreeMap<PixelIndex, Color>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Scoped to the owning group: `MappingId(0)` in two groups are unrelated.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MappingId(pub u64);

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map-{}", self.0)
    }
}

/// Placement widget drawn over a mapping's editing view.
///
/// `x`/`y` are normalized screen coordinates (-1..1, +y up) and `angle` is
/// the operator's roll of the 2D axes in radians.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct WidgetState {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MappingKind {
    #[default]
    #[serde(rename = "cartesian2")]
    Cartesian2D,
    #[serde(rename = "polar2")]
    Polar2D,
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingKind::Cartesian2D => write!(f, "2d Cartesian"),
            MappingKind::Polar2D => write!(f, "2d Polar"),
        }
    }
}

/// Derived projection basis. Recomputed on every save, never edited by hand.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ProjectionPlane {
    pub origin: Vec3,
    pub x_axis: Vec3,
    pub y_axis: Vec3,
    pub normal: Vec3,
    /// Camera orientation (XYZ euler, radians) the plane was taken from.
    pub source_orientation: Vec3,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MappingSnapshot {
    pub name: String,
    pub kind: MappingKind,
    /// `None` until the mapping has been opened for editing once.
    #[serde(default)]
    pub widget: Option<WidgetState>,
    pub valid: bool,
    pub enabled: bool,
    #[serde(default)]
    pub plane: Option<ProjectionPlane>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GroupSnapshot {
    pub name: String,
    pub color: Color,
    pub pixels: Arc<PixelSet>,
    pub overlay: Arc<ColorMap>,
    #[serde(default)]
    pub mappings: BTreeMap<MappingId, Arc<MappingSnapshot>>,
    /// Next mapping id to hand out, so deleted ids stay retired across restores.
    #[serde(default)]
    pub next_mapping_id: u64,
}

/// Immutable capture of every group and mapping. Holds no live references;
/// unchanged pixel sets and overlays are shared with the live objects.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub groups: BTreeMap<GroupId, Arc<GroupSnapshot>>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The (group, mapping) pair recorded as being edited, if any.
    pub fn enabled_mappings(&self) -> Vec<(GroupId, MappingId)> {
        self.groups
            .iter()
            .flat_map(|(gid, group)| {
                group
                    .mappings
                    .iter()
                    .filter(|(_, m)| m.enabled)
                    .map(move |(mid, _)| (*gid, *mid))
            })
            .collect()
    }
}

/// On-disk point cloud: one list of `[x, y, z]` positions per physical strip.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PointCloudFile {
    #[serde(default)]
    pub num_pixels: usize,
    pub strips: Vec<Vec<[f32; 3]>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_as_tree_labels() {
        assert_eq!(GroupId(3).to_string(), "group-3");
        assert_eq!(MappingId(0).to_string(), "map-0");
    }

    #[test]
    fn test_snapshot_survives_json() {
        let mut mappings = BTreeMap::new();
        mappings.insert(
            MappingId(1),
            Arc::new(MappingSnapshot {
                name: "map-1".into(),
                kind: MappingKind::Polar2D,
                widget: Some(WidgetState { x: 0.25, y: -0.5, angle: 0.1 }),
                valid: true,
                enabled: false,
                plane: Some(ProjectionPlane {
                    origin: Vec3::new(1.0, 2.0, 3.0),
                    x_axis: Vec3::X,
                    y_axis: Vec3::Y,
                    normal: Vec3::NEG_Z,
                    source_orientation: Vec3::ZERO,
                }),
            }),
        );
        let mut groups = BTreeMap::new();
        groups.insert(
            GroupId(4),
            Arc::new(GroupSnapshot {
                name: "front".into(),
                color: [255, 0, 0],
                pixels: Arc::new([3, 7, 9].into_iter().collect()),
                overlay: Arc::new([(3, [255, 0, 0])].into_iter().collect()),
                mappings,
                next_mapping_id: 2,
            }),
        );
        let snap = Snapshot { groups };

        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap, "JSON round trip should not change a snapshot");
    }

    #[test]
    fn test_enabled_mappings_lists_every_enabled_entry() {
        let mapping = |enabled| {
            Arc::new(MappingSnapshot {
                name: String::new(),
                kind: MappingKind::Cartesian2D,
                widget: None,
                valid: false,
                enabled,
                plane: None,
            })
        };
        let mut mappings = BTreeMap::new();
        mappings.insert(MappingId(0), mapping(false));
        mappings.insert(MappingId(1), mapping(true));
        let mut groups = BTreeMap::new();
        groups.insert(
            GroupId(0),
            Arc::new(GroupSnapshot {
                name: String::new(),
                color: [0, 0, 0],
                pixels: Arc::default(),
                overlay: Arc::default(),
                mappings,
                next_mapping_id: 2,
            }),
        );
        let snap = Snapshot { groups };
        assert_eq!(snap.enabled_mappings(), vec![(GroupId(0), MappingId(1))]);
    }
}
