use thiserror::Error;

use crate::model::{GroupId, MappingId, PixelIndex};

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("Cannot create a group from an empty selection")]
    EmptySelection,

    #[error("Unknown group: {0}")]
    UnknownGroup(GroupId),

    #[error("Unknown mapping: {0}/{1}")]
    UnknownMapping(GroupId, MappingId),

    #[error("Pixel index out of range: {0}")]
    PixelOutOfRange(PixelIndex),

    #[error("No mapping is being edited")]
    NotEditing,

    #[error("Projection ray does not meet the plane")]
    DegenerateGeometry,

    #[error("Snapshot cannot be restored: {0}")]
    Reconciliation(String),
}
