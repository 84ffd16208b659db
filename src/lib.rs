pub mod colors;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod group;
pub mod history;
pub mod manager;
pub mod mapping;
pub mod model;
pub mod projection;
mod reconcile;
pub mod selection;
pub mod spatial;

pub use error::MapError;
pub use manager::GroupManager;
pub use spatial::SpatialModel;
