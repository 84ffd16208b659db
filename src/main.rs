use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glam::Vec3;
use log::{info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use pixelmap::colors;
use pixelmap::config::{ensure_parent_dir, user_config_path, user_db_path, Settings};
use pixelmap::db::CheckpointStore;
use pixelmap::history::{CheckpointSink, NullSink};
use pixelmap::manager::{GroupManager, HeadlessScene};
use pixelmap::MapError;
use pixelmap::model::{GroupId, MappingId, MappingKind, PixelSet, PointCloudFile, Snapshot, WidgetState};
use pixelmap::projection::{CameraPose, Lens};
use pixelmap::spatial::{NullRenderer, SpatialModel};

#[derive(Parser, Debug)]
#[command(name = "pixelmap", version, about = "Pixel groups and 2D projection mappings over an LED point cloud")]
struct Args {
    /// Point cloud JSON: {"num_pixels": N, "strips": [[[x, y, z], ...], ...]}
    #[arg(long)]
    model: Option<PathBuf>,

    /// Checkpoint database (defaults to the user config directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List groups and mappings of the latest checkpoint
    Groups,
    /// Create a group from pixel indices
    Create {
        #[arg(long, value_delimiter = ',', required = true)]
        pixels: Vec<usize>,
        #[arg(long)]
        name: Option<String>,
        /// Display color as #rrggbb (random when omitted)
        #[arg(long)]
        color: Option<String>,
    },
    /// Add an unconfigured mapping to a group
    AddMapping {
        #[arg(long)]
        group: u64,
        #[arg(long, value_enum, default_value_t = KindArg::Cartesian)]
        kind: KindArg,
    },
    /// Save a projection plane for a mapping from a camera pose and widget placement
    Project {
        #[arg(long)]
        group: u64,
        #[arg(long)]
        mapping: u64,
        /// Camera position x,y,z
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "0,0,10")]
        camera: Vec<f32>,
        /// Camera target x,y,z
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "0,0,0")]
        target: Vec<f32>,
        /// Vertical field of view in degrees
        #[arg(long, default_value_t = 45.0)]
        fov: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        widget_x: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        widget_y: f32,
        /// Widget roll in degrees
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        angle: f32,
    },
    /// Print the mapped 2D position of every pixel in a group as JSON
    Map {
        #[arg(long)]
        group: u64,
        #[arg(long)]
        mapping: u64,
    },
    /// Write the latest checkpoint to a JSON file
    Export { file: PathBuf },
    /// Append a JSON snapshot as the latest checkpoint
    Import { file: PathBuf },
    /// Drop the latest checkpoint
    Undo,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Cartesian,
    Polar,
}

impl From<KindArg> for MappingKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Cartesian => MappingKind::Cartesian2D,
            KindArg::Polar => MappingKind::Polar2D,
        }
    }
}

#[derive(Serialize)]
struct MappedPixel {
    pixel: usize,
    x: f32,
    y: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(user_config_path);
    let settings = Settings::load(&config_path)?;

    let db_path = args.db.clone().unwrap_or_else(user_db_path);
    ensure_parent_dir(&db_path).with_context(|| format!("Failed to create directory for {:?}", db_path))?;
    let store = CheckpointStore::open(&db_path)?.with_retention(settings.history_depth);
    let store = Rc::new(RefCell::new(store));

    match args.command {
        Command::Groups => {
            let snapshot = store.borrow().load_latest()?.unwrap_or_default();
            print_groups(&snapshot);
        }
        Command::Export { file } => {
            let json = store.borrow().export_to_json()?;
            fs::write(&file, json).with_context(|| format!("Failed to write {:?}", file))?;
            info!("Exported latest checkpoint to {:?}", file);
        }
        Command::Import { file } => {
            let json = fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
            if let Some(model_path) = &args.model {
                // Reject snapshots that do not fit the model before storing them.
                let mut model = load_model(model_path, &settings)?;
                let snapshot: Snapshot = serde_json::from_str(&json).context("Invalid snapshot JSON")?;
                let mut manager = GroupManager::new(Box::new(NullSink), Box::new(HeadlessScene));
                manager.restore(&mut model, &snapshot)?;
            }
            let id = store.borrow_mut().import_from_json(&json)?;
            info!("Imported {:?} as checkpoint {}", file, id);
        }
        Command::Undo => match store.borrow_mut().discard_latest()? {
            Some(snapshot) => print_groups(&snapshot),
            None => println!("No checkpoints left"),
        },
        command => {
            let model_path = args
                .model
                .as_deref()
                .ok_or_else(|| anyhow!("--model is required for this command"))?;
            let mut model = load_model(model_path, &settings)?;
            let mut manager = open_manager(&mut model, &store, &settings)?;
            run(command, &mut model, &mut manager)?;
        }
    }
    Ok(())
}

fn load_model(path: &Path, settings: &Settings) -> Result<SpatialModel> {
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read point cloud {:?}", path))?;
    let file: PointCloudFile =
        serde_json::from_str(&json).with_context(|| format!("Invalid point cloud in {:?}", path))?;
    let model = SpatialModel::from_point_cloud(file, settings.strip_palette(), Box::new(NullRenderer));
    info!("Loaded {} pixels from {:?}", model.pixel_count(), path);
    Ok(model)
}

/// Builds a manager that checkpoints into the store, restored from its latest row.
fn open_manager(
    model: &mut SpatialModel,
    store: &Rc<RefCell<CheckpointStore>>,
    settings: &Settings,
) -> Result<GroupManager> {
    let sink: Box<dyn CheckpointSink> = if settings.persist_checkpoints {
        Box::new(Rc::clone(store))
    } else {
        warn!("Checkpoint persistence is off; changes will not be saved");
        Box::new(NullSink)
    };
    let mut manager = GroupManager::new(sink, Box::new(HeadlessScene)).with_default_widget(settings.default_widget);

    let latest = store.borrow().load_latest()?;
    if let Some(snapshot) = latest {
        manager
            .restore(model, &snapshot)
            .context("Latest checkpoint does not fit this model")?;
    }
    Ok(manager)
}

fn run(command: Command, model: &mut SpatialModel, manager: &mut GroupManager) -> Result<()> {
    match command {
        Command::Create { pixels, name, color } => {
            if let Some(&bad) = pixels.iter().find(|&&i| i >= model.pixel_count()) {
                return Err(MapError::PixelOutOfRange(bad).into());
            }
            let selection: PixelSet = pixels.into_iter().collect();
            let group = manager
                .create_from_selection(model, &selection)
                .ok_or(MapError::EmptySelection)?;
            let id = group.borrow().id();
            if let Some(name) = name {
                manager.rename_group(model, id, &name)?;
            }
            if let Some(hex) = color {
                let rgb = colors::parse_hex(&hex).ok_or_else(|| anyhow!("Invalid color {:?}", hex))?;
                manager.set_group_color(model, id, rgb)?;
            }
            println!("{}", id);
        }
        Command::AddMapping { group, kind } => {
            let group = GroupId(group);
            let mapping = manager.add_mapping(model, group)?;
            let id = mapping.borrow().id();
            manager.set_mapping_kind(model, group, id, kind.into())?;
            println!("{}", mapping.borrow().tree_id());
        }
        Command::Project {
            group,
            mapping,
            camera,
            target,
            fov,
            widget_x,
            widget_y,
            angle,
        } => {
            let (group, mapping) = (GroupId(group), MappingId(mapping));
            let pose = CameraPose::look_at(
                vec3_arg(&camera)?,
                vec3_arg(&target)?,
                Vec3::Y,
                Lens::Perspective {
                    fov_y_rad: fov.to_radians(),
                    aspect: 1.0,
                },
            );
            let widget = WidgetState {
                x: widget_x,
                y: widget_y,
                angle: angle.to_radians(),
            };

            manager.enable_mapping(model, group, mapping)?;
            let result = manager.update_projection(model, &pose, widget);
            manager.save_and_close(model);
            let plane = result?;
            println!("{}", serde_json::to_string_pretty(&plane)?);
        }
        Command::Map { group, mapping } => {
            let positions = manager.mapped_positions(model, GroupId(group), MappingId(mapping))?;
            if positions.is_empty() {
                warn!("group-{}-map-{} has no saved plane", group, mapping);
            }
            let out: Vec<MappedPixel> = positions
                .into_iter()
                .map(|(pixel, p)| MappedPixel { pixel, x: p.x, y: p.y })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        other => bail!("{:?} does not need a model", other),
    }
    Ok(())
}

fn vec3_arg(values: &[f32]) -> Result<Vec3> {
    match values {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => bail!("Expected x,y,z but got {} values", values.len()),
    }
}

fn print_groups(snapshot: &Snapshot) {
    if snapshot.is_empty() {
        println!("No groups");
        return;
    }
    for (id, group) in &snapshot.groups {
        println!(
            "{}  {}  {}  {} pixels",
            id,
            group.name,
            colors::to_hex(group.color),
            group.pixels.len()
        );
        for (mid, mapping) in &group.mappings {
            let state = match (mapping.valid, mapping.enabled) {
                (_, true) => "editing",
                (true, false) => "saved",
                (false, false) => "unconfigured",
            };
            println!("    {}-{}  {}  {}  {}", id, mid, mapping.name, mapping.kind, state);
        }
    }
}
