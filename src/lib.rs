//! Convert trajectory outputs from spatial simulation engines (Cytosim, Smoldyn,
//! SpringSaLaD, MCell, PhysiCell) into the common JSON scene format consumed by
//! trajectory viewers. Each engine gets one reader that terminates at the same
//! canonical [TrajectoryData] model; filters and the writer are engine-agnostic.

pub mod converter;
pub mod cytosim;
mod error;
pub mod filters;
pub mod mcell;
pub mod physicell;
pub mod plots;
pub mod simularium;
pub mod smoldyn;
pub mod springsalad;
pub mod trajectory;
pub mod units;

use std::collections::{BTreeMap, HashMap, HashSet};

use lin_alg::f64::Vec3;

pub use converter::TrajectoryConverter;
pub use error::ConvertError;
pub use trajectory::{AgentRecord, FrameData, TrajectoryData};
pub use units::UnitData;

/// Viewer protocol tag for a sphere/point agent.
pub const VIZ_TYPE_DEFAULT: f64 = 1000.;
/// Viewer protocol tag for a fiber/polyline agent; requires subpoints.
pub const VIZ_TYPE_FIBER: f64 = 1001.;

/// Default radius when neither the source file nor the display config provide one.
pub const DEFAULT_RADIUS: f64 = 1.0;

#[derive(Clone, Debug)]
pub struct CameraData {
    /// 3D position of the camera itself.
    pub position: Vec3,
    pub look_at_position: Vec3,
    pub up_vector: Vec3,
    /// Vertical extent of the view, bottom to top, in degrees.
    pub fov_degrees: f64,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            position: Vec3::new(0., 0., 120.),
            look_at_position: Vec3::new(0., 0., 0.),
            up_vector: Vec3::new(0., 1., 0.),
            fov_degrees: 50.,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetaData {
    /// Dimensions of the simulated volume, in spatial units after scaling.
    pub box_size: Vec3,
    pub camera_defaults: CameraData,
    /// Uniform multiplier applied at read time to positions, radii, subpoints,
    /// and box size. The spatial unit magnitude is divided by this, so the
    /// declared unit still describes the stored values.
    pub scale_factor: f64,
}

impl Default for MetaData {
    fn default() -> Self {
        Self {
            box_size: Vec3::new(100., 100., 100.),
            camera_defaults: CameraData::default(),
            scale_factor: 1.0,
        }
    }
}

/// Display configuration for one native simulator type. Phased types (e.g.
/// PhysiCell cells carrying a cycle phase) nest a secondary phase id → name
/// map; making this a variant keeps missing-phase handling an explicit case
/// instead of a runtime dictionary miss.
#[derive(Clone, Debug)]
pub enum TypeDisplay {
    Direct {
        name: String,
        radius: Option<f64>,
    },
    Phased {
        name: String,
        phases: BTreeMap<u32, String>,
    },
}

impl TypeDisplay {
    pub fn direct(name: &str, radius: Option<f64>) -> Self {
        Self::Direct {
            name: name.to_owned(),
            radius,
        }
    }
}

/// Per-reader type presentation config: explicit names/radii, types to drop,
/// and native-type grouping. Shared by every engine reader.
#[derive(Clone, Debug, Default)]
pub struct DisplayInfo {
    /// Native type key (engine type id as a string, or species name) → display.
    pub display: HashMap<String, TypeDisplay>,
    /// Native type names dropped before any other processing.
    pub ignore_types: HashSet<String>,
    /// Display group name → native type names collapsed into it. Applied after
    /// ignore-filtering and before default-name generation, so a grouped name
    /// always wins over per-type defaults. Ordered, so resolution stays
    /// deterministic if a native name is listed under more than one group.
    pub type_grouping: BTreeMap<String, Vec<String>>,
}

impl DisplayInfo {
    /// Resolves a native type name to its display name and radius, or `None`
    /// if the type is ignored. `default_name` is used when no display entry
    /// exists: the native name itself for name-based engines, or a generated
    /// `"<kind><type id>"` for engines whose native types are bare ids.
    pub fn resolve(&self, native: &str, default_name: &str) -> Option<(String, f64)> {
        if self.ignore_types.contains(native) {
            return None;
        }

        let radius_of = |key: &str| match self.display.get(key) {
            Some(TypeDisplay::Direct { radius, .. }) => *radius,
            _ => None,
        };

        for (group, members) in &self.type_grouping {
            if members.iter().any(|m| m == native) {
                // Radius falls back through the group name, then the native
                // name, then the default.
                let radius = radius_of(group)
                    .or_else(|| radius_of(native))
                    .unwrap_or(DEFAULT_RADIUS);
                return Some((group.clone(), radius));
            }
        }

        match self.display.get(native) {
            Some(TypeDisplay::Direct { name, radius }) => {
                Some((name.clone(), radius.unwrap_or(DEFAULT_RADIUS)))
            }
            Some(TypeDisplay::Phased { name, .. }) => Some((name.clone(), DEFAULT_RADIUS)),
            None => Some((default_name.to_owned(), DEFAULT_RADIUS)),
        }
    }
}

/// The single capability every engine reader implements. Engine-specific
/// parsing lives entirely inside one `read`; there is no shared mutable state.
pub trait TrajectoryReader {
    fn read(&self) -> Result<TrajectoryData, ConvertError>;
}
