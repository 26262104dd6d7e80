//! Reader for [SpringSaLaD](https://vcell.org/ssalad) SIM_VIEW text output.
//!
//! The file interleaves geometry lines (`xsize`, `ysize`, `z_outside`,
//! `z_inside`, each half-extents that are doubled into the box size), frame
//! markers (`... CurrentTime <t> ...`), and agent rows beginning with `ID`:
//! `ID <id> <radius> <type name> <x> <y> <z>`. The box size is derived from
//! the file rather than supplied by the caller.

use std::{fs, path::PathBuf};

use lin_alg::f64::Vec3;
use log::info;
use serde_json::Value;

use crate::{
    AgentRecord, CameraData, ConvertError, DisplayInfo, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, UnitData,
    trajectory::TypeIds,
};

#[derive(Clone, Debug)]
pub struct SpringsaladData {
    pub path_to_sim_view_txt: PathBuf,
    pub camera_defaults: CameraData,
    pub scale_factor: f64,
    pub display_info: DisplayInfo,
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub plots: Vec<Value>,
}

impl SpringsaladData {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConvertError> {
        Ok(Self {
            path_to_sim_view_txt: path.into(),
            camera_defaults: CameraData::default(),
            scale_factor: 1.0,
            display_info: DisplayInfo::default(),
            time_units: UnitData::base("s")?,
            spatial_units: UnitData::base("nm")?,
            plots: Vec::new(),
        })
    }
}

impl TrajectoryReader for SpringsaladData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        let path = &self.path_to_sim_view_txt;
        if !path.exists() {
            return Err(ConvertError::MissingFile(path.clone()));
        }
        info!("Reading SpringSaLaD data from {}", path.display());

        let text = fs::read_to_string(path)?;
        let scale = self.scale_factor;

        let bad_row = |line: usize, msg: String| ConvertError::FileFormat {
            path: path.clone(),
            line,
            msg,
        };

        let mut box_size = Vec3::new(0., 0., 0.);
        let mut frames: Vec<FrameData> = Vec::new();
        let mut type_ids = TypeIds::default();

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let cols: Vec<&str> = line.split_whitespace().collect();

            let half_extent = |cols: &[&str]| -> Result<f64, ConvertError> {
                cols.get(1)
                    .ok_or_else(|| bad_row(line_no, "missing size value".to_owned()))?
                    .parse()
                    .map_err(|_| bad_row(line_no, "non-numeric size value".to_owned()))
            };

            // Box extents are half-sizes; z is split into inside/outside parts.
            if line.contains("xsize") {
                box_size.x = scale * 2. * half_extent(&cols)?;
            } else if line.contains("ysize") {
                box_size.y = scale * 2. * half_extent(&cols)?;
            } else if line.contains("z_outside") || line.contains("z_inside") {
                box_size.z += scale * 2. * half_extent(&cols)?;
            }

            if let Some(pos) = cols.iter().position(|c| *c == "CurrentTime") {
                let time: f64 = cols
                    .get(pos + 1)
                    .ok_or_else(|| bad_row(line_no, "missing CurrentTime value".to_owned()))?
                    .parse()
                    .map_err(|_| bad_row(line_no, "non-numeric CurrentTime value".to_owned()))?;
                frames.push(FrameData {
                    frame_number: frames.len(),
                    time,
                    agents: Vec::new(),
                });
                continue;
            }

            if cols[0] == "ID" {
                let frame = frames.last_mut().ok_or_else(|| {
                    bad_row(line_no, "agent row before any CurrentTime line".to_owned())
                })?;

                if cols.len() < 7 {
                    return Err(bad_row(
                        line_no,
                        format!("expected 7 columns in an ID row, found {}", cols.len()),
                    ));
                }

                let unique_id: u64 = cols[1]
                    .parse()
                    .map_err(|_| bad_row(line_no, format!("non-integer ID {:?}", cols[1])))?;
                let file_radius: f64 = cols[2]
                    .parse()
                    .map_err(|_| bad_row(line_no, format!("non-numeric radius {:?}", cols[2])))?;
                let native_type = cols[3];

                let mut coords = [0.; 3];
                for (c, col) in coords.iter_mut().zip(&cols[4..7]) {
                    *c = col.parse().map_err(|_| {
                        bad_row(line_no, format!("non-numeric coordinate {col:?}"))
                    })?;
                }

                let Some((name, _)) = self.display_info.resolve(native_type, native_type)
                else {
                    continue;
                };

                frame.agents.push(AgentRecord {
                    unique_id,
                    type_id: type_ids.id_for(&name),
                    type_name: name,
                    position: Vec3::new(coords[0], coords[1], coords[2]) * scale,
                    rotation: Vec3::new(0., 0., 0.),
                    // SpringSaLaD supplies the radius per row; the display
                    // config only renames.
                    radius: file_radius * scale,
                    subpoints: Vec::new(),
                });
            }
        }

        let mut spatial_units = self.spatial_units.clone();
        spatial_units.multiply(1. / scale);

        let result = TrajectoryData {
            meta_data: MetaData {
                box_size,
                camera_defaults: self.camera_defaults.clone(),
                scale_factor: scale,
            },
            time_units: self.time_units.clone(),
            spatial_units,
            frames,
            plots: self.plots.clone(),
        };
        result.validate()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::TypeDisplay;

    const SIM_VIEW: &str = "\
xsize 50.0
ysize 50.0
z_outside 10.0
z_inside 40.0
SCENE CurrentTime 0.0
ID 0 2.0 GREEN 1.0 2.0 3.0
ID 1 1.5 RED 4.0 5.0 6.0
SCENE CurrentTime 0.01
ID 0 2.0 GREEN 1.5 2.0 3.0
ID 1 1.5 RED 4.0 5.5 6.0
";

    fn fixture(contents: &str) -> (tempfile::TempDir, SpringsaladData) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim_view.txt");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, SpringsaladData::new(path).unwrap())
    }

    #[test]
    fn box_size_doubles_half_extents() {
        let (_dir, data) = fixture(SIM_VIEW);
        let traj = data.read().unwrap();

        assert!((traj.meta_data.box_size.x - 100.).abs() < 1e-12);
        assert!((traj.meta_data.box_size.y - 100.).abs() < 1e-12);
        assert!((traj.meta_data.box_size.z - 100.).abs() < 1e-12);
    }

    #[test]
    fn frames_and_agents_parse() {
        let (_dir, data) = fixture(SIM_VIEW);
        let traj = data.read().unwrap();

        assert_eq!(traj.frames.len(), 2);
        assert_eq!(traj.frames[0].agents.len(), 2);
        let a = &traj.frames[0].agents[0];
        assert_eq!(a.unique_id, 0);
        assert_eq!(a.type_name, "GREEN");
        assert_eq!(a.radius, 2.0);
        assert!((traj.frames[1].time - 0.01).abs() < 1e-12);
    }

    #[test]
    fn display_names_rename_types() {
        let (_dir, mut data) = fixture(SIM_VIEW);
        data.display_info
            .display
            .insert("GREEN".to_owned(), TypeDisplay::direct("Kinase", None));

        let traj = data.read().unwrap();
        assert_eq!(traj.frames[0].agents[0].type_name, "Kinase");
        // File radius wins over display radius for this engine.
        assert_eq!(traj.frames[0].agents[0].radius, 2.0);
    }

    #[test]
    fn missing_box_size_lines_rejected() {
        // No xsize/ysize/z_* lines: the box would be (0, 0, 0).
        let (_dir, data) = fixture(
            "SCENE CurrentTime 0.0\nID 0 2.0 GREEN 1.0 2.0 3.0\n",
        );
        assert!(matches!(
            data.read(),
            Err(ConvertError::InvalidTrajectory(_))
        ));
    }

    #[test]
    fn zero_scale_factor_rejected() {
        let (_dir, mut data) = fixture(SIM_VIEW);
        data.scale_factor = 0.;
        assert!(matches!(
            data.read(),
            Err(ConvertError::InvalidTrajectory(_))
        ));
    }

    #[test]
    fn scale_factor_applies_uniformly() {
        let (_dir, mut data) = fixture(SIM_VIEW);
        data.scale_factor = 0.1;

        let traj = data.read().unwrap();
        assert!((traj.meta_data.box_size.x - 10.).abs() < 1e-12);
        assert!((traj.frames[0].agents[0].radius - 0.2).abs() < 1e-12);
        assert!((traj.frames[0].agents[0].position.x - 0.1).abs() < 1e-12);
        assert!((traj.spatial_units.magnitude - 10.).abs() < 1e-9);
    }
}
