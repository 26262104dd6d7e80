//! Reader for [Smoldyn](https://www.smoldyn.org) molecule-list text output,
//! as produced by the `listmols` command reporting to a file.
//!
//! A line holding a single numeric token starts a new frame and carries its
//! simulated time. Every other non-empty line is one molecule: species name in
//! column 0, XYZ position at the configured column indices, and a trailing
//! integer serial used as the molecule's id when present.

use std::{fs, path::PathBuf};

use lin_alg::f64::Vec3;
use log::info;
use serde_json::Value;

use crate::{
    AgentRecord, ConvertError, DisplayInfo, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, UnitData,
    trajectory::TypeIds,
};

#[derive(Clone, Debug)]
pub struct SmoldynData {
    pub path: PathBuf,
    pub meta_data: MetaData,
    pub display_info: DisplayInfo,
    /// Columns holding XYZ; Smoldyn output commands differ in what they put
    /// before the coordinates.
    pub position_indices: [usize; 3],
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub plots: Vec<Value>,
}

impl SmoldynData {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConvertError> {
        Ok(Self {
            path: path.into(),
            meta_data: MetaData::default(),
            display_info: DisplayInfo::default(),
            position_indices: [2, 3, 4],
            time_units: UnitData::base("s")?,
            spatial_units: UnitData::base("µm")?,
            plots: Vec::new(),
        })
    }
}

impl TrajectoryReader for SmoldynData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        if !self.path.exists() {
            return Err(ConvertError::MissingFile(self.path.clone()));
        }
        info!("Reading Smoldyn data from {}", self.path.display());

        let text = fs::read_to_string(&self.path)?;
        let scale = self.meta_data.scale_factor;

        let bad_row = |line: usize, msg: String| ConvertError::FileFormat {
            path: self.path.clone(),
            line,
            msg,
        };

        let mut frames: Vec<FrameData> = Vec::new();
        let mut type_ids = TypeIds::default();
        // Fallback ids for rows without a serial column.
        let mut next_uid = 0u64;

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let cols: Vec<&str> = line.split_whitespace().collect();

            if cols.len() == 1 {
                let time: f64 = cols[0]
                    .parse()
                    .map_err(|_| bad_row(line_no, format!("non-numeric time {:?}", cols[0])))?;
                frames.push(FrameData {
                    frame_number: frames.len(),
                    time,
                    agents: Vec::new(),
                });
                next_uid = 0;
                continue;
            }

            let frame = frames
                .last_mut()
                .ok_or_else(|| bad_row(line_no, "molecule row before any time line".to_owned()))?;

            let max_index = self.position_indices.iter().copied().max().unwrap_or(0);
            if cols.len() <= max_index {
                return Err(bad_row(
                    line_no,
                    format!("expected at least {} columns, found {}", max_index + 1, cols.len()),
                ));
            }

            let species = cols[0];
            let mut coords = [0.; 3];
            for (c, idx) in coords.iter_mut().zip(self.position_indices) {
                *c = cols[idx].parse().map_err(|_| {
                    bad_row(line_no, format!("non-numeric coordinate {:?}", cols[idx]))
                })?;
            }

            let Some((name, radius)) = self.display_info.resolve(species, species) else {
                continue;
            };

            // A column past the coordinates is the molecule serial.
            let unique_id = if cols.len() > max_index + 1 {
                cols[cols.len() - 1].parse().map_err(|_| {
                    bad_row(
                        line_no,
                        format!("non-integer serial {:?}", cols[cols.len() - 1]),
                    )
                })?
            } else {
                let uid = next_uid;
                next_uid += 1;
                uid
            };

            frame.agents.push(AgentRecord {
                unique_id,
                type_id: type_ids.id_for(&name),
                type_name: name,
                position: Vec3::new(coords[0], coords[1], coords[2]) * scale,
                rotation: Vec3::new(0., 0., 0.),
                radius: radius * scale,
                subpoints: Vec::new(),
            });
        }

        let mut meta_data = self.meta_data.clone();
        meta_data.box_size = meta_data.box_size * scale;

        let mut spatial_units = self.spatial_units.clone();
        spatial_units.multiply(1. / scale);

        let result = TrajectoryData {
            meta_data,
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

    const LISTMOLS: &str = "\
0.0
A solution 1.0 2.0 3.0 10
B solution 4.0 5.0 6.0 11
0.1
A solution 1.1 2.0 3.0 10
B solution 4.0 5.1 6.0 11
";

    fn fixture(contents: &str) -> (tempfile::TempDir, SmoldynData) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mols.txt");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, SmoldynData::new(path).unwrap())
    }

    #[test]
    fn frames_split_on_time_lines() {
        let (_dir, data) = fixture(LISTMOLS);
        let traj = data.read().unwrap();

        assert_eq!(traj.frames.len(), 2);
        assert_eq!(traj.frames[0].agents.len(), 2);
        assert_eq!(traj.frames[0].agents[0].type_name, "A");
        assert_eq!(traj.frames[0].agents[0].unique_id, 10);
        assert!((traj.frames[1].time - 0.1).abs() < 1e-12);
        assert!((traj.frames[1].agents[0].position.x - 1.1).abs() < 1e-12);
    }

    #[test]
    fn ignore_types_drops_all_matching_records() {
        let (_dir, mut data) = fixture(LISTMOLS);
        data.display_info.ignore_types.insert("B".to_owned());

        let traj = data.read().unwrap();
        for frame in &traj.frames {
            assert_eq!(frame.agents.len(), 1);
            assert!(frame.agents.iter().all(|a| a.type_name != "B"));
        }
    }

    #[test]
    fn grouping_applies_with_radius_fallback() {
        let (_dir, mut data) = fixture(LISTMOLS);
        data.display_info
            .display
            .insert("A".to_owned(), TypeDisplay::direct("A", Some(2.0)));
        data.display_info
            .type_grouping
            .insert("C".to_owned(), vec!["A".to_owned()]);

        let traj = data.read().unwrap();
        let a = &traj.frames[0].agents[0];
        assert_eq!(a.type_name, "C");
        assert_eq!(a.radius, 2.0);
    }

    #[test]
    fn wrong_column_count_is_a_format_error() {
        let (_dir, data) = fixture("0.0\nA solution 1.0\n");
        match data.read() {
            Err(ConvertError::FileFormat { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected FileFormat error, got {other:?}"),
        }
    }
}
