//! Reader for [PhysiCell](http://physicell.org) output: a directory of paired
//! per-frame files, an XML index (`output00000000.xml`, provides the frame's
//! `current_time`) and a MATLAB level-4 `.mat` payload
//! (`output00000000_cells_physicell.mat`) holding the cell matrix.
//!
//! The cell matrix is column-major doubles, one column per cell; the rows used
//! here are: 0 id, 1–3 position XYZ, 4 total volume, 5 cell type, 7 cycle
//! phase. Radius is derived from volume as `(3V/4π)^(1/3)`. Display names are
//! resolved through the nested type/phase map as `"<cell>#<phase>"`.
//!
//! Frame pairs are independent, so they are parsed in parallel; ordering is
//! restored by collecting in sorted-index-file order.

use std::{
    fs,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt};
use lin_alg::f64::Vec3;
use log::info;
use rayon::prelude::*;
use regex::Regex;
use serde_json::Value;

use crate::{
    AgentRecord, ConvertError, DisplayInfo, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, TypeDisplay, UnitData,
    trajectory::TypeIds,
};

/// Rows of the cells matrix this reader consumes.
const ROW_ID: usize = 0;
const ROW_POS_X: usize = 1;
const ROW_VOLUME: usize = 4;
const ROW_CELL_TYPE: usize = 5;
const ROW_PHASE: usize = 7;
const MIN_ROWS: usize = 8;

#[derive(Clone, Debug)]
pub struct PhysicellData {
    pub path_to_output_dir: PathBuf,
    pub meta_data: MetaData,
    /// Keyed by cell type id as a string; `TypeDisplay::Phased` entries nest
    /// the phase id → name map.
    pub display_info: DisplayInfo,
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub plots: Vec<Value>,
}

impl PhysicellData {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ConvertError> {
        Ok(Self {
            path_to_output_dir: dir.into(),
            meta_data: MetaData::default(),
            display_info: DisplayInfo::default(),
            time_units: UnitData::base("s")?,
            spatial_units: UnitData::base("micron")?,
            plots: Vec::new(),
        })
    }
}

/// One parsed cell row-set: (id, position, volume, cell type, phase).
type RawCell = (u64, Vec3, f64, u64, u64);

impl TrajectoryReader for PhysicellData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        let dir = &self.path_to_output_dir;
        if !dir.is_dir() {
            return Err(ConvertError::MissingFile(dir.clone()));
        }

        let mut index_files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "xml"))
            .collect();
        index_files.sort();

        if index_files.is_empty() {
            return Err(ConvertError::InvalidTrajectory(format!(
                "no .xml index files in {}",
                dir.display()
            )));
        }
        info!("Reading PhysiCell data: {} frame pairs", index_files.len());

        let time_re = Regex::new(r"<current_time[^>]*>\s*([0-9eE.+-]+)\s*</current_time>").unwrap();

        // Each frame is one XML+MAT pair; parse pairs in parallel.
        let parsed: Vec<(f64, Vec<RawCell>)> = index_files
            .par_iter()
            .map(|index_path| {
                let time = parse_time(index_path, &time_re)?;
                let cells = parse_cells_mat(&payload_path_for(index_path))?;
                Ok((time, cells))
            })
            .collect::<Result<_, ConvertError>>()?;

        let scale = self.meta_data.scale_factor;
        let mut type_ids = TypeIds::default();
        let mut frames = Vec::with_capacity(parsed.len());

        for (index, (time, cells)) in parsed.into_iter().enumerate() {
            let mut agents = Vec::new();
            for (id, position, volume, cell_type, phase) in cells {
                let Some(name) = resolve_cell_name(&self.display_info, cell_type, phase) else {
                    continue;
                };
                let radius = (3. * volume / (4. * std::f64::consts::PI)).cbrt();

                agents.push(AgentRecord {
                    unique_id: id,
                    type_id: type_ids.id_for(&name),
                    type_name: name,
                    position: position * scale,
                    rotation: Vec3::new(0., 0., 0.),
                    radius: radius * scale,
                    subpoints: Vec::new(),
                });
            }
            frames.push(FrameData {
                frame_number: index,
                time,
                agents,
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

/// `output00000000.xml` → `output00000000_cells_physicell.mat`.
fn payload_path_for(index_path: &Path) -> PathBuf {
    index_path.with_file_name(format!(
        "{}_cells_physicell.mat",
        index_path.file_stem().unwrap_or_default().to_string_lossy()
    ))
}

fn parse_time(index_path: &PathBuf, time_re: &Regex) -> Result<f64, ConvertError> {
    if !index_path.exists() {
        return Err(ConvertError::MissingFile(index_path.clone()));
    }
    let text = fs::read_to_string(index_path)?;

    let caps = time_re
        .captures(&text)
        .ok_or_else(|| ConvertError::FileFormat {
            path: index_path.clone(),
            line: 0,
            msg: "no <current_time> element".to_owned(),
        })?;
    caps[1].parse().map_err(|_| ConvertError::FileFormat {
        path: index_path.clone(),
        line: 0,
        msg: format!("non-numeric current_time {:?}", &caps[1]),
    })
}

/// Parses a MATLAB level-4 matrix of little-endian doubles: header of five
/// i32s (type, rows, cols, imaginary flag, name length), the matrix name,
/// then rows×cols values column-major.
fn parse_cells_mat(path: &PathBuf) -> Result<Vec<RawCell>, ConvertError> {
    if !path.exists() {
        return Err(ConvertError::MissingFile(path.clone()));
    }
    let f = File::open(path)?;
    let mut r = BufReader::new(f);

    let bad = |msg: String| ConvertError::FileFormat {
        path: path.clone(),
        line: 0,
        msg,
    };

    let mat_type = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".to_owned()))?;
    // Type 0: little-endian, double precision, full matrix.
    if mat_type != 0 {
        return Err(bad(format!("unsupported MAT v4 type {mat_type}")));
    }
    let mrows = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".to_owned()))?;
    let ncols = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".to_owned()))?;
    let imagf = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".to_owned()))?;
    let namelen = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".to_owned()))?;

    if imagf != 0 {
        return Err(bad("unexpected imaginary part in cell matrix".to_owned()));
    }
    if mrows < 0 || ncols < 0 || namelen < 0 {
        return Err(bad(format!(
            "negative header field: {mrows} rows, {ncols} cols, name length {namelen}"
        )));
    }
    let (mrows, ncols, namelen) = (mrows as usize, ncols as usize, namelen as usize);
    if mrows < MIN_ROWS {
        return Err(bad(format!(
            "cell matrix has {mrows} rows; need at least {MIN_ROWS}"
        )));
    }

    // Header counts are untrusted; bound the allocation by the file itself
    // before reserving anything.
    let n_values = mrows
        .checked_mul(ncols)
        .ok_or_else(|| bad(format!("cell matrix dimensions {mrows}x{ncols} overflow")))?;
    let file_len = fs::metadata(path)?.len();
    if (n_values as u64).saturating_mul(8) > file_len {
        return Err(bad(format!(
            "cell matrix claims {n_values} values; file is only {file_len} bytes"
        )));
    }

    let mut name = vec![0u8; namelen];
    r.read_exact(&mut name).map_err(|_| bad("truncated matrix name".to_owned()))?;

    let mut values = vec![0f64; n_values];
    r.read_f64_into::<LittleEndian>(&mut values)
        .map_err(|_| bad("truncated matrix data".to_owned()))?;

    // Column-major: one column per cell.
    let at = |row: usize, col: usize| values[col * mrows + row];

    let mut cells = Vec::with_capacity(ncols);
    for c in 0..ncols {
        cells.push((
            at(ROW_ID, c) as u64,
            Vec3::new(at(ROW_POS_X, c), at(ROW_POS_X + 1, c), at(ROW_POS_X + 2, c)),
            at(ROW_VOLUME, c),
            at(ROW_CELL_TYPE, c) as u64,
            at(ROW_PHASE, c) as u64,
        ));
    }
    Ok(cells)
}

/// `"<cell name>#<phase name>"`, through the nested type/phase map, or `None`
/// if the cell type is ignored. Grouped types collapse without a phase suffix.
fn resolve_cell_name(display_info: &DisplayInfo, cell_type: u64, phase: u64) -> Option<String> {
    let key = cell_type.to_string();
    if display_info.ignore_types.contains(&key) {
        return None;
    }

    for (group, members) in &display_info.type_grouping {
        if members.iter().any(|m| *m == key) {
            return Some(group.clone());
        }
    }

    Some(match display_info.display.get(&key) {
        Some(TypeDisplay::Phased { name, phases }) => match phases.get(&(phase as u32)) {
            Some(phase_name) => format!("{name}#{phase_name}"),
            None => format!("{name}#phase{phase}"),
        },
        Some(TypeDisplay::Direct { name, .. }) => format!("{name}#phase{phase}"),
        None => format!("cell{cell_type}#phase{phase}"),
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, io::Write};

    use byteorder::WriteBytesExt;

    use super::*;

    fn write_pair(dir: &Path, index: usize, time: f64, cells: &[[f64; 8]]) {
        let stem = format!("output{index:08}");

        let mut xml = File::create(dir.join(format!("{stem}.xml"))).unwrap();
        write!(
            xml,
            "<MultiCellDS><metadata><current_time units=\"min\">{time}</current_time></metadata></MultiCellDS>"
        )
        .unwrap();

        let mut mat = File::create(dir.join(format!("{stem}_cells_physicell.mat"))).unwrap();
        let mrows = 8i32;
        let ncols = cells.len() as i32;
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(mrows).unwrap();
        mat.write_i32::<LittleEndian>(ncols).unwrap();
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(6).unwrap();
        mat.write_all(b"cells\0").unwrap();
        // Column-major.
        for cell in cells {
            for v in cell {
                mat.write_f64::<LittleEndian>(*v).unwrap();
            }
        }
    }

    // volume for radius 1: 4π/3
    const UNIT_VOLUME: f64 = 4. * std::f64::consts::PI / 3.;

    fn fixture() -> (tempfile::TempDir, PhysicellData) {
        let dir = tempfile::tempdir().unwrap();
        write_pair(
            dir.path(),
            0,
            0.,
            &[
                [0., -4.2, -2.5, 0., UNIT_VOLUME, 1., 0., 4.],
                [1., -2.2, 4.3, 0., UNIT_VOLUME, 0., 0., 4.],
            ],
        );
        write_pair(
            dir.path(),
            1,
            360.,
            &[
                [0., -4.1, -2.4, 0., UNIT_VOLUME, 1., 0., 4.],
                [1., -2.2, 4.3, 0., UNIT_VOLUME, 0., 0., 4.],
            ],
        );
        let data = PhysicellData::new(dir.path()).unwrap();
        (dir, data)
    }

    #[test]
    fn pairs_parse_into_frames_with_xml_times() {
        let (_dir, data) = fixture();
        let traj = data.read().unwrap();

        assert_eq!(traj.frames.len(), 2);
        assert!((traj.frames[1].time - 360.).abs() < 1e-12);
        assert_eq!(traj.frames[0].agents.len(), 2);

        let a = &traj.frames[0].agents[0];
        assert_eq!(a.unique_id, 0);
        assert_eq!(a.type_name, "cell1#phase4");
        assert!((a.position.x - -4.2).abs() < 1e-12);
        assert!((a.radius - 1.).abs() < 1e-12);
    }

    #[test]
    fn phased_display_map_names_cells() {
        let (_dir, mut data) = fixture();
        data.display_info.display.insert(
            "1".to_owned(),
            TypeDisplay::Phased {
                name: "tumor".to_owned(),
                phases: BTreeMap::from([(4, "interphase".to_owned())]),
            },
        );

        let traj = data.read().unwrap();
        assert_eq!(traj.frames[0].agents[0].type_name, "tumor#interphase");
        // Unmapped cell type still gets the generated default.
        assert_eq!(traj.frames[0].agents[1].type_name, "cell0#phase4");
    }

    #[test]
    fn negative_matrix_dimensions_are_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut xml = File::create(dir.path().join("output00000000.xml")).unwrap();
        write!(xml, "<MultiCellDS><current_time>0</current_time></MultiCellDS>").unwrap();

        let mut mat =
            File::create(dir.path().join("output00000000_cells_physicell.mat")).unwrap();
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(-1).unwrap(); // mrows
        mat.write_i32::<LittleEndian>(2).unwrap();
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(6).unwrap();
        mat.write_all(b"cells\0").unwrap();

        let data = PhysicellData::new(dir.path()).unwrap();
        assert!(matches!(data.read(), Err(ConvertError::FileFormat { .. })));
    }

    #[test]
    fn oversized_matrix_claim_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut xml = File::create(dir.path().join("output00000000.xml")).unwrap();
        write!(xml, "<MultiCellDS><current_time>0</current_time></MultiCellDS>").unwrap();

        // Claims far more values than the file holds.
        let mut mat =
            File::create(dir.path().join("output00000000_cells_physicell.mat")).unwrap();
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(8).unwrap();
        mat.write_i32::<LittleEndian>(i32::MAX).unwrap(); // ncols
        mat.write_i32::<LittleEndian>(0).unwrap();
        mat.write_i32::<LittleEndian>(6).unwrap();
        mat.write_all(b"cells\0").unwrap();

        let data = PhysicellData::new(dir.path()).unwrap();
        assert!(matches!(data.read(), Err(ConvertError::FileFormat { .. })));
    }

    #[test]
    fn missing_payload_file_is_reported() {
        let (dir, data) = fixture();
        fs::remove_file(dir.path().join("output00000001_cells_physicell.mat")).unwrap();
        assert!(matches!(data.read(), Err(ConvertError::MissingFile(_))));
    }

    #[test]
    fn cell_ids_are_stable_across_frames() {
        let (_dir, data) = fixture();
        let traj = data.read().unwrap();
        let ids0: Vec<_> = traj.frames[0].agents.iter().map(|a| a.unique_id).collect();
        let ids1: Vec<_> = traj.frames[1].agents.iter().map(|a| a.unique_id).collect();
        assert_eq!(ids0, ids1);
    }
}
