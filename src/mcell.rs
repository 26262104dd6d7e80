//! Reader for [MCell](https://mcell.org) CellBlender visualization output: a
//! directory of per-iteration binary `.dat` files, one frame each.
//!
//! Frame file layout (little-endian): a `u32` format version (1), then one
//! block per species: `u8` name length, the name bytes, `u8` surface flag,
//! `u32` float count, and that many `f32`s of XYZ positions. Surface species
//! carry an equal count of normal floats after the positions; we skip them.
//! Frame time is the file's index times the configured timestep.
//!
//! Frames are independent files, so they are parsed in parallel; ordering is
//! restored by collecting in sorted-file order, not completion order.

use std::{
    fs,
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::PathBuf,
};

use byteorder::{LittleEndian, ReadBytesExt};
use lin_alg::f64::Vec3;
use log::info;
use rayon::prelude::*;
use serde_json::Value;

use crate::{
    AgentRecord, ConvertError, DisplayInfo, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, UnitData,
    trajectory::TypeIds,
};

const CELLBIN_VERSION: u32 = 1;

#[derive(Clone, Debug)]
pub struct McellData {
    /// Directory holding the per-iteration binary frame files.
    pub path_to_binary_files: PathBuf,
    /// Simulated time between consecutive frame files.
    pub timestep: f64,
    pub meta_data: MetaData,
    pub display_info: DisplayInfo,
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub plots: Vec<Value>,
}

impl McellData {
    pub fn new(dir: impl Into<PathBuf>, timestep: f64) -> Result<Self, ConvertError> {
        Ok(Self {
            path_to_binary_files: dir.into(),
            timestep,
            meta_data: MetaData::default(),
            display_info: DisplayInfo::default(),
            time_units: UnitData::base("s")?,
            spatial_units: UnitData::base("µm")?,
            plots: Vec::new(),
        })
    }
}

/// One species block: name, and XYZ triplets.
struct SpeciesBlock {
    name: String,
    positions: Vec<Vec3>,
}

impl TrajectoryReader for McellData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        let dir = &self.path_to_binary_files;
        if !dir.is_dir() {
            return Err(ConvertError::MissingFile(dir.clone()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "dat"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ConvertError::InvalidTrajectory(format!(
                "no .dat frame files in {}",
                dir.display()
            )));
        }
        info!("Reading MCell data: {} frame files", files.len());

        // Frame files are independent; parse in parallel, keep file order.
        let parsed: Vec<Vec<SpeciesBlock>> = files
            .par_iter()
            .map(|path| parse_frame_file(path))
            .collect::<Result<_, _>>()?;

        let scale = self.meta_data.scale_factor;
        let mut type_ids = TypeIds::default();
        let mut frames = Vec::with_capacity(parsed.len());

        for (index, blocks) in parsed.into_iter().enumerate() {
            let mut agents = Vec::new();
            // No continuity between frames in this format; ids are assigned
            // per frame in block order.
            let mut next_uid = 0u64;

            for block in blocks {
                let Some((name, radius)) = self.display_info.resolve(&block.name, &block.name)
                else {
                    continue;
                };
                let type_id = type_ids.id_for(&name);

                for p in block.positions {
                    agents.push(AgentRecord {
                        unique_id: next_uid,
                        type_id,
                        type_name: name.clone(),
                        position: p * scale,
                        rotation: Vec3::new(0., 0., 0.),
                        radius: radius * scale,
                        subpoints: Vec::new(),
                    });
                    next_uid += 1;
                }
            }

            frames.push(FrameData {
                frame_number: index,
                time: index as f64 * self.timestep,
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

fn parse_frame_file(path: &PathBuf) -> Result<Vec<SpeciesBlock>, ConvertError> {
    let f = File::open(path)?;
    let file_len = f.metadata()?.len();
    let mut r = BufReader::new(f);

    // Record index stands in for a line number in binary error context.
    let mut record = 0;
    let bad = |record: usize, msg: String| ConvertError::FileFormat {
        path: path.clone(),
        line: record,
        msg,
    };
    let truncated = |record: usize| bad(record, "truncated species block".to_owned());

    let version = r
        .read_u32::<LittleEndian>()
        .map_err(|_| bad(0, "missing version header".to_owned()))?;
    if version != CELLBIN_VERSION {
        return Err(bad(0, format!("unsupported format version {version}")));
    }

    let mut blocks = Vec::new();

    loop {
        record += 1;

        let mut len_buf = [0u8; 1];
        match r.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break, // clean end of file
            Err(e) => return Err(e.into()),
        }
        let name_len = len_buf[0] as usize;

        let mut name_bytes = vec![0u8; name_len];
        r.read_exact(&mut name_bytes).map_err(|_| truncated(record))?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| bad(record, "species name is not UTF-8".to_owned()))?;

        let is_surface = r.read_u8().map_err(|_| truncated(record))? != 0;

        let n_floats = r
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated(record))? as usize;
        if !n_floats.is_multiple_of(3) {
            return Err(bad(
                record,
                format!("position float count {n_floats} is not a multiple of 3"),
            ));
        }
        // The count is untrusted; bound it by the file itself before
        // reserving anything.
        if (n_floats as u64).saturating_mul(4) > file_len {
            return Err(bad(
                record,
                format!("float count {n_floats} exceeds the {file_len}-byte file"),
            ));
        }

        let mut positions = Vec::with_capacity(n_floats / 3);
        let mut triplet = [0f32; 3];
        for _ in 0..n_floats / 3 {
            for v in &mut triplet {
                *v = r
                    .read_f32::<LittleEndian>()
                    .map_err(|_| truncated(record))?;
            }
            positions.push(Vec3::new(
                triplet[0] as f64,
                triplet[1] as f64,
                triplet[2] as f64,
            ));
        }

        if is_surface {
            // Normals follow; not part of the scene model.
            for _ in 0..n_floats {
                r.read_f32::<LittleEndian>().map_err(|_| truncated(record))?;
            }
        }

        blocks.push(SpeciesBlock { name, positions });
    }

    Ok(blocks)
}
