//! Reader for [Cytosim](https://gitlab.com/f-nedelec/cytosim) report output.
//!
//! A report file holds one block per frame, delimited by `%`-prefixed comment
//! lines (`% frame 0`, `% time 0.05`), followed by whitespace-delimited data
//! rows. Each row carries the object's class id in column 0, its identity in
//! column 1, and XYZ position at the configured column indices. The column
//! layout is not consistent across Cytosim report commands, so the position
//! indices are configuration, not code.
//!
//! Fiber points are accumulated: consecutive rows sharing an identity become
//! one polyline agent's subpoints; a new identity starts a new agent, even
//! within the same frame.

use std::{fs, path::PathBuf};

use lin_alg::f64::Vec3;
use log::info;
use serde_json::Value;

use crate::{
    AgentRecord, ConvertError, DisplayInfo, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, UnitData,
    trajectory::TypeIds,
};

/// The kinds of Cytosim objects a report file can describe. Only fibers carry
/// subpoints; the rest are point agents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CytosimObjectKind {
    Fibers,
    Solids,
    Singles,
    Couples,
}

impl CytosimObjectKind {
    /// Seed for generated default display names, e.g. `"fiber1"`.
    fn default_name(self) -> &'static str {
        match self {
            Self::Fibers => "fiber",
            Self::Solids => "solid",
            Self::Singles => "single",
            Self::Couples => "couple",
        }
    }
}

/// Info for reading one Cytosim report file (one object kind).
#[derive(Clone, Debug)]
pub struct CytosimObjectInfo {
    pub filepath: PathBuf,
    pub kind: CytosimObjectKind,
    /// Columns holding XYZ. Cytosim's reports are not always consistent;
    /// override if your output places coordinates elsewhere.
    pub position_indices: [usize; 3],
}

impl CytosimObjectInfo {
    pub fn new(filepath: impl Into<PathBuf>, kind: CytosimObjectKind) -> Self {
        Self {
            filepath: filepath.into(),
            kind,
            position_indices: [2, 3, 4],
        }
    }
}

#[derive(Clone, Debug)]
pub struct CytosimData {
    pub meta_data: MetaData,
    pub objects: Vec<CytosimObjectInfo>,
    pub display_info: DisplayInfo,
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub plots: Vec<Value>,
}

impl TrajectoryReader for CytosimData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        info!("Reading Cytosim data from {} report file(s)", self.objects.len());

        let mut frames: Vec<FrameData> = Vec::new();
        let mut type_ids = TypeIds::default();
        let mut uid_offset = 0;

        for obj in &self.objects {
            let file_frames = parse_report(obj, &self.display_info, &mut type_ids, uid_offset)?;

            for frame in &file_frames {
                for agent in &frame.agents {
                    uid_offset = uid_offset.max(agent.unique_id + 1);
                }
            }

            if frames.is_empty() {
                frames = file_frames;
            } else {
                if file_frames.len() != frames.len() {
                    return Err(ConvertError::InvalidTrajectory(format!(
                        "{} has {} frames; earlier report files have {}",
                        obj.filepath.display(),
                        file_frames.len(),
                        frames.len()
                    )));
                }
                for (merged, extra) in frames.iter_mut().zip(file_frames) {
                    merged.agents.extend(extra.agents);
                }
            }
        }

        let scale = self.meta_data.scale_factor;
        let mut meta_data = self.meta_data.clone();
        meta_data.box_size = meta_data.box_size * scale;
        for frame in &mut frames {
            for agent in &mut frame.agents {
                agent.position = agent.position * scale;
                agent.radius *= scale;
                for sp in &mut agent.subpoints {
                    *sp = *sp * scale;
                }
            }
        }

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

fn parse_report(
    obj: &CytosimObjectInfo,
    display_info: &DisplayInfo,
    type_ids: &mut TypeIds,
    uid_offset: u64,
) -> Result<Vec<FrameData>, ConvertError> {
    if !obj.filepath.exists() {
        return Err(ConvertError::MissingFile(obj.filepath.clone()));
    }
    let text = fs::read_to_string(&obj.filepath)?;

    let bad_row = |line: usize, msg: String| ConvertError::FileFormat {
        path: obj.filepath.clone(),
        line,
        msg,
    };

    let mut frames: Vec<FrameData> = Vec::new();
    // Identity of the fiber the previous row belonged to, to detect polyline
    // continuation.
    let mut prev_fiber_id: Option<u64> = None;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('%') {
            let mut tokens = comment.split_whitespace();
            match tokens.next() {
                Some("frame") => {
                    frames.push(FrameData {
                        frame_number: frames.len(),
                        time: 0.,
                        agents: Vec::new(),
                    });
                    prev_fiber_id = None;
                }
                Some("time") => {
                    let frame = frames
                        .last_mut()
                        .ok_or_else(|| bad_row(line_no, "time before any frame".to_owned()))?;
                    frame.time = tokens
                        .next()
                        .ok_or_else(|| bad_row(line_no, "missing time value".to_owned()))?
                        .parse()
                        .map_err(|_| bad_row(line_no, "non-numeric time value".to_owned()))?;
                }
                _ => {} // other report comments, e.g. "% end"
            }
            continue;
        }

        let frame = frames
            .last_mut()
            .ok_or_else(|| bad_row(line_no, "data row before any frame marker".to_owned()))?;

        let cols: Vec<&str> = line.split_whitespace().collect();
        let max_index = obj.position_indices.iter().copied().max().unwrap_or(0);
        if cols.len() <= max_index.max(1) {
            return Err(bad_row(
                line_no,
                format!("expected at least {} columns, found {}", max_index + 1, cols.len()),
            ));
        }

        let native_type = cols[0];
        let entity_id: u64 = cols[1]
            .parse()
            .map_err(|_| bad_row(line_no, format!("non-integer identity {:?}", cols[1])))?;

        let mut coords = [0.; 3];
        for (c, idx) in coords.iter_mut().zip(obj.position_indices) {
            *c = cols[idx].parse().map_err(|_| {
                bad_row(line_no, format!("non-numeric coordinate {:?}", cols[idx]))
            })?;
        }
        let point = Vec3::new(coords[0], coords[1], coords[2]);

        let default_name = format!("{}{native_type}", obj.kind.default_name());
        let Some((name, radius)) = display_info.resolve(native_type, &default_name) else {
            prev_fiber_id = None;
            continue;
        };
        let type_id = type_ids.id_for(&name);
        let unique_id = uid_offset + entity_id;

        if obj.kind == CytosimObjectKind::Fibers {
            if prev_fiber_id == Some(entity_id)
                && let Some(last) = frame.agents.last_mut()
                && last.unique_id == unique_id
            {
                last.subpoints.push(point);
            } else {
                frame.agents.push(AgentRecord {
                    unique_id,
                    type_id,
                    type_name: name,
                    position: Vec3::new(0., 0., 0.),
                    rotation: Vec3::new(0., 0., 0.),
                    radius,
                    subpoints: vec![point],
                });
            }
            prev_fiber_id = Some(entity_id);
        } else {
            frame.agents.push(AgentRecord {
                unique_id,
                type_id,
                type_name: name,
                position: point,
                rotation: Vec3::new(0., 0., 0.),
                radius,
                subpoints: Vec::new(),
            });
        }
    }

    Ok(frames)
}
