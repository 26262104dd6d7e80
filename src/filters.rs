//! Composable transforms over [TrajectoryData]. A filter consumes one
//! trajectory and produces a new one; filters never alias or mutate their
//! input, so a chain can run stage by stage with no shared state. The caller's
//! filter order is authoritative: composition is not commutative in general.

use std::collections::HashMap;

use lin_alg::f64::Vec3;

use crate::{ConvertError, TrajectoryData};

pub trait Filter {
    fn apply(&self, input: &TrajectoryData) -> Result<TrajectoryData, ConvertError>;
}

/// Applies an ordered list of filters left to right; the output of filter *i*
/// is the input of filter *i+1*.
pub fn apply_all(
    input: &TrajectoryData,
    filters: &[Box<dyn Filter>],
) -> Result<TrajectoryData, ConvertError> {
    let mut data = input.clone();
    for f in filters {
        data = f.apply(&data)?;
    }
    Ok(data)
}

/// Adds a per-type (or default) offset to every agent position and every
/// subpoint in every frame. Does not touch box size, frame count, ordering,
/// or agent counts.
#[derive(Clone, Debug, Default)]
pub struct TranslateFilter {
    pub translation_per_type_id: HashMap<u32, Vec3>,
    pub default_translation: Vec3,
}

impl Filter for TranslateFilter {
    fn apply(&self, input: &TrajectoryData) -> Result<TrajectoryData, ConvertError> {
        input.validate()?;

        let mut result = input.clone();
        for frame in &mut result.frames {
            for agent in &mut frame.agents {
                let offset = self
                    .translation_per_type_id
                    .get(&agent.type_id)
                    .copied()
                    .unwrap_or(self.default_translation);

                agent.position = agent.position + offset;
                for sp in &mut agent.subpoints {
                    *sp = *sp + offset;
                }
            }
        }
        Ok(result)
    }
}

/// Reduces a trajectory to every nth frame (always keeping frame 0), and
/// renumbers the kept frames from 0. The one documented exception to the
/// frame-count-preserving filter property; original times are kept.
#[derive(Clone, Debug)]
pub struct EveryNthTimestepFilter {
    pub n: usize,
}

impl Filter for EveryNthTimestepFilter {
    fn apply(&self, input: &TrajectoryData) -> Result<TrajectoryData, ConvertError> {
        input.validate()?;

        if self.n == 0 {
            return Err(ConvertError::InvalidTrajectory(
                "every-nth-timestep filter requires n >= 1".to_owned(),
            ));
        }

        let mut result = input.clone();
        result.frames = input
            .frames
            .iter()
            .step_by(self.n)
            .cloned()
            .enumerate()
            .map(|(i, mut frame)| {
                frame.frame_number = i;
                frame
            })
            .collect();
        Ok(result)
    }
}

/// One output axis of [TransformSpatialAxesFilter]: which input axis it takes
/// its value from, and with which sign.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AxisMap {
    PlusX,
    MinusX,
    PlusY,
    MinusY,
    PlusZ,
    MinusZ,
}

impl AxisMap {
    pub fn from_str(s: &str) -> Result<Self, ConvertError> {
        match s {
            "+X" => Ok(Self::PlusX),
            "-X" => Ok(Self::MinusX),
            "+Y" => Ok(Self::PlusY),
            "-Y" => Ok(Self::MinusY),
            "+Z" => Ok(Self::PlusZ),
            "-Z" => Ok(Self::MinusZ),
            _ => Err(ConvertError::InvalidTrajectory(format!(
                "unrecognized axis mapping {s:?}; expected one of +X -X +Y -Y +Z -Z"
            ))),
        }
    }

    fn component(self, v: Vec3) -> f64 {
        match self {
            Self::PlusX => v.x,
            Self::MinusX => -v.x,
            Self::PlusY => v.y,
            Self::MinusY => -v.y,
            Self::PlusZ => v.z,
            Self::MinusZ => -v.z,
        }
    }
}

/// Permutes/negates the spatial axes of every position and subpoint, e.g.
/// `["+X", "-Z", "+Y"]` maps (x, y, z) to (x, -z, y). Useful for sources with
/// a different up-axis convention. Box size components are permuted with the
/// same mapping (sign dropped; extents are magnitudes). Radii are untouched.
#[derive(Clone, Debug)]
pub struct TransformSpatialAxesFilter {
    pub axes_mapping: [AxisMap; 3],
}

impl TransformSpatialAxesFilter {
    pub fn new(axes: [&str; 3]) -> Result<Self, ConvertError> {
        Ok(Self {
            axes_mapping: [
                AxisMap::from_str(axes[0])?,
                AxisMap::from_str(axes[1])?,
                AxisMap::from_str(axes[2])?,
            ],
        })
    }

    fn map(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.axes_mapping[0].component(v),
            self.axes_mapping[1].component(v),
            self.axes_mapping[2].component(v),
        )
    }
}

impl Filter for TransformSpatialAxesFilter {
    fn apply(&self, input: &TrajectoryData) -> Result<TrajectoryData, ConvertError> {
        input.validate()?;

        let mut result = input.clone();

        let size = self.map(result.meta_data.box_size);
        result.meta_data.box_size = Vec3::new(size.x.abs(), size.y.abs(), size.z.abs());

        for frame in &mut result.frames {
            for agent in &mut frame.agents {
                agent.position = self.map(agent.position);
                for sp in &mut agent.subpoints {
                    *sp = self.map(*sp);
                }
            }
        }
        Ok(result)
    }
}
