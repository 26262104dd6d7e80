//! The canonical in-memory trajectory model every reader terminates at, and
//! every filter and the writer consume. Point particles, fiber polylines, and
//! phased cells are all [AgentRecord]s; fibers are the ones with subpoints.

use std::collections::{BTreeMap, HashMap, HashSet, btree_map::Entry};

use lin_alg::f64::Vec3;
use serde_json::Value;

use crate::{ConvertError, MetaData, UnitData};

/// One simulated entity at one time step.
#[derive(Clone, Debug)]
pub struct AgentRecord {
    /// Unique within its frame; stable across frames where the source format
    /// provides continuity (fibers, cells), reader-assigned otherwise.
    pub unique_id: u64,
    pub type_id: u32,
    pub type_name: String,
    pub position: Vec3,
    /// XYZ Euler angles in degrees, or zero.
    pub rotation: Vec3,
    pub radius: f64,
    /// Ordered polyline points; non-empty only for fiber agents, and then
    /// at least 2 long.
    pub subpoints: Vec<Vec3>,
}

impl AgentRecord {
    pub fn is_fiber(&self) -> bool {
        !self.subpoints.is_empty()
    }
}

/// The complete set of agents at one simulation time step.
#[derive(Clone, Debug, Default)]
pub struct FrameData {
    /// Zero-based, strictly increasing across the trajectory.
    pub frame_number: usize,
    /// Elapsed simulated time, in the trajectory's time units.
    pub time: f64,
    pub agents: Vec<AgentRecord>,
}

#[derive(Clone, Debug)]
pub struct TrajectoryData {
    pub meta_data: MetaData,
    pub time_units: UnitData,
    pub spatial_units: UnitData,
    pub frames: Vec<FrameData>,
    /// Pre-computed plot payloads, passed through to the output unmodified.
    pub plots: Vec<Value>,
}

impl TrajectoryData {
    /// Checks every data-model invariant, identifying the offending frame and
    /// agent on failure. Called by filters on input and by the writer as the
    /// final assertion boundary.
    pub fn validate(&self) -> Result<(), ConvertError> {
        let b = self.meta_data.box_size;
        if b.x <= 0. || b.y <= 0. || b.z <= 0. {
            return Err(ConvertError::InvalidTrajectory(format!(
                "box size components must be positive: ({}, {}, {})",
                b.x, b.y, b.z
            )));
        }
        if self.meta_data.scale_factor <= 0. {
            return Err(ConvertError::InvalidTrajectory(format!(
                "scale factor must be positive: {}",
                self.meta_data.scale_factor
            )));
        }

        let mut prev_number: Option<usize> = None;
        let mut prev_time = f64::NEG_INFINITY;

        for frame in &self.frames {
            if let Some(prev) = prev_number
                && frame.frame_number <= prev
            {
                return Err(ConvertError::InvalidTrajectory(format!(
                    "frame numbers must be strictly increasing: {} follows {prev}",
                    frame.frame_number
                )));
            }
            prev_number = Some(frame.frame_number);

            if frame.time < prev_time {
                return Err(ConvertError::InvalidTrajectory(format!(
                    "time decreases at frame {}: {} after {prev_time}",
                    frame.frame_number, frame.time
                )));
            }
            prev_time = frame.time;

            let mut seen = HashSet::new();
            for agent in &frame.agents {
                if !seen.insert(agent.unique_id) {
                    return Err(ConvertError::InvalidTrajectory(format!(
                        "duplicate agent id {} in frame {}",
                        agent.unique_id, frame.frame_number
                    )));
                }
                if agent.radius < 0. {
                    return Err(ConvertError::InvalidTrajectory(format!(
                        "negative radius {} on agent {} in frame {}",
                        agent.radius, agent.unique_id, frame.frame_number
                    )));
                }
                if agent.subpoints.len() == 1 {
                    return Err(ConvertError::InvalidTrajectory(format!(
                        "agent {} in frame {} has a single subpoint; a polyline needs at least 2",
                        agent.unique_id, frame.frame_number
                    )));
                }
            }
        }

        Ok(())
    }

    /// Type id → (display name, any agent of this type is a fiber), collected
    /// across all frames. Ordered map, so the output document is stable.
    /// Fails if one id maps to two different names.
    pub fn type_mapping(&self) -> Result<BTreeMap<u32, (String, bool)>, ConvertError> {
        let mut mapping: BTreeMap<u32, (String, bool)> = BTreeMap::new();

        for frame in &self.frames {
            for agent in &frame.agents {
                match mapping.entry(agent.type_id) {
                    Entry::Occupied(mut e) => {
                        let (name, is_fiber) = e.get_mut();
                        if *name != agent.type_name {
                            return Err(ConvertError::InvalidTrajectory(format!(
                                "type id {} maps to both {name:?} and {:?}",
                                agent.type_id, agent.type_name
                            )));
                        }
                        *is_fiber |= agent.is_fiber();
                    }
                    Entry::Vacant(e) => {
                        e.insert((agent.type_name.clone(), agent.is_fiber()));
                    }
                }
            }
        }

        Ok(mapping)
    }

    /// Time between the first two frames, or 0 for a single-frame trajectory.
    pub fn time_step_size(&self) -> f64 {
        if self.frames.len() >= 2 {
            self.frames[1].time - self.frames[0].time
        } else {
            0.
        }
    }
}

/// Assigns type ids in first-appearance order, so repeated reads of the same
/// input produce identical ids.
#[derive(Default)]
pub struct TypeIds {
    ids: HashMap<String, u32>,
    next: u32,
}

impl TypeIds {
    pub fn id_for(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.next;
        self.ids.insert(name.to_owned(), id);
        self.next += 1;
        id
    }
}
