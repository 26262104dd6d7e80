//! Writing and reading the canonical JSON scene document consumed by the
//! trajectory viewer.
//!
//! Two write modes: inline, with every frame's agent buffer embedded in the
//! document, and external, which moves the bulk `bundleData` array into a
//! sibling `.bundle.json` artifact referenced by file name, keeping the
//! primary document small for very large trajectories.
//!
//! Output is deterministic for identical input: agent order is the model's
//! order, the type mapping is an ordered map, and JSON object keys serialize
//! sorted. Both modes write to a temporary file and rename on success, so a
//! failed write leaves no partial document behind.

use std::{fs, path::Path, path::PathBuf};

use lin_alg::f64::Vec3;
use log::info;
use serde_json::{Value, json};

use crate::{
    AgentRecord, CameraData, ConvertError, FrameData, MetaData, TrajectoryData,
    TrajectoryReader, UnitData, VIZ_TYPE_DEFAULT, VIZ_TYPE_FIBER,
};

pub const TRAJECTORY_INFO_VERSION: u64 = 2;
pub const SPATIAL_DATA_VERSION: u64 = 1;
pub const PLOT_DATA_VERSION: u64 = 1;

/// Serializes the whole trajectory into one scene document at `path`.
pub fn write_json(traj: &TrajectoryData, path: &Path) -> Result<(), ConvertError> {
    let mut doc = document_header(traj)?;
    doc["spatialData"]["bundleData"] = Value::Array(bundle_data(traj));

    info!("Writing scene document to {}", path.display());
    commit(path, &doc)
}

/// Serializes the trajectory with the per-frame spatial payload stored in a
/// sibling `<stem>.bundle.json` artifact, referenced from the main document.
pub fn write_external(traj: &TrajectoryData, path: &Path) -> Result<(), ConvertError> {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let bundle_name = format!("{stem}.bundle.json");
    let bundle_path = path.with_file_name(&bundle_name);

    let mut doc = document_header(traj)?;
    doc["spatialData"]["bundleFile"] = Value::String(bundle_name);

    let bundle = json!({ "bundleData": bundle_data(traj) });

    info!(
        "Writing scene document to {} with external bundle {}",
        path.display(),
        bundle_path.display()
    );
    commit(&bundle_path, &bundle)?;
    if let Err(e) = commit(path, &doc) {
        // Don't leave an orphaned bundle next to a missing main document.
        let _ = fs::remove_file(&bundle_path);
        return Err(e);
    }
    Ok(())
}

/// Everything but the frame buffers. Validation here is the final assertion
/// boundary: an invariant violation at this point is a serialization error.
fn document_header(traj: &TrajectoryData) -> Result<Value, ConvertError> {
    traj.validate()
        .map_err(|e| ConvertError::Serialization(e.to_string()))?;

    let mut type_mapping = serde_json::Map::new();
    for (tid, (name, is_fiber)) in traj
        .type_mapping()
        .map_err(|e| ConvertError::Serialization(e.to_string()))?
    {
        type_mapping.insert(
            tid.to_string(),
            json!({
                "name": name,
                "geometry": if is_fiber { "fiber" } else { "sphere" },
            }),
        );
    }

    let camera = &traj.meta_data.camera_defaults;
    Ok(json!({
        "trajectoryInfo": {
            "version": TRAJECTORY_INFO_VERSION,
            "timeUnits": unit_obj(&traj.time_units),
            "timeStepSize": traj.time_step_size(),
            "totalSteps": traj.frames.len(),
            "spatialUnits": unit_obj(&traj.spatial_units),
            "size": vec3_obj(traj.meta_data.box_size),
            "cameraDefault": {
                "position": vec3_obj(camera.position),
                "lookAtPosition": vec3_obj(camera.look_at_position),
                "upVector": vec3_obj(camera.up_vector),
                "fovDegrees": camera.fov_degrees,
            },
            "typeMapping": type_mapping,
        },
        "spatialData": {
            "version": SPATIAL_DATA_VERSION,
            "msgType": 1,
            "bundleStart": 0,
            "bundleSize": traj.frames.len(),
        },
        "plotData": {
            "version": PLOT_DATA_VERSION,
            "data": traj.plots.clone(),
        },
    }))
}

fn unit_obj(u: &UnitData) -> Value {
    json!({ "name": u.name.clone(), "magnitude": u.magnitude })
}

fn vec3_obj(v: Vec3) -> Value {
    json!({ "x": v.x, "y": v.y, "z": v.z })
}

fn bundle_data(traj: &TrajectoryData) -> Vec<Value> {
    traj.frames
        .iter()
        .map(|frame| {
            let mut data = Vec::new();
            for agent in &frame.agents {
                data.push(if agent.is_fiber() {
                    VIZ_TYPE_FIBER
                } else {
                    VIZ_TYPE_DEFAULT
                });
                data.push(agent.unique_id as f64);
                data.push(agent.type_id as f64);
                data.extend([agent.position.x, agent.position.y, agent.position.z]);
                data.extend([agent.rotation.x, agent.rotation.y, agent.rotation.z]);
                data.push(agent.radius);
                // Subpoint count is in floats, 3 per point.
                data.push((agent.subpoints.len() * 3) as f64);
                for sp in &agent.subpoints {
                    data.extend([sp.x, sp.y, sp.z]);
                }
            }
            json!({
                "frameNumber": frame.frame_number,
                "time": frame.time,
                "data": data,
            })
        })
        .collect()
}

/// Writes via a temporary sibling and renames into place, so no partial file
/// survives a failure.
fn commit(path: &Path, doc: &Value) -> Result<(), ConvertError> {
    let text = serde_json::to_string(doc)
        .map_err(|e| ConvertError::Serialization(e.to_string()))?;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    if let Err(source) = fs::write(&tmp_path, text) {
        let _ = fs::remove_file(&tmp_path);
        return Err(ConvertError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(ConvertError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Reads a scene document (either mode) back into the canonical model, e.g.
/// to re-filter an already-converted trajectory.
#[derive(Clone, Debug)]
pub struct SimulariumFileData {
    pub path: PathBuf,
}

impl SimulariumFileData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TrajectoryReader for SimulariumFileData {
    fn read(&self) -> Result<TrajectoryData, ConvertError> {
        load(&self.path)
    }
}

pub fn load(path: &Path) -> Result<TrajectoryData, ConvertError> {
    if !path.exists() {
        return Err(ConvertError::MissingFile(path.to_path_buf()));
    }
    let bad = |msg: String| ConvertError::FileFormat {
        path: path.to_path_buf(),
        line: 0,
        msg,
    };

    let text = fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;

    let info = &doc["trajectoryInfo"];
    let time_units = parse_units(&info["timeUnits"], &bad)?;
    let spatial_units = parse_units(&info["spatialUnits"], &bad)?;
    let box_size = parse_vec3(&info["size"], &bad)?;

    let camera = &info["cameraDefault"];
    let camera_defaults = if camera.is_object() {
        CameraData {
            position: parse_vec3(&camera["position"], &bad)?,
            look_at_position: parse_vec3(&camera["lookAtPosition"], &bad)?,
            up_vector: parse_vec3(&camera["upVector"], &bad)?,
            fov_degrees: camera["fovDegrees"].as_f64().unwrap_or(50.),
        }
    } else {
        CameraData::default()
    };

    let mut type_names = std::collections::HashMap::new();
    if let Some(mapping) = info["typeMapping"].as_object() {
        for (tid, entry) in mapping {
            let tid: u32 = tid
                .parse()
                .map_err(|_| bad(format!("non-integer type id {tid:?}")))?;
            let name = entry["name"]
                .as_str()
                .ok_or_else(|| bad(format!("type {tid} has no name")))?;
            type_names.insert(tid, name.to_owned());
        }
    }

    // External mode: the bundle lives in a sibling artifact.
    let bundle_doc;
    let bundle_data = if let Some(bundle_file) = doc["spatialData"]["bundleFile"].as_str() {
        let bundle_path = path.with_file_name(bundle_file);
        if !bundle_path.exists() {
            return Err(ConvertError::MissingFile(bundle_path));
        }
        let bundle_text = fs::read_to_string(&bundle_path)?;
        bundle_doc = serde_json::from_str::<Value>(&bundle_text).map_err(|e| bad(e.to_string()))?;
        bundle_doc["bundleData"].clone()
    } else {
        doc["spatialData"]["bundleData"].clone()
    };

    let frames = bundle_data
        .as_array()
        .ok_or_else(|| bad("spatialData has no bundleData array".to_owned()))?
        .iter()
        .map(|frame| parse_frame(frame, &type_names, &bad))
        .collect::<Result<Vec<_>, _>>()?;

    let plots = doc["plotData"]["data"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let result = TrajectoryData {
        meta_data: MetaData {
            box_size,
            camera_defaults,
            scale_factor: 1.0,
        },
        time_units,
        spatial_units,
        frames,
        plots,
    };
    result.validate()?;
    Ok(result)
}

fn parse_units(
    v: &Value,
    bad: &impl Fn(String) -> ConvertError,
) -> Result<UnitData, ConvertError> {
    let name = v["name"]
        .as_str()
        .ok_or_else(|| bad("units entry has no name".to_owned()))?;
    let magnitude = v["magnitude"].as_f64().unwrap_or(1.0);
    UnitData::new(name, magnitude)
}

fn parse_vec3(v: &Value, bad: &impl Fn(String) -> ConvertError) -> Result<Vec3, ConvertError> {
    let field = |k: &str| {
        v[k].as_f64()
            .ok_or_else(|| bad(format!("expected numeric {k:?} in {v}")))
    };
    Ok(Vec3::new(field("x")?, field("y")?, field("z")?))
}

fn parse_frame(
    frame: &Value,
    type_names: &std::collections::HashMap<u32, String>,
    bad: &impl Fn(String) -> ConvertError,
) -> Result<FrameData, ConvertError> {
    let frame_number = frame["frameNumber"]
        .as_u64()
        .ok_or_else(|| bad("frame has no frameNumber".to_owned()))? as usize;
    let time = frame["time"]
        .as_f64()
        .ok_or_else(|| bad("frame has no time".to_owned()))?;
    let data = frame["data"]
        .as_array()
        .ok_or_else(|| bad(format!("frame {frame_number} has no data array")))?;

    let buf: Vec<f64> = data
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| bad(format!("non-numeric value in frame {frame_number} buffer")))
        })
        .collect::<Result<_, _>>()?;

    let mut agents = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        // viz type, uid, tid, position, rotation, radius, n subpoint floats
        if i + 11 > buf.len() {
            return Err(bad(format!(
                "truncated agent record in frame {frame_number} at offset {i}"
            )));
        }
        let unique_id = buf[i + 1] as u64;
        let type_id = buf[i + 2] as u32;
        let position = Vec3::new(buf[i + 3], buf[i + 4], buf[i + 5]);
        let rotation = Vec3::new(buf[i + 6], buf[i + 7], buf[i + 8]);
        let radius = buf[i + 9];
        let n_sp_floats = buf[i + 10] as usize;
        i += 11;

        if i + n_sp_floats > buf.len() || !n_sp_floats.is_multiple_of(3) {
            return Err(bad(format!(
                "bad subpoint count {n_sp_floats} in frame {frame_number}"
            )));
        }
        let mut subpoints = Vec::with_capacity(n_sp_floats / 3);
        for p in 0..n_sp_floats / 3 {
            let j = i + p * 3;
            subpoints.push(Vec3::new(buf[j], buf[j + 1], buf[j + 2]));
        }
        i += n_sp_floats;

        let type_name = type_names
            .get(&type_id)
            .cloned()
            .ok_or_else(|| bad(format!("type id {type_id} missing from typeMapping")))?;

        agents.push(AgentRecord {
            unique_id,
            type_id,
            type_name,
            position,
            rotation,
            radius,
            subpoints,
        });
    }

    Ok(FrameData {
        frame_number,
        time,
        agents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaData;

    fn sample() -> TrajectoryData {
        let fiber = AgentRecord {
            unique_id: 1,
            type_id: 0,
            type_name: "microtubule".to_owned(),
            position: Vec3::new(0., 0., 0.),
            rotation: Vec3::new(0., 0., 0.),
            radius: 1.,
            subpoints: vec![Vec3::new(0., 0., 0.), Vec3::new(1., 0., 0.)],
        };
        let sphere = AgentRecord {
            unique_id: 12,
            type_id: 1,
            type_name: "motor complex".to_owned(),
            position: Vec3::new(-73.8, 43.89, -25.2),
            rotation: Vec3::new(0., 0., 0.),
            radius: 2.,
            subpoints: Vec::new(),
        };

        TrajectoryData {
            meta_data: MetaData {
                box_size: Vec3::new(200., 200., 200.),
                ..Default::default()
            },
            time_units: UnitData::base("s").unwrap(),
            spatial_units: UnitData::base("µm").unwrap(),
            frames: vec![
                FrameData {
                    frame_number: 0,
                    time: 0.,
                    agents: vec![fiber.clone(), sphere.clone()],
                },
                FrameData {
                    frame_number: 1,
                    time: 0.05,
                    agents: vec![fiber, sphere],
                },
            ],
            plots: vec![serde_json::json!({"layout": {"title": "t"}})],
        }
    }

    fn assert_round_trip(original: &TrajectoryData, loaded: &TrajectoryData) {
        assert_eq!(loaded.frames.len(), original.frames.len());
        for (a, b) in original.frames.iter().zip(&loaded.frames) {
            assert_eq!(a.frame_number, b.frame_number);
            assert_eq!(a.agents.len(), b.agents.len());
            for (x, y) in a.agents.iter().zip(&b.agents) {
                assert_eq!(x.unique_id, y.unique_id);
                assert_eq!(x.type_id, y.type_id);
                assert_eq!(x.type_name, y.type_name);
                assert!((x.position.x - y.position.x).abs() < 1e-9);
                assert!((x.position.y - y.position.y).abs() < 1e-9);
                assert!((x.position.z - y.position.z).abs() < 1e-9);
                assert_eq!(x.subpoints.len(), y.subpoints.len());
            }
        }
        assert_eq!(loaded.plots.len(), original.plots.len());
    }

    #[test]
    fn inline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simularium");
        let traj = sample();

        write_json(&traj, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_round_trip(&traj, &loaded);
    }

    #[test]
    fn external_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simularium");
        let traj = sample();

        write_external(&traj, &path).unwrap();
        assert!(path.with_file_name("out.bundle.json").exists());

        let loaded = load(&path).unwrap();
        assert_round_trip(&traj, &loaded);

        // The main document itself carries no inline frames.
        let main: Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(main["spatialData"]["bundleData"].is_null());
        assert_eq!(
            main["spatialData"]["bundleFile"].as_str(),
            Some("out.bundle.json")
        );
    }

    #[test]
    fn output_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.simularium");
        let b = dir.path().join("b.simularium");
        let traj = sample();

        write_json(&traj, &a).unwrap();
        write_json(&traj, &b).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn type_mapping_and_geometry_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simularium");
        write_json(&sample(), &path).unwrap();

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let mapping = &doc["trajectoryInfo"]["typeMapping"];
        assert_eq!(mapping["0"]["name"], "microtubule");
        assert_eq!(mapping["0"]["geometry"], "fiber");
        assert_eq!(mapping["1"]["geometry"], "sphere");
        assert_eq!(doc["trajectoryInfo"]["totalSteps"], 2);
        assert!((doc["trajectoryInfo"]["timeStepSize"].as_f64().unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn invalid_trajectory_fails_as_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simularium");
        let mut traj = sample();
        traj.frames[1].frame_number = 0; // non-increasing

        match write_json(&traj, &path) {
            Err(ConvertError::Serialization(_)) => {}
            other => panic!("expected Serialization error, got {other:?}"),
        }
        // No partial output.
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_destination_fails_with_write_error() {
        let traj = sample();
        let path = Path::new("/nonexistent_dir/out.simularium");
        assert!(matches!(
            write_json(&traj, path),
            Err(ConvertError::Write { .. })
        ));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simularium");
        write_json(&sample(), &path).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
