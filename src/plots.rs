//! Pre-computed plot payload builders. Plot contents travel through the
//! pipeline as opaque JSON; these helpers shape caller-supplied traces into
//! the payload layout the viewer's plot panel expects. Ordered maps keep the
//! trace order stable in the output document.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::ConvertError;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum RenderMode {
    #[default]
    Markers,
    Lines,
}

impl RenderMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Markers => "markers",
            Self::Lines => "lines",
        }
    }
}

/// One scatter plot: a shared x-trace and any number of named y-traces.
#[derive(Clone, Debug, Default)]
pub struct ScatterPlotData {
    pub title: String,
    pub xaxis_title: String,
    pub yaxis_title: String,
    pub xtrace: Vec<f64>,
    pub ytraces: BTreeMap<String, Vec<f64>>,
    pub render_mode: RenderMode,
}

impl ScatterPlotData {
    pub fn to_payload(&self) -> Result<Value, ConvertError> {
        let mut data = Vec::new();
        for (name, ytrace) in &self.ytraces {
            if ytrace.len() != self.xtrace.len() {
                return Err(ConvertError::InvalidTrajectory(format!(
                    "y-trace {name:?} has {} values; x-trace has {}",
                    ytrace.len(),
                    self.xtrace.len()
                )));
            }
            data.push(json!({
                "name": name,
                "type": "scatter",
                "x": self.xtrace.clone(),
                "y": ytrace.clone(),
                "mode": self.render_mode.as_str(),
            }));
        }

        Ok(json!({
            "layout": {
                "title": self.title.clone(),
                "xaxis": { "title": self.xaxis_title.clone() },
                "yaxis": { "title": self.yaxis_title.clone() },
            },
            "data": data,
        }))
    }
}

/// One histogram: named value traces binned by the viewer.
#[derive(Clone, Debug, Default)]
pub struct HistogramPlotData {
    pub title: String,
    pub xaxis_title: String,
    pub traces: BTreeMap<String, Vec<f64>>,
}

impl HistogramPlotData {
    pub fn to_payload(&self) -> Result<Value, ConvertError> {
        let data: Vec<Value> = self
            .traces
            .iter()
            .map(|(name, trace)| {
                json!({
                    "name": name,
                    "type": "histogram",
                    "x": trace.clone(),
                })
            })
            .collect();

        Ok(json!({
            "layout": {
                "title": self.title.clone(),
                "xaxis": { "title": self.xaxis_title.clone() },
            },
            "data": data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_payload_shapes_traces() {
        let plot = ScatterPlotData {
            title: "Bound motors".to_owned(),
            xaxis_title: "time (s)".to_owned(),
            yaxis_title: "count".to_owned(),
            xtrace: vec![0., 1., 2.],
            ytraces: BTreeMap::from([("bound".to_owned(), vec![5., 7., 6.])]),
            render_mode: RenderMode::Lines,
        };

        let payload = plot.to_payload().unwrap();
        assert_eq!(payload["layout"]["title"], "Bound motors");
        assert_eq!(payload["data"][0]["type"], "scatter");
        assert_eq!(payload["data"][0]["mode"], "lines");
        assert_eq!(payload["data"][0]["y"][1], 7.);
    }

    #[test]
    fn mismatched_trace_lengths_rejected() {
        let plot = ScatterPlotData {
            xtrace: vec![0., 1.],
            ytraces: BTreeMap::from([("bad".to_owned(), vec![1.])]),
            ..Default::default()
        };
        assert!(plot.to_payload().is_err());
    }

    #[test]
    fn histogram_payload_shapes_traces() {
        let plot = HistogramPlotData {
            title: "Displacements".to_owned(),
            xaxis_title: "µm".to_owned(),
            traces: BTreeMap::from([("all".to_owned(), vec![0.1, 0.4, 0.2])]),
        };
        let payload = plot.to_payload().unwrap();
        assert_eq!(payload["data"][0]["type"], "histogram");
        assert_eq!(payload["data"][0]["x"][2], 0.2);
    }
}
