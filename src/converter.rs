//! The conversion facade: read one engine's output, optionally filter,
//! attach plots, write the scene document.
//!
//! Reading happens at construction, so a converter only ever exists holding a
//! valid trajectory; a failed read yields an error and no converter. Filters
//! produce fresh snapshots and never mutate the trajectory produced by the
//! read. There is no way back from written to read; a new conversion takes a
//! new converter.

use std::path::Path;

use crate::{
    ConvertError, TrajectoryData, TrajectoryReader,
    filters::{Filter, apply_all},
    plots::{HistogramPlotData, ScatterPlotData},
    simularium,
};

pub struct TrajectoryConverter {
    data: TrajectoryData,
}

impl TrajectoryConverter {
    /// Reads the engine output described by `reader`.
    pub fn new(reader: &dyn TrajectoryReader) -> Result<Self, ConvertError> {
        Ok(Self {
            data: reader.read()?,
        })
    }

    /// Wraps an already-built trajectory, e.g. from a custom in-memory source.
    pub fn from_data(data: TrajectoryData) -> Result<Self, ConvertError> {
        data.validate()?;
        Ok(Self { data })
    }

    pub fn data(&self) -> &TrajectoryData {
        &self.data
    }

    pub fn into_data(self) -> TrajectoryData {
        self.data
    }

    /// Runs the filter chain left to right and returns the result as a new
    /// snapshot; the converter's own trajectory is untouched.
    pub fn filter_data(&self, filters: &[Box<dyn Filter>]) -> Result<TrajectoryData, ConvertError> {
        apply_all(&self.data, filters)
    }

    /// Runs the filter chain and keeps the result as the trajectory that
    /// subsequent writes serialize.
    pub fn apply_filters(&mut self, filters: &[Box<dyn Filter>]) -> Result<(), ConvertError> {
        self.data = apply_all(&self.data, filters)?;
        Ok(())
    }

    pub fn add_scatter_plot(&mut self, plot: &ScatterPlotData) -> Result<(), ConvertError> {
        self.data.plots.push(plot.to_payload()?);
        Ok(())
    }

    pub fn add_histogram_plot(&mut self, plot: &HistogramPlotData) -> Result<(), ConvertError> {
        self.data.plots.push(plot.to_payload()?);
        Ok(())
    }

    /// Writes the current snapshot as a single inline scene document.
    pub fn write_json(&self, path: &Path) -> Result<(), ConvertError> {
        simularium::write_json(&self.data, path)
    }

    /// Writes the current snapshot with the bulk frame data in an external
    /// sibling artifact.
    pub fn write_external(&self, path: &Path) -> Result<(), ConvertError> {
        simularium::write_external(&self.data, path)
    }
}
