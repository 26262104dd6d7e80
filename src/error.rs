use std::{io, path::PathBuf};

use thiserror::Error;

/// Every failure the pipeline can surface. All kinds are fatal; the inputs are
/// static files, so nothing is retried.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("input file not found: {0}")]
    MissingFile(PathBuf),

    /// Unparsable content: wrong column count, non-numeric field, truncated
    /// binary record. Carries the file and the 1-based line (or record index
    /// for binary inputs) of the offending data.
    #[error("{path}, line {line}: {msg}")]
    FileFormat {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("unknown unit name: {0}")]
    UnknownUnit(String),

    #[error("unit dimension mismatch: cannot convert {from} to {to}")]
    UnitMismatch { from: String, to: String },

    /// A data-model invariant was violated mid-pipeline, e.g. a negative
    /// radius or non-increasing frame numbers.
    #[error("invalid trajectory: {0}")]
    InvalidTrajectory(String),

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An invariant violation caught at the writer boundary; should have been
    /// rejected earlier in the pipeline.
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
