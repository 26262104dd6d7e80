//! Unit handling for trajectory values. A unit is a recognized symbol plus a
//! magnitude multiplier, e.g. `(0.1, "µm")` for values stored in tenths of a
//! micron. Names are validated against a fixed registry at construction, so a
//! typo fails before any file is parsed rather than at use time.

use std::fmt;

use crate::ConvertError;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dimension {
    Length,
    Time,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Length => write!(f, "length"),
            Self::Time => write!(f, "time"),
        }
    }
}

/// Recognized unit symbols, with their SI factor (to meters or seconds).
/// Aliases map to the same factor; the name the caller passes is preserved.
const REGISTRY: &[(&str, Dimension, f64)] = &[
    ("km", Dimension::Length, 1e3),
    ("m", Dimension::Length, 1.),
    ("meter", Dimension::Length, 1.),
    ("dm", Dimension::Length, 1e-1),
    ("cm", Dimension::Length, 1e-2),
    ("mm", Dimension::Length, 1e-3),
    ("µm", Dimension::Length, 1e-6),
    ("um", Dimension::Length, 1e-6),
    ("micron", Dimension::Length, 1e-6),
    ("nm", Dimension::Length, 1e-9),
    ("pm", Dimension::Length, 1e-12),
    ("fm", Dimension::Length, 1e-15),
    ("angstrom", Dimension::Length, 1e-10),
    ("Å", Dimension::Length, 1e-10),
    ("day", Dimension::Time, 86_400.),
    ("h", Dimension::Time, 3_600.),
    ("hr", Dimension::Time, 3_600.),
    ("hour", Dimension::Time, 3_600.),
    ("min", Dimension::Time, 60.),
    ("minute", Dimension::Time, 60.),
    ("s", Dimension::Time, 1.),
    ("sec", Dimension::Time, 1.),
    ("second", Dimension::Time, 1.),
    ("ms", Dimension::Time, 1e-3),
    ("µs", Dimension::Time, 1e-6),
    ("us", Dimension::Time, 1e-6),
    ("ns", Dimension::Time, 1e-9),
    ("ps", Dimension::Time, 1e-12),
    ("fs", Dimension::Time, 1e-15),
];

/// Engineering-prefix ladders used when compacting a magnitude into [1, 1000).
const LENGTH_LADDER: &[(&str, f64)] = &[
    ("fm", 1e-15),
    ("pm", 1e-12),
    ("nm", 1e-9),
    ("µm", 1e-6),
    ("mm", 1e-3),
    ("m", 1.),
    ("km", 1e3),
];
const TIME_LADDER: &[(&str, f64)] = &[
    ("fs", 1e-15),
    ("ps", 1e-12),
    ("ns", 1e-9),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.),
];

fn lookup(name: &str) -> Result<(Dimension, f64), ConvertError> {
    for (n, dim, factor) in REGISTRY {
        if *n == name {
            return Ok((*dim, *factor));
        }
    }
    Err(ConvertError::UnknownUnit(name.to_owned()))
}

/// Clamp to 4 significant figures, to keep unit magnitudes readable in the
/// output document.
fn clamp_precision(v: f64) -> f64 {
    if v == 0. {
        return 0.;
    }
    format!("{v:.3e}").parse().unwrap_or(v)
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnitData {
    pub name: String,
    /// Multiplier for stored values, in case they are not given in whole units.
    pub magnitude: f64,
    dimension: Dimension,
    si_factor: f64,
}

impl UnitData {
    pub fn new(name: &str, magnitude: f64) -> Result<Self, ConvertError> {
        let (dimension, si_factor) = lookup(name)?;
        Ok(Self {
            name: name.to_owned(),
            magnitude,
            dimension,
            si_factor,
        })
    }

    /// A unit with magnitude 1, e.g. `UnitData::base("nm")`.
    pub fn base(name: &str) -> Result<Self, ConvertError> {
        Self::new(name, 1.0)
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Expresses `value` in the SI base unit of this unit's dimension
    /// (meters or seconds).
    pub fn normalize(&self, value: f64) -> f64 {
        value * self.magnitude * self.si_factor
    }

    /// Converts `value` from this unit into `to`. Fails if the dimensions
    /// differ (length vs time).
    pub fn convert(&self, value: f64, to: &UnitData) -> Result<f64, ConvertError> {
        if self.dimension != to.dimension {
            return Err(ConvertError::UnitMismatch {
                from: self.name.clone(),
                to: to.name.clone(),
            });
        }
        Ok(value * (self.magnitude * self.si_factor) / (to.magnitude * to.si_factor))
    }

    /// Multiplies the magnitude and re-compacts the unit.
    pub fn multiply(&mut self, multiplier: f64) {
        self.magnitude *= multiplier;
        self.compact();
    }

    /// Shifts to the neighboring SI prefix that puts the magnitude in
    /// [1, 1000), where one exists. `(2000, "nm")` becomes `(2, "µm")`.
    pub fn compact(&mut self) {
        let ladder = match self.dimension {
            Dimension::Length => LENGTH_LADDER,
            Dimension::Time => TIME_LADDER,
        };

        let total = self.magnitude * self.si_factor;
        if total <= 0. {
            return;
        }

        let mut best = ladder[0];
        for entry in ladder {
            if total / entry.1 >= 1. {
                best = *entry;
            }
        }

        self.name = best.0.to_owned();
        self.si_factor = best.1;
        self.magnitude = clamp_precision(total / best.1);
    }
}

impl fmt::Display for UnitData {
    /// `"100 µm"`, or just `"µm"` when the magnitude is 1.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if (self.magnitude - 1.0).abs() > f64::EPSILON {
            write!(f, "{} {}", self.magnitude, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_fails_at_construction() {
        assert!(matches!(
            UnitData::base("parsec"),
            Err(ConvertError::UnknownUnit(_))
        ));
    }

    #[test]
    fn convert_round_trip() {
        let a = UnitData::new("nm", 2.5).unwrap();
        let b = UnitData::new("µm", 0.3).unwrap();

        let v = 173.25;
        let there = a.convert(v, &b).unwrap();
        let back = b.convert(there, &a).unwrap();
        assert!((back - v).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let nm = UnitData::base("nm").unwrap();
        let s = UnitData::base("s").unwrap();
        assert!(matches!(
            nm.convert(1.0, &s),
            Err(ConvertError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn normalize_applies_magnitude_and_si_factor() {
        let u = UnitData::new("µm", 2.0).unwrap();
        assert!((u.normalize(3.0) - 6.0e-6).abs() < 1e-18);
    }

    #[test]
    fn compaction_shifts_prefix() {
        let mut u = UnitData::new("nm", 1.0).unwrap();
        u.multiply(2000.);
        assert_eq!(u.name, "µm");
        assert!((u.magnitude - 2.0).abs() < 1e-12);

        let mut t = UnitData::new("m", 0.000003).unwrap();
        t.compact();
        assert_eq!(t.name, "µm");
        assert!((t.magnitude - 3.0).abs() < 1e-12);
    }

    #[test]
    fn display_elides_unit_magnitude() {
        let u = UnitData::base("s").unwrap();
        assert_eq!(u.to_string(), "s");
        let v = UnitData::new("µm", 100.).unwrap();
        assert_eq!(v.to_string(), "100 µm");
    }
}
