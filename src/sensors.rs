//! Pure, side-effect-free parsers that turn raw ASCII sentence fields into typed
//! values. These mirror the "sensor function" contract of the UKHAS telemetry
//! convention: every parser takes a small configuration record and the field text,
//! and either returns a value or a [`SensorError`] that the caller logs and skips.

use std::fmt;

use chrono::NaiveTime;

/// A single failure kind for every parser in this module, matching the "one
/// ValueError-kind failure" contract: callers don't need to distinguish which
/// parser failed, only that a field didn't parse.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    InvalidInt { value: String, base: u32 },
    InvalidFloat { value: String },
    NonFinite { value: String },
    ConstantMismatch { expected: String, got: String },
    MissingCoordinateFormat,
    InvalidCoordinateFormat { format: String },
    MinutesOutOfRange { minutes: f64 },
    CoordinateOutOfRange { coord: f64, name: &'static str },
    InvalidTime { value: String },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::InvalidInt { value, base } => {
                write!(f, "invalid integer {:?} in base {}", value, base)
            }
            SensorError::InvalidFloat { value } => write!(f, "invalid float {:?}", value),
            SensorError::NonFinite { value } => {
                write!(f, "non-finite float rejected: {:?}", value)
            }
            SensorError::ConstantMismatch { expected, got } => write!(
                f,
                "constant mismatch: expected {:?}, got {:?}",
                expected, got
            ),
            SensorError::MissingCoordinateFormat => write!(f, "coordinate format missing"),
            SensorError::InvalidCoordinateFormat { format } => {
                write!(f, "invalid coordinate format {:?}", format)
            }
            SensorError::MinutesOutOfRange { minutes } => {
                write!(f, "minutes component {} out of range (< 60)", minutes)
            }
            SensorError::CoordinateOutOfRange { coord, name } => {
                write!(f, "{} {} out of range", name, coord)
            }
            SensorError::InvalidTime { value } => write!(f, "invalid time value {:?}", value),
        }
    }
}

impl std::error::Error for SensorError {}

/// Configuration for [`ascii_int`].
#[derive(Debug, Clone)]
pub struct IntConfig {
    pub base: u32,
    pub optional: bool,
}

impl Default for IntConfig {
    fn default() -> Self {
        IntConfig {
            base: 10,
            optional: false,
        }
    }
}

/// Parses `s` as a signed integer in `cfg.base`. An empty `s` yields `Ok(None)`
/// only when `cfg.optional` is set; otherwise it's a parse failure like any other.
pub fn ascii_int(cfg: &IntConfig, s: &str) -> Result<Option<i64>, SensorError> {
    if cfg.optional && s.is_empty() {
        return Ok(None);
    }
    i64::from_str_radix(s, cfg.base)
        .map(Some)
        .map_err(|_| SensorError::InvalidInt {
            value: s.to_string(),
            base: cfg.base,
        })
}

/// Configuration for [`ascii_float`].
#[derive(Debug, Clone, Default)]
pub struct FloatConfig {
    pub optional: bool,
}

/// Parses `s` as a finite `f64`. `NaN` and `inf`/`-inf` (any case) are rejected
/// even though Rust's own float parser would happily accept them.
pub fn ascii_float(cfg: &FloatConfig, s: &str) -> Result<Option<f64>, SensorError> {
    if cfg.optional && s.is_empty() {
        return Ok(None);
    }
    let value: f64 = s.parse().map_err(|_| SensorError::InvalidFloat {
        value: s.to_string(),
    })?;
    if !value.is_finite() {
        return Err(SensorError::NonFinite {
            value: s.to_string(),
        });
    }
    Ok(Some(value))
}

/// Identity parser for plain ASCII string fields.
pub fn string(s: &str) -> String {
    s.to_string()
}

/// Configuration for [`constant`].
#[derive(Debug, Clone, Default)]
pub struct ConstantConfig {
    pub expect: String,
}

/// Succeeds iff `s == cfg.expect`, including the degenerate case of an empty
/// `expect` matching only an empty `s`.
pub fn constant(cfg: &ConstantConfig, s: &str) -> Result<(), SensorError> {
    if s == cfg.expect {
        Ok(())
    } else {
        Err(SensorError::ConstantMismatch {
            expected: cfg.expect.clone(),
            got: s.to_string(),
        })
    }
}

/// Parses `HH:MM:SS`, `HHMMSS`, `HH:MM` or `HHMM`, validating ranges via a
/// calendar-aware parse, and returns the canonical `HH:MM:SS` form.
pub fn time(s: &str) -> Result<String, SensorError> {
    let format = match s.len() {
        8 => "%H:%M:%S",
        6 => "%H%M%S",
        5 => "%H:%M",
        4 => "%H%M",
        _ => {
            return Err(SensorError::InvalidTime {
                value: s.to_string(),
            })
        }
    };
    let t = NaiveTime::parse_from_str(s, format).map_err(|_| SensorError::InvalidTime {
        value: s.to_string(),
    })?;
    Ok(t.format("%H:%M:%S").to_string())
}

/// Configuration for [`coordinate`].
#[derive(Debug, Clone, Default)]
pub struct CoordinateConfig {
    /// Template such as `"dd.dddd"` or `"ddmm.mmmm"`.
    pub format: String,
    /// `Some("latitude")` narrows the range check to [-90, 90]; anything else
    /// (including `None`) uses [-180, 180].
    pub name: Option<String>,
}

/// Parses a latitude or longitude field into decimal degrees, accepting either
/// decimal-degree or degree-plus-decimal-minutes notation as described by
/// `cfg.format`. Degrees-minutes-seconds is not supported.
pub fn coordinate(cfg: &CoordinateConfig, data: &str) -> Result<f64, SensorError> {
    if cfg.format.is_empty() {
        return Err(SensorError::MissingCoordinateFormat);
    }
    let mut parts = cfg.format.splitn(2, '.');
    let (left, right) = match (parts.next(), parts.next()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(SensorError::InvalidCoordinateFormat {
                format: cfg.format.clone(),
            })
        }
    };

    let coord = if left.ends_with('d') && right.ends_with('d') {
        data.parse::<f64>()
            .map_err(|_| SensorError::InvalidFloat {
                value: data.to_string(),
            })
            .and_then(|v| {
                if v.is_finite() {
                    Ok(v)
                } else {
                    Err(SensorError::NonFinite {
                        value: data.to_string(),
                    })
                }
            })?
    } else if left.starts_with('d') && left.ends_with('m') && right.ends_with('m') {
        let mut data_parts = data.splitn(2, '.');
        let (first, second) = match (data_parts.next(), data_parts.next()) {
            (Some(f), Some(s)) => (f, s),
            _ => {
                return Err(SensorError::InvalidCoordinateFormat {
                    format: cfg.format.clone(),
                })
            }
        };
        if first.len() < 2 {
            return Err(SensorError::InvalidCoordinateFormat {
                format: cfg.format.clone(),
            });
        }
        let (deg_part, min_whole) = first.split_at(first.len() - 2);
        let degrees: f64 = deg_part.parse().map_err(|_| SensorError::InvalidFloat {
            value: data.to_string(),
        })?;
        let minutes: f64 = format!("{}.{}", min_whole, second)
            .parse()
            .map_err(|_| SensorError::InvalidFloat {
                value: data.to_string(),
            })?;
        if minutes >= 60.0 {
            return Err(SensorError::MinutesOutOfRange { minutes });
        }
        let m_to_d = minutes / 60.0;
        let signed_degrees = degrees + m_to_d.copysign(degrees);
        let decimal_places = second.len() as i32 + 3;
        round_half_even(signed_degrees, decimal_places)
    } else {
        return Err(SensorError::InvalidCoordinateFormat {
            format: cfg.format.clone(),
        });
    };

    let is_latitude = cfg.name.as_deref() == Some("latitude");
    let (lo, hi, name) = if is_latitude {
        (-90.0, 90.0, "latitude")
    } else {
        (-180.0, 180.0, "longitude")
    };
    if coord < lo || coord > hi {
        return Err(SensorError::CoordinateOutOfRange { coord, name });
    }
    Ok(coord)
}

/// Round-half-to-even ("banker's rounding") to `places` decimal digits.
fn round_half_even(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round_ties_even() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_ints() {
        assert_eq!(ascii_int(&IntConfig::default(), "12").unwrap(), Some(12));
        assert_eq!(ascii_int(&IntConfig::default(), "012").unwrap(), Some(12));
    }

    #[test]
    fn ascii_int_bases() {
        let base2 = IntConfig {
            base: 2,
            optional: false,
        };
        assert_eq!(ascii_int(&base2, "010101").unwrap(), Some(21));
        let base16 = IntConfig {
            base: 16,
            optional: false,
        };
        assert_eq!(ascii_int(&base16, "deadbeef").unwrap(), Some(3735928559));
    }

    #[test]
    fn ascii_int_invalid() {
        assert!(ascii_int(&IntConfig::default(), "NOT AN INT").is_err());
    }

    #[test]
    fn ascii_floats() {
        let cfg = FloatConfig::default();
        assert_eq!(ascii_float(&cfg, "12").unwrap(), Some(12.0));
        assert_eq!(ascii_float(&cfg, "12.3").unwrap(), Some(12.3));
        assert_eq!(ascii_float(&cfg, "0.1").unwrap(), Some(0.1));
    }

    #[test]
    fn ascii_float_invalid() {
        assert!(ascii_float(&FloatConfig::default(), "NOT A FLOAT").is_err());
    }

    #[test]
    fn optional_fields() {
        let int_opt = IntConfig {
            base: 10,
            optional: true,
        };
        let float_opt = FloatConfig { optional: true };
        assert_eq!(ascii_int(&int_opt, "").unwrap(), None);
        assert_eq!(ascii_float(&float_opt, "").unwrap(), None);
        assert!(ascii_int(&IntConfig::default(), "").is_err());
        assert!(ascii_float(&FloatConfig::default(), "").is_err());
    }

    #[test]
    fn strings() {
        assert_eq!(string("hello"), "hello");
        assert_eq!(string("123"), "123");
    }

    #[test]
    fn constants() {
        let cfg = ConstantConfig {
            expect: "right".to_string(),
        };
        assert!(constant(&cfg, "wrong").is_err());
        assert!(constant(&cfg, "right").is_ok());
        assert!(constant(&ConstantConfig::default(), "something").is_err());
        assert!(constant(&ConstantConfig::default(), "").is_ok());
    }

    #[test]
    fn float_rejects_nan_inf() {
        let cfg = FloatConfig::default();
        for bad in ["nan", "NaN", "inf", "-inf", "Infinity"] {
            assert!(ascii_float(&cfg, bad).is_err(), "expected {} to fail", bad);
        }
    }

    #[test]
    fn time_formats() {
        assert_eq!(time("06:47:14").unwrap(), "06:47:14");
        assert_eq!(time("064714").unwrap(), "06:47:14");
        assert_eq!(time("06:47").unwrap(), "06:47:00");
        assert_eq!(time("0647").unwrap(), "06:47:00");
        assert!(time("25:00:00").is_err());
        assert!(time("not a time").is_err());
    }

    #[test]
    fn coordinate_decimal_degrees() {
        let cfg = CoordinateConfig {
            format: "dd.dddd".to_string(),
            name: None,
        };
        assert_eq!(coordinate(&cfg, "51.5074").unwrap(), 51.5074);
    }

    #[test]
    fn coordinate_degree_minutes() {
        let cfg = CoordinateConfig {
            format: "ddmm.mmmm".to_string(),
            name: Some("latitude".to_string()),
        };
        assert_eq!(coordinate(&cfg, "5130.4440").unwrap(), 51.5074);
    }

    #[test]
    fn coordinate_negative_degree_minutes() {
        let cfg = CoordinateConfig {
            format: "ddmm.mmmm".to_string(),
            name: Some("latitude".to_string()),
        };
        let south = coordinate(&cfg, "-5130.4440").unwrap();
        assert_eq!(south, -51.5074);
    }

    #[test]
    fn coordinate_rejects_minutes_overflow() {
        let cfg = CoordinateConfig {
            format: "ddmm.mmmm".to_string(),
            name: None,
        };
        assert!(coordinate(&cfg, "0060.0000").is_err());
    }

    #[test]
    fn coordinate_rejects_out_of_range() {
        let cfg = CoordinateConfig {
            format: "ddd.dddd".to_string(),
            name: Some("latitude".to_string()),
        };
        assert!(coordinate(&cfg, "91.0").is_err());
        let lon_cfg = CoordinateConfig {
            format: "ddd.dddd".to_string(),
            name: None,
        };
        assert!(coordinate(&lon_cfg, "-181.0").is_err());
    }

    #[test]
    fn coordinate_missing_format() {
        let cfg = CoordinateConfig::default();
        assert!(matches!(
            coordinate(&cfg, "1.0"),
            Err(SensorError::MissingCoordinateFormat)
        ));
    }
}
