use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;


const MEBIBYTE: u64 = 1024 * 1024;

/// PBS size strings: an integer optionally followed by a byte or word unit,
/// e.g. "2048kb", "4gb", "100w".
static SIZE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^\s*(\d+)\s*([kKmMgGtTpP]?[bBwW])?\s*$").unwrap());

#[derive(Error, Debug, PartialEq)]
pub enum QuantityError {
  #[error("Invalid PBS size \"{0}\"")]
  InvalidSize(String),
  #[error("Quantity overflow while converting {0}")]
  Overflow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SizeUnit {
  B,
  Kb,
  Mb,
  Gb,
  Tb,
  Pb,
  W,
  Kw,
  Mw,
  Gw,
  Tw,
  Pw,
}

impl SizeUnit {
  /// A PBS word is 8 bytes.
  pub const WORD_BYTES: u64 = 8;

  /// Number of bytes in one unit. PBS multiples are binary (kb = 1024 b).
  pub fn bytes_per_unit(self) -> u64 {
    use SizeUnit::*;
    let (power, words) = match self {
      B => (0, false),
      Kb => (1, false),
      Mb => (2, false),
      Gb => (3, false),
      Tb => (4, false),
      Pb => (5, false),
      W => (0, true),
      Kw => (1, true),
      Mw => (2, true),
      Gw => (3, true),
      Tw => (4, true),
      Pw => (5, true),
    };
    let base = 1024u64.pow(power);
    if words { base * Self::WORD_BYTES } else { base }
  }
}

/// A memory request as PBS reports it: magnitude plus unit, kept unconverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryQuantity {
  pub magnitude: u64,
  pub unit: SizeUnit,
}

impl MemoryQuantity {
  pub fn new(magnitude: u64, unit: SizeUnit) -> Self {
    MemoryQuantity { magnitude, unit }
  }

  pub fn zero() -> Self {
    MemoryQuantity::new(0, SizeUnit::B)
  }

  pub fn to_bytes(&self) -> Result<u64, QuantityError> {
    self
      .magnitude
      .checked_mul(self.unit.bytes_per_unit())
      .ok_or_else(|| QuantityError::Overflow(self.to_string()))
  }

  /// Whole mebibytes, rounded up so the reservation never undershoots.
  pub fn to_mebibytes_ceil(&self) -> Result<u64, QuantityError> {
    Ok(self.to_bytes()?.div_ceil(MEBIBYTE))
  }
}

impl FromStr for MemoryQuantity {
  type Err = QuantityError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let caps = SIZE_RE
      .captures(s)
      .ok_or_else(|| QuantityError::InvalidSize(s.to_string()))?;
    let magnitude = caps[1]
      .parse::<u64>()
      .map_err(|_| QuantityError::InvalidSize(s.to_string()))?;
    // A bare number is a byte count
    let unit = match caps.get(2) {
      Some(m) => SizeUnit::from_str(&m.as_str().to_ascii_lowercase())
        .map_err(|_| QuantityError::InvalidSize(s.to_string()))?,
      None => SizeUnit::B,
    };
    Ok(MemoryQuantity { magnitude, unit })
  }
}

impl fmt::Display for MemoryQuantity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.magnitude, self.unit)
  }
}

/// How PBS requests are mapped onto Kubernetes limits.
///
/// `Legacy` reproduces the manifests the hook has always written: the core
/// count is used as a milli-core value and the memory magnitude is used as
/// mebibytes with its unit dropped. `Converted` performs real unit
/// conversion (cores x 1000, size rounded up to MiB).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnitMapping {
  #[default]
  Legacy,
  Converted,
}

impl UnitMapping {
  pub fn cpu_millicores(self, cores: u64) -> Result<u64, QuantityError> {
    match self {
      UnitMapping::Legacy => Ok(cores),
      UnitMapping::Converted => cores
        .checked_mul(1000)
        .ok_or_else(|| QuantityError::Overflow(format!("{} cores", cores))),
    }
  }

  pub fn memory_mebibytes(self, memory: &MemoryQuantity) -> Result<u64, QuantityError> {
    match self {
      UnitMapping::Legacy => Ok(memory.magnitude),
      UnitMapping::Converted => memory.to_mebibytes_ceil(),
    }
  }
}

pub fn cpu_limit(millicores: u64) -> String {
  format!("{}m", millicores)
}

pub fn memory_limit(mebibytes: u64) -> String {
  format!("{}Mi", mebibytes)
}
