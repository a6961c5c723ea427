//! Fixed thumbnail size presets.

use serde::Serialize;
use std::fmt;

/// Symbolic name of a thumbnail size.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    List,
    Card,
    Big,
    Large,
    Xlarge,
}

impl PresetName {
    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::List => "list",
            PresetName::Card => "card",
            PresetName::Big => "big",
            PresetName::Large => "large",
            PresetName::Xlarge => "xlarge",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named upper bound on the longer side of a thumbnail.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preset {
    /// Symbolic size name.
    pub name: PresetName,

    /// Neither side of the generated thumbnail exceeds this many pixels.
    pub max_dimension: u32,
}

/// Every preset, smallest first.
pub const PRESETS: [Preset; 5] = [
    Preset {
        name: PresetName::List,
        max_dimension: 80,
    },
    Preset {
        name: PresetName::Card,
        max_dimension: 180,
    },
    Preset {
        name: PresetName::Big,
        max_dimension: 320,
    },
    Preset {
        name: PresetName::Large,
        max_dimension: 640,
    },
    Preset {
        name: PresetName::Xlarge,
        max_dimension: 1024,
    },
];

/// Look up the preset whose maximum dimension is exactly `dimension`.
pub fn by_dimension(dimension: u32) -> Option<Preset> {
    PRESETS
        .iter()
        .copied()
        .find(|preset| preset.max_dimension == dimension)
}
