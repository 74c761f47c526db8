//! Vehicle Profiles
//!
//! Static capability table mapping a vehicle kind to its working defaults.
//! The geometry engine never consults this table; callers resolve a profile
//! once when a vehicle joins an operation and hand the engine plain numbers.

use serde::{Deserialize, Serialize};

/// Kind of field vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Tractor,
    Combine,
    Sprayer,
    Spreader,
    SeedDrill,
}

impl VehicleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleKind::Tractor => "tractor",
            VehicleKind::Combine => "combine",
            VehicleKind::Sprayer => "sprayer",
            VehicleKind::Spreader => "spreader",
            VehicleKind::SeedDrill => "seed_drill",
        }
    }

    pub fn parse(s: &str) -> Option<VehicleKind> {
        match s {
            "tractor" => Some(VehicleKind::Tractor),
            "combine" => Some(VehicleKind::Combine),
            "sprayer" => Some(VehicleKind::Sprayer),
            "spreader" => Some(VehicleKind::Spreader),
            "seed_drill" => Some(VehicleKind::SeedDrill),
            _ => None,
        }
    }
}

impl std::fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Working defaults for one vehicle kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleProfile {
    pub kind: VehicleKind,
    /// Human-readable label
    pub label: &'static str,
    /// Default implement swath width in meters
    pub default_swath_m: f64,
    /// Typical working speed in m/s, used for feed sanity checks
    pub working_speed_mps: f64,
}

const PROFILES: [VehicleProfile; 5] = [
    VehicleProfile {
        kind: VehicleKind::Tractor,
        label: "Tractor",
        default_swath_m: 3.0,
        working_speed_mps: 4.0,
    },
    VehicleProfile {
        kind: VehicleKind::Combine,
        label: "Combine harvester",
        default_swath_m: 9.0,
        working_speed_mps: 2.5,
    },
    VehicleProfile {
        kind: VehicleKind::Sprayer,
        label: "Sprayer",
        default_swath_m: 24.0,
        working_speed_mps: 6.0,
    },
    VehicleProfile {
        kind: VehicleKind::Spreader,
        label: "Fertilizer spreader",
        default_swath_m: 18.0,
        working_speed_mps: 5.0,
    },
    VehicleProfile {
        kind: VehicleKind::SeedDrill,
        label: "Seed drill",
        default_swath_m: 6.0,
        working_speed_mps: 3.0,
    },
];

/// Look up the profile for a vehicle kind.
pub fn profile(kind: VehicleKind) -> &'static VehicleProfile {
    match kind {
        VehicleKind::Tractor => &PROFILES[0],
        VehicleKind::Combine => &PROFILES[1],
        VehicleKind::Sprayer => &PROFILES[2],
        VehicleKind::Spreader => &PROFILES[3],
        VehicleKind::SeedDrill => &PROFILES[4],
    }
}

/// All known profiles, for capability listings.
pub fn all_profiles() -> &'static [VehicleProfile] {
    &PROFILES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_profile() {
        for kind in [
            VehicleKind::Tractor,
            VehicleKind::Combine,
            VehicleKind::Sprayer,
            VehicleKind::Spreader,
            VehicleKind::SeedDrill,
        ] {
            let p = profile(kind);
            assert_eq!(p.kind, kind);
            assert!(p.default_swath_m > 0.0);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for p in all_profiles() {
            assert_eq!(VehicleKind::parse(p.kind.as_str()), Some(p.kind));
        }
        assert_eq!(VehicleKind::parse("hovercraft"), None);
    }
}
