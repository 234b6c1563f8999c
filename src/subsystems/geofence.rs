//! Geofence frequency policy
//!
//! Maps the current position to the regional APRS primary frequency.
//! Regions are axis-aligned boxes or polygons over 1e-7 degree integer
//! coordinates; containment math stays in i64 so no precision is lost at
//! the antimeridian-free regions used here.

use crate::core::datapoint::TelemetryPoint;
use crate::subsystems::band::clamp_to_plan;

pub const FREQ_APRS_NA: u32 = 144_390_000;
pub const FREQ_APRS_EU: u32 = 144_800_000;
pub const FREQ_APRS_AU: u32 = 145_175_000;
pub const FREQ_APRS_NZ: u32 = 144_575_000;
pub const FREQ_APRS_JP: u32 = 144_640_000;
pub const FREQ_APRS_CN: u32 = 144_640_000;
pub const FREQ_APRS_BR: u32 = 145_575_000;

/// Fallback when no region matches or the position is unusable.
pub const FREQ_APRS_DEFAULT: u32 = FREQ_APRS_EU;

#[derive(Debug, Clone, Copy)]
enum Area {
    /// lat_min, lat_max, lon_min, lon_max in 1e-7 degrees
    Rect(i32, i32, i32, i32),
    /// Closed polygon vertices (lat, lon)
    Poly(&'static [(i32, i32)]),
}

struct Region {
    area: Area,
    freq: u32,
}

const DEG: i32 = 10_000_000;

/// Europe, drawn around the ITU Region 1 APRS footprint: excludes the
/// Atlantic west of Iceland and clips towards the Urals.
static EUROPE: [(i32, i32); 6] = [
    (35 * DEG, -11 * DEG),
    (71 * DEG, -11 * DEG),
    (71 * DEG, 40 * DEG),
    (45 * DEG, 50 * DEG),
    (35 * DEG, 40 * DEG),
    (35 * DEG, -11 * DEG),
];

static REGIONS: [Region; 7] = [
    Region {
        // Continental North America
        area: Area::Rect(15 * DEG, 72 * DEG, -170 * DEG, -50 * DEG),
        freq: FREQ_APRS_NA,
    },
    Region {
        area: Area::Poly(&EUROPE),
        freq: FREQ_APRS_EU,
    },
    Region {
        // Australia
        area: Area::Rect(-44 * DEG, -10 * DEG, 112 * DEG, 154 * DEG),
        freq: FREQ_APRS_AU,
    },
    Region {
        // New Zealand
        area: Area::Rect(-48 * DEG, -34 * DEG, 166 * DEG, 179 * DEG),
        freq: FREQ_APRS_NZ,
    },
    Region {
        // Japan
        area: Area::Rect(24 * DEG, 46 * DEG, 122 * DEG, 154 * DEG),
        freq: FREQ_APRS_JP,
    },
    Region {
        // China
        area: Area::Rect(18 * DEG, 54 * DEG, 73 * DEG, 122 * DEG),
        freq: FREQ_APRS_CN,
    },
    Region {
        // Brazil / Argentina
        area: Area::Rect(-56 * DEG, 5 * DEG, -74 * DEG, -34 * DEG),
        freq: FREQ_APRS_BR,
    },
];

fn rect_contains(lat: i32, lon: i32, r: (i32, i32, i32, i32)) -> bool {
    (r.0..=r.1).contains(&lat) && (r.2..=r.3).contains(&lon)
}

/// Ray casting over integer vertices; edges count as inside.
fn poly_contains(lat: i32, lon: i32, poly: &[(i32, i32)]) -> bool {
    let mut inside = false;
    for w in poly.windows(2) {
        let (lat1, lon1) = w[0];
        let (lat2, lon2) = w[1];
        if (lon1 > lon) != (lon2 > lon) {
            // latitude of the edge at this longitude, in i64 to avoid overflow
            let t_num = (lon - lon1) as i64;
            let t_den = (lon2 - lon1) as i64;
            let cross = lat1 as i64 + (lat2 - lat1) as i64 * t_num / t_den;
            if (lat as i64) < cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Regional APRS frequency for a raw position.
pub fn regional_frequency(lat: i32, lon: i32) -> u32 {
    for region in &REGIONS {
        let hit = match region.area {
            Area::Rect(a, b, c, d) => rect_contains(lat, lon, (a, b, c, d)),
            Area::Poly(p) => poly_contains(lat, lon, p),
        };
        if hit {
            return clamp_to_plan(region.freq);
        }
    }
    clamp_to_plan(FREQ_APRS_DEFAULT)
}

/// Resolve against the last telemetry point; positions that never came
/// from any fix fall back to the default.
pub fn resolve_regional(point: Option<&TelemetryPoint>) -> u32 {
    match point {
        Some(p) if p.position_valid() => regional_frequency(p.gps_lat, p.gps_lon),
        _ => clamp_to_plan(FREQ_APRS_DEFAULT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datapoint::GpsState;

    #[test]
    fn san_francisco_resolves_na() {
        assert_eq!(regional_frequency(377_749_000, -1_224_194_000), FREQ_APRS_NA);
    }

    #[test]
    fn paris_resolves_eu() {
        assert_eq!(regional_frequency(488_566_000, 23_522_000), FREQ_APRS_EU);
    }

    #[test]
    fn sydney_resolves_au() {
        assert_eq!(regional_frequency(-338_688_000, 1_512_093_000), FREQ_APRS_AU);
    }

    #[test]
    fn tokyo_resolves_jp() {
        assert_eq!(regional_frequency(356_762_000, 1_396_503_000), FREQ_APRS_JP);
    }

    #[test]
    fn mid_pacific_falls_back_to_default() {
        assert_eq!(regional_frequency(0, -1_600_000_000), FREQ_APRS_DEFAULT);
    }

    #[test]
    fn invalid_position_falls_back() {
        let mut p = TelemetryPoint::empty();
        p.gps_state = GpsState::Loss;
        assert_eq!(resolve_regional(Some(&p)), FREQ_APRS_DEFAULT);
        assert_eq!(resolve_regional(None), FREQ_APRS_DEFAULT);
    }

    #[test]
    fn valid_log_position_is_used() {
        let mut p = TelemetryPoint::empty();
        p.gps_state = GpsState::FromLog;
        p.gps_lat = 377_749_000;
        p.gps_lon = -1_224_194_000;
        assert_eq!(resolve_regional(Some(&p)), FREQ_APRS_NA);
    }
}
