//! Human-readable distance and age labels.

use chrono::TimeDelta;

pub const FEET_PER_METER: f64 = 3.280_84;
pub const METERS_PER_MILE: f64 = 1_609.344;

/// Render a distance in imperial units with stepped precision.
///
/// Under 1000 ft: whole feet. Under 10 mi: miles to one decimal.
/// Otherwise whole miles. Thresholds apply to the rounded value, so a label
/// never reads "1000 ft" or "10.0 mi".
pub fn format_distance(meters: f64) -> String {
    let meters = meters.max(0.0);
    let feet = (meters * FEET_PER_METER).round();
    if feet < 1_000.0 {
        return format!("{} ft", feet as i64);
    }
    let miles = meters / METERS_PER_MILE;
    let tenths = (miles * 10.0).round() / 10.0;
    if tenths < 10.0 {
        format!("{tenths:.1} mi")
    } else {
        format!("{} mi", miles.round() as i64)
    }
}

/// Render elapsed time as a single coarse unit: seconds, minutes, hours, days.
///
/// Negative spans (clock skew) clamp to zero.
pub fn format_age(elapsed: TimeDelta) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3_600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3_600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
