//! Fixed field schema for weather feed payloads.
//!
//! A best-effort sanity check, not a closed type system: known field names
//! must match their expected kind, unknown names pass through untyped.

/// Expected kind of a known field's textual value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
}

/// Look up the expected kind for a field name. `None` means unknown — the
/// value is stored as-is with no type check.
pub fn field_kind(name: &str) -> Option<FieldKind> {
    let kind = match name {
        "id" | "name" | "state" | "time_zone" | "local_date_time" | "cloud" | "wind_dir" => {
            FieldKind::Text
        }
        "lat" | "lon" | "local_date_time_full" | "air_temp" | "apparent_t" | "dewpt" | "press"
        | "rel_hum" | "wind_spd_kmh" | "wind_spd_kt" => FieldKind::Numeric,
        _ => return None,
    };
    Some(kind)
}

/// Whether a textual value reads as a number.
pub fn parses_as_number(value: &str) -> bool {
    value.parse::<f64>().is_ok()
}

/// Check one field/value pair against the schema.
///
/// A numeric value where text is expected, or vice versa, fails the whole
/// request upstream.
pub fn check(name: &str, value: &str) -> bool {
    match field_kind(name) {
        Some(FieldKind::Text) => !parses_as_number(value),
        Some(FieldKind::Numeric) => parses_as_number(value),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fields_have_expected_kinds() {
        assert_eq!(field_kind("id"), Some(FieldKind::Text));
        assert_eq!(field_kind("lat"), Some(FieldKind::Numeric));
        assert_eq!(field_kind("wind_spd_kt"), Some(FieldKind::Numeric));
        assert_eq!(field_kind("made_up"), None);
    }

    #[test]
    fn numeric_detection_uses_float_parsing() {
        assert!(parses_as_number("13.4"));
        assert!(parses_as_number("-2"));
        assert!(!parses_as_number("north"));
        assert!(!parses_as_number(""));
    }

    #[test]
    fn check_enforces_kind_both_directions() {
        assert!(check("lat", "-34.9"));
        assert!(!check("lat", "north"));
        assert!(check("cloud", "Partly cloudy"));
        assert!(!check("cloud", "60"));
        // Unknown fields pass untyped.
        assert!(check("humidex", "whatever"));
        assert!(check("humidex", "12"));
    }
}
