//! Textual payload codec: `field:value` lines <-> brace-delimited payload.
//!
//! The wire payload looks like hand-formatted JSON but is line-oriented: one
//! `"field" : value` pair per line, numeric values unquoted, comma on every
//! line but the last. Total and side-effect-free on valid input.

use super::record::Fields;
use super::schema::parses_as_number;

/// Encode a field mapping into the brace-delimited wire payload.
pub fn encode(fields: &Fields) -> String {
    let mut out = String::from("{\n");
    let last = fields.len().saturating_sub(1);
    for (i, (name, value)) in fields.iter().enumerate() {
        // Short numerics go unquoted, everything else is quoted.
        if parses_as_number(value) && value.len() < 7 {
            out.push_str(&format!("    \"{name}\" : {value}"));
        } else {
            out.push_str(&format!("    \"{name}\" : \"{value}\""));
        }
        if i != last {
            out.push(',');
        }
        out.push('\n');
    }
    out.push('}');
    out
}

/// Decode a brace-delimited payload back into a field mapping.
///
/// Tolerant of spacing: strips surrounding quotes and the trailing comma on
/// each line. Lines without a `:` separator are skipped.
pub fn decode(payload: &str) -> Fields {
    let mut fields = Fields::new();
    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line == "{" || line == "}" {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = clean_token(name);
        let value = clean_token(value);
        if name.is_empty() {
            continue;
        }
        fields.insert(name, value);
    }
    fields
}

/// Strip the quoting/punctuation the wire form adds around a token.
pub fn clean_token(raw: &str) -> String {
    let mut token = raw.trim();
    token = token.strip_suffix(',').unwrap_or(token).trim();
    token = token.strip_prefix('"').unwrap_or(token);
    token = token.strip_suffix('"').unwrap_or(token);
    token.to_string()
}
