//! Minimal header-aware CSV reader for replay traces.
//!
//! Handles quoted fields with doubled quotes, CRLF line endings, a leading
//! byte-order mark and blank lines. Header names are normalized to lowercase
//! with spaces replaced by underscores, so `Pump Event` and `Pump_Event` both
//! read as `pump_event`.

use std::collections::BTreeMap;

/// One data row keyed by normalized header name, with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub line: usize,
    pub fields: BTreeMap<String, String>,
}

impl CsvRow {
    /// First non-empty value among `names`.
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.fields.get(*n))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// First value among `names` that parses as a finite number.
    pub fn number(&self, names: &[&str]) -> Option<f64> {
        self.get_any(names)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Parse CSV text with a header row.
///
/// Rows shorter than the header leave missing fields absent; extra fields
/// are ignored.
pub fn parse(text: &str) -> Vec<CsvRow> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text).into_iter();
    let Some((_, header)) = records.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();

    records
        .filter(|(_, fields)| !(fields.len() == 1 && fields[0].trim().is_empty()))
        .map(|(line, fields)| CsvRow {
            line,
            fields: header
                .iter()
                .cloned()
                .zip(fields)
                .filter(|(name, _)| !name.is_empty())
                .collect(),
        })
        .collect()
}

fn split_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut out = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
                out.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            '\n' => {
                line += 1;
                field.push(c);
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        out.push((record_line, fields));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_normalized() {
        assert_eq!(normalize_header(" Pump Run Time "), "pump_run_time");
        assert_eq!(normalize_header("Pump_Event"), "pump_event");
    }

    #[test]
    fn parses_quotes_and_crlf() {
        let rows = parse("\u{feff}Time,Pump Event,Note\r\n2025-03-01 08:00:00,Pump Stop,\"a, \"\"b\"\"\"\r\n\r\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].fields["pump_event"], "Pump Stop");
        assert_eq!(rows[0].fields["note"], "a, \"b\"");
    }

    #[test]
    fn short_rows_and_numbers() {
        let rows = parse("timestamp,gal,depth\n2025-03-01 08:00:00,12.5\n");
        assert_eq!(rows[0].number(&["gal"]), Some(12.5));
        assert_eq!(rows[0].number(&["depth"]), None);
        assert_eq!(rows[0].get_any(&["time", "timestamp"]), Some("2025-03-01 08:00:00"));
    }

    #[test]
    fn empty_input_has_no_rows() {
        assert!(parse("").is_empty());
        assert!(parse("timestamp,gal\n").is_empty());
    }
}
