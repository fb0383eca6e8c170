//! Reading workout plans from CSV and Excel files into uniform rows.
//!
//! Plan files come from arbitrary spreadsheets, so nothing about their
//! columns is known up front. Every data line becomes a [`Row`]: an ordered
//! list of `column -> value` pairs that keeps the column order of the source.

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Cursor;

use crate::error::{Result, TrackerError};

/// One record of a plan file with its columns in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, keeping the original position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value among `keys`, probed in the given order.
    pub fn first_non_empty(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Row, A::Error> {
                let mut row = Row::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    row.insert(k, v);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// How the bytes of an uploaded file should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited,
    Spreadsheet,
}

static EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(csv|xlsx|xls)$").expect("valid extension pattern"));

impl FileFormat {
    /// Pick a decoder from the file name, falling back to the declared
    /// content type when the name has no recognised extension.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Result<Self> {
        if let Some(caps) = EXTENSION.captures(file_name) {
            return Ok(if caps[1].eq_ignore_ascii_case("csv") {
                FileFormat::Delimited
            } else {
                FileFormat::Spreadsheet
            });
        }
        match content_type {
            Some("text/csv") => Ok(FileFormat::Delimited),
            Some("application/vnd.ms-excel")
            | Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet") => {
                Ok(FileFormat::Spreadsheet)
            }
            _ => Err(TrackerError::Format(format!(
                "{file_name}: please upload a CSV or Excel file"
            ))),
        }
    }
}

pub fn parse(bytes: &[u8], format: FileFormat) -> Result<Vec<Row>> {
    match format {
        FileFormat::Delimited => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| TrackerError::Format(format!("file is not UTF-8 text: {e}")))?;
            parse_delimited(text)
        }
        FileFormat::Spreadsheet => parse_spreadsheet(bytes),
    }
}

fn clean_cell(raw: &str) -> String {
    raw.trim().replace('"', "")
}

/// Parse comma separated text. The first line holds the headers; short lines
/// are padded with empty values and blank lines are skipped. Quotes carry no
/// meaning: every comma splits and every `"` is dropped from the value.
pub fn parse_delimited(text: &str) -> Result<Vec<Row>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut records = rdr.records();

    let headers: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(clean_cell).collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).map(clean_cell).unwrap_or_default()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(v) => Some(v.to_string()),
        Data::Float(v) => Some(format_number(*v)),
        Data::Bool(v) => Some(v.to_string()),
        Data::DateTime(v) => Some(format_number(v.as_f64())),
        Data::DateTimeIso(v) => Some(v.clone()),
        Data::DurationIso(v) => Some(v.clone()),
        Data::Error(e) => Some(e.to_string()),
    }
}

/// Header names for a spreadsheet: blanks become `__EMPTY`, `__EMPTY_1`, ...
/// and repeated names get a numeric suffix so every column stays addressable.
fn spreadsheet_headers(cells: &[Data]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(cells.len());
    for cell in cells {
        let base = cell_text(cell)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "__EMPTY".to_string());
        let mut name = base.clone();
        let mut n = 1;
        while headers.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        headers.push(name);
    }
    headers
}

/// Read the first worksheet of an `.xlsx`/`.xls` workbook. Empty cells are
/// left out of the row and rows without any value are skipped.
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<Vec<Row>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| TrackerError::Format(e.to_string()))?;
    let Some(first) = workbook.sheet_names().first().cloned() else {
        return Err(TrackerError::Format("workbook has no sheets".into()));
    };
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| TrackerError::Format(e.to_string()))?;

    let mut sheet_rows = range.rows();
    let Some(header_cells) = sheet_rows.next() else {
        return Ok(Vec::new());
    };
    let headers = spreadsheet_headers(header_cells);

    let rows = sheet_rows
        .map(|cells| {
            headers
                .iter()
                .zip(cells)
                .filter_map(|(h, c)| cell_text(c).map(|v| (h.clone(), v)))
                .collect::<Row>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_extension_and_content_type() {
        assert_eq!(
            FileFormat::detect("plan.CSV", None).unwrap(),
            FileFormat::Delimited
        );
        assert_eq!(
            FileFormat::detect("plan.xlsx", None).unwrap(),
            FileFormat::Spreadsheet
        );
        assert_eq!(
            FileFormat::detect("plan.xls", Some("text/csv")).unwrap(),
            FileFormat::Spreadsheet
        );
        assert_eq!(
            FileFormat::detect("upload", Some("text/csv")).unwrap(),
            FileFormat::Delimited
        );
        assert_eq!(
            FileFormat::detect("upload", Some("application/vnd.ms-excel")).unwrap(),
            FileFormat::Spreadsheet
        );
        assert!(matches!(
            FileFormat::detect("notes.txt", Some("text/plain")),
            Err(TrackerError::Format(_))
        ));
    }

    #[test]
    fn delimited_headers_and_values_are_cleaned() {
        let rows = parse_delimited("\"Day\", Exercise ,Sets\nA, \"Squat\" ,3\n").unwrap();
        assert_eq!(rows.len(), 1);
        let keys: Vec<&str> = rows[0].keys().collect();
        assert_eq!(keys, vec!["Day", "Exercise", "Sets"]);
        assert_eq!(rows[0].get("Exercise"), Some("Squat"));
        assert_eq!(rows[0].get("Sets"), Some("3"));
    }

    #[test]
    fn delimited_short_lines_and_blank_lines() {
        let rows = parse_delimited("Day,Exercise,Sets\r\nA,Squat\r\n\r\n   \r\nB,Row,2,extra\r\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Sets"), Some(""));
        assert_eq!(rows[1].get("Exercise"), Some("Row"));
        assert_eq!(rows[1].len(), 3);
    }

    #[test]
    fn delimited_quotes_never_join_lines_or_fields() {
        let rows = parse_delimited("Day,Exercise,Sets\nA,\"Squat,3\nA,Bench,3\nB,Row,2").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("Exercise"), Some("Squat"));
        assert_eq!(rows[0].get("Sets"), Some("3"));
        assert_eq!(rows[1].get("Exercise"), Some("Bench"));
        assert_eq!(rows[2].get("Day"), Some("B"));

        let rows = parse_delimited("Exercise,Sets\n\"Press, seated\",4").unwrap();
        assert_eq!(rows[0].get("Exercise"), Some("Press"));
        assert_eq!(rows[0].get("Sets"), Some("seated"));
    }

    #[test]
    fn delimited_header_only_has_no_rows() {
        assert!(parse_delimited("Day,Exercise\n").unwrap().is_empty());
        assert!(parse_delimited("").unwrap().is_empty());
    }

    #[test]
    fn delimited_rejects_binary() {
        let err = parse(&[0xff, 0xfe, 0x00, 0x41], FileFormat::Delimited).unwrap_err();
        assert!(matches!(err, TrackerError::Format(_)));
    }

    #[test]
    fn spreadsheet_rejects_garbage() {
        let err = parse(b"definitely not a workbook", FileFormat::Spreadsheet).unwrap_err();
        assert!(matches!(err, TrackerError::Format(_)));
    }

    /// Two sheets; the first holds a plan with a blank line in the middle.
    fn plan_workbook() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Plan").unwrap();
        for (col, header) in ["Day", "Exercise", "Sets", "Weight"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "A").unwrap();
        sheet.write_string(1, 1, "Squat").unwrap();
        sheet.write_number(1, 2, 3.0).unwrap();
        sheet.write_number(1, 3, 62.5).unwrap();
        sheet.write_string(3, 0, "A").unwrap();
        sheet.write_string(3, 1, "Bench").unwrap();
        sheet.write_number(3, 2, 3.0).unwrap();
        sheet.write_string(4, 0, "B").unwrap();
        sheet.write_string(4, 1, "Deadlift").unwrap();
        sheet.write_number(4, 2, 1.0).unwrap();
        let other = workbook.add_worksheet();
        other.write_string(0, 0, "Ignored").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn spreadsheet_reads_first_sheet() {
        let rows = parse(&plan_workbook(), FileFormat::Spreadsheet).unwrap();
        assert_eq!(rows.len(), 3);

        let keys: Vec<&str> = rows[0].keys().collect();
        assert_eq!(keys, vec!["Day", "Exercise", "Sets", "Weight"]);
        assert_eq!(rows[0].get("Sets"), Some("3"));
        assert_eq!(rows[0].get("Weight"), Some("62.5"));
        assert_eq!(rows[1].get("Exercise"), Some("Bench"));
        assert_eq!(rows[1].get("Weight"), None);
        assert!(rows.iter().all(|r| r.get("Ignored").is_none()));

        let from_csv = parse_delimited("Day,Exercise,Sets\nB,Deadlift,1").unwrap();
        assert_eq!(rows[2], from_csv[0]);

        let plans = crate::plan::group_into_plans(&rows).unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(plans[0].entries.len(), 2);
        assert_eq!(plans[0].entries[1].display_name(), "Bench");
    }

    #[test]
    fn spreadsheet_header_names() {
        let cells = vec![
            Data::String("Exercise".into()),
            Data::Empty,
            Data::String("Exercise".into()),
            Data::Empty,
        ];
        assert_eq!(
            spreadsheet_headers(&cells),
            vec!["Exercise", "__EMPTY", "Exercise_1", "__EMPTY_1"]
        );
    }

    #[test]
    fn spreadsheet_cells_render_as_text() {
        assert_eq!(cell_text(&Data::Float(3.0)).as_deref(), Some("3"));
        assert_eq!(cell_text(&Data::Float(62.5)).as_deref(), Some("62.5"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));
        assert_eq!(cell_text(&Data::String(String::new())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn row_keeps_order_through_json() {
        let row: Row = [("Sets", "3"), ("Exercise", "Squat"), ("Reps", "5")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"Sets":"3","Exercise":"Squat","Reps":"5"}"#);
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn row_insert_upserts_in_place() {
        let mut row = Row::new();
        row.insert("a", "1");
        row.insert("b", "2");
        row.insert("a", "3");
        assert_eq!(row.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
        assert_eq!(row.first_non_empty(&["x", "b", "a"]), Some("2"));
    }
}
