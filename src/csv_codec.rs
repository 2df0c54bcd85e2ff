// src/csv_codec.rs
//! CSV export and import for the three record kinds.
//!
//! Export always quotes every value and doubles embedded quotes. Import is quote-aware,
//! so a value may contain commas, quotes, or line breaks when it is quoted. Quoted values
//! keep their surrounding whitespace; unquoted input is split on commas and trimmed.
//!
//! Older exports wrapped values in quotes without escaping inner ones. A quote that is
//! not followed by a separator is read as part of the value, so `"He said "hi" twice"`
//! still decodes. A value that itself ended in a quote (`"say "hi""`) reads as an
//! escaped quote and cannot be recovered from such files.
use crate::error::CsvError;
use crate::models::{
    Category, Credential, CredentialDraft, Insurance, InsuranceDraft, Vehicle, VehicleDraft,
    VehicleType,
};
use log;
use std::collections::HashMap;

/// A record that can be written as one CSV line under a fixed header.
pub trait CsvRecord {
    const HEADER: &'static [&'static str];

    /// Values in `HEADER` order.
    fn csv_fields(&self) -> Vec<String>;
}

impl CsvRecord for Credential {
    const HEADER: &'static [&'static str] = &["id", "service", "username", "password", "category"];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.service.clone(),
            self.username.clone(),
            self.password.clone(),
            self.category.as_str().to_string(),
        ]
    }
}

impl CsvRecord for Vehicle {
    const HEADER: &'static [&'static str] = &["id", "name", "type", "lastService", "nextService"];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.vehicle_type.as_str().to_string(),
            self.last_service.clone(),
            self.next_service.clone(),
        ]
    }
}

impl CsvRecord for Insurance {
    const HEADER: &'static [&'static str] = &["id", "name", "dueDate", "premium", "comments", "isPaid"];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.due_date.clone(),
            self.premium.clone(),
            self.comments.clone(),
            self.is_paid.to_string(),
        ]
    }
}

/// Union of every kind's columns, used by the complete export.
pub const COMPLETE_HEADER: &[&str] = &[
    "id",
    "service",
    "username",
    "password",
    "category",
    "name",
    "type",
    "lastService",
    "nextService",
    "dueDate",
    "premium",
    "comments",
    "isPaid",
];

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn quoted_line<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(|v| quote(v.as_ref())).collect::<Vec<_>>().join(",")
}

/// Serializes a homogeneous list. Returns `None` for an empty list, nothing is exported then.
pub fn export<R: CsvRecord>(records: &[R]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut lines = vec![R::HEADER.join(",")];
    lines.extend(records.iter().map(|r| quoted_line(&r.csv_fields())));
    Some(lines.join("\n"))
}

fn union_row<R: CsvRecord>(record: &R) -> Vec<String> {
    let mut row = vec![String::new(); COMPLETE_HEADER.len()];
    for (name, value) in R::HEADER.iter().zip(record.csv_fields()) {
        if let Some(idx) = COMPLETE_HEADER.iter().position(|h| h == name) {
            row[idx] = value;
        }
    }
    row
}

/// Serializes all three kinds under one union header, empty cells where a kind has no such field.
pub fn export_complete(
    credentials: &[Credential],
    vehicles: &[Vehicle],
    insurances: &[Insurance],
) -> Option<String> {
    let rows: Vec<Vec<String>> = credentials
        .iter()
        .map(union_row)
        .chain(vehicles.iter().map(union_row))
        .chain(insurances.iter().map(union_row))
        .collect();
    if rows.is_empty() {
        return None;
    }
    let mut lines = vec![COMPLETE_HEADER.join(",")];
    lines.extend(rows.iter().map(|r| quoted_line(r)));
    Some(lines.join("\n"))
}

/// Whether a quote seen inside a quoted field closes it: only spaces or tabs may
/// stand between it and the next separator or the end of input.
fn closes_field(rest: &[char]) -> bool {
    rest.iter()
        .find(|c| **c != ' ' && **c != '\t')
        .map_or(true, |c| matches!(c, ',' | '\r' | '\n'))
}

/// Quoted values are kept exactly as written; unquoted ones are trimmed.
fn finish_field(field: &mut String, quoted: &mut bool) -> String {
    let value = std::mem::take(field);
    if std::mem::take(quoted) {
        value
    } else {
        value.trim().to_string()
    }
}

/// Splits CSV text into records of field values.
pub fn parse(text: &str) -> Result<Vec<Vec<String>>, CsvError> {
    let chars: Vec<char> = text.chars().collect();
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line = 1;
    let mut quote_line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if in_quotes {
            match c {
                '"' if chars.get(i) == Some(&'"') => {
                    i += 1;
                    field.push('"');
                }
                '"' if closes_field(&chars[i..]) => in_quotes = false,
                // stray inner quote from an unescaped legacy export
                '"' => field.push('"'),
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if !quoted && field.trim().is_empty() => {
                field.clear();
                quoted = true;
                in_quotes = true;
                quote_line = line;
            }
            ',' => record.push(finish_field(&mut field, &mut quoted)),
            '\r' | '\n' => {
                if c == '\r' && chars.get(i) == Some(&'\n') {
                    i += 1;
                }
                line += 1;
                record.push(finish_field(&mut field, &mut quoted));
                records.push(std::mem::take(&mut record));
            }
            _ if quoted => {} // padding after the closing quote
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(CsvError::UnterminatedQuote { line: quote_line });
    }
    if !field.is_empty() || quoted || !record.is_empty() {
        record.push(finish_field(&mut field, &mut quoted));
        records.push(record);
    }
    Ok(records)
}

type FieldMap = HashMap<String, String>;

/// First non-empty value among the accepted spellings of a column.
fn field<'a>(row: &'a FieldMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|n| row.get(*n))
        .map(String::as_str)
        .find(|v| !v.is_empty())
}

fn field_or_empty(row: &FieldMap, names: &[&str]) -> String {
    field(row, names).unwrap_or_default().to_string()
}

/// One CSV row decoded into the first record kind whose required fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRow {
    Credential(CredentialDraft),
    Vehicle(VehicleDraft),
    Insurance(InsuranceDraft),
}

impl ImportRow {
    /// Tries credential, then vehicle, then insurance. A row matching several shapes
    /// goes to the first.
    pub fn decode(row: &FieldMap) -> Option<ImportRow> {
        Self::decode_credential(row)
            .map(ImportRow::Credential)
            .or_else(|| Self::decode_vehicle(row).map(ImportRow::Vehicle))
            .or_else(|| Self::decode_insurance(row).map(ImportRow::Insurance))
    }

    fn decode_credential(row: &FieldMap) -> Option<CredentialDraft> {
        let service = field(row, &["service"])?;
        let password = field(row, &["password"])?;
        Some(CredentialDraft {
            service: service.to_string(),
            username: field_or_empty(row, &["username"]),
            password: password.to_string(),
            category: field(row, &["category"]).map(Category::parse_lenient).unwrap_or_default(),
        })
    }

    fn decode_vehicle(row: &FieldMap) -> Option<VehicleDraft> {
        let name = field(row, &["name"])?;
        let last_service = field(row, &["last_service", "lastService"])?;
        Some(VehicleDraft {
            name: name.to_string(),
            vehicle_type: field(row, &["type"]).map(VehicleType::parse_lenient).unwrap_or_default(),
            last_service: last_service.to_string(),
            next_service: field_or_empty(row, &["next_service", "nextService"]),
        })
    }

    fn decode_insurance(row: &FieldMap) -> Option<InsuranceDraft> {
        let name = field(row, &["name"])?;
        let due_date = field(row, &["due_date", "dueDate"])?;
        Some(InsuranceDraft {
            name: name.to_string(),
            due_date: due_date.to_string(),
            premium: field_or_empty(row, &["premium"]),
            comments: field_or_empty(row, &["comments"]),
            is_paid: field(row, &["is_paid", "isPaid"]) == Some("true"),
        })
    }
}

/// Decoded rows grouped by kind, ready for one bulk insert per kind.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportBatches {
    pub credentials: Vec<CredentialDraft>,
    pub vehicles: Vec<VehicleDraft>,
    pub insurances: Vec<InsuranceDraft>,
    /// Non-blank rows that matched no kind.
    pub skipped: usize,
}

impl ImportBatches {
    pub fn total(&self) -> usize {
        self.credentials.len() + self.vehicles.len() + self.insurances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn push(&mut self, row: ImportRow) {
        match row {
            ImportRow::Credential(d) => self.credentials.push(d),
            ImportRow::Vehicle(d) => self.vehicles.push(d),
            ImportRow::Insurance(d) => self.insurances.push(d),
        }
    }
}

/// Parses uploaded CSV text into per-kind batches. Text with fewer than two lines yields nothing.
pub fn decode_batches(text: &str) -> Result<ImportBatches, CsvError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = parse(text)?.into_iter();
    let mut batches = ImportBatches::default();
    let Some(headers) = records.next() else {
        return Ok(batches);
    };

    for values in records {
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        let row: FieldMap = headers.iter().cloned().zip(values).collect();
        match ImportRow::decode(&row) {
            Some(decoded) => batches.push(decoded),
            None => {
                log::debug!("CSV row matched no record kind; skipping");
                batches.skipped += 1;
            }
        }
    }
    log::info!(
        "Decoded CSV: {} credentials, {} vehicles, {} insurances, {} skipped",
        batches.credentials.len(),
        batches.vehicles.len(),
        batches.insurances.len(),
        batches.skipped
    );
    Ok(batches)
}
