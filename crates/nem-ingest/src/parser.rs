//! Multi-schema record parser for dispatch report CSVs
//!
//! A report file interleaves definition and data records:
//!
//! ```text
//! C,NEMP.WORLD,DISPATCHIS,...               <- comment, ignored
//! I,DISPATCH,PRICE,5,SETTLEMENTDATE,RUNNO,REGIONID,INTERVENTION,RRP,...
//! D,DISPATCH,PRICE,5,"2024/01/01 00:05:00",1,NSW1,0,35.20,...
//! ```
//!
//! An `I` record defines the column layout for the subtype in column 1; each
//! `D` record with that subtype is decoded with the most recent layout. The
//! schema table lives for one call to [`DispatchPriceParser::parse`] and is
//! never shared across files.

use crate::error::Result;
use crate::models::NormalizedRow;
use csv::{ReaderBuilder, StringRecord};
use nem_common::timestamp::parse_settlement;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// First column of a header record that can carry a column name
pub const HEADER_COLUMN_OFFSET: usize = 4;

const REGION_ALIASES: &[&str] = &["REGIONID", "REGION_ID", "REGION"];
const PRICE_ALIASES: &[&str] = &["RRP", "REGIONPRICE", "PRICE"];
const SETTLEMENT_ALIASES: &[&str] = &["SETTLEMENTDATE", "SETTLEMENT_DATE", "DATETIME", "INTERVAL_DATETIME"];
const RUN_NO_ALIASES: &[&str] = &["RUNNO", "RUN_NO"];
const INTERVENTION_ALIASES: &[&str] = &["INTERVENTION"];

/// Canonical form used for column-name comparison
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Column layout for one subtype: normalized name -> absolute column index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMapping {
    columns: HashMap<String, usize>,
}

impl SchemaMapping {
    fn from_header(record: &StringRecord) -> Self {
        let columns = record
            .iter()
            .enumerate()
            .skip(HEADER_COLUMN_OFFSET)
            .filter_map(|(idx, name)| {
                let key = normalize_column_name(name);
                (!key.is_empty()).then_some((key, idx))
            })
            .collect();
        Self { columns }
    }

    /// Index of the first alias present in this layout
    pub fn pick(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.columns.get(&normalize_column_name(alias)).copied())
    }

    fn resolve(&self) -> Option<ResolvedColumns> {
        Some(ResolvedColumns {
            region: self.pick(REGION_ALIASES)?,
            price: self.pick(PRICE_ALIASES)?,
            settlement: self.pick(SETTLEMENT_ALIASES)?,
            run_no: self.pick(RUN_NO_ALIASES),
            intervention: self.pick(INTERVENTION_ALIASES),
        })
    }
}

/// Layouts seen so far in one stream, keyed by subtype
type SchemaTable = HashMap<String, SchemaMapping>;

#[derive(Debug, Clone, Copy)]
struct ResolvedColumns {
    region: usize,
    price: usize,
    settlement: usize,
    run_no: Option<usize>,
    intervention: Option<usize>,
}

/// Result of parsing one input stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub rows: Vec<NormalizedRow>,
    /// Data records whose cells failed coercion
    pub invalid: u64,
    /// Data records with no usable layout for their subtype
    pub skipped: u64,
}

/// Dispatch price parser
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchPriceParser;

impl DispatchPriceParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one CSV stream
    ///
    /// Only I/O failures are returned as errors; malformed records are counted.
    pub fn parse<R: Read>(&self, reader: R) -> Result<ParseOutcome> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut schemas = SchemaTable::new();
        let mut outcome = ParseOutcome::default();

        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping unreadable record at line {}: {}", line + 1, e);
                    outcome.invalid += 1;
                    continue;
                },
            };

            if record.len() < 2 {
                continue;
            }

            let kind = record[0].trim_start_matches('\u{feff}').trim();
            let subtype = record[1].trim();

            if kind.eq_ignore_ascii_case("I") {
                schemas.insert(subtype.to_string(), SchemaMapping::from_header(&record));
                continue;
            }
            if !kind.eq_ignore_ascii_case("D") {
                continue;
            }

            let Some(columns) = schemas.get(subtype).and_then(SchemaMapping::resolve) else {
                outcome.skipped += 1;
                continue;
            };

            match decode_row(&record, columns) {
                Some(row) => outcome.rows.push(row),
                None => {
                    debug!("Invalid data record at line {}", line + 1);
                    outcome.invalid += 1;
                },
            }
        }

        Ok(outcome)
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        self.parse(bytes)
    }

    pub fn parse_path(&self, path: &Path) -> Result<ParseOutcome> {
        let file = std::fs::File::open(path)?;
        self.parse(std::io::BufReader::new(file))
    }
}

fn cell<'a>(record: &'a StringRecord, idx: usize) -> Option<&'a str> {
    record.get(idx).map(|v| v.trim().trim_matches('"').trim())
}

fn optional_int(record: &StringRecord, idx: Option<usize>) -> Option<i32> {
    let Some(idx) = idx else {
        return Some(0);
    };
    let value = cell(record, idx)?;
    if value.is_empty() {
        return Some(0);
    }
    value.parse().ok()
}

fn decode_row(record: &StringRecord, columns: ResolvedColumns) -> Option<NormalizedRow> {
    let settlement_date = parse_settlement(cell(record, columns.settlement)?).ok()?;
    let region_id = cell(record, columns.region)?;
    if region_id.is_empty() {
        return None;
    }

    let rrp: f64 = cell(record, columns.price)?.parse().ok()?;
    if !rrp.is_finite() {
        return None;
    }

    Some(NormalizedRow {
        settlement_date,
        region_id: region_id.to_string(),
        rrp,
        intervention: optional_int(record, columns.intervention)?,
        run_no: optional_int(record, columns.run_no)?,
    })
}
