//! Decoder for InfluxDB annotated CSV.
//!
//! Only the `#datatype` annotation is interpreted; it decides how each cell
//! is typed and starts a new table, whose next row is its header. Without
//! annotations, a row repeating the current header is skipped.

use fluxgauge_domain::{BackendError, MetricValue, Row};

pub fn decode(body: &str) -> Result<Vec<Row>, BackendError> {
    let mut rows = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for record in read_records(body)? {
        if let Some(first) = record.first().filter(|cell| cell.starts_with('#')) {
            if first == "#datatype" {
                datatypes = record;
                header = None;
            }
            continue;
        }
        let Some(columns) = header.as_ref() else {
            header = Some(record);
            continue;
        };
        if *columns == record {
            continue;
        }
        if is_error_table(columns) {
            return Err(in_band_error(columns, &record));
        }
        rows.push(decode_row(columns, &datatypes, &record)?);
    }
    Ok(rows)
}

fn decode_row(
    columns: &[String],
    datatypes: &[String],
    record: &[String],
) -> Result<Row, BackendError> {
    let mut row = Row::new();
    for (index, name) in columns.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let Some(cell) = record.get(index).filter(|cell| !cell.is_empty()) else {
            continue;
        };
        let datatype = datatypes.get(index).map(String::as_str).unwrap_or("string");
        row.insert(name.clone(), typed_cell(name, datatype, cell)?);
    }
    Ok(row)
}

fn typed_cell(column: &str, datatype: &str, cell: &str) -> Result<MetricValue, BackendError> {
    let invalid = |kind: &str| {
        BackendError::Decode(format!("column '{column}' holds invalid {kind} '{cell}'"))
    };
    let value = match datatype {
        "long" => MetricValue::Integer(cell.parse().map_err(|_| invalid("long"))?),
        "unsignedLong" => MetricValue::Unsigned(cell.parse().map_err(|_| invalid("unsignedLong"))?),
        "double" => MetricValue::Float(cell.parse().map_err(|_| invalid("double"))?),
        "boolean" => MetricValue::Boolean(cell.parse().map_err(|_| invalid("boolean"))?),
        _ => MetricValue::Text(cell.to_string()),
    };
    Ok(value)
}

fn is_error_table(columns: &[String]) -> bool {
    columns.iter().any(|name| name == "error") && columns.iter().any(|name| name == "reference")
}

fn in_band_error(columns: &[String], record: &[String]) -> BackendError {
    let message = columns
        .iter()
        .position(|name| name == "error")
        .and_then(|index| record.get(index))
        .cloned()
        .unwrap_or_else(|| "unknown query error".to_string());
    BackendError::Status {
        status: 200,
        message,
    }
}

fn read_records(body: &str) -> Result<Vec<Vec<String>>, BackendError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    reader
        .records()
        .map(|record| {
            record
                .map(|record| record.iter().map(str::to_string).collect())
                .map_err(|err| BackendError::Decode(err.to_string()))
        })
        .collect()
}
