//! CSV Reader (C8): header validation, field parsing, row-level
//! validation, progress accounting.

use std::collections::HashMap;
use std::io::Read;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::{NewTransaction, Transaction, TransactionType, Violation};
use crate::error::AccountingError;

pub const EXPECTED_HEADERS: [&str; 7] =
    ["portfolio_id", "security_id", "source_id", "transaction_type", "quantity", "price", "transaction_date"];

const PROGRESS_INTERVAL: u64 = 1000;

/// A row that failed structural validation or type parsing, retained with
/// its original fields and every accumulated error so it can be written
/// back out verbatim by the error file writer.
#[derive(Debug, Clone)]
pub struct InvalidRow {
    pub line_number: u64,
    pub raw: HashMap<String, String>,
    pub errors: Vec<Violation>,
}

#[derive(Debug, Clone)]
pub struct ValidRow {
    pub line_number: u64,
    pub transaction: Transaction,
}

pub struct CsvReadResult {
    pub valid: Vec<ValidRow>,
    pub invalid: Vec<InvalidRow>,
    pub rows_read: u64,
}

/// Reads and validates every row of a CSV document. Fails fast (before
/// reading any row) if the header set does not contain every expected
/// column, case- and order-insensitively. `progress` is invoked roughly
/// every 1,000 rows and once more at the end; `is_cancelled` is polled at
/// each row boundary and, when true, aborts reading early.
pub fn read_csv<R: Read>(
    source: R,
    mut progress: impl FnMut(u64),
    is_cancelled: impl Fn() -> bool,
) -> Result<CsvReadResult, AccountingError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);

    let headers = reader.headers()?.clone();
    let index = header_index(&headers)?;

    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    let mut rows_read = 0u64;

    for result in reader.records() {
        if is_cancelled() {
            return Err(AccountingError::Cancelled);
        }

        let record = result?;
        rows_read += 1;
        let line_number = rows_read;

        let raw = extract_raw(&record, &index);
        match parse_row(&raw) {
            Ok(transaction) => valid.push(ValidRow { line_number, transaction }),
            Err(errors) => invalid.push(InvalidRow { line_number, raw, errors }),
        }

        if rows_read % PROGRESS_INTERVAL == 0 {
            progress(rows_read);
        }
    }

    progress(rows_read);
    Ok(CsvReadResult { valid, invalid, rows_read })
}

pub(crate) fn header_index(headers: &csv::StringRecord) -> Result<HashMap<&'static str, usize>, AccountingError> {
    let lower: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
    let mut index = HashMap::new();
    let mut missing = Vec::new();

    for expected in EXPECTED_HEADERS {
        match lower.iter().position(|h| h == expected) {
            Some(pos) => {
                index.insert(expected, pos);
            }
            None => missing.push(expected),
        }
    }

    if !missing.is_empty() {
        return Err(AccountingError::InvalidField(vec![Violation::new(
            "header",
            format!("missing required column(s): {}", missing.join(", ")),
        )]));
    }

    Ok(index)
}

fn extract_raw(record: &csv::StringRecord, index: &HashMap<&'static str, usize>) -> HashMap<String, String> {
    EXPECTED_HEADERS
        .iter()
        .map(|h| {
            let value = index.get(h).and_then(|&pos| record.get(pos)).unwrap_or("").to_string();
            (h.to_string(), value)
        })
        .collect()
}

fn parse_row(raw: &HashMap<String, String>) -> Result<Transaction, Vec<Violation>> {
    let mut errors = Vec::new();

    let portfolio_id = raw.get("portfolio_id").cloned().unwrap_or_default();
    let source_id = raw.get("source_id").cloned().unwrap_or_default();

    let security_id_raw = raw.get("security_id").cloned().unwrap_or_default();
    let security_id = if security_id_raw.is_empty() { None } else { Some(security_id_raw) };

    let transaction_type = match raw.get("transaction_type").and_then(|s| TransactionType::from_str_opt(s)) {
        Some(t) => Some(t),
        None => {
            errors.push(
                Violation::new("transaction_type", "must be one of BUY, SELL, SHORT, COVER, DEP, WD, IN, OUT")
                    .with_value(raw.get("transaction_type").cloned().unwrap_or_default()),
            );
            None
        }
    };

    let quantity = match parse_fixed_point(raw.get("quantity").map(String::as_str).unwrap_or("")) {
        Ok(d) => Some(d),
        Err(msg) => {
            errors.push(Violation::new("quantity", msg).with_value(raw.get("quantity").cloned().unwrap_or_default()));
            None
        }
    };

    let price = match parse_fixed_point(raw.get("price").map(String::as_str).unwrap_or("")) {
        Ok(d) => Some(d),
        Err(msg) => {
            errors.push(Violation::new("price", msg).with_value(raw.get("price").cloned().unwrap_or_default()));
            None
        }
    };

    let transaction_date = match NaiveDate::parse_from_str(
        raw.get("transaction_date").map(String::as_str).unwrap_or(""),
        "%Y%m%d",
    ) {
        Ok(d) => Some(d),
        Err(_) => {
            errors.push(
                Violation::new("transaction_date", "must be formatted YYYYMMDD")
                    .with_value(raw.get("transaction_date").cloned().unwrap_or_default()),
            );
            None
        }
    };

    let (Some(transaction_type), Some(quantity), Some(price), Some(transaction_date)) =
        (transaction_type, quantity, price, transaction_date)
    else {
        return Err(errors);
    };

    Transaction::build(NewTransaction {
        portfolio_id,
        security_id,
        source_id,
        transaction_type,
        quantity,
        price,
        transaction_date,
    })
    .map_err(|mut builder_errors| {
        errors.append(&mut builder_errors);
        errors
    })
}

/// Parses a decimal string into an 18-digit / 8-fractional-digit fixed
/// point value, rejecting anything wider.
fn parse_fixed_point(raw: &str) -> Result<Decimal, String> {
    let value: Decimal = raw.parse().map_err(|_| "must be a valid decimal number".to_string())?;
    if value.scale() > 8 {
        return Err("must have at most 8 fractional digits".to_string());
    }
    let digits = value.mantissa().unsigned_abs().to_string().len();
    if digits > 18 {
        return Err("must have at most 18 significant digits".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "portfolio_id,security_id,source_id,transaction_type,quantity,price,transaction_date\n";

    #[test]
    fn rejects_missing_header() {
        let csv = "portfolio_id,source_id\nP,s\n";
        let result = read_csv(Cursor::new(csv), |_| {}, || false);
        assert!(result.is_err());
    }

    #[test]
    fn header_is_case_and_order_insensitive() {
        let csv = "SOURCE_ID,Transaction_Type,Quantity,Price,Transaction_Date,Portfolio_ID,Security_ID\n\
                    src-1,DEP,5000,1,20250130,PORTFOLIO123456789012345,\n";
        let result = read_csv(Cursor::new(csv), |_| {}, || false).unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.invalid.len(), 0);
    }

    #[test]
    fn accumulates_multiple_row_errors() {
        let csv = format!("{HEADER}short,,src-1,NOPE,abc,-1,20251301\n");
        let result = read_csv(Cursor::new(csv), |_| {}, || false).unwrap();
        assert_eq!(result.invalid.len(), 1);
        assert!(result.invalid[0].errors.len() >= 3);
    }

    #[test]
    fn valid_and_invalid_rows_counted() {
        let csv = format!(
            "{HEADER}PORTFOLIO123456789012345,,src-1,DEP,5000,1,20250130\nPORTFOLIO123456789012345,,src-2,DEP,0,1,20250130\n"
        );
        let result = read_csv(Cursor::new(csv), |_| {}, || false).unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.invalid.len(), 1);
        assert_eq!(result.rows_read, 2);
    }

    #[test]
    fn cancellation_aborts_reading() {
        let csv = format!("{HEADER}PORTFOLIO123456789012345,,src-1,DEP,5000,1,20250130\n");
        let result = read_csv(Cursor::new(csv), |_| {}, || true);
        assert!(matches!(result, Err(AccountingError::Cancelled)));
    }
}
