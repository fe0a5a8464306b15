//! CSV historical trade data.

use crate::{BacktestError, Result};
use std::path::Path;
use types::{Price, Quantity, Symbol, TimestampMs};

/// One historical trade: `timestamp,symbol,price,volume`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub timestamp_ms: TimestampMs,
    pub symbol: Symbol,
    pub price: Price,
    pub volume: Quantity,
}

/// Load trade records from a CSV file and sort them by timestamp.
///
/// Blank lines and `#` comments are skipped; a first line mentioning
/// `timestamp` or `symbol` is treated as a header. Malformed rows surface
/// as [`BacktestError::Parse`] with their line number.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<TradeRecord>> {
    let text = std::fs::read_to_string(path)?;
    parse_csv(&text)
}

pub(crate) fn parse_csv(text: &str) -> Result<Vec<TradeRecord>> {
    let mut records = Vec::new();
    let mut first_content_line = true;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if first_content_line {
            first_content_line = false;
            let lower = line.to_ascii_lowercase();
            if lower.contains("timestamp") || lower.contains("symbol") {
                continue;
            }
        }

        records.push(parse_row(line, line_no)?);
    }

    records.sort_by_key(|r| r.timestamp_ms);
    Ok(records)
}

fn parse_row(line: &str, line_no: usize) -> Result<TradeRecord> {
    let mut fields = line.split(',').map(str::trim);
    let (Some(ts), Some(symbol), Some(price), Some(volume)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(BacktestError::Parse {
            line: line_no,
            message: "expected timestamp,symbol,price,volume".to_string(),
        });
    };

    let timestamp_ms: TimestampMs = ts.parse().map_err(|_| BacktestError::Parse {
        line: line_no,
        message: format!("bad timestamp '{}'", ts),
    })?;
    let price: f64 = price.parse().map_err(|_| BacktestError::Parse {
        line: line_no,
        message: format!("bad price '{}'", price),
    })?;
    let volume: u64 = volume.parse().map_err(|_| BacktestError::Parse {
        line: line_no,
        message: format!("bad volume '{}'", volume),
    })?;

    Ok(TradeRecord {
        timestamp_ms,
        symbol: symbol.to_string(),
        price: Price::from_float(price),
        volume: Quantity(volume),
    })
}

/// Records for one symbol, preserving order.
pub fn filter_by_symbol(records: &[TradeRecord], symbol: &str) -> Vec<TradeRecord> {
    records
        .iter()
        .filter(|r| r.symbol == symbol)
        .cloned()
        .collect()
}

/// Records inside `[start, end]`, preserving order.
pub fn filter_by_time_range(
    records: &[TradeRecord],
    start: TimestampMs,
    end: TimestampMs,
) -> Vec<TradeRecord> {
    records
        .iter()
        .filter(|r| r.timestamp_ms >= start && r.timestamp_ms <= end)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
timestamp,symbol,price,volume
# warm-up prints
1000,AAPL,150.0,300
3000,MSFT,300.5,100
2000,AAPL,151.0,200
";

    #[test]
    fn test_parse_sorts_by_timestamp() {
        let records = parse_csv(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp_ms, 1000);
        assert_eq!(records[1].timestamp_ms, 2000);
        assert_eq!(records[2].timestamp_ms, 3000);
        assert_eq!(records[1].price, Price::from_float(151.0));
        assert_eq!(records[1].volume, Quantity(200));
    }

    #[test]
    fn test_header_and_comments_skipped() {
        let records = parse_csv("timestamp,symbol,price,volume\n1,X,1.0,1\n").unwrap();
        assert_eq!(records.len(), 1);

        // Headerless data also parses.
        let records = parse_csv("1,X,1.0,1\n").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let err = parse_csv("1000,AAPL,150.0,300\nnot-a-row\n").unwrap_err();
        match err {
            BacktestError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bad_number_reports_field() {
        let err = parse_csv("1000,AAPL,abc,300\n").unwrap_err();
        match err {
            BacktestError::Parse { line, message } => {
                assert_eq!(line, 1);
                assert!(message.contains("bad price"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_filters() {
        let records = parse_csv(SAMPLE).unwrap();
        let aapl = filter_by_symbol(&records, "AAPL");
        assert_eq!(aapl.len(), 2);

        let windowed = filter_by_time_range(&records, 1500, 3000);
        assert_eq!(windowed.len(), 2);
        assert!(windowed.iter().all(|r| r.timestamp_ms >= 1500));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        match load_csv("/nonexistent/trades.csv") {
            Err(BacktestError::Io(_)) => {}
            other => panic!("unexpected result {:?}", other.map(|v| v.len())),
        }
    }
}
