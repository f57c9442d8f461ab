use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord};

use super::{AlignError, DenseRecord, DenseSeries, SparseSeries};

const DATE_COLUMN: &str = "Date";
const TIME_COLUMN: &str = "Time";
const CLOSE_COLUMN: &str = "Close";

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S", "%H:%M", "%H%M"];

/// Parse the underlying table: needs `Date` and `Close`, `Time` is optional.
pub fn parse_dense_csv(input: &[u8]) -> Result<DenseSeries, AlignError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
    let headers = reader.headers()?.clone();
    let date_idx = column_index(&headers, DATE_COLUMN)
        .ok_or_else(|| AlignError::Schema(format!("missing column '{DATE_COLUMN}'")))?;
    let close_idx = column_index(&headers, CLOSE_COLUMN)
        .ok_or_else(|| AlignError::Schema(format!("missing column '{CLOSE_COLUMN}'")))?;
    let time_idx = column_index(&headers, TIME_COLUMN);

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let date = record.get(date_idx).unwrap_or("").trim().to_string();
        let close = parse_number(&record, close_idx, row, CLOSE_COLUMN)?;
        let time = time_idx.and_then(|idx| record.get(idx)).map(str::trim);
        let timestamp = parse_timestamp(&date, time);
        records.push(DenseRecord {
            date,
            timestamp,
            close,
        });
    }
    Ok(DenseSeries::new(records))
}

/// Parse the backtest table: one return column once unnamed index columns are dropped.
pub fn parse_sparse_csv(input: &[u8]) -> Result<SparseSeries, AlignError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
    let headers = reader.headers()?.clone();
    let named: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !is_unnamed_column(h))
        .collect();
    let (value_idx, name) = match named.as_slice() {
        [single] => *single,
        _ => {
            let names: Vec<&str> = named.iter().map(|(_, h)| *h).collect();
            return Err(AlignError::Schema(format!(
                "expected exactly one return column, found {}: {:?}",
                names.len(),
                names
            )));
        }
    };
    let name = name.trim().to_string();

    let mut values = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        values.push(parse_number(&record, value_idx, row, &name)?);
    }
    Ok(SparseSeries::new(name, values))
}

/// Index columns written without a header (or with a pandas `Unnamed: N` header).
fn is_unnamed_column(header: &str) -> bool {
    let header = header.trim();
    header.is_empty() || header.starts_with("Unnamed")
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn parse_number(
    record: &StringRecord,
    idx: usize,
    row: usize,
    column: &str,
) -> Result<f64, AlignError> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AlignError::Parse {
            row: row + 1,
            column: column.to_string(),
            value: raw.to_string(),
        })
}

fn parse_timestamp(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    if let Some(time) = time.filter(|t| !t.is_empty()) {
        let day = parse_date(date)?;
        return TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())
            .map(|t| day.and_time(t));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(date, fmt).ok())
        .or_else(|| parse_date(date).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dense_with_time_column() {
        let csv = b"Date,Time,Open,High,Low,Close\n\
2022-04-22,09:30,4300.0,4301.0,4299.5,4300.5\n\
2022-04-22,09:31,4300.5,4302.0,4300.0,4301.25\n";
        let dense = parse_dense_csv(csv).unwrap();
        assert_eq!(dense.len(), 2);
        assert_eq!(dense.records[1].close, 4301.25);
        assert_eq!(dense.date_range(), Some(("2022-04-22", "2022-04-22")));
        let ts = dense.records[1].timestamp.unwrap();
        assert_eq!(ts.to_string(), "2022-04-22 09:31:00");
    }

    #[test]
    fn test_parse_dense_keeps_unparsed_dates() {
        let csv = b"Date,Close\nsometime,10\n2022-04-25 16:00:00,11\n";
        let dense = parse_dense_csv(csv).unwrap();
        assert_eq!(dense.records[0].timestamp, None);
        assert_eq!(dense.records[0].date, "sometime");
        assert!(dense.records[1].timestamp.is_some());
    }

    #[test]
    fn test_parse_dense_missing_close() {
        let csv = b"Date,Open\n2022-04-22,1.0\n";
        match parse_dense_csv(csv) {
            Err(AlignError::Schema(msg)) => assert!(msg.contains("Close")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_dense_missing_date() {
        let csv = b"Close\n1.0\n";
        assert!(matches!(parse_dense_csv(csv), Err(AlignError::Schema(_))));
    }

    #[test]
    fn test_parse_dense_bad_close_value() {
        let csv = b"Date,Close\n2022-04-22,1.0\n2022-04-23,n/a\n";
        match parse_dense_csv(csv) {
            Err(AlignError::Parse { row, column, value }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "Close");
                assert_eq!(value, "n/a");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_sparse_strips_unnamed_index() {
        let csv = b",Returns\n0,0.01\n1,-0.005\n2,0.02\n";
        let sparse = parse_sparse_csv(csv).unwrap();
        assert_eq!(sparse.name, "Returns");
        assert_eq!(sparse.values, vec![0.01, -0.005, 0.02]);

        let csv = b"Unnamed: 0,pnl\n0,0.5\n";
        let sparse = parse_sparse_csv(csv).unwrap();
        assert_eq!(sparse.name, "pnl");
        assert_eq!(sparse.values, vec![0.5]);
    }

    #[test]
    fn test_parse_sparse_requires_single_column() {
        let csv = b"a,b\n1,2\n";
        assert!(matches!(parse_sparse_csv(csv), Err(AlignError::Schema(_))));
        let csv = b",Unnamed: 1\n1,2\n";
        assert!(matches!(parse_sparse_csv(csv), Err(AlignError::Schema(_))));
    }

    #[test]
    fn test_parse_rejects_non_finite_cells() {
        match parse_sparse_csv(b"Returns\n0.01\nNaN\n0.02\n") {
            Err(AlignError::Parse { row, column, value }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "Returns");
                assert_eq!(value, "NaN");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        for cell in ["inf", "-inf", "nan"] {
            let csv = format!("Returns\n{cell}\n");
            assert!(
                matches!(parse_sparse_csv(csv.as_bytes()), Err(AlignError::Parse { .. })),
                "cell={cell}"
            );
        }
        let csv = b"Date,Close\n2022-04-22,inf\n";
        assert!(matches!(parse_dense_csv(csv), Err(AlignError::Parse { .. })));
    }

    #[test]
    fn test_parse_sparse_empty_body() {
        let sparse = parse_sparse_csv(b"Returns\n").unwrap();
        assert!(sparse.is_empty());
    }
}
