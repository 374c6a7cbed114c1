//! Lead source row splitting.
//!
//! The first record is a header and is discarded. Every following record
//! advances the ordinal counter, whether or not it yields a lead, so ordinals
//! line up with the external job's array indices.

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::error::AppError;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// How a lead source is split into rows.
#[derive(Debug, Clone, Copy)]
pub struct RowParseOptions {
    pub delimiter: u8,
    /// Leading fields that must be present and non-empty.
    pub min_fields: usize,
}

impl Default for RowParseOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            min_fields: 2,
        }
    }
}

/// A row that will become a lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub ordinal_index: i64,
    /// Field 0.
    pub label: String,
    /// Field 1.
    pub title: String,
    /// Any fields past the title.
    pub extra: Vec<String>,
}

/// Outcome of splitting a whole source.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub rows: Vec<SourceRow>,
    /// Non-header rows seen, valid or not.
    pub total_rows: i64,
    pub skipped_rows: i64,
}

/// Splits a lead source into rows.
///
/// Non-UTF-8 input is rejected up front so nothing is written for a source
/// that cannot be read consistently.
pub fn parse_rows(bytes: &[u8], options: &RowParseOptions) -> Result<ParsedSource, AppError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|_| AppError::NotUtf8)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let mut parsed = ParsedSource::default();
    let mut record = StringRecord::new();

    loop {
        let more = reader.read_record(&mut record).map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            AppError::CsvInvalid(format!("line {line}: {e}"))
        })?;
        if !more {
            break;
        }

        let ordinal_index = parsed.total_rows;
        parsed.total_rows += 1;

        match row_from_record(&record, ordinal_index, options.min_fields) {
            Some(row) => parsed.rows.push(row),
            None => parsed.skipped_rows += 1,
        }
    }

    Ok(parsed)
}

fn row_from_record(record: &StringRecord, ordinal_index: i64, min_fields: usize) -> Option<SourceRow> {
    if record.len() < min_fields {
        return None;
    }
    if record.iter().take(min_fields).any(str::is_empty) {
        return None;
    }

    Some(SourceRow {
        ordinal_index,
        label: record.get(0).unwrap_or_default().to_string(),
        title: record.get(1).unwrap_or_default().to_string(),
        extra: record.iter().skip(2).map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ParsedSource {
        parse_rows(input.as_bytes(), &RowParseOptions::default()).expect("parse should succeed")
    }

    fn ordinals(parsed: &ParsedSource) -> Vec<i64> {
        parsed.rows.iter().map(|r| r.ordinal_index).collect()
    }

    #[test]
    fn test_header_only_yields_nothing() {
        let parsed = parse("name,title\n");
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.total_rows, 0);
        assert_eq!(parsed.skipped_rows, 0);

        assert_eq!(parse("").total_rows, 0);
    }

    #[test]
    fn test_all_valid_rows_are_dense() {
        let parsed = parse("name,title\nacme,Hello Acme\nglobex,Hi Globex\ninitech,Yo Initech\n");
        assert_eq!(parsed.total_rows, 3);
        assert_eq!(parsed.skipped_rows, 0);
        assert_eq!(ordinals(&parsed), vec![0, 1, 2]);
        assert_eq!(parsed.rows[1].label, "globex");
        assert_eq!(parsed.rows[1].title, "Hi Globex");
    }

    #[test]
    fn test_short_row_is_skipped_but_counted() {
        let parsed = parse("name,title\nacme,Hello\nlonely\nglobex,Hi\n");
        assert_eq!(parsed.total_rows, 3);
        assert_eq!(parsed.skipped_rows, 1);
        assert_eq!(ordinals(&parsed), vec![0, 2]);
    }

    #[test]
    fn test_empty_required_field_is_skipped() {
        let parsed = parse("name,title\nacme,\n  ,Title\nok,Fine\n");
        assert_eq!(parsed.total_rows, 3);
        assert_eq!(parsed.skipped_rows, 2);
        assert_eq!(ordinals(&parsed), vec![2]);
    }

    #[test]
    fn test_blank_lines_are_not_rows() {
        let parsed = parse("name,title\n\nacme,Hello\n\n\nglobex,Hi\n\n");
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(ordinals(&parsed), vec![0, 1]);
    }

    #[test]
    fn test_quoted_delimiter_and_extras() {
        let parsed = parse("name,title,city\n\"Acme, Inc.\",\" Welcome \",Springfield,extra\n");
        let row = &parsed.rows[0];
        assert_eq!(row.label, "Acme, Inc.");
        assert_eq!(row.title, "Welcome");
        assert_eq!(row.extra, vec!["Springfield".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_custom_delimiter_and_crlf() {
        let options = RowParseOptions {
            delimiter: b';',
            min_fields: 2,
        };
        let parsed = parse_rows(b"name;title\r\na;b\r\nc;d\r\n", &options).unwrap();
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(parsed.rows[1].title, "d");
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut input = UTF8_BOM.to_vec();
        input.extend_from_slice(b"name,title\nacme,Hello\n");
        let parsed = parse_rows(&input, &RowParseOptions::default()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].label, "acme");
    }

    #[test]
    fn test_non_utf8_is_rejected() {
        let err = parse_rows(b"name,title\n\xff\xfe,x\n", &RowParseOptions::default()).unwrap_err();
        assert!(matches!(err, AppError::NotUtf8));
    }

    #[test]
    fn test_higher_minimum_field_count() {
        let options = RowParseOptions {
            delimiter: b',',
            min_fields: 3,
        };
        let parsed = parse_rows(b"a,b,c\n1,2\n1,2,3\n", &options).unwrap();
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(ordinals(&parsed), vec![1]);
    }
}
