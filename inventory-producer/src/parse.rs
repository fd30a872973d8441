//! Turning raw uploaded bytes into [`RawRecord`]s.
use csv::{ReaderBuilder, StringRecord};
use inventory_common::message::{RawRecord, OVERFLOW_KEY};

use crate::error::SourceReadError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode the whole input as UTF-8, dropping a leading byte-order mark.
pub fn decode(raw: &[u8]) -> Result<&str, SourceReadError> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|e| SourceReadError::Decode {
        valid_up_to: e.valid_up_to(),
    })
}

/// Records of a delimited text whose first line is the header row.
///
/// Rows shorter than the header get `None` for the missing trailing columns, extra fields
/// of longer rows go to the record's overflow. Blank lines are skipped. A header naming a
/// column [`OVERFLOW_KEY`] is rejected.
pub struct Records<'a> {
    header: Vec<String>,
    reader: csv::Reader<&'a [u8]>,
    row: StringRecord,
}

impl<'a> Records<'a> {
    pub fn new(text: &'a str) -> Result<Self, SourceReadError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());
        let header: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
        if let Some(position) = header.iter().position(|column| column == OVERFLOW_KEY) {
            return Err(SourceReadError::ReservedColumn {
                column: OVERFLOW_KEY.to_owned(),
                position: position + 1,
            });
        }

        Ok(Self {
            header,
            reader,
            row: StringRecord::new(),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new();
        for (index, column) in self.header.iter().enumerate() {
            record.insert(column.as_str(), self.row.get(index).map(str::to_owned));
        }
        for extra in self.row.iter().skip(self.header.len()) {
            record.push_overflow(extra);
        }
        record
    }
}

impl Iterator for Records<'_> {
    type Item = Result<RawRecord, SourceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(self.to_record())),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> Vec<RawRecord> {
        Records::new(decode(raw).unwrap())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_leading_bom_is_dropped() {
        let records = parse(b"\xEF\xBB\xBFproduct_id,quantity\nP1,5\n");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("product_id"), Some("P1"));
        assert_eq!(records[0].get("quantity"), Some("5"));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        match decode(b"a,b\n1,\xFF\n") {
            Err(SourceReadError::Decode { valid_up_to }) => assert_eq!(valid_up_to, 6),
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_rows_get_null_columns() {
        let records = parse(b"a,b,c\n1\n1,2\n");

        assert_eq!(records[0].to_body().unwrap(), r#"{"a":"1","b":null,"c":null}"#);
        assert_eq!(records[1].to_body().unwrap(), r#"{"a":"1","b":"2","c":null}"#);
    }

    #[test]
    fn test_long_rows_keep_extra_fields_in_order() {
        let records = parse(b"a,b\n1,2,3,4\n");

        assert_eq!(records[0].get("b"), Some("2"));
        assert_eq!(records[0].overflow(), ["3", "4"]);
    }

    #[test]
    fn test_quoting_and_crlf() {
        let records = parse(b"name,note\r\n\"Widget, large\",\"said \"\"hi\"\"\"\r\n");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some("Widget, large"));
        assert_eq!(records[0].get("note"), Some("said \"hi\""));
    }

    #[test]
    fn test_blank_lines_and_header_only_input() {
        assert_eq!(parse(b"a,b\n\n1,2\n\n").len(), 1);
        assert!(parse(b"a,b\n").is_empty());
        assert!(parse(b"").is_empty());
    }

    #[test]
    fn test_rows_need_not_be_distinct() {
        let records = parse(b"a\n1\n1\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
    }

    #[test]
    fn test_overflow_column_in_header_is_rejected() {
        let text = decode(b"a,__overflow__\n1,2,3\n").unwrap();
        match Records::new(text) {
            Err(SourceReadError::ReservedColumn { column, position }) => {
                assert_eq!(column, "__overflow__");
                assert_eq!(position, 2);
            }
            Err(other) => panic!("expected a reserved column error, got {other:?}"),
            Ok(_) => panic!("expected a reserved column error"),
        }
    }

    #[test]
    fn test_header_is_exposed() {
        let text = decode(b"product_id,location\n").unwrap();
        let records = Records::new(text).unwrap();
        assert_eq!(records.header(), ["product_id", "location"]);
    }
}
