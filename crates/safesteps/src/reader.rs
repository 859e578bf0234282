//! CSV input: turns a crash export into [`RawRow`]s.
//!
//! The reader is `flexible`: rows shorter than the header simply lack the
//! trailing columns, and longer rows keep only the named ones. A line that
//! cannot be decoded becomes a `read` rejection instead of ending the run.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use safesteps_core::models::RawRow;

use crate::ingest::{RejectStage, Rejection};

/// Open `path` as a headed CSV file.
pub fn open(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))
}

/// Wrap any reader as a headed, flexible CSV reader.
pub fn from_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().flexible(true).from_reader(input)
}

/// Iterate the data rows of `reader`, numbered from 1.
///
/// Fails only if the header line itself cannot be read.
pub fn rows<R: Read>(
    mut reader: csv::Reader<R>,
) -> Result<impl Iterator<Item = Result<RawRow, Rejection>>> {
    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();

    Ok(reader
        .into_records()
        .enumerate()
        .map(move |(i, record)| {
            let row = i as u64 + 1;
            match record {
                Ok(record) => Ok(RawRow::new(
                    row,
                    headers
                        .iter()
                        .zip(record.iter())
                        .map(|(name, value)| (name.clone(), value.to_string()))
                        .collect(),
                )),
                Err(e) => Err(Rejection {
                    row,
                    key: format!("row {}", row),
                    stage: RejectStage::Read,
                    reason: e.to_string(),
                }),
            }
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_keyed_by_header() {
        let data = "CRASH DATE,BOROUGH,LATITUDE\n12/01/2023,BROOKLYN,40.68\n01/02/2024,,40.7\n";
        let rows: Vec<_> = rows(from_reader(data.as_bytes())).unwrap().collect();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.row, 1);
        assert_eq!(first.get("CRASH DATE"), Some("12/01/2023"));
        assert_eq!(first.get("BOROUGH"), Some("BROOKLYN"));

        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.row, 2);
        assert_eq!(second.get("BOROUGH"), Some(""));
    }

    #[test]
    fn test_short_rows_lack_trailing_columns() {
        let data = "CRASH DATE,LATITUDE,LONGITUDE\n12/01/2023,40.68\n";
        let rows: Vec<_> = rows(from_reader(data.as_bytes())).unwrap().collect();
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.get("LATITUDE"), Some("40.68"));
        assert_eq!(row.get("LONGITUDE"), None);
    }

    #[test]
    fn test_invalid_utf8_is_read_rejection() {
        let mut data = b"CRASH DATE,BOROUGH\n12/01/2023,".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"\n12/02/2023,QUEENS\n");
        let rows: Vec<_> = rows(from_reader(data.as_slice())).unwrap().collect();
        assert_eq!(rows.len(), 2);
        let rejection = rows[0].as_ref().unwrap_err();
        assert_eq!(rejection.stage, RejectStage::Read);
        assert_eq!(rejection.key, "row 1");
        assert!(rows[1].is_ok());
    }
}
