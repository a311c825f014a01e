//! JSON Lines reading and writing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::batch::BatchError;

/// Read one value per non-blank line. The first malformed line is an
/// error carrying its 1-based line number.
pub fn read_jsonl<T: DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>, BatchError> {
    let mut items = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line).map_err(|source| BatchError::LineError {
            line: i + 1,
            source,
        })?;
        items.push(item);
    }
    Ok(items)
}

pub fn read_jsonl_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, BatchError> {
    let file = File::open(path)?;
    read_jsonl(BufReader::new(file))
}

/// Write one compact JSON value per line. Non-ASCII text is kept as is.
pub fn write_jsonl<T: Serialize, W: Write>(writer: W, items: &[T]) -> Result<(), BatchError> {
    let mut writer = BufWriter::new(writer);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_jsonl_file<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<(), BatchError> {
    write_jsonl(File::create(path)?, items)
}
