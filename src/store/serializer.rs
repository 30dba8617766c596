//! Table serializer: ragged string tables ⇄ byte streams
//!
//! Every persisted table in branchfs is a `Vec<Vec<String>>`: a sequence
//! of rows, each row a sequence of string cells. The wire form is a
//! counted-length text grammar over single-space separators:
//!
//! ```text
//! STREAM := ROW_COUNT (' ' ROW)*
//! ROW    := CELL_COUNT (' ' CELL)*
//! CELL   := LEN ' ' RAW_BYTES_OF_LENGTH_LEN
//! ```
//!
//! Counts are ASCII decimal. Cells are length-prefixed raw bytes, so they
//! may contain spaces and newlines. The empty table serializes to the
//! single character `0`. The stream is represented as an integer sequence
//! (one element per byte) because it feeds straight into the FFT codec.

use crate::error::{VfsError, VfsResult};

/// Rows of string cells, the unit every store persists.
pub type Table = Vec<Vec<String>>;

/// Encode a table into its integer byte stream.
pub fn serialize(table: &[Vec<String>]) -> Vec<i64> {
    let mut text = String::new();
    text.push_str(&table.len().to_string());
    for row in table {
        text.push(' ');
        text.push_str(&row.len().to_string());
        for cell in row {
            text.push(' ');
            text.push_str(&cell.len().to_string());
            text.push(' ');
            text.push_str(cell);
        }
    }
    text.bytes().map(i64::from).collect()
}

/// Decode an integer byte stream back into a table.
///
/// Leading non-digit bytes before each count are skipped. Truncated
/// streams, counts past the end of input, byte values outside `0..=255`,
/// and non-UTF-8 cell payloads all fail with [`VfsError::Corruption`].
pub fn deserialize(sequence: &[i64]) -> VfsResult<Table> {
    if sequence.is_empty() {
        return Ok(Vec::new());
    }

    let mut bytes = Vec::with_capacity(sequence.len());
    for &v in sequence {
        let b = u8::try_from(v).map_err(|_| {
            VfsError::Corruption(format!("stream element {} is not a byte", v))
        })?;
        bytes.push(b);
    }

    let mut reader = StreamReader::new(&bytes);
    let row_count = reader.read_count()?;
    let mut table = Vec::with_capacity(row_count.min(1 << 16));
    for _ in 0..row_count {
        let cell_count = reader.read_count()?;
        let mut row = Vec::with_capacity(cell_count.min(1 << 16));
        for _ in 0..cell_count {
            let len = reader.read_count()?;
            row.push(reader.read_cell(len)?);
        }
        table.push(row);
    }
    Ok(table)
}

/// Cursor over the raw byte stream.
struct StreamReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Skip leading non-digits, then parse a decimal count and consume the
    /// single separator space that follows it.
    fn read_count(&mut self) -> VfsResult<usize> {
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(VfsError::Corruption(
                "truncated stream: expected a count".to_string(),
            ));
        }
        let mut value: usize = 0;
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(usize::from(self.bytes[self.pos] - b'0')))
                .ok_or_else(|| VfsError::Corruption("count overflows".to_string()))?;
            self.pos += 1;
        }
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b' ' {
            self.pos += 1;
        }
        Ok(value)
    }

    /// Consume exactly `len` raw bytes as a cell, plus its trailing space.
    fn read_cell(&mut self, len: usize) -> VfsResult<String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                VfsError::Corruption(format!(
                    "cell length {} exceeds remaining {} bytes",
                    len,
                    self.bytes.len() - self.pos
                ))
            })?;
        let cell = String::from_utf8(self.bytes[self.pos..end].to_vec())
            .map_err(|_| VfsError::Corruption("cell payload is not UTF-8".to_string()))?;
        self.pos = end;
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b' ' {
            self.pos += 1;
        }
        Ok(cell)
    }
}
