//! CSV table IO with encoding and delimiter handling.
//!
//! Input tables are streamed record by record; every data row becomes a
//! [`Row`] keyed by header name. Output tables are written from the rows a
//! file pass buffered. No mapping-specific logic here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{TableError, TableResult};
use crate::transform::dsl::{value_text, Row};

pub const DEFAULT_DELIMITER: char = ',';
pub const DEFAULT_ENCODING: &str = "utf-8";

/// How to read an input table. `None` means auto-detect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFormat {
    pub delimiter: Option<char>,
    pub encoding: Option<String>,
}

impl Default for InputFormat {
    fn default() -> Self {
        Self {
            delimiter: Some(DEFAULT_DELIMITER),
            encoding: Some(DEFAULT_ENCODING.to_string()),
        }
    }
}

impl InputFormat {
    /// Detect both encoding and delimiter
    pub fn auto() -> Self {
        Self { delimiter: None, encoding: None }
    }

    fn is_plain_utf8(&self) -> bool {
        self.delimiter.is_some() && self.encoding.as_deref().is_some_and(is_utf8_label)
    }
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let (charset, _confidence, _language) = chardet::detect(bytes);

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" | "utf-8-sig" => DEFAULT_ENCODING.to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

fn is_utf8_label(label: &str) -> bool {
    matches!(label.to_lowercase().as_str(), "utf-8" | "utf8" | "ascii" | "utf-8-sig")
}

/// Decode bytes to a string using the given encoding label
pub fn decode_content(bytes: &[u8], encoding: &str) -> TableResult<String> {
    if is_utf8_label(encoding) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|e| TableError::EncodingError(e.to_string()));
    }
    let codec = encoding_rs::Encoding::for_label(encoding.trim().as_bytes())
        .ok_or_else(|| TableError::EncodingError(format!("unsupported encoding '{}'", encoding)))?;
    let (decoded, _, _) = codec.decode(bytes);
    Ok(decoded.into_owned())
}

/// Pick the separator occurring most often in the first line. Ties go to
/// the comma.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best = DEFAULT_DELIMITER;
    let mut best_count = 0;
    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best = sep;
        }
    }
    best
}

/// A decoded data row
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Physical line the record starts on; the header is line 1
    pub line_number: usize,
    pub row: Row,
}

/// Failure while reading one record
#[derive(Debug)]
pub enum RowReadError {
    /// Record is readable but a field is not valid text. Reading continues.
    Undecodable {
        line_number: usize,
        message: String,
        /// Lossy view of the record
        snapshot: Row,
    },
    /// Reading cannot continue
    Fatal(TableError),
}

/// Streaming reader over an input table
pub struct InputTable {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    record: csv::ByteRecord,
    records_read: usize,
    encoding: String,
    delimiter: char,
    finished: bool,
}

impl InputTable {
    /// Open a file. With an explicit delimiter and UTF-8 the file is
    /// streamed; anything to detect or transcode is read up front.
    pub fn open(path: impl AsRef<Path>, format: &InputFormat) -> TableResult<Self> {
        let path = path.as_ref();
        if format.is_plain_utf8() {
            let file = File::open(path)?;
            return Self::from_reader(
                Box::new(file),
                DEFAULT_ENCODING.to_string(),
                format.delimiter.unwrap_or(DEFAULT_DELIMITER),
            );
        }
        Self::from_bytes(std::fs::read(path)?, format)
    }

    /// Read a table held in memory
    pub fn from_bytes(bytes: Vec<u8>, format: &InputFormat) -> TableResult<Self> {
        let encoding = match format.encoding {
            Some(ref label) => label.clone(),
            None => detect_encoding(&bytes),
        };

        // UTF-8 stays as bytes so bad records surface one by one
        let bytes = if is_utf8_label(&encoding) {
            bytes
        } else {
            decode_content(&bytes, &encoding)?.into_bytes()
        };

        let delimiter = match format.delimiter {
            Some(d) => d,
            None => detect_delimiter(&String::from_utf8_lossy(first_line(&bytes))),
        };

        Self::from_reader(Box::new(Cursor::new(bytes)), encoding, delimiter)
    }

    fn from_reader(source: Box<dyn Read + Send>, encoding: String, delimiter: char) -> TableResult<Self> {
        if !delimiter.is_ascii() {
            return Err(TableError::InvalidDelimiter(delimiter));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .flexible(true)
            .has_headers(true)
            .from_reader(source);

        let raw_headers = reader.byte_headers()?;
        if raw_headers.is_empty() {
            return Err(TableError::NoHeaders);
        }

        let headers = raw_headers
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let name = std::str::from_utf8(field).map_err(|e| {
                    TableError::EncodingError(format!("header column {} is not valid UTF-8: {}", i + 1, e))
                })?;
                Ok(if i == 0 { name.trim_start_matches('\u{feff}') } else { name }.to_string())
            })
            .collect::<TableResult<Vec<String>>>()?;

        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(TableError::NoHeaders);
        }

        Ok(Self {
            reader,
            headers,
            record: csv::ByteRecord::new(),
            records_read: 0,
            encoding,
            delimiter,
            finished: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    fn decode_record(&self, line_number: usize) -> Result<TableRow, RowReadError> {
        let mut row = Row::new();
        let mut bad_column = None;

        for (i, header) in self.headers.iter().enumerate() {
            let value = match self.record.get(i) {
                None => Value::Null,
                Some(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => Value::String(text.to_string()),
                    Err(_) => {
                        bad_column.get_or_insert_with(|| header.clone());
                        Value::String(String::from_utf8_lossy(bytes).into_owned())
                    }
                },
            };
            row.insert(header.clone(), value);
        }

        match bad_column {
            None => Ok(TableRow { line_number, row }),
            Some(column) => Err(RowReadError::Undecodable {
                line_number,
                message: format!("invalid UTF-8 in column '{}'", column),
                snapshot: row,
            }),
        }
    }
}

impl Iterator for InputTable {
    type Item = Result<TableRow, RowReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.records_read += 1;
                let line_number = self
                    .record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(self.records_read + 1);
                Some(self.decode_record(line_number))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(RowReadError::Fatal(err.into())))
            }
        }
    }
}

fn first_line(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    &bytes[..end]
}

/// Write `rows` as a comma-separated UTF-8 table, creating parent
/// directories. The header is the key order of the first row; absent values
/// are empty cells. Returns the number of data rows written.
pub fn write_table(path: impl AsRef<Path>, rows: &[Row]) -> TableResult<usize> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let headers: Vec<&String> = first.keys().collect();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(
            headers
                .iter()
                .map(|h| row.get(h.as_str()).map(value_text).unwrap_or_default().into_owned()),
        )?;
    }
    writer.flush()?;
    Ok(rows.len())
}
