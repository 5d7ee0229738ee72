// Source code system import from CSV/TSV files

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("The file contains no source codes")]
    Empty,
    #[error("Line {line}: expected at least {required} columns, found {found}")]
    MissingColumns {
        line: u64,
        required: usize,
        found: usize,
    },
    #[error("Line {line}: source code is empty")]
    EmptyCode { line: u64 },
    #[error("Line {line}: duplicate source code '{code}' (first seen on line {first_line})")]
    DuplicateCode {
        code: String,
        line: u64,
        first_line: u64,
    },
    #[error("Column indexes are 1-based; got {0}")]
    InvalidColumn(usize),
    #[error("Could not read file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Could not open file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub delimiter: u8,
    pub has_header: bool,
    /// 1-based
    pub code_column: usize,
    /// 1-based
    pub display_column: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            code_column: 1,
            display_column: 2,
        }
    }
}

impl ImportOptions {
    /// Tab for `.tsv`/`.txt`, comma otherwise.
    pub fn delimiter_for_path(path: &Path) -> u8 {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("tsv") | Some("txt") => b'\t',
            _ => b',',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedCode {
    pub index: u64,
    pub code: String,
    pub display: String,
}

/// Source code system ready to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedCodeSet {
    pub name: String,
    pub version: String,
    pub codes: Vec<ImportedCode>,
}

pub fn parse_source<R: Read>(
    reader: R,
    options: &ImportOptions,
) -> Result<Vec<ImportedCode>, ImportError> {
    for column in [options.code_column, options.display_column] {
        if column == 0 {
            return Err(ImportError::InvalidColumn(column));
        }
    }
    let required = options.code_column.max(options.display_column);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut codes = Vec::new();
    let mut seen: HashMap<String, u64> = HashMap::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        // Blank lines in exported spreadsheets.
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if record.len() < required {
            return Err(ImportError::MissingColumns {
                line,
                required,
                found: record.len(),
            });
        }

        let code = record.get(options.code_column - 1).unwrap_or_default();
        let display = record.get(options.display_column - 1).unwrap_or_default();
        if code.is_empty() {
            return Err(ImportError::EmptyCode { line });
        }
        if let Some(first_line) = seen.get(code) {
            return Err(ImportError::DuplicateCode {
                code: code.to_string(),
                line,
                first_line: *first_line,
            });
        }
        seen.insert(code.to_string(), line);

        codes.push(ImportedCode {
            index: codes.len() as u64,
            code: code.to_string(),
            display: display.to_string(),
        });
    }

    if codes.is_empty() {
        return Err(ImportError::Empty);
    }
    debug!(count = codes.len(), "Parsed source codes");
    Ok(codes)
}

pub fn parse_source_file(
    path: &Path,
    options: &ImportOptions,
) -> Result<Vec<ImportedCode>, ImportError> {
    let file = std::fs::File::open(path)?;
    let codes = parse_source(file, options)?;
    info!(path = %path.display(), count = codes.len(), "Loaded source code file");
    Ok(codes)
}
