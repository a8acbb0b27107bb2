//! FASTA header extraction.

use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Marker that opens a FASTA record header line.
pub const HEADER_MARKER: char = '>';

pub type TargetIdentifier = String;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Parse error: cannot open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("Parse error: line {line} is not valid UTF-8")]
    InvalidEncoding { line: usize },

    #[error("Parse error: read failed at line {line}: {source}")]
    Read {
        line: usize,
        source: std::io::Error,
    },
}

impl ParseError {
    /// The content is at fault rather than the local filesystem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ParseError::InvalidEncoding { .. })
    }
}

/// Collect the identifier of every header line, in file order.
///
/// The identifier is the rest of the line after the marker, untouched apart
/// from the line terminator. A file without headers yields an empty list.
pub async fn extract(path: &Path) -> Result<Vec<TargetIdentifier>, ParseError> {
    let file = File::open(path).await.map_err(|source| ParseError::Open {
        path: path.display().to_string(),
        source,
    })?;

    let mut lines = BufReader::new(file).lines();
    let mut identifiers = Vec::new();
    let mut line_no = 0;

    loop {
        line_no += 1;
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(ParseError::InvalidEncoding { line: line_no })
            }
            Err(source) => {
                return Err(ParseError::Read {
                    line: line_no,
                    source,
                })
            }
        };

        if let Some(id) = line.strip_prefix(HEADER_MARKER) {
            identifiers.push(id.to_string());
        }
    }

    Ok(identifiers)
}
