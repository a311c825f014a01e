//! Batch API plumbing.
//!
//! Requests go out as one JSON line per chunk; results come back as one
//! JSON line per request. Both sides are keyed by a [`CustomId`] that
//! encodes the document and the chunk, which is all the reconciliation
//! step needs to put spans back in document coordinates.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod job;
pub mod output;
pub mod request;

pub use job::{BatchJob, JobError, JobStatus};
pub use output::{parse_line, parse_output, partition, Annotation, FailedLine, ParsedLine};
pub use request::{response_schema, BatchConfig, RequestBuilder, RequestLine};

/// Prefix shared by every request id.
pub const CUSTOM_ID_PREFIX: &str = "disc-";

/// Errors from batch file handling.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Line {line}: {source}")]
    LineError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid custom_id: {0}")]
    InvalidCustomId(String),

    #[error("Batch config validation failed: {0}")]
    ValidationError(String),
}

/// Request identifier: `disc-{document_id}` for a document sent whole,
/// `disc-{document_id}-c{chunk_index}` for one chunk of a longer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomId {
    pub document_id: String,
    pub chunk_index: Option<usize>,
}

impl CustomId {
    /// Id for a document that fits in a single request.
    pub fn whole(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index: None,
        }
    }

    /// Id for chunk `index` of a document.
    pub fn chunk(document_id: impl Into<String>, index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index: Some(index),
        }
    }

    /// Chunk index this id refers to; a whole document is chunk 0.
    pub fn index(&self) -> usize {
        self.chunk_index.unwrap_or(0)
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(index) => write!(f, "{}{}-c{}", CUSTOM_ID_PREFIX, self.document_id, index),
            None => write!(f, "{}{}", CUSTOM_ID_PREFIX, self.document_id),
        }
    }
}

impl FromStr for CustomId {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(CUSTOM_ID_PREFIX)
            .ok_or_else(|| BatchError::InvalidCustomId(s.to_string()))?;

        if let Some((document_id, suffix)) = rest.rsplit_once("-c") {
            if !document_id.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|b| b.is_ascii_digit())
            {
                let index = suffix
                    .parse()
                    .map_err(|_| BatchError::InvalidCustomId(s.to_string()))?;
                return Ok(Self::chunk(document_id, index));
            }
        }

        if rest.is_empty() {
            return Err(BatchError::InvalidCustomId(s.to_string()));
        }
        Ok(Self::whole(rest))
    }
}
