//! Loading medical Q&A records from disk.
//!
//! Accepts either a JSON array of records or JSON Lines (one record per
//! line). Field names follow the dataset conventions understood by
//! [`MedicalRecord`]; missing fields load as empty strings.

use crate::error::{Result, RetrieverError};
use medrag_context::MedicalRecord;
use std::path::Path;
use tracing::{info, warn};

/// Read records from `path`, keeping at most `limit` of them.
pub fn load_records(path: &Path, limit: Option<usize>) -> Result<Vec<MedicalRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = parse_records(&content, limit).map_err(|e| match e {
        RetrieverError::InvalidInput { message } => RetrieverError::InvalidInput {
            message: format!("{}: {message}", path.display()),
        },
        other => other,
    })?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    let empty = records.iter().filter(|r| r.is_empty()).count();
    if empty > 0 {
        warn!("{empty} records in {} have no text", path.display());
    }
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse a JSON array or JSON Lines document.
pub fn parse_records(content: &str, limit: Option<usize>) -> Result<Vec<MedicalRecord>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let records: Vec<MedicalRecord> = serde_json::from_str(trimmed)?;
        return Ok(records);
    }

    let mut records = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        if limit.is_some_and(|limit| records.len() >= limit) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| {
            RetrieverError::invalid_input(format!("line {}: {e}", line_number + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}
