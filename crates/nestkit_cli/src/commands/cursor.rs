//! Cursor command implementation.

use nestkit_core::{decode_cursor, CursorStore, FileCursorStore};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// State of a persisted cursor.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CursorState {
    /// No cursor; the next cycle captures the tip of history.
    Absent,
    /// A decodable cursor.
    Valid,
    /// A cursor the engine will discard and replace with the tip.
    Undecodable,
}

/// Cursor inspection result.
#[derive(Debug, Serialize)]
pub struct CursorReport {
    /// Cursor file path.
    pub path: String,
    /// State.
    pub state: CursorState,
    /// Token, if decodable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<u64>,
    /// Blob size in bytes.
    pub size: usize,
    /// Decode error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reads the cursor at `path`.
pub fn inspect(path: &Path) -> Result<CursorReport, Box<dyn std::error::Error>> {
    let store = FileCursorStore::new(path);
    let mut report = CursorReport {
        path: path.display().to_string(),
        state: CursorState::Absent,
        token: None,
        size: 0,
        error: None,
    };

    if let Some(blob) = store.load()? {
        report.size = blob.len();
        match decode_cursor(&blob) {
            Ok(token) => {
                report.state = CursorState::Valid;
                report.token = Some(token.as_u64());
            }
            Err(e) => {
                debug!(error = %e, "cursor blob did not decode");
                report.state = CursorState::Undecodable;
                report.error = Some(e.to_string());
            }
        }
    }

    Ok(report)
}

/// Runs `cursor show`.
pub fn show(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

/// Runs `cursor reset`.
pub fn reset(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    FileCursorStore::new(path).clear()?;
    info!(path = %path.display(), "cursor cleared");
    println!("Cursor cleared; the next cycle starts from the tip of history.");
    Ok(())
}

fn print_text_output(report: &CursorReport) {
    println!("Cursor: {}", report.path);
    match report.state {
        CursorState::Absent => println!("  State: absent"),
        CursorState::Valid => {
            println!("  State: valid");
            if let Some(token) = report.token {
                println!("  Token: {token}");
            }
        }
        CursorState::Undecodable => {
            println!("  State: undecodable ({} bytes)", report.size);
            if let Some(error) = &report.error {
                println!("  Error: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestkit_core::{encode_cursor, HistoryToken};
    use tempfile::TempDir;

    #[test]
    fn reports_each_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor");
        assert_eq!(inspect(&path).unwrap().state, CursorState::Absent);

        let store = FileCursorStore::new(&path);
        store.save(&encode_cursor(HistoryToken::new(42)).unwrap()).unwrap();
        let report = inspect(&path).unwrap();
        assert_eq!(report.state, CursorState::Valid);
        assert_eq!(report.token, Some(42));

        store.save(b"not cbor").unwrap();
        let report = inspect(&path).unwrap();
        assert_eq!(report.state, CursorState::Undecodable);
        assert!(report.error.is_some());
    }

    #[test]
    fn reset_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor");
        FileCursorStore::new(&path)
            .save(&encode_cursor(HistoryToken::new(1)).unwrap())
            .unwrap();

        reset(&path).unwrap();
        assert!(!path.exists());
        reset(&path).unwrap();
    }
}
