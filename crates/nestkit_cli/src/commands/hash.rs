//! Hash command implementation.

use nestkit_core::ContentHash;
use serde::Serialize;
use std::path::Path;

/// Hash result.
#[derive(Debug, Serialize)]
pub struct HashReport {
    /// Hashed file.
    pub path: String,
    /// Size in bytes.
    pub size: usize,
    /// Hex SHA-512 digest, as stored on asset rows.
    pub sha512: String,
}

/// Hashes the file at `path`.
pub fn hash_file(path: &Path) -> Result<HashReport, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    Ok(HashReport {
        path: path.display().to_string(),
        size: data.len(),
        sha512: ContentHash::of(&data).to_hex(),
    })
}

/// Runs the hash command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = hash_file(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => println!("{}  {} ({} bytes)", report.sha512, report.path, report.size),
    }
    Ok(())
}
