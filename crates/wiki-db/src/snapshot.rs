//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::Page;
use crate::{Result, StoreError};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    pages: Vec<Page>,
}

/// Persist the page table to `path` as hashed JSON.
///
/// The file is staged next to its target and renamed into place.
pub fn save_snapshot(pages: &[Page], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(pages)?,
        pages: pages.to_vec(),
    };

    let staging = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&staging)?);
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
    }
    fs::rename(&staging, path)?;
    Ok(())
}

/// Load the page table from `path`, checking its hash.
pub fn load_snapshot(path: &Path) -> Result<Vec<Page>> {
    let envelope = load_envelope(path)?;
    if envelope.hash != compute_hash(&envelope.pages)? {
        return Err(StoreError::HashMismatch);
    }
    Ok(envelope.pages)
}

/// Verify the integrity of a snapshot without keeping the payload.
pub fn verify_snapshot(path: &Path) -> bool {
    match load_envelope(path) {
        Ok(envelope) => compute_hash(&envelope.pages)
            .map(|hash| hash == envelope.hash)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn load_envelope(path: &Path) -> Result<SnapshotEnvelope> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn compute_hash(pages: &[Page]) -> Result<String> {
    let serialized = serde_json::to_vec(pages)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pages() -> Vec<Page> {
        vec![
            Page {
                id: 1,
                title: "Home".into(),
                markdown: "# Home".into(),
            },
            Page {
                id: 4,
                title: "Zebra".into(),
                markdown: "stripes".into(),
            },
        ]
    }

    #[test]
    fn save_and_load_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pages.json");

        save_snapshot(&pages(), &path).unwrap();
        assert!(verify_snapshot(&path));
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(load_snapshot(&path).unwrap(), pages());
    }

    #[test]
    fn verify_rejects_tampered_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.json");
        save_snapshot(&pages(), &path).unwrap();

        // Edit the payload without touching the hash.
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope["pages"][0]["markdown"] = serde_json::json!("defaced");
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(!verify_snapshot(&path));
        assert!(matches!(load_snapshot(&path), Err(StoreError::HashMismatch)));
    }
}
