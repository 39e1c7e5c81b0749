//! Per-frame structure files and their aggregates.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// One atom selection dumped frame by frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSet {
    /// Short label used in logs.
    pub label: &'static str,
    /// Selection passed to the frame dumper.
    pub selection: &'static str,
    /// Directory holding `<index>.pdb` files.
    pub dir_name: &'static str,
    /// Aggregate of all frames in index order.
    pub aggregate_name: &'static str,
    /// Dumper script file.
    pub script_name: &'static str,
}

/// Every atom.
pub const ALL_ATOMS: FrameSet = FrameSet {
    label: "all",
    selection: "all",
    dir_name: "pdbs",
    aggregate_name: "all.pdb",
    script_name: "dump.tcl",
};

/// Alpha carbons only, for long trajectories.
pub const BACKBONE: FrameSet = FrameSet {
    label: "backbone",
    selection: "name CA",
    dir_name: "pdbsCA",
    aggregate_name: "allCA.pdb",
    script_name: "dumpCA.tcl",
};

/// Extraction order.
pub const FRAME_SETS: [FrameSet; 2] = [ALL_ATOMS, BACKBONE];

/// Outcome of extracting one frame set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSetReport {
    pub label: String,
    pub frames: usize,
    pub aggregate: PathBuf,
    /// Hex SHA-256 of the aggregate.
    pub digest: String,
}

/// Removes `dir` if present and recreates it empty.
pub async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir).await
}

/// `<index>.pdb` files in `dir`, sorted by index.
pub async fn numbered_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pdb") {
            continue;
        }
        let index = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(index) = index {
            frames.push((index, path));
        }
    }
    frames.sort_by_key(|(index, _)| *index);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

/// Concatenates `frames` into `aggregate` and returns the hex digest of the result.
///
/// The aggregate is written to a sibling temporary file first and renamed,
/// so a reader never sees a half-written file.
pub async fn concatenate(frames: &[PathBuf], aggregate: &Path) -> std::io::Result<String> {
    let tmp = aggregate.with_extension("pdb.tmp");
    let mut hasher = Sha256::new();
    let mut out = fs::File::create(&tmp).await?;
    for frame in frames {
        let bytes = fs::read(frame).await?;
        hasher.update(&bytes);
        out.write_all(&bytes).await?;
    }
    out.flush().await?;
    drop(out);
    fs::rename(&tmp, aggregate).await?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_numbered_frames_sorted_numerically() {
        let temp = TempDir::new().unwrap();
        for i in [10, 2, 0, 1] {
            fs::write(temp.path().join(format!("{}.pdb", i)), format!("MODEL {}\n", i))
                .await
                .unwrap();
        }
        fs::write(temp.path().join("notes.txt"), "x").await.unwrap();
        fs::write(temp.path().join("extra.pdb"), "x").await.unwrap();

        let frames = numbered_frames(temp.path()).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["0.pdb", "1.pdb", "2.pdb", "10.pdb"]);
    }

    #[tokio::test]
    async fn test_concatenate_in_order() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("0.pdb");
        let b = temp.path().join("1.pdb");
        fs::write(&a, "A\n").await.unwrap();
        fs::write(&b, "B\n").await.unwrap();
        let aggregate = temp.path().join("all.pdb");

        let digest = concatenate(&[a, b], &aggregate).await.unwrap();
        assert_eq!(fs::read_to_string(&aggregate).await.unwrap(), "A\nB\n");
        assert_eq!(digest.len(), 64);
        assert!(!temp.path().join("all.pdb.tmp").exists());
    }

    #[tokio::test]
    async fn test_reset_dir_clears_stale_frames() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("pdbs");
        reset_dir(&dir).await.unwrap();
        fs::write(dir.join("7.pdb"), "stale").await.unwrap();

        reset_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert!(numbered_frames(&dir).await.unwrap().is_empty());
    }
}
