//! Paired-file persistence for the retrieval store.
//!
//! `<base>.json` holds the chunk metadata list; `<base>.vec` holds the
//! embedding matrix as a shape header (magic, version, rows, dim) plus
//! raw little-endian f32 data. The two files are only meaningful
//! together: a missing half, a bad header, or a shape that disagrees
//! with the metadata discards both.

use std::fs;
use std::path::Path;

use crate::retrieval::RetrievalChunk;
use crate::{MimirError, Result};

const MAGIC: &[u8; 4] = b"MIMR";
const VERSION: u8 = 1;

fn json_path(base: &Path) -> std::path::PathBuf {
    base.with_extension("json")
}

fn vec_path(base: &Path) -> std::path::PathBuf {
    base.with_extension("vec")
}

/// Write the `{json, vec}` pair, creating parent directories as needed.
pub(super) fn save(
    base: &Path,
    dimension: usize,
    chunks: &[RetrievalChunk],
    embeddings: &[f32],
) -> Result<()> {
    if let Some(parent) = base.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(json_path(base), serde_json::to_vec_pretty(chunks)?)?;

    let mut data = Vec::with_capacity(13 + embeddings.len() * 4);
    data.extend_from_slice(MAGIC);
    data.push(VERSION);
    data.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    data.extend_from_slice(&(dimension as u32).to_le_bytes());
    for v in embeddings {
        data.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(vec_path(base), data)?;
    Ok(())
}

/// Load the pair if both halves exist and agree on shape.
///
/// `Ok(None)` means a fresh store (neither file present). Any
/// inconsistency is an error so the caller can log and start empty.
pub(super) fn load(
    base: &Path,
    dimension: usize,
) -> Result<Option<(Vec<RetrievalChunk>, Vec<f32>)>> {
    let json = json_path(base);
    let vec = vec_path(base);
    if !json.exists() && !vec.exists() {
        return Ok(None);
    }
    if !json.exists() || !vec.exists() {
        return Err(MimirError::SnapshotIo(
            "retrieval store pair is incomplete".into(),
        ));
    }

    let chunks: Vec<RetrievalChunk> = serde_json::from_slice(&fs::read(&json)?)?;

    let data = fs::read(&vec)?;
    if data.len() < 13 || &data[..4] != MAGIC || data[4] != VERSION {
        return Err(MimirError::SnapshotIo("bad retrieval matrix header".into()));
    }
    let rows = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
    let dim = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as usize;
    if rows != chunks.len() || dim != dimension {
        return Err(MimirError::SnapshotIo(format!(
            "retrieval matrix shape {rows}x{dim} does not match {} chunks x {dimension}",
            chunks.len()
        )));
    }

    let payload = &data[13..];
    if payload.len() != rows * dim * 4 {
        return Err(MimirError::SnapshotIo(
            "retrieval matrix payload truncated".into(),
        ));
    }
    let mut embeddings = Vec::with_capacity(rows * dim);
    for chunk in payload.chunks_exact(4) {
        embeddings.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(Some((chunks, embeddings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, id: usize) -> RetrievalChunk {
        RetrievalChunk {
            text: text.into(),
            source: "doc.md".into(),
            chunk_id: id,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");
        let chunks = vec![chunk("alpha", 0), chunk("beta", 1)];
        let embeddings = vec![1.0f32, 0.0, 0.5, -0.5];

        save(&base, 2, &chunks, &embeddings).unwrap();
        let (loaded_chunks, loaded_embeddings) = load(&base, 2).unwrap().unwrap();
        assert_eq!(loaded_chunks, chunks);
        assert_eq!(loaded_embeddings, embeddings);
    }

    #[test]
    fn missing_pair_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent"), 4).unwrap().is_none());
    }

    #[test]
    fn half_pair_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");
        save(&base, 2, &[chunk("a", 0)], &[0.1, 0.2]).unwrap();
        fs::remove_file(vec_path(&base)).unwrap();
        assert!(load(&base, 2).is_err());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");
        save(&base, 2, &[chunk("a", 0)], &[0.1, 0.2]).unwrap();
        assert!(load(&base, 3).is_err());
    }

    #[test]
    fn corrupt_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");
        save(&base, 2, &[chunk("a", 0)], &[0.1, 0.2]).unwrap();
        fs::write(vec_path(&base), b"garbage").unwrap();
        assert!(load(&base, 2).is_err());
    }
}
