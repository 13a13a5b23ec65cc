//! Exact inner-product index over L2-normalized embeddings.
//!
//! Vectors are stored row-major in one contiguous `Vec<f32>`, and position `i`
//! of the index always corresponds to chunk `i` of the metadata list kept
//! alongside it. The index is append-only: [`VectorIndex::insert`] validates
//! a whole batch before touching any state, so a rejected batch leaves the
//! index exactly as it was.
//!
//! Normalization happens inside the index, both on insert and on search, so
//! inner product equals cosine similarity no matter what the caller passes in.
//! A zero vector cannot be normalized and is stored (or searched) as zeros,
//! scoring 0 against everything.
//!
//! # Binary format
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! magic      8 bytes   "MRAGVEC1"
//! version    u32
//! dimension  u64
//! count      u64
//! ids        count × (u32 length + UTF-8 bytes)
//! vectors    count × dimension × f32
//! ```

use crate::error::{Result, RetrieverError};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

const MAGIC: &[u8; 8] = b"MRAGVEC1";
pub const VECTOR_FORMAT_VERSION: u32 = 1;

/// One search hit: a position in the index and its cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub position: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<String>,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrieverError::configuration(
                "vector dimension must be greater than zero",
            ));
        }
        Ok(Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Chunk ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The stored (normalized) vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.data.get(start..end)
    }

    /// Append a batch of vectors with their chunk ids.
    ///
    /// The batch is rejected as a whole if the counts differ, any vector has the
    /// wrong dimension, or any value is not finite.
    pub fn insert(&mut self, vectors: &[Vec<f32>], ids: &[String]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(RetrieverError::invalid_input(format!(
                "got {} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        for vector in vectors {
            self.check_vector(vector)?;
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend(normalized(vector));
        }
        self.ids.extend(ids.iter().cloned());
        Ok(())
    }

    /// Return up to `k` positions ordered by descending similarity to `query`.
    ///
    /// Equal scores are ordered by ascending position. An empty index yields
    /// an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(RetrieverError::invalid_input(
                "k must be greater than zero",
            ));
        }
        self.check_vector(query)?;
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalized(query);
        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| SearchHit {
                position,
                score: dot(&query, row),
            })
            .collect();

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_unstable_by(rank);
        Ok(hits)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RetrieverError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(RetrieverError::invalid_input(
                "vector contains non-finite values",
            ));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let id_bytes: usize = self.ids.iter().map(|id| 4 + id.len()).sum();
        let mut out = Vec::with_capacity(28 + id_bytes + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VECTOR_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u64).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        for id in &self.ids {
            out.extend_from_slice(&(id.len() as u32).to_le_bytes());
            out.extend_from_slice(id.as_bytes());
        }
        out.extend_from_slice(&f32s_to_le_bytes(&self.data));
        out
    }

    /// Decode an index. `path` is only used in error messages.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut reader = ByteReader {
            bytes,
            offset: 0,
            path,
        };

        if reader.take(MAGIC.len())? != MAGIC {
            return Err(RetrieverError::corruption(path, "not a vector index file"));
        }
        let version = reader.u32()?;
        if version != VECTOR_FORMAT_VERSION {
            return Err(RetrieverError::corruption(
                path,
                format!("unsupported vector format version {version}"),
            ));
        }
        let dimension = reader.usize()?;
        let count = reader.usize()?;
        if dimension == 0 {
            return Err(RetrieverError::corruption(path, "zero vector dimension"));
        }

        let mut ids = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            let len = reader.u32()? as usize;
            let raw = reader.take(len)?;
            let id = std::str::from_utf8(raw)
                .map_err(|_| RetrieverError::corruption(path, "chunk id is not UTF-8"))?;
            ids.push(id.to_string());
        }

        let float_bytes = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| RetrieverError::corruption(path, "vector count overflows"))?;
        let data = f32s_from_le_bytes(reader.take(float_bytes)?);
        if reader.offset != bytes.len() {
            return Err(RetrieverError::corruption(
                path,
                format!("{} trailing bytes", bytes.len() - reader.offset),
            ));
        }

        Ok(Self {
            dimension,
            ids,
            data,
        })
    }

    /// Write the index to a single file.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Read an index written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RetrieverError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, path)
    }
}

fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `vector` to unit length. Zero vectors are returned unchanged.
///
/// The norm is accumulated in `f64`: squaring finite `f32` components
/// overflows above about 1.8e19 and underflows below about 1e-19.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 && norm.is_finite() {
        vector.iter().map(|v| (f64::from(*v) / norm) as f32).collect()
    } else {
        vector.to_vec()
    }
}

fn f32s_to_le_bytes(values: &[f32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice::<f32, u8>(values).to_vec()
    } else {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

// The float section is not 4-byte aligned within the file, so no zero-copy cast.
fn f32s_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| RetrieverError::corruption(self.path, "vector file is truncated"))?;
        let bytes = self.bytes;
        let slice = &bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn usize(&mut self) -> Result<usize> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        usize::try_from(u64::from_le_bytes(buf))
            .map_err(|_| RetrieverError::corruption(self.path, "size does not fit in memory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i}_0")).collect()
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3).unwrap();
        index
            .insert(
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![1.0, 1.0, 0.0],
                    vec![0.0, 0.0, 5.0],
                ],
                &ids(4),
            )
            .unwrap();
        index
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            VectorIndex::new(0),
            Err(RetrieverError::Configuration { .. })
        ));
    }

    #[test]
    fn test_insert_normalizes_and_keeps_order() {
        let index = sample_index();
        assert_eq!(index.len(), 4);
        assert_eq!(index.ids()[3], "3_0");
        assert_eq!(index.vector(3), Some(&[0.0, 0.0, 1.0][..]));
        let diagonal = index.vector(2).unwrap();
        assert!((diagonal[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(index.vector(4).is_none());
    }

    #[test]
    fn test_rejected_batch_leaves_index_unchanged() {
        let mut index = sample_index();
        let before = index.clone();

        let err = index
            .insert(&[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]], &ids(2))
            .unwrap_err();
        assert!(matches!(err, RetrieverError::DimensionMismatch { expected: 3, actual: 2 }));

        let err = index
            .insert(&[vec![1.0, 0.0, 0.0], vec![f32::NAN, 0.0, 0.0]], &ids(2))
            .unwrap_err();
        assert!(matches!(err, RetrieverError::InvalidInput { .. }));

        let err = index.insert(&[vec![1.0, 0.0, 0.0]], &ids(2)).unwrap_err();
        assert!(matches!(err, RetrieverError::InvalidInput { .. }));

        assert_eq!(index, before);
    }

    #[test]
    fn test_search_orders_by_score() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.2, 0.0], 4).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 2, 1, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits[0].score <= 1.0 + 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.2, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_search_with_k_larger_than_index() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 10).unwrap().len(), 4);
    }

    #[test]
    fn test_ties_broken_by_position() {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .insert(
                &[vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]],
                &ids(4),
            )
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 1);
        assert_eq!(hits[1].position, 2);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_query_scaling_does_not_change_results() {
        let index = sample_index();
        let v = [0.3, 0.9, 0.1];
        let doubled: Vec<f32> = v.iter().map(|x| x * 2.0).collect();
        let a = index.search(&v, 3).unwrap();
        let b = index.search(&doubled, 3).unwrap();
        assert_eq!(
            a.iter().map(|h| h.position).collect::<Vec<_>>(),
            b.iter().map(|h| h.position).collect::<Vec<_>>()
        );
        for (x, y) in a.iter().zip(&b) {
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_extreme_magnitudes_are_normalized() {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .insert(&[vec![1e20, 0.0], vec![1e-30, 0.0], vec![0.0, 3e38]], &ids(3))
            .unwrap();

        assert_eq!(index.vector(0), Some(&[1.0, 0.0][..]));
        assert_eq!(index.vector(1), Some(&[1.0, 0.0][..]));
        assert_eq!(index.vector(2), Some(&[0.0, 1.0][..]));

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 1.0).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);

        let tiny_query = index.search(&[1e-30, 0.0], 1).unwrap();
        assert!((tiny_query[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vector_out_of_range_is_none() {
        let index = sample_index();
        assert!(index.vector(usize::MAX).is_none());
        assert!(index.vector(usize::MAX / 3).is_none());
    }

    #[test]
    fn test_search_input_errors() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 0),
            Err(RetrieverError::InvalidInput { .. })
        ));
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(RetrieverError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[f32::INFINITY, 0.0, 0.0], 1),
            Err(RetrieverError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new(4).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_zero_query_scores_zero() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.score == 0.0));
        assert_eq!(hits[0].position, 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let index = sample_index();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(
            loaded.search(&[1.0, 0.2, 0.0], 4).unwrap(),
            index.search(&[1.0, 0.2, 0.0], 4).unwrap()
        );
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrieverError::ArtifactNotFound { .. })
        ));

        let bytes = sample_index().to_bytes();

        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrieverError::ArtifactCorruption { .. })
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        std::fs::write(&path, &bad_magic).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrieverError::ArtifactCorruption { .. })
        ));

        let mut trailing = bytes;
        trailing.push(0);
        std::fs::write(&path, &trailing).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrieverError::ArtifactCorruption { .. })
        ));
    }
}
