//! Cell embedding input.
//!
//! The embedding is produced by an external dimensionality-reduction model
//! and consumed once at pipeline entry. Everything downstream reads it
//! through `&Embedding` and never mutates it.

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optional per-cell annotations carried through to the output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMetadata {
    pub batch: Option<String>,
    pub condition: Option<String>,
}

/// Source of the low-dimensional embedding.
pub trait EmbeddingProvider {
    /// Return one row per requested cell, in the order of `cell_ids`.
    fn embedding(&self, cell_ids: &[String]) -> Result<Array2<f64>>;
}

/// Validated cell × latent-dimension matrix with cell identifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding {
    cell_ids: Vec<String>,
    values: Array2<f64>,
    metadata: Option<Vec<CellMetadata>>,
}

impl Embedding {
    /// Build an embedding from ids and values.
    ///
    /// Fails with [`Error::Input`] when the matrix is empty, the row count
    /// does not match the ids, ids repeat, or any entry is NaN/Inf.
    pub fn new(cell_ids: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() == 0 || values.ncols() == 0 {
            return Err(Error::input(format!(
                "embedding must be non-empty, got {} x {}",
                values.nrows(),
                values.ncols()
            )));
        }
        if values.nrows() != cell_ids.len() {
            return Err(Error::input(format!(
                "embedding has {} rows but {} cell ids",
                values.nrows(),
                cell_ids.len()
            )));
        }

        let mut seen = HashSet::with_capacity(cell_ids.len());
        for id in &cell_ids {
            if !seen.insert(id.as_str()) {
                return Err(Error::input(format!("duplicate cell id '{}'", id)));
            }
        }

        if let Some(((row, col), value)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::input(format!(
                "non-finite embedding value {} for cell '{}' at dimension {}",
                value, cell_ids[row], col
            )));
        }

        Ok(Self {
            cell_ids,
            values,
            metadata: None,
        })
    }

    /// Build an embedding with ids `cell_0`, `cell_1`, ...
    pub fn from_matrix(values: Array2<f64>) -> Result<Self> {
        let ids = (0..values.nrows()).map(|i| format!("cell_{}", i)).collect();
        Self::new(ids, values)
    }

    /// Ask a provider for the rows of `cell_ids` and validate the answer.
    pub fn from_provider<P: EmbeddingProvider + ?Sized>(
        provider: &P,
        cell_ids: Vec<String>,
    ) -> Result<Self> {
        let values = provider.embedding(&cell_ids)?;
        Self::new(cell_ids, values)
    }

    /// Attach per-cell metadata; the length must match the cell count.
    pub fn with_metadata(mut self, metadata: Vec<CellMetadata>) -> Result<Self> {
        if metadata.len() != self.n_cells() {
            return Err(Error::input(format!(
                "metadata has {} rows but embedding has {} cells",
                metadata.len(),
                self.n_cells()
            )));
        }
        self.metadata = Some(metadata);
        Ok(self)
    }

    pub fn n_cells(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_dims(&self) -> usize {
        self.values.ncols()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn values(&self) -> ArrayView2<f64> {
        self.values.view()
    }

    pub fn row(&self, cell: usize) -> ArrayView1<f64> {
        self.values.row(cell)
    }

    pub fn metadata(&self, cell: usize) -> Option<&CellMetadata> {
        self.metadata.as_ref().and_then(|m| m.get(cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct FixedProvider(Array2<f64>);

    impl EmbeddingProvider for FixedProvider {
        fn embedding(&self, cell_ids: &[String]) -> Result<Array2<f64>> {
            assert_eq!(cell_ids.len(), self.0.nrows());
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_valid_embedding() {
        let emb = Embedding::from_matrix(array![[0.0, 1.0], [2.0, 3.0]]).unwrap();
        assert_eq!(emb.n_cells(), 2);
        assert_eq!(emb.n_dims(), 2);
        assert_eq!(emb.cell_ids()[1], "cell_1");
        assert_eq!(emb.row(1)[0], 2.0);
    }

    #[test]
    fn test_rejects_non_finite() {
        let result = Embedding::from_matrix(array![[0.0, f64::NAN], [1.0, 1.0]]);
        assert!(matches!(result, Err(Error::Input(_))));

        let result = Embedding::from_matrix(array![[0.0, 0.0], [f64::INFINITY, 1.0]]);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_rejects_mismatched_ids() {
        let result = Embedding::new(vec!["a".to_string()], array![[0.0], [1.0]]);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let ids = vec!["a".to_string(), "a".to_string()];
        let result = Embedding::new(ids, array![[0.0], [1.0]]);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_metadata_length_must_match() {
        let emb = Embedding::from_matrix(array![[0.0], [1.0]]).unwrap();
        let result = emb.clone().with_metadata(vec![CellMetadata::default()]);
        assert!(matches!(result, Err(Error::Input(_))));

        let meta = vec![
            CellMetadata {
                batch: Some("b1".to_string()),
                condition: None,
            },
            CellMetadata::default(),
        ];
        let emb = emb.with_metadata(meta).unwrap();
        assert_eq!(emb.metadata(0).unwrap().batch.as_deref(), Some("b1"));
    }

    #[test]
    fn test_from_provider_validates() {
        let ids = vec!["x".to_string(), "y".to_string()];
        let provider = FixedProvider(array![[1.0, 2.0], [3.0, f64::NAN]]);
        let result = Embedding::from_provider(&provider, ids);
        assert!(matches!(result, Err(Error::Input(_))));
    }
}
