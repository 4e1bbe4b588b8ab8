use std::sync::Arc;

use thiserror::Error;

/// Width of the per-image auxiliary feature: a one-hot of the image slot,
/// clamped to this width, zero for padding positions.
pub const AUX_WIDTH: usize = 8;

/// One delivered batch: `B` products with their stacked embedding
/// sequences, auxiliary features and class labels.
///
/// Invariants:
/// - `labels.len() == product_ids.len() == B`
/// - `embeddings.len() == B * max_imgs * dim`
/// - `aux.len() == B * max_imgs * AUX_WIDTH`
/// - sequences shorter than `max_imgs` are zero-padded, and their aux rows
///   at padding positions are all-zero
#[derive(Debug, Clone)]
pub struct VecBatch {
    pub product_ids: Arc<[u64]>,
    pub labels: Arc<[u32]>,
    /// Row-major `(B, max_imgs, dim)`.
    pub embeddings: Arc<[f32]>,
    /// Row-major `(B, max_imgs, AUX_WIDTH)`.
    pub aux: Arc<[f32]>,
    pub max_imgs: usize,
    pub dim: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VecBatchError {
    #[error("label count {labels} != product count {products}")]
    LabelCountMismatch { labels: usize, products: usize },
    #[error("embeddings length {len} != {products} * {max_imgs} * {dim}")]
    EmbeddingLenMismatch {
        len: usize,
        products: usize,
        max_imgs: usize,
        dim: usize,
    },
    #[error("aux length {len} != {products} * {max_imgs} * {aux_width}")]
    AuxLenMismatch {
        len: usize,
        products: usize,
        max_imgs: usize,
        aux_width: usize,
    },
}

impl VecBatch {
    pub fn product_count(&self) -> usize {
        self.product_ids.len()
    }

    /// Embedding sequence of one product, `(max_imgs, dim)` row-major.
    pub fn embeddings_of(&self, product: usize) -> &[f32] {
        let stride = self.max_imgs * self.dim;
        &self.embeddings[product * stride..(product + 1) * stride]
    }

    /// Aux rows of one product, `(max_imgs, AUX_WIDTH)` row-major.
    pub fn aux_of(&self, product: usize) -> &[f32] {
        let stride = self.max_imgs * AUX_WIDTH;
        &self.aux[product * stride..(product + 1) * stride]
    }

    pub fn validate(&self) -> Result<(), VecBatchError> {
        let products = self.product_ids.len();
        if self.labels.len() != products {
            return Err(VecBatchError::LabelCountMismatch {
                labels: self.labels.len(),
                products,
            });
        }
        if self.embeddings.len() != products * self.max_imgs * self.dim {
            return Err(VecBatchError::EmbeddingLenMismatch {
                len: self.embeddings.len(),
                products,
                max_imgs: self.max_imgs,
                dim: self.dim,
            });
        }
        if self.aux.len() != products * self.max_imgs * AUX_WIDTH {
            return Err(VecBatchError::AuxLenMismatch {
                len: self.aux.len(),
                products,
                max_imgs: self.max_imgs,
                aux_width: AUX_WIDTH,
            });
        }
        Ok(())
    }
}
