use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One product as listed in the product-info table.
///
/// Store layout contract: product `p`'s image vectors occupy rows
/// `base(p) .. base(p) + num_imgs` of the embedding store, where `base(p)`
/// is the cumulative image count of all preceding products in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: u64,
    pub category_id: u64,
    pub num_imgs: u32,
}

/// One row of the joined per-image table: product metadata denormalized
/// per image, with the embedding-store row resolved at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub product_id: u64,
    pub category_idx: u32,
    pub img_idx: u32,
    pub num_imgs: u32,
    pub train: bool,
    pub store_row: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageRecordError {
    #[error("img_idx {img_idx} out of range for product {product_id} (num_imgs {num_imgs})")]
    ImgIdxOutOfRange {
        product_id: u64,
        img_idx: u32,
        num_imgs: u32,
    },
    #[error("num_imgs must be > 0 for product {product_id}")]
    NoImages { product_id: u64 },
}

impl ImageRecord {
    pub fn validate(&self) -> Result<(), ImageRecordError> {
        if self.num_imgs == 0 {
            return Err(ImageRecordError::NoImages {
                product_id: self.product_id,
            });
        }
        if self.img_idx >= self.num_imgs {
            return Err(ImageRecordError::ImgIdxOutOfRange {
                product_id: self.product_id,
                img_idx: self.img_idx,
                num_imgs: self.num_imgs,
            });
        }
        Ok(())
    }
}
