//! Order-preserving partition of work into fixed-size chunks.

use crate::error::{ProdError, Result};

/// Split `items` into consecutive chunks of `size`; the last may be shorter.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Result<Vec<Vec<T>>> {
    if size == 0 {
        return Err(ProdError::InvalidChunkSize);
    }
    Ok(items.chunks(size).map(<[T]>::to_vec).collect())
}
