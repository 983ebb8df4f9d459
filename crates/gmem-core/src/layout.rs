//! Layout descriptors for one side of a transfer

use crate::dtype::DType;
use crate::{Error, Result};
use std::sync::Arc;

/// Block list of an indexed layout.
///
/// Lengths and offsets are in elements and always have the same length.
/// The arrays are shared and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlocks {
    blocklens: Arc<[usize]>,
    offsets: Arc<[usize]>,
}

impl IndexedBlocks {
    pub fn num_blocks(&self) -> usize {
        self.blocklens.len()
    }

    pub fn blocklens(&self) -> &[usize] {
        &self.blocklens
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// (length, offset) of block `i`, both in elements
    pub fn block(&self, i: usize) -> Option<(usize, usize)> {
        Some((*self.blocklens.get(i)?, *self.offsets.get(i)?))
    }
}

/// How elements are arranged on one side of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutDescriptor {
    /// Densely packed elements
    Contiguous { base: DType },
    /// Blocks of `blocklen` elements whose starts are `stride` elements apart
    Strided {
        base: DType,
        blocklen: usize,
        stride: usize,
    },
    /// Explicit ordered block list
    Indexed { base: DType, blocks: IndexedBlocks },
}

impl LayoutDescriptor {
    pub const fn contiguous(base: DType) -> Self {
        LayoutDescriptor::Contiguous { base }
    }

    pub fn strided(base: DType, blocklen: usize, stride: usize) -> Result<Self> {
        if blocklen == 0 {
            return Err(Error::invalid("strided layout with zero-length blocks"));
        }
        Ok(LayoutDescriptor::Strided {
            base,
            blocklen,
            stride,
        })
    }

    pub fn indexed(
        base: DType,
        blocklens: impl Into<Arc<[usize]>>,
        offsets: impl Into<Arc<[usize]>>,
    ) -> Result<Self> {
        let blocklens = blocklens.into();
        let offsets = offsets.into();
        if blocklens.len() != offsets.len() {
            return Err(Error::InvalidArgument(format!(
                "indexed layout has {} block lengths but {} offsets",
                blocklens.len(),
                offsets.len()
            )));
        }
        if blocklens.is_empty() {
            return Err(Error::invalid("indexed layout without blocks"));
        }
        Ok(LayoutDescriptor::Indexed {
            base,
            blocks: IndexedBlocks { blocklens, offsets },
        })
    }

    pub fn base(&self) -> DType {
        match self {
            LayoutDescriptor::Contiguous { base }
            | LayoutDescriptor::Strided { base, .. }
            | LayoutDescriptor::Indexed { base, .. } => *base,
        }
    }

    /// Elements described by one instance of the layout
    pub fn num_elem(&self) -> usize {
        match self {
            LayoutDescriptor::Contiguous { .. } => 1,
            LayoutDescriptor::Strided { blocklen, .. } => *blocklen,
            LayoutDescriptor::Indexed { blocks, .. } => blocks.blocklens().iter().sum(),
        }
    }

    pub fn is_contiguous(&self) -> bool {
        matches!(self, LayoutDescriptor::Contiguous { .. })
    }

    pub fn is_strided(&self) -> bool {
        matches!(self, LayoutDescriptor::Strided { .. })
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, LayoutDescriptor::Indexed { .. })
    }
}
