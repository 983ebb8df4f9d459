//! Transfer plans and datatype conversion
//!
//! [`convert`] turns a source and destination [`LayoutDescriptor`] plus an
//! element count into a [`TransferPlan`]: the ordered byte ranges that have
//! to be moved. Plans are built per call and own their block list.

use crate::layout::{IndexedBlocks, LayoutDescriptor};
use crate::{Error, Result};

/// One contiguous byte range to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCopy {
    pub src_offset: usize,
    pub dst_offset: usize,
    pub len: usize,
}

/// Ordered byte ranges of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    /// `num_blocks` blocks of `block_bytes`; block `i` starts at
    /// `i * src_stride` in the source and `i * dst_stride` in the destination
    SingleBlock {
        src_stride: usize,
        dst_stride: usize,
        block_bytes: usize,
        num_blocks: usize,
    },
    /// Explicit block list
    MultiBlock(Vec<BlockCopy>),
}

impl TransferPlan {
    pub fn num_blocks(&self) -> usize {
        match self {
            TransferPlan::SingleBlock { num_blocks, .. } => *num_blocks,
            TransferPlan::MultiBlock(blocks) => blocks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_blocks() == 0 || self.total_bytes() == 0
    }

    pub fn is_single(&self) -> bool {
        matches!(self, TransferPlan::SingleBlock { .. })
    }

    /// Iterate the blocks in issue order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks { plan: self, next: 0 }
    }

    /// Bytes moved by the whole plan
    pub fn total_bytes(&self) -> usize {
        match self {
            TransferPlan::SingleBlock {
                block_bytes,
                num_blocks,
                ..
            } => block_bytes * num_blocks,
            TransferPlan::MultiBlock(blocks) => blocks.iter().map(|b| b.len).sum(),
        }
    }

    /// Size to bind when the local buffer is the destination
    pub fn dst_bind_size(&self) -> usize {
        match self {
            TransferPlan::SingleBlock {
                dst_stride,
                block_bytes,
                num_blocks,
                ..
            } => num_blocks * dst_stride + block_bytes,
            TransferPlan::MultiBlock(blocks) => blocks.last().map_or(0, |b| b.dst_offset + b.len),
        }
    }

    /// Size to bind when the local buffer is the source
    pub fn src_bind_size(&self) -> usize {
        match self {
            TransferPlan::SingleBlock {
                src_stride,
                block_bytes,
                num_blocks,
                ..
            } => num_blocks * src_stride + block_bytes,
            TransferPlan::MultiBlock(blocks) => blocks.last().map_or(0, |b| b.src_offset + b.len),
        }
    }

    /// One past the highest source byte touched
    pub fn src_extent(&self) -> usize {
        self.blocks()
            .filter(|b| b.len > 0)
            .map(|b| b.src_offset + b.len)
            .max()
            .unwrap_or(0)
    }

    /// One past the highest destination byte touched
    pub fn dst_extent(&self) -> usize {
        self.blocks()
            .filter(|b| b.len > 0)
            .map(|b| b.dst_offset + b.len)
            .max()
            .unwrap_or(0)
    }

    /// The plan for the opposite direction
    pub fn swapped(&self) -> TransferPlan {
        match self {
            TransferPlan::SingleBlock {
                src_stride,
                dst_stride,
                block_bytes,
                num_blocks,
            } => TransferPlan::SingleBlock {
                src_stride: *dst_stride,
                dst_stride: *src_stride,
                block_bytes: *block_bytes,
                num_blocks: *num_blocks,
            },
            TransferPlan::MultiBlock(blocks) => TransferPlan::MultiBlock(
                blocks
                    .iter()
                    .map(|b| BlockCopy {
                        src_offset: b.dst_offset,
                        dst_offset: b.src_offset,
                        len: b.len,
                    })
                    .collect(),
            ),
        }
    }

    /// Copy every block from `src` into `dst`.
    ///
    /// Both slices are checked against the plan's extents before any byte
    /// is written.
    pub fn apply(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let (src_extent, dst_extent) = (self.src_extent(), self.dst_extent());
        if src_extent > src.len() || dst_extent > dst.len() {
            return Err(Error::InvalidArgument(format!(
                "plan needs {}B source / {}B destination, got {}B / {}B",
                src_extent,
                dst_extent,
                src.len(),
                dst.len()
            )));
        }
        for b in self.blocks().filter(|b| b.len > 0) {
            dst[b.dst_offset..b.dst_offset + b.len]
                .copy_from_slice(&src[b.src_offset..b.src_offset + b.len]);
        }
        Ok(())
    }
}

/// Iterator over the blocks of a [`TransferPlan`]
pub struct Blocks<'a> {
    plan: &'a TransferPlan,
    next: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockCopy;

    fn next(&mut self) -> Option<BlockCopy> {
        let i = self.next;
        let block = match self.plan {
            TransferPlan::SingleBlock {
                src_stride,
                dst_stride,
                block_bytes,
                num_blocks,
            } => (i < *num_blocks).then(|| BlockCopy {
                src_offset: i * src_stride,
                dst_offset: i * dst_stride,
                len: *block_bytes,
            }),
            TransferPlan::MultiBlock(blocks) => blocks.get(i).copied(),
        }?;
        self.next += 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.num_blocks().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Blocks<'_> {}

fn overflow() -> Error {
    Error::invalid("transfer size overflows the address space")
}

fn bytes(n: usize, elem: usize) -> Result<usize> {
    n.checked_mul(elem).ok_or_else(overflow)
}

/// Block whose ends are representable on both sides
fn block_copy(src_offset: usize, dst_offset: usize, len: usize) -> Result<BlockCopy> {
    src_offset.checked_add(len).ok_or_else(overflow)?;
    dst_offset.checked_add(len).ok_or_else(overflow)?;
    Ok(BlockCopy {
        src_offset,
        dst_offset,
        len,
    })
}

/// Repeating plan whose bind sizes and total are representable, which
/// bounds every offset the block iterator produces
fn single_block(
    src_stride: usize,
    dst_stride: usize,
    block_bytes: usize,
    num_blocks: usize,
) -> Result<TransferPlan> {
    for stride in [src_stride, dst_stride] {
        num_blocks
            .checked_mul(stride)
            .and_then(|n| n.checked_add(block_bytes))
            .ok_or_else(overflow)?;
    }
    num_blocks.checked_mul(block_bytes).ok_or_else(overflow)?;
    Ok(TransferPlan::SingleBlock {
        src_stride,
        dst_stride,
        block_bytes,
        num_blocks,
    })
}

/// One block per index entry, the contiguous side packed in order.
/// Returns `(packed offset, indexed offset, len)` triples.
fn pack_indexed(blocks: &IndexedBlocks, elem: usize) -> Result<Vec<(usize, usize, usize)>> {
    let mut packed = 0usize;
    blocks
        .blocklens()
        .iter()
        .zip(blocks.offsets())
        .map(|(&len, &off)| -> Result<(usize, usize, usize)> {
            let len = bytes(len, elem)?;
            let at = packed;
            packed = packed.checked_add(len).ok_or_else(overflow)?;
            Ok((at, bytes(off, elem)?, len))
        })
        .collect()
}

/// Build the transfer plan for moving `nelem` elements from a `src` layout
/// into a `dst` layout.
///
/// Rules, first match wins:
/// 1. contiguous/contiguous: one block of `nelem` elements
/// 2. contiguous/strided: one block per stride, the contiguous side packed
/// 3. contiguous/indexed: one block per index entry
/// 4. strided/strided with equal block length: one block per stride
/// 5. anything else: merge walk over both sides' native blocks
///
/// Sizes that do not fit in `usize` are rejected as invalid arguments.
pub fn convert(src: &LayoutDescriptor, dst: &LayoutDescriptor, nelem: usize) -> Result<TransferPlan> {
    let elem = src.base().size();
    if dst.base().size() != elem {
        return Err(Error::InvalidArgument(format!(
            "element size mismatch: source {:?} ({}B), destination {:?} ({}B)",
            src.base(),
            elem,
            dst.base(),
            dst.base().size()
        )));
    }

    use LayoutDescriptor::*;
    match (src, dst) {
        (Contiguous { .. }, Contiguous { .. }) => single_block(0, 0, bytes(nelem, elem)?, 1),
        (Contiguous { .. }, Strided { blocklen, stride, .. }) => {
            let block_bytes = bytes(*blocklen, elem)?;
            single_block(block_bytes, bytes(*stride, elem)?, block_bytes, nelem / blocklen)
        }
        (Strided { blocklen, stride, .. }, Contiguous { .. }) => {
            let block_bytes = bytes(*blocklen, elem)?;
            single_block(bytes(*stride, elem)?, block_bytes, block_bytes, nelem / blocklen)
        }
        (Contiguous { .. }, Indexed { blocks, .. }) => pack_indexed(blocks, elem)?
            .into_iter()
            .map(|(packed, off, len)| block_copy(packed, off, len))
            .collect::<Result<_>>()
            .map(TransferPlan::MultiBlock),
        (Indexed { blocks, .. }, Contiguous { .. }) => pack_indexed(blocks, elem)?
            .into_iter()
            .map(|(packed, off, len)| block_copy(off, packed, len))
            .collect::<Result<_>>()
            .map(TransferPlan::MultiBlock),
        (
            Strided {
                blocklen: src_len,
                stride: src_stride,
                ..
            },
            Strided {
                blocklen: dst_len,
                stride: dst_stride,
                ..
            },
        ) if src_len == dst_len => single_block(
            bytes(*src_stride, elem)?,
            bytes(*dst_stride, elem)?,
            bytes(*src_len, elem)?,
            nelem / src_len,
        ),
        _ => merge_walk(src, dst, nelem, elem),
    }
}

/// Native block sequence of a strided or indexed side
#[derive(Clone, Copy)]
enum Native<'a> {
    Strided { blocklen: usize, stride: usize },
    Indexed(&'a IndexedBlocks),
}

/// Position inside one side's native block sequence
struct Cursor<'a> {
    native: Native<'a>,
    elem: usize,
    block: usize,
    /// Elements left in the current native block
    remaining: usize,
    /// Byte offset of the next element
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(layout: &'a LayoutDescriptor, elem: usize) -> Result<Self> {
        let native = match layout {
            LayoutDescriptor::Strided {
                blocklen, stride, ..
            } => Native::Strided {
                blocklen: *blocklen,
                stride: *stride,
            },
            LayoutDescriptor::Indexed { blocks, .. } => Native::Indexed(blocks),
            LayoutDescriptor::Contiguous { .. } => {
                return Err(Error::invalid("merge walk takes strided or indexed layouts only"))
            }
        };
        let mut cursor = Self {
            native,
            elem,
            block: 0,
            remaining: 0,
            offset: 0,
        };
        cursor.load()?;
        Ok(cursor)
    }

    /// Position at the start of `self.block`, skipping empty index entries
    fn load(&mut self) -> Result<()> {
        match self.native {
            Native::Strided { blocklen, stride } => {
                self.remaining = blocklen;
                self.offset = self
                    .block
                    .checked_mul(stride)
                    .and_then(|n| n.checked_mul(self.elem))
                    .ok_or_else(overflow)?;
            }
            Native::Indexed(blocks) => {
                while let Some((len, off)) = blocks.block(self.block) {
                    if len > 0 {
                        self.remaining = len;
                        self.offset = bytes(off, self.elem)?;
                        return Ok(());
                    }
                    self.block += 1;
                }
                self.remaining = 0;
            }
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) -> Result<()> {
        self.remaining -= n;
        if self.remaining == 0 {
            self.block += 1;
            self.load()
        } else {
            self.offset = self.offset.checked_add(n * self.elem).ok_or_else(overflow)?;
            Ok(())
        }
    }

    /// Upper bound on native blocks visited while walking `nelem` elements
    fn block_bound(&self, nelem: usize) -> usize {
        match self.native {
            Native::Strided { blocklen, .. } => nelem / blocklen + 1,
            Native::Indexed(blocks) => blocks.num_blocks(),
        }
    }
}

/// Rule 5: split both sides at every native block boundary.
///
/// Both layouts must be strided or indexed; `convert` handles every
/// pairing with a contiguous side before getting here.
fn merge_walk(
    src: &LayoutDescriptor,
    dst: &LayoutDescriptor,
    nelem: usize,
    elem: usize,
) -> Result<TransferPlan> {
    // bounds n * elem for every emitted block
    bytes(nelem, elem)?;
    let mut s = Cursor::new(src, elem)?;
    let mut d = Cursor::new(dst, elem)?;
    let bound = s.block_bound(nelem).saturating_add(d.block_bound(nelem));
    let mut out = Vec::with_capacity(bound.min(nelem));

    let mut done = 0;
    while done < nelem {
        if s.remaining == 0 || d.remaining == 0 {
            return Err(Error::InvalidArgument(format!(
                "{} layout describes only {} of {} elements",
                if s.remaining == 0 { "source" } else { "destination" },
                done,
                nelem
            )));
        }
        let n = s.remaining.min(d.remaining).min(nelem - done);
        out.push(block_copy(s.offset, d.offset, n * elem)?);
        s.consume(n)?;
        d.consume(n)?;
        done += n;
    }
    Ok(TransferPlan::MultiBlock(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn contig() -> LayoutDescriptor {
        LayoutDescriptor::contiguous(DType::Int)
    }

    fn strided(blocklen: usize, stride: usize) -> LayoutDescriptor {
        LayoutDescriptor::strided(DType::Int, blocklen, stride).unwrap()
    }

    fn indexed(lens: &[usize], offs: &[usize]) -> LayoutDescriptor {
        LayoutDescriptor::indexed(DType::Int, lens.to_vec(), offs.to_vec()).unwrap()
    }

    #[test]
    fn test_contiguous_pair() {
        for nelem in [0, 1, 7, 4096] {
            let plan = convert(&contig(), &contig(), nelem).unwrap();
            assert_eq!(
                plan,
                TransferPlan::SingleBlock {
                    src_stride: 0,
                    dst_stride: 0,
                    block_bytes: nelem * 4,
                    num_blocks: 1,
                }
            );
        }
    }

    #[test]
    fn test_contiguous_to_strided() {
        let plan = convert(&contig(), &strided(3, 10), 12).unwrap();
        assert_eq!(
            plan,
            TransferPlan::SingleBlock {
                src_stride: 12,
                dst_stride: 40,
                block_bytes: 12,
                num_blocks: 4,
            }
        );
    }

    #[test]
    fn test_strided_to_contiguous() {
        let plan = convert(&strided(2, 5), &contig(), 6).unwrap();
        let blocks: Vec<_> = plan.blocks().collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2], BlockCopy { src_offset: 80, dst_offset: 16, len: 8 });
    }

    #[test]
    fn test_contiguous_to_indexed() {
        let dst = indexed(&[10, 10, 10, 10], &[0, 20, 50, 80]);
        let plan = convert(&contig(), &dst, 40).unwrap();
        let TransferPlan::MultiBlock(blocks) = &plan else {
            panic!("expected a multi-block plan");
        };
        assert_eq!(blocks.len(), 4);
        let src: Vec<_> = blocks.iter().map(|b| b.src_offset).collect();
        let dst: Vec<_> = blocks.iter().map(|b| b.dst_offset).collect();
        assert_eq!(src, vec![0, 40, 80, 120]);
        assert_eq!(dst, vec![0, 80, 200, 320]);
        assert!(blocks.iter().all(|b| b.len == 40));
    }

    #[test]
    fn test_indexed_to_contiguous_preserves_order() {
        let src = indexed(&[2, 1], &[9, 3]);
        let plan = convert(&src, &contig(), 3).unwrap();
        let blocks: Vec<_> = plan.blocks().collect();
        assert_eq!(blocks[0], BlockCopy { src_offset: 36, dst_offset: 0, len: 8 });
        assert_eq!(blocks[1], BlockCopy { src_offset: 12, dst_offset: 8, len: 4 });
    }

    #[test]
    fn test_strided_equal_blocklen() {
        let plan = convert(&strided(4, 8), &strided(4, 6), 16).unwrap();
        assert_eq!(
            plan,
            TransferPlan::SingleBlock {
                src_stride: 32,
                dst_stride: 24,
                block_bytes: 16,
                num_blocks: 4,
            }
        );
    }

    #[test]
    fn test_strided_mismatched_blocklen_splits() {
        // src blocks of 3 every 4 elements, dst blocks of 2 every 5 elements
        let plan = convert(&strided(3, 4), &strided(2, 5), 6).unwrap();
        let blocks: Vec<_> = plan.blocks().collect();
        assert_eq!(
            blocks,
            vec![
                BlockCopy { src_offset: 0, dst_offset: 0, len: 8 },
                BlockCopy { src_offset: 8, dst_offset: 20, len: 4 },
                BlockCopy { src_offset: 16, dst_offset: 24, len: 4 },
                BlockCopy { src_offset: 20, dst_offset: 40, len: 8 },
            ]
        );
        assert_eq!(plan.total_bytes(), 24);
    }

    #[test]
    fn test_merge_walk_never_crosses_native_blocks() {
        let src = indexed(&[5, 1, 6], &[100, 0, 50]);
        let dst = strided(4, 10);
        let plan = convert(&src, &dst, 12).unwrap();
        for b in plan.blocks() {
            let dst_block = b.dst_offset / 40;
            assert_eq!((b.dst_offset + b.len - 1) / 40, dst_block);
            assert!(b.dst_offset % 40 + b.len <= 16);
        }
        assert_eq!(plan.total_bytes(), 48);
        assert!(plan.num_blocks() <= 3 + 12 / 4 + 1);
    }

    #[test]
    fn test_indexed_pair() {
        let src = indexed(&[4, 4], &[0, 8]);
        let dst = indexed(&[2, 6], &[1, 20]);
        let plan = convert(&src, &dst, 8).unwrap();
        let blocks: Vec<_> = plan.blocks().collect();
        assert_eq!(
            blocks,
            vec![
                BlockCopy { src_offset: 0, dst_offset: 4, len: 8 },
                BlockCopy { src_offset: 8, dst_offset: 80, len: 8 },
                BlockCopy { src_offset: 32, dst_offset: 88, len: 16 },
            ]
        );
    }

    #[test]
    fn test_short_indexed_side_is_rejected() {
        let src = indexed(&[2], &[0]);
        let err = convert(&src, &strided(1, 2), 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_element_size_mismatch() {
        let src = LayoutDescriptor::contiguous(DType::Double);
        let err = convert(&src, &contig(), 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_reverse_direction_swaps_offsets() {
        let shapes = [
            (contig(), indexed(&[3, 2, 5], &[10, 0, 20])),
            (strided(3, 4), strided(2, 5)),
            (indexed(&[4, 6], &[0, 8]), indexed(&[2, 8], &[1, 20])),
            (contig(), strided(2, 7)),
        ];
        for (a, b) in shapes {
            let ab = convert(&a, &b, 10).unwrap();
            let ba = convert(&b, &a, 10).unwrap();
            let forward: Vec<_> = ab.blocks().collect();
            let backward: Vec<_> = ba.blocks().collect();
            assert_eq!(forward.len(), backward.len());
            for (f, r) in forward.iter().zip(&backward) {
                assert_eq!(f.src_offset, r.dst_offset);
                assert_eq!(f.dst_offset, r.src_offset);
                assert_eq!(f.len, r.len);
            }
            assert_eq!(ab.swapped().blocks().collect::<Vec<_>>(), backward);
        }
    }

    #[test]
    fn test_single_block_matches_independent_copies() {
        let plan = TransferPlan::SingleBlock {
            src_stride: 7,
            dst_stride: 3,
            block_bytes: 3,
            num_blocks: 5,
        };
        let src: Vec<u8> = (0..64).collect();
        let mut via_plan = vec![0u8; 32];
        plan.apply(&src, &mut via_plan).unwrap();

        let mut manual = vec![0u8; 32];
        for i in 0..5 {
            manual[i * 3..i * 3 + 3].copy_from_slice(&src[i * 7..i * 7 + 3]);
        }
        assert_eq!(via_plan, manual);
    }

    #[test]
    fn test_apply_rejects_short_buffers() {
        let plan = convert(&contig(), &contig(), 8).unwrap();
        let src = [1u8; 32];
        let mut dst = [0u8; 16];
        assert!(plan.apply(&src, &mut dst).is_err());
        assert_eq!(dst, [0u8; 16]);
    }

    #[test]
    fn test_bind_sizes() {
        let single = convert(&contig(), &strided(2, 4), 8).unwrap();
        assert_eq!(single.dst_bind_size(), 4 * 16 + 8);
        assert_eq!(single.dst_extent(), 3 * 16 + 8);

        let multi = convert(&contig(), &indexed(&[1, 1], &[5, 2]), 2).unwrap();
        assert_eq!(multi.dst_bind_size(), 12);
        assert_eq!(multi.dst_extent(), 24);
        assert_eq!(multi.src_bind_size(), 8);
    }

    #[test]
    fn test_oversized_transfers_are_rejected() {
        let huge = usize::MAX / 4 + 2;
        assert!(matches!(
            convert(&contig(), &contig(), huge),
            Err(Error::InvalidArgument(_))
        ));
        assert!(convert(&contig(), &strided(1, usize::MAX / 2), 8).is_err());
        assert!(convert(&contig(), &indexed(&[1], &[usize::MAX / 2]), 1).is_err());
        // second native block of the source ends past usize::MAX
        assert!(matches!(
            convert(&strided(2, usize::MAX / 4), &strided(3, 3), 4),
            Err(Error::InvalidArgument(_))
        ));
    }
}
