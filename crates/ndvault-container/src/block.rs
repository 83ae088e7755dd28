//! Dense row-major blocks and rectangular selections.

use std::ops::Range;

use crate::dtype::{DType, Element, Scalar};
use crate::{ContainerError, Result};

/// Number of cells in `shape` (1 for a rank-0 shape).
pub fn cell_count(shape: &[usize]) -> u64 {
    shape.iter().map(|&d| d as u64).product()
}

/// A rectangular selection: one half-open range per dimension.
///
/// An integer index is expressed as a length-1 range, so a selection always
/// keeps the rank of the array it selects from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bounds(Vec<Range<usize>>);

impl Bounds {
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self(ranges)
    }

    /// The whole extent of `shape`
    pub fn full(shape: &[usize]) -> Self {
        Self(shape.iter().map(|&d| 0..d).collect())
    }

    /// A single cell
    pub fn cell(index: &[usize]) -> Self {
        Self(index.iter().map(|&i| i..i + 1).collect())
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn starts(&self) -> Vec<usize> {
        self.0.iter().map(|r| r.start).collect()
    }

    /// Shape of the block this selection produces
    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(|r| r.end.saturating_sub(r.start)).collect()
    }

    pub fn cell_count(&self) -> u64 {
        cell_count(&self.shape())
    }

    /// True when this selection spans all of `shape`
    pub fn covers(&self, shape: &[usize]) -> bool {
        self.0.len() == shape.len()
            && self.0.iter().zip(shape).all(|(r, &d)| r.start == 0 && r.end == d)
    }

    /// Check rank, emptiness and range against an array shape.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        if self.0.len() != shape.len() {
            return Err(ContainerError::OutOfBounds(format!(
                "selection has {} dimensions, array has {}",
                self.0.len(),
                shape.len()
            )));
        }
        for (axis, (range, &size)) in self.0.iter().zip(shape).enumerate() {
            if range.start >= range.end {
                return Err(ContainerError::OutOfBounds(format!(
                    "empty range {:?} on axis {}",
                    range, axis
                )));
            }
            if range.end > size {
                return Err(ContainerError::OutOfBounds(format!(
                    "range {:?} exceeds size {} on axis {}",
                    range, size, axis
                )));
            }
        }
        Ok(())
    }

    /// Overlap of two selections of equal rank
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        if self.rank() != other.rank() {
            return None;
        }
        let mut out = Vec::with_capacity(self.rank());
        for (a, b) in self.0.iter().zip(&other.0) {
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start >= end {
                return None;
            }
            out.push(start..end);
        }
        Some(Bounds(out))
    }

    /// Express this selection relative to `origin`.
    pub(crate) fn offset_from(&self, origin: &[usize]) -> Vec<usize> {
        self.0.iter().zip(origin).map(|(r, &o)| r.start - o).collect()
    }
}

/// A dense row-major block of little-endian elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    dtype: DType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl Block {
    /// A block of `shape` where every cell holds `fill`
    pub fn filled(dtype: DType, shape: &[usize], fill: Scalar) -> Result<Self> {
        let pattern = fill.encode(dtype)?;
        let cells = cell_count(shape) as usize;
        Ok(Self {
            dtype,
            shape: shape.to_vec(),
            bytes: pattern.repeat(cells),
        })
    }

    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        let cells = cell_count(shape) as usize;
        if values.len() != cells {
            return Err(ContainerError::Validation(format!(
                "{} values do not fill shape {:?}",
                values.len(),
                shape
            )));
        }
        let mut bytes = Vec::with_capacity(cells * T::DTYPE.size());
        for value in values {
            value.write_le(&mut bytes);
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            bytes,
        })
    }

    /// A rank-0 block holding one value
    pub fn from_scalar<T: Element>(value: T) -> Self {
        let mut bytes = Vec::with_capacity(T::DTYPE.size());
        value.write_le(&mut bytes);
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            bytes,
        }
    }

    pub fn from_bytes(dtype: DType, shape: &[usize], bytes: Vec<u8>) -> Result<Self> {
        let expected = cell_count(shape) as usize * dtype.size();
        if bytes.len() != expected {
            return Err(ContainerError::Validation(format!(
                "{} bytes given, shape {:?} of {} needs {}",
                bytes.len(),
                shape,
                dtype,
                expected
            )));
        }
        Ok(Self {
            dtype,
            shape: shape.to_vec(),
            bytes,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(ContainerError::Validation(format!(
                "block holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .bytes
            .chunks_exact(self.dtype.size())
            .map(T::read_le)
            .collect())
    }

    /// Value at a multi-dimensional index
    pub fn get(&self, index: &[usize]) -> Option<Scalar> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(&i, &d)| i >= d) {
            return None;
        }
        let strides = strides(&self.shape);
        let offset: usize = index.iter().zip(&strides).map(|(&i, &s)| i * s).sum();
        let size = self.dtype.size();
        Some(self.dtype.decode(&self.bytes[offset * size..(offset + 1) * size]))
    }

    /// Count of cells equal to `value` (NaN-aware)
    pub fn count_equal(&self, value: Scalar) -> u64 {
        self.dtype.count_equal(&self.bytes, value)
    }

    /// Expand a single-cell block to `shape`; any other block must already
    /// have `shape`.
    pub fn broadcast_to(self, shape: &[usize]) -> Result<Self> {
        if self.shape == shape {
            return Ok(self);
        }
        if self.len() == 1 {
            let cells = cell_count(shape) as usize;
            return Ok(Self {
                dtype: self.dtype,
                shape: shape.to_vec(),
                bytes: self.bytes.repeat(cells),
            });
        }
        Err(ContainerError::Validation(format!(
            "data of shape {:?} does not fit selection of shape {:?}",
            self.shape, shape
        )))
    }
}

/// Row-major strides in elements
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut out = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        out[i] = out[i + 1] * shape[i + 1];
    }
    out
}

/// Visit every innermost row of an `extent`-sized region that sits at
/// `a_origin` inside an `a_shape` buffer and at `b_origin` inside a
/// `b_shape` buffer. The callback receives element offsets into both buffers
/// and the row length in elements.
pub(crate) fn for_each_row(
    a_shape: &[usize],
    a_origin: &[usize],
    b_shape: &[usize],
    b_origin: &[usize],
    extent: &[usize],
    mut f: impl FnMut(usize, usize, usize),
) {
    let rank = extent.len();
    if rank == 0 {
        f(0, 0, 1);
        return;
    }
    if extent.iter().any(|&e| e == 0) {
        return;
    }
    let a_strides = strides(a_shape);
    let b_strides = strides(b_shape);
    let row = extent[rank - 1];
    let mut counter = vec![0usize; rank - 1];

    loop {
        let mut a = a_origin[rank - 1];
        let mut b = b_origin[rank - 1];
        for i in 0..rank - 1 {
            a += (a_origin[i] + counter[i]) * a_strides[i];
            b += (b_origin[i] + counter[i]) * b_strides[i];
        }
        f(a, b, row);

        let mut dim = rank - 1;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            counter[dim] += 1;
            if counter[dim] < extent[dim] {
                break;
            }
            counter[dim] = 0;
        }
    }
}

/// Copy an `extent` region between two row-major byte buffers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_region(
    src: &[u8],
    src_shape: &[usize],
    src_origin: &[usize],
    dst: &mut [u8],
    dst_shape: &[usize],
    dst_origin: &[usize],
    extent: &[usize],
    elem: usize,
) {
    for_each_row(src_shape, src_origin, dst_shape, dst_origin, extent, |s, d, n| {
        dst[d * elem..(d + n) * elem].copy_from_slice(&src[s * elem..(s + n) * elem]);
    });
}

/// Overwrite an `extent` region of `dst` with a repeated element pattern.
pub(crate) fn fill_region(
    dst: &mut [u8],
    dst_shape: &[usize],
    origin: &[usize],
    extent: &[usize],
    pattern: &[u8],
) {
    let elem = pattern.len();
    for_each_row(dst_shape, origin, dst_shape, origin, extent, |_, d, n| {
        for cell in dst[d * elem..(d + n) * elem].chunks_exact_mut(elem) {
            cell.copy_from_slice(pattern);
        }
    });
}

/// Count cells equal to `value` inside an `extent` region of `buf`.
pub(crate) fn count_in_region(
    buf: &[u8],
    shape: &[usize],
    origin: &[usize],
    extent: &[usize],
    dtype: DType,
    value: Scalar,
) -> u64 {
    let elem = dtype.size();
    let mut total = 0u64;
    for_each_row(shape, origin, shape, origin, extent, |a, _, n| {
        total += dtype.count_equal(&buf[a * elem..(a + n) * elem], value);
    });
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_shape_and_cells() {
        let b = Bounds::new(vec![1..3, 0..4]);
        assert_eq!(b.shape(), vec![2, 4]);
        assert_eq!(b.cell_count(), 8);
        assert!(!b.covers(&[3, 4]));
        assert!(Bounds::full(&[3, 4]).covers(&[3, 4]));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(vec![0..2]).validate(&[2, 2]).is_err());
        assert!(Bounds::new(vec![1..1, 0..2]).validate(&[2, 2]).is_err());
        assert!(Bounds::new(vec![0..3, 0..2]).validate(&[2, 2]).is_err());
        assert!(Bounds::cell(&[1, 1]).validate(&[2, 2]).is_ok());
    }

    #[test]
    fn test_intersect() {
        let a = Bounds::new(vec![0..4, 2..6]);
        let b = Bounds::new(vec![3..8, 0..3]);
        assert_eq!(a.intersect(&b), Some(Bounds::new(vec![3..4, 2..3])));
        assert_eq!(a.intersect(&Bounds::new(vec![4..5, 0..1])), None);
    }

    #[test]
    fn test_copy_region_2d() {
        // 3x4 source with values 0..12, copy the 2x2 block at (1, 1)
        let src = Block::from_vec(&[3, 4], (0..12u8).collect()).unwrap();
        let mut dst = vec![0u8; 4];
        copy_region(src.bytes(), &[3, 4], &[1, 1], &mut dst, &[2, 2], &[0, 0], &[2, 2], 1);
        assert_eq!(dst, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_fill_and_count_region() {
        let mut buf = Block::from_vec(&[2, 3], vec![1i16; 6]).unwrap().into_bytes();
        fill_region(&mut buf, &[2, 3], &[0, 1], &[2, 2], &7i16.to_le_bytes());
        let block = Block::from_bytes(DType::Int16, &[2, 3], buf.clone()).unwrap();
        assert_eq!(block.to_vec::<i16>().unwrap(), vec![1, 7, 7, 1, 7, 7]);
        assert_eq!(count_in_region(&buf, &[2, 3], &[0, 1], &[2, 2], DType::Int16, Scalar::Int(7)), 4);
        assert_eq!(count_in_region(&buf, &[2, 3], &[0, 0], &[1, 1], DType::Int16, Scalar::Int(7)), 0);
    }

    #[test]
    fn test_block_get_and_broadcast() {
        let block = Block::from_vec(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(block.get(&[1, 0]), Some(Scalar::Float(3.0)));
        assert_eq!(block.get(&[2, 0]), None);

        let wide = Block::from_scalar(9u32).broadcast_to(&[2, 3]).unwrap();
        assert_eq!(wide.to_vec::<u32>().unwrap(), vec![9; 6]);
        assert!(block.broadcast_to(&[4]).is_err());
    }

    #[test]
    fn test_to_vec_checks_dtype() {
        let block = Block::filled(DType::Float64, &[2], Scalar::Float(f64::NAN)).unwrap();
        assert!(block.to_vec::<f32>().is_err());
        assert!(block.to_vec::<f64>().unwrap().iter().all(|v| v.is_nan()));
        assert_eq!(block.count_equal(Scalar::Float(f64::NAN)), 2);
    }
}
