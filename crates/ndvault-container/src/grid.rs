//! Regular chunk grid over an array shape.

use crate::block::Bounds;

/// Splits `shape` into chunks of `chunk_shape`; edge chunks are truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    grid_shape: Vec<usize>,
}

impl ChunkGrid {
    pub fn new(shape: &[usize], chunk_shape: &[usize]) -> Self {
        let grid_shape = shape
            .iter()
            .zip(chunk_shape)
            .map(|(&d, &c)| d.div_ceil(c.max(1)))
            .collect();
        Self {
            shape: shape.to_vec(),
            chunk_shape: chunk_shape.to_vec(),
            grid_shape,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    /// Number of chunks along each dimension
    pub fn grid_shape(&self) -> &[usize] {
        &self.grid_shape
    }

    pub fn chunk_count(&self) -> usize {
        self.grid_shape.iter().product()
    }

    /// Grid coordinates of a chunk from its row-major index
    fn coords(&self, mut index: usize) -> Vec<usize> {
        let mut coords = vec![0; self.grid_shape.len()];
        for axis in (0..self.grid_shape.len()).rev() {
            coords[axis] = index % self.grid_shape[axis];
            index /= self.grid_shape[axis];
        }
        coords
    }

    fn linear(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(&self.grid_shape)
            .fold(0, |acc, (&c, &g)| acc * g + c)
    }

    /// Array region covered by chunk `index`
    pub fn chunk_bounds(&self, index: usize) -> Bounds {
        let ranges = self
            .coords(index)
            .iter()
            .zip(&self.chunk_shape)
            .zip(&self.shape)
            .map(|((&c, &size), &dim)| {
                let start = c * size;
                start..(start + size).min(dim)
            })
            .collect();
        Bounds::new(ranges)
    }

    /// Row-major indices of every chunk that intersects `bounds`
    pub fn chunks_in(&self, bounds: &Bounds) -> Vec<usize> {
        let rank = self.grid_shape.len();
        if rank == 0 {
            return vec![0];
        }
        let lo: Vec<usize> = bounds
            .ranges()
            .iter()
            .zip(&self.chunk_shape)
            .map(|(r, &c)| r.start / c)
            .collect();
        let hi: Vec<usize> = bounds
            .ranges()
            .iter()
            .zip(&self.chunk_shape)
            .map(|(r, &c)| (r.end - 1) / c)
            .collect();

        let mut out = Vec::new();
        let mut cur = lo.clone();
        loop {
            out.push(self.linear(&cur));
            let mut axis = rank;
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                if cur[axis] < hi[axis] {
                    cur[axis] += 1;
                    break;
                }
                cur[axis] = lo[axis];
            }
        }
    }
}
