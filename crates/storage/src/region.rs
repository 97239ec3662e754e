//! Copying rectangular regions between C-ordered buffers.
//!
//! Used in both directions: splitting a source array into padded chunks when a
//! container is created, and assembling a sliced region from decompressed
//! chunks when data is served.

use crate::error::{StorageError, StorageResult};
use tessera_core::{Layout, Selection};

/// C-order strides, in elements.
fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Coordinates of chunk `n` in the chunk grid.
pub(crate) fn chunk_coords(layout: &Layout, n: u64) -> Vec<u64> {
    let grid = layout.chunk_grid();
    let mut coords = vec![0u64; grid.len()];
    let mut rest = n;
    for d in (0..grid.len()).rev() {
        coords[d] = rest % grid[d];
        rest /= grid[d];
    }
    coords
}

/// Element-space origin of chunk `n`.
pub(crate) fn chunk_origin(layout: &Layout, n: u64) -> Vec<u64> {
    chunk_coords(layout, n)
        .iter()
        .zip(&layout.chunks)
        .map(|(&c, &len)| c * len)
        .collect()
}

/// A C-ordered buffer positioned in a global coordinate space.
pub(crate) struct Placed<'a, B> {
    pub buf: B,
    pub shape: &'a [u64],
    pub origin: &'a [u64],
}

fn offset(coords: &[u64], origin: &[u64], strides: &[u64]) -> usize {
    coords
        .iter()
        .zip(origin)
        .zip(strides)
        .map(|((&c, &o), &s)| (c - o) * s)
        .sum::<u64>() as usize
}

/// Copy the box `[lo, hi)` (global coordinates) from `src` to `dst`.
pub(crate) fn copy_box(
    src: &Placed<'_, &[u8]>,
    dst: &mut Placed<'_, &mut [u8]>,
    lo: &[u64],
    hi: &[u64],
    typesize: usize,
) {
    if lo.iter().zip(hi).any(|(l, h)| l >= h) {
        return;
    }
    let ndim = lo.len();
    if ndim == 0 {
        dst.buf[..typesize].copy_from_slice(&src.buf[..typesize]);
        return;
    }

    let src_strides = strides(src.shape);
    let dst_strides = strides(dst.shape);
    let run = (hi[ndim - 1] - lo[ndim - 1]) as usize * typesize;
    let mut coords = lo.to_vec();
    loop {
        let s = offset(&coords, src.origin, &src_strides) * typesize;
        let d = offset(&coords, dst.origin, &dst_strides) * typesize;
        dst.buf[d..d + run].copy_from_slice(&src.buf[s..s + run]);

        // Advance every dimension but the last, which is copied as one run.
        let mut dim = ndim - 1;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            coords[dim] += 1;
            if coords[dim] < hi[dim] {
                break;
            }
            coords[dim] = lo[dim];
        }
    }
}

/// Extract chunk `n` (zero-padded to the full chunk shape) from a whole array.
pub(crate) fn extract_chunk(layout: &Layout, data: &[u8], n: u64) -> Vec<u8> {
    let typesize = layout.typesize() as usize;
    let origin = chunk_origin(layout, n);
    let hi: Vec<u64> = origin
        .iter()
        .zip(&layout.chunks)
        .zip(&layout.shape)
        .map(|((&o, &c), &s)| (o + c).min(s))
        .collect();
    let mut chunk = vec![0u8; layout.chunksize() as usize];
    let zeros = vec![0u64; layout.ndim()];
    let src = Placed {
        buf: data,
        shape: &layout.shape,
        origin: &zeros,
    };
    let mut dst = Placed {
        buf: chunk.as_mut_slice(),
        shape: &layout.chunks,
        origin: &origin,
    };
    copy_box(&src, &mut dst, &origin, &hi, typesize);
    chunk
}

/// Assemble the selected region of an array from its decompressed chunks.
///
/// `chunk` is called once per intersecting chunk with the chunk's linear
/// index and must return its decompressed bytes. The output holds the
/// selected elements in C order as raw little-endian bytes; dimensions
/// selected by a single index are dropped from the shape but do not change
/// the byte layout.
pub fn assemble<F>(layout: &Layout, selection: &Selection, mut chunk: F) -> StorageResult<Vec<u8>>
where
    F: FnMut(u64) -> StorageResult<Vec<u8>>,
{
    let typesize = layout.typesize() as usize;
    let out_len = selection.items() as usize * typesize;
    let mut out = vec![0u8; out_len];
    if selection.is_empty() {
        return Ok(out);
    }

    let region_shape: Vec<u64> = selection.dims.iter().map(|d| d.len()).collect();
    let region_origin: Vec<u64> = selection.dims.iter().map(|d| d.start).collect();
    let expected = layout.chunksize() as usize;

    for n in selection.chunk_indices(layout) {
        let data = chunk(n)?;
        if data.len() != expected {
            return Err(StorageError::Codec(format!(
                "chunk {n} has {} bytes, expected {expected}",
                data.len()
            )));
        }
        let origin = chunk_origin(layout, n);
        let lo: Vec<u64> = origin
            .iter()
            .zip(&selection.dims)
            .map(|(&o, d)| o.max(d.start))
            .collect();
        let hi: Vec<u64> = origin
            .iter()
            .zip(&layout.chunks)
            .zip(&selection.dims)
            .map(|((&o, &c), d)| (o + c).min(d.stop))
            .collect();
        let src = Placed {
            buf: data.as_slice(),
            shape: &layout.chunks,
            origin: &origin,
        };
        let mut dst = Placed {
            buf: out.as_mut_slice(),
            shape: &region_shape,
            origin: &region_origin,
        };
        copy_box(&src, &mut dst, &lo, &hi, typesize);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Dtype, Slice};

    /// 10 x 7 int32 array where element (i, j) = i * 100 + j.
    fn sample() -> (Layout, Vec<u8>) {
        let layout = Layout::new(Dtype::Int32, vec![10, 7], vec![4, 5], vec![4, 5]).unwrap();
        let mut data = Vec::new();
        for i in 0..10i32 {
            for j in 0..7i32 {
                data.extend_from_slice(&(i * 100 + j).to_le_bytes());
            }
        }
        (layout, data)
    }

    fn decode(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .collect()
    }

    fn read(layout: &Layout, data: &[u8], slice: &str) -> Vec<i32> {
        let selection = Slice::parse(slice).unwrap().resolve(&layout.shape).unwrap();
        let bytes = assemble(layout, &selection, |n| Ok(extract_chunk(layout, data, n))).unwrap();
        decode(&bytes)
    }

    #[test]
    fn test_edge_chunk_is_zero_padded() {
        let (layout, data) = sample();
        // Chunk 5 is the bottom-right corner: rows 8..10, cols 5..7.
        let chunk = decode(&extract_chunk(&layout, &data, 5));
        assert_eq!(chunk.len(), 20);
        assert_eq!(&chunk[0..5], &[805, 806, 0, 0, 0]);
        assert_eq!(&chunk[5..10], &[905, 906, 0, 0, 0]);
        assert!(chunk[10..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_whole_array_round_trips() {
        let (layout, data) = sample();
        let selection = Slice::all().resolve(&layout.shape).unwrap();
        let bytes = assemble(&layout, &selection, |n| Ok(extract_chunk(&layout, &data, n))).unwrap();
        assert_eq!(bytes, data);
    }

    #[test]
    fn test_sub_region_across_chunks() {
        let (layout, data) = sample();
        assert_eq!(
            read(&layout, &data, "3:5,4:6"),
            vec![304, 305, 404, 405]
        );
    }

    #[test]
    fn test_index_drops_dimension() {
        let (layout, data) = sample();
        assert_eq!(read(&layout, &data, "-1"), vec![900, 901, 902, 903, 904, 905, 906]);
        assert_eq!(read(&layout, &data, ":,6"), (0..10).map(|i| i * 100 + 6).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_selection_fetches_nothing() {
        let (layout, _) = sample();
        let selection = Slice::parse("2:2").unwrap().resolve(&layout.shape).unwrap();
        let bytes = assemble(&layout, &selection, |_| panic!("no chunk should be read")).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_wrong_chunk_length_is_rejected() {
        let (layout, _) = sample();
        let selection = Slice::all().resolve(&layout.shape).unwrap();
        assert!(matches!(
            assemble(&layout, &selection, |_| Ok(vec![0u8; 3])),
            Err(StorageError::Codec(_))
        ));
    }

    #[test]
    fn test_plain_bytes_layout() {
        let data: Vec<u8> = (0..=255u8).cycle().take(2500).collect();
        let layout = Layout::for_bytes(data.len() as u64, 1024).unwrap();
        let selection = Slice::parse("1000:1100").unwrap().resolve(&layout.shape).unwrap();
        assert_eq!(selection.chunk_indices(&layout), vec![0, 1]);
        let bytes = assemble(&layout, &selection, |n| Ok(extract_chunk(&layout, &data, n))).unwrap();
        assert_eq!(bytes, &data[1000..1100]);
    }
}
