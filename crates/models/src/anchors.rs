/// Cell centres of a regular grid, tiled `repeat` times.
///
/// Axis 0 varies slowest, so anchor `k` of each tile sits at the centre of the
/// `k`-th cell in row-major order. Tiles are contiguous: anchors
/// `[t * cells, (t + 1) * cells)` belong to tile `t`.
pub fn generate_anchors<const D: usize>(grid: [usize; D], repeat: usize) -> Vec<[f32; D]> {
    let cells: usize = grid.iter().product();
    let mut tile = Vec::with_capacity(cells);
    for flat in 0..cells {
        let mut rem = flat;
        let mut index = [0usize; D];
        for axis in (0..D).rev() {
            index[axis] = rem % grid[axis];
            rem /= grid[axis];
        }
        tile.push(std::array::from_fn(|axis| index[axis] as f32 + 0.5));
    }
    let mut anchors = Vec::with_capacity(cells * repeat);
    for _ in 0..repeat {
        anchors.extend_from_slice(&tile);
    }
    anchors
}

/// Row-major index of an in-bounds cell.
pub fn flat_index<const D: usize>(cell: [usize; D], grid: [usize; D]) -> usize {
    cell.iter()
        .zip(grid.iter())
        .fold(0, |acc, (&c, &extent)| acc * extent + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_by_two_grid() {
        let anchors = generate_anchors([2, 2], 1);
        assert_eq!(
            anchors,
            vec![[0.5, 0.5], [0.5, 1.5], [1.5, 0.5], [1.5, 1.5]]
        );
    }

    #[test]
    fn tiles_repeat_contiguously() {
        let anchors = generate_anchors([3, 4], 5);
        assert_eq!(anchors.len(), 3 * 4 * 5);
        let tile = &anchors[..12];
        for chunk in anchors.chunks(12) {
            assert_eq!(chunk, tile);
        }
        for a in tile {
            assert!(a[0] >= 0.5 && a[0] <= 2.5);
            assert!(a[1] >= 0.5 && a[1] <= 3.5);
            assert_eq!(a[0].fract(), 0.5);
        }
    }

    #[test]
    fn three_dimensional_grid() {
        let anchors = generate_anchors([2, 3, 4], 2);
        assert_eq!(anchors.len(), 48);
        assert_eq!(anchors[0], [0.5, 0.5, 0.5]);
        assert_eq!(anchors[23], [1.5, 2.5, 3.5]);
        assert_eq!(anchors[24], [0.5, 0.5, 0.5]);
    }

    #[test]
    fn flat_index_matches_anchor_order() {
        let grid = [3, 5];
        let anchors = generate_anchors(grid, 1);
        let idx = flat_index([2, 1], grid);
        assert_eq!(anchors[idx], [2.5, 1.5]);
    }
}
