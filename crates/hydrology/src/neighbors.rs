//! Shared 8-neighborhood geometry.
//!
//! All routing code in this crate indexes the eight neighbors of a cell
//! the same way: 0 = north, then clockwise through NE, E, SE, S, SW, W
//! up to 7 = NW. Rows grow southward, so north is `row - 1`.

/// Row/column offsets for the eight neighbors, clockwise from north.
pub const OFFSETS: [(isize, isize); 8] = [
    (-1, 0),  // N
    (-1, 1),  // NE
    (0, 1),   // E
    (1, 1),   // SE
    (1, 0),   // S
    (1, -1),  // SW
    (0, -1),  // W
    (-1, -1), // NW
];

/// Center-to-center distance of each neighbor in cell-size units.
pub const DIST_FACTOR: [f64; 8] = [
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
];

/// Direction pointing back at the cell from its neighbor `dir`.
#[inline]
pub fn opposite(dir: usize) -> usize {
    (dir + 4) % 8
}

/// Coordinates of the neighbor of `(row, col)` in direction `dir`, or
/// `None` when it falls outside an `rows x cols` grid.
#[inline]
pub fn neighbor(row: usize, col: usize, dir: usize, rows: usize, cols: usize) -> Option<(usize, usize)> {
    let (dr, dc) = OFFSETS[dir];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
        None
    } else {
        Some((nr as usize, nc as usize))
    }
}
