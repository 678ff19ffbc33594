//! Morton (Z-order) keys over a cubic grid.
//!
//! Keys interleave up to [`MAX_DEPTH`] bits per axis into a `u64`. The key
//! is monotone in each cell coordinate, so the keys of every cell inside an
//! axis-aligned cell box lie between the keys of the box's min and max
//! corners; the neighbor search exploits this to slide windows over sorted
//! keys.

use nalgebra::Point3;

/// Maximum tree depth representable in a 63-bit interleaved key.
pub const MAX_DEPTH: u32 = 21;

/// Spread the low 21 bits of `x`, leaving two zero bits between each.
fn split_by_3(x: u64) -> u64 {
    let mut x = x & 0x1f_ffff;
    x = (x | (x << 32)) & 0x1f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x1f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

/// Interleave three cell coordinates into a Morton key.
#[must_use]
pub fn morton_encode(ix: u64, iy: u64, iz: u64) -> u64 {
    split_by_3(ix) | (split_by_3(iy) << 1) | (split_by_3(iz) << 2)
}

/// A cubic grid of `2^depth` cells per axis anchored at `low`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MortonGrid {
    low: Point3<f64>,
    extent: f64,
    depth: u32,
    cells: u64,
}

impl MortonGrid {
    /// Grid over the cube `[low, low + extent)` at the given depth
    /// (clamped to [`MAX_DEPTH`]).
    #[must_use]
    pub fn new(low: Point3<f64>, extent: f64, depth: u32) -> Self {
        let depth = depth.clamp(1, MAX_DEPTH);
        Self {
            low,
            extent: extent.max(f64::MIN_POSITIVE),
            depth,
            cells: 1_u64 << depth,
        }
    }

    /// Tree depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Edge length of one cell.
    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.extent / self.cells as f64
    }

    /// Cell coordinates of a point, clamped into the grid.
    #[must_use]
    pub fn cell_of(&self, p: &Point3<f64>) -> [u64; 3] {
        let mut c = [0_u64; 3];
        for k in 0..3 {
            let x = (p[k] - self.low[k]) / self.extent;
            let cell = (x * self.cells as f64).floor();
            c[k] = if cell < 0.0 {
                0
            } else if cell >= self.cells as f64 {
                self.cells - 1
            } else {
                cell as u64
            };
        }
        c
    }

    /// Morton key of a point.
    #[must_use]
    pub fn key_of(&self, p: &Point3<f64>) -> u64 {
        let c = self.cell_of(p);
        morton_encode(c[0], c[1], c[2])
    }

    /// Key range `[lo, hi]` covering every cell that the axis-aligned box
    /// `[min, max]` touches. Monotonicity of the key in each coordinate
    /// makes the corner keys valid bounds.
    #[must_use]
    pub fn key_range(&self, min: &Point3<f64>, max: &Point3<f64>) -> (u64, u64) {
        let lo = self.cell_of(min);
        let hi = self.cell_of(max);
        (
            morton_encode(lo[0], lo[1], lo[2]),
            morton_encode(hi[0], hi[1], hi[2]),
        )
    }

    /// Quantise a periodic length onto the grid:
    /// `floor(period/L * 2^depth) / 2^depth * L`. Exact when the period
    /// equals the grid extent.
    #[must_use]
    pub fn quantize_period(&self, period: f64) -> f64 {
        let s = self.cells as f64;
        ((period / self.extent) * s).floor() / s * self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn encode_low_bits() {
        assert_eq!(morton_encode(0, 0, 0), 0);
        assert_eq!(morton_encode(1, 0, 0), 0b001);
        assert_eq!(morton_encode(0, 1, 0), 0b010);
        assert_eq!(morton_encode(0, 0, 1), 0b100);
        assert_eq!(morton_encode(1, 1, 1), 0b111);
        assert_eq!(morton_encode(2, 0, 0), 0b001_000);
    }

    #[test]
    fn monotone_in_each_axis() {
        let base = morton_encode(5, 9, 2);
        assert!(morton_encode(6, 9, 2) > base);
        assert!(morton_encode(5, 10, 2) > base);
        assert!(morton_encode(5, 9, 3) > base);
    }

    #[test]
    fn corner_keys_bound_box() {
        let grid = MortonGrid::new(Point3::origin(), 8.0, 3);
        let (lo, hi) = grid.key_range(&Point3::new(1.1, 2.1, 3.1), &Point3::new(3.9, 4.9, 5.9));
        for ix in 1..=3 {
            for iy in 2..=4 {
                for iz in 3..=5 {
                    let k = morton_encode(ix, iy, iz);
                    assert!(k >= lo && k <= hi);
                }
            }
        }
    }

    #[test]
    fn clamped_outside_points() {
        let grid = MortonGrid::new(Point3::origin(), 4.0, 2);
        assert_eq!(grid.cell_of(&Point3::new(-1.0, 0.5, 5.0)), [0, 0, 3]);
    }

    #[test]
    fn period_quantisation_exact_at_extent() {
        let grid = MortonGrid::new(Point3::origin(), 10.0, 6);
        assert_relative_eq!(grid.quantize_period(10.0), 10.0, epsilon = 1e-12);
        let q = grid.quantize_period(7.3);
        assert!(q <= 7.3 && (7.3 - q) <= grid.cell_size());
    }
}
