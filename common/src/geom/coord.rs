use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn with_layer(&self, z: u8) -> Self {
        Self::new(self.x, self.y, z)
    }

    /// Planar Euclidean distance in cells.
    pub fn planar_distance(&self, other: &GridCoord) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Planar Chebyshev distance in cells.
    pub fn chebyshev(&self, other: &GridCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

/// Inclusive planar box of grid cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellBox {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl CellBox {
    pub fn new(min_x: u32, max_x: u32, min_y: u32, max_y: u32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn from_coords<'a, I: IntoIterator<Item = &'a GridCoord>>(coords: I) -> Option<Self> {
        let mut it = coords.into_iter();
        let first = it.next()?;
        let mut b = Self::new(first.x, first.x, first.y, first.y);
        for c in it {
            b.include(c.x, c.y);
        }
        Some(b)
    }

    pub fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    pub fn union(&self, other: &CellBox) -> CellBox {
        CellBox::new(
            self.min_x.min(other.min_x),
            self.max_x.max(other.max_x),
            self.min_y.min(other.min_y),
            self.max_y.max(other.max_y),
        )
    }

    /// Grows the box by `margin` cells, clamped to a `w` x `h` grid.
    pub fn expand(&self, margin: u32, w: u32, h: u32) -> CellBox {
        CellBox::new(
            self.min_x.saturating_sub(margin),
            (self.max_x.saturating_add(margin)).min(w.saturating_sub(1)),
            self.min_y.saturating_sub(margin),
            (self.max_y.saturating_add(margin)).min(h.saturating_sub(1)),
        )
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// True when the two boxes share at least one cell.
    pub fn intersects(&self, other: &CellBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Euclidean distance in cells from a cell to the box (0 inside).
    pub fn distance_to(&self, x: u32, y: u32) -> f64 {
        let dx = if x < self.min_x {
            (self.min_x - x) as f64
        } else if x > self.max_x {
            (x - self.max_x) as f64
        } else {
            0.0
        };
        let dy = if y < self.min_y {
            (self.min_y - y) as f64
        } else if y > self.max_y {
            (y - self.max_y) as f64
        } else {
            0.0
        };
        (dx * dx + dy * dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_boxes_share_cells() {
        let a = CellBox::new(0, 4, 0, 4);
        let b = CellBox::new(4, 8, 2, 3);
        let c = CellBox::new(5, 8, 0, 4);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn expand_clamps_to_grid() {
        let b = CellBox::new(1, 3, 1, 3).expand(5, 6, 10);
        assert_eq!(b, CellBox::new(0, 5, 0, 8));
    }

    #[test]
    fn distance_is_zero_inside() {
        let b = CellBox::new(2, 4, 2, 4);
        assert_eq!(b.distance_to(3, 3), 0.0);
        assert_eq!(b.distance_to(7, 8), 5.0);
    }
}
