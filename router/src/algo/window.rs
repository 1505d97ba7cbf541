use pcb_common::geom::coord::{CellBox, GridCoord};

/// Planar box of the grid (all layers) a search is confined to, with its
/// own dense local indexing.
#[derive(Clone, Copy, Debug)]
pub struct RoutingWindow {
    pub bounds: CellBox,
    pub width: u32,
    pub height: u32,
    pub layers: u8,
}

impl RoutingWindow {
    pub fn new(bounds: CellBox, layers: u8) -> Self {
        Self {
            bounds,
            width: bounds.width(),
            height: bounds.height(),
            layers,
        }
    }

    pub fn size(&self) -> usize {
        self.width as usize * self.height as usize * self.layers as usize
    }

    #[inline(always)]
    pub fn contains(&self, c: GridCoord) -> bool {
        self.bounds.contains(c.x, c.y) && c.z < self.layers
    }

    #[inline(always)]
    pub fn contains_xy(&self, x: i64, y: i64) -> bool {
        x >= self.bounds.min_x as i64
            && x <= self.bounds.max_x as i64
            && y >= self.bounds.min_y as i64
            && y <= self.bounds.max_y as i64
    }

    #[inline(always)]
    pub fn local_idx(&self, c: GridCoord) -> usize {
        let lx = c.x - self.bounds.min_x;
        let ly = c.y - self.bounds.min_y;
        let lz = c.z as u32;
        (lz * self.width * self.height + ly * self.width + lx) as usize
    }

    #[inline(always)]
    pub fn coord(&self, idx: u32) -> GridCoord {
        let plane_size = self.width * self.height;
        let z = (idx / plane_size) as u8;
        let rem = idx % plane_size;
        let y = rem / self.width + self.bounds.min_y;
        let x = rem % self.width + self.bounds.min_x;
        GridCoord::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_index_round_trips() {
        let w = RoutingWindow::new(CellBox::new(3, 7, 10, 12), 2);
        assert_eq!(w.size(), 5 * 3 * 2);
        let c = GridCoord::new(6, 11, 1);
        assert_eq!(w.coord(w.local_idx(c) as u32), c);
        assert!(!w.contains(GridCoord::new(8, 11, 0)));
        assert!(!w.contains(GridCoord::new(6, 11, 2)));
    }
}
