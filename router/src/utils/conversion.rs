use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;

/// Fixed mapping between board space and grid cells. Cell `(i, j)` is centred
/// on `origin + (i, j) * resolution`.
#[derive(Clone, Debug, PartialEq)]
pub struct GridConverter {
    resolution: f64,
    origin: Point<f64>,
    grid_w: u32,
    grid_h: u32,
}

impl GridConverter {
    pub fn new(outline: Rect, resolution: f64) -> Self {
        let grid_w = (outline.width() / resolution + 1e-9).floor() as u32 + 1;
        let grid_h = (outline.height() / resolution + 1e-9).floor() as u32 + 1;
        Self {
            resolution,
            origin: outline.min,
            grid_w,
            grid_h,
        }
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }
    pub fn origin(&self) -> Point<f64> {
        self.origin
    }
    pub fn grid_w(&self) -> u32 {
        self.grid_w
    }
    pub fn grid_h(&self) -> u32 {
        self.grid_h
    }

    /// Nearest cell, clamped to the grid.
    pub fn to_grid(&self, p: Point<f64>, layer: u8) -> GridCoord {
        let raw_x = (p.x - self.origin.x) / self.resolution;
        let raw_y = (p.y - self.origin.y) / self.resolution;

        let x = raw_x.round().max(0.0).min((self.grid_w - 1) as f64) as u32;
        let y = raw_y.round().max(0.0).min((self.grid_h - 1) as f64) as u32;

        GridCoord::new(x, y, layer)
    }

    /// Nearest cell, or `None` when `p` is more than half a cell off the grid.
    pub fn try_to_grid(&self, p: Point<f64>, layer: u8) -> Option<GridCoord> {
        let raw_x = ((p.x - self.origin.x) / self.resolution).round();
        let raw_y = ((p.y - self.origin.y) / self.resolution).round();
        if raw_x < 0.0 || raw_y < 0.0 || raw_x >= self.grid_w as f64 || raw_y >= self.grid_h as f64
        {
            return None;
        }
        Some(GridCoord::new(raw_x as u32, raw_y as u32, layer))
    }

    pub fn to_world(&self, g: GridCoord) -> Point<f64> {
        Point::new(
            g.x as f64 * self.resolution + self.origin.x,
            g.y as f64 * self.resolution + self.origin.y,
        )
    }

    /// Square covered by cell `(x, y)`.
    pub fn cell_rect(&self, x: u32, y: u32) -> Rect {
        let c = self.to_world(GridCoord::new(x, y, 0));
        Rect::from_center(c, self.resolution, self.resolution)
    }

    /// Inclusive cell range whose squares intersect `r`, clamped to the grid.
    pub fn cells_touching(&self, r: &Rect) -> Option<(u32, u32, u32, u32)> {
        let lo_x = ((r.min.x - self.origin.x) / self.resolution - 0.5).ceil().max(0.0);
        let hi_x = ((r.max.x - self.origin.x) / self.resolution + 0.5).floor();
        let lo_y = ((r.min.y - self.origin.y) / self.resolution - 0.5).ceil().max(0.0);
        let hi_y = ((r.max.y - self.origin.y) / self.resolution + 0.5).floor();
        let hi_x = hi_x.min((self.grid_w - 1) as f64);
        let hi_y = hi_y.min((self.grid_h - 1) as f64);
        if hi_x < lo_x || hi_y < lo_y {
            return None;
        }
        Some((lo_x as u32, hi_x as u32, lo_y as u32, hi_y as u32))
    }

    /// Board distance expressed in cells.
    #[inline]
    pub fn cells(&self, dist: f64) -> f64 {
        dist / self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> GridConverter {
        GridConverter::new(Rect::new(Point::new(0.0, 0.0), Point::new(20.0, 20.0)), 0.5)
    }

    #[test]
    fn dimensions_include_both_edges() {
        let c = conv();
        assert_eq!((c.grid_w(), c.grid_h()), (41, 41));
    }

    #[test]
    fn world_grid_mapping_is_exact_on_cell_centres() {
        let c = conv();
        let g = c.to_grid(Point::new(10.0, 3.5), 1);
        assert_eq!(g, GridCoord::new(20, 7, 1));
        assert_eq!(c.to_world(g), Point::new(10.0, 3.5));
    }

    #[test]
    fn off_grid_points_are_rejected_or_clamped() {
        let c = conv();
        assert_eq!(c.try_to_grid(Point::new(-1.0, 0.0), 0), None);
        assert_eq!(c.to_grid(Point::new(-1.0, 25.0), 0), GridCoord::new(0, 40, 0));
    }

    #[test]
    fn touching_range_is_conservative() {
        let c = conv();
        let r = Rect::new(Point::new(1.3, 1.3), Point::new(1.6, 1.6));
        // Cell 3 spans [1.25, 1.75].
        assert_eq!(c.cells_touching(&r), Some((3, 3, 3, 3)));
        let r = Rect::new(Point::new(1.2, 1.3), Point::new(1.8, 1.6));
        assert_eq!(c.cells_touching(&r), Some((2, 4, 3, 3)));
    }
}
