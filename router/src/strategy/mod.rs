pub mod escape;
pub mod pair;
pub mod subgrid;

use crate::utils::conversion::GridConverter;
use pcb_common::geom::coord::GridCoord;

/// A path kept with the lattice it was found on, which is the routing grid
/// or a finer local one.
#[derive(Clone, Debug)]
pub struct RoutedPath {
    pub cells: Vec<GridCoord>,
    pub conv: GridConverter,
}

impl RoutedPath {
    pub fn new(cells: Vec<GridCoord>, conv: GridConverter) -> Self {
        Self { cells, conv }
    }

    pub fn is_native(&self, main: &GridConverter) -> bool {
        self.conv == *main
    }

    /// The path on `main`'s lattice, repeated cells collapsed.
    pub fn on_grid(&self, main: &GridConverter) -> Vec<GridCoord> {
        if self.is_native(main) {
            return self.cells.clone();
        }
        let mut out: Vec<GridCoord> = Vec::with_capacity(self.cells.len());
        for &c in &self.cells {
            let m = main.to_grid(self.conv.to_world(c), c.z);
            if out.last() != Some(&m) {
                out.push(m);
            }
        }
        out
    }
}
