use crate::grid::backend::Backend;
use crate::grid::{DenseGrid, RoutingGrid};
use pcb_common::db::core::BoardDB;
use pcb_common::geom::coord::{CellBox, GridCoord};
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::{DesignRules, OrchestratorConfig};

/// Finer local grid over `window` (plus the configured margin) of `main`.
/// Fixed copper is rasterised again at the finer pitch and each fine cell
/// starts from the cost of the coarse cell it lies in, so the net still
/// steers around congestion it cannot see individually.
pub fn refine(
    db: &BoardDB,
    rules: &DesignRules,
    main: &DenseGrid,
    window: CellBox,
    cfg: &OrchestratorConfig,
) -> DenseGrid {
    let conv = main.converter();
    let b = window.expand(cfg.subgrid_margin, main.width(), main.height());
    let region = Rect::new(
        conv.to_world(GridCoord::new(b.min_x, b.min_y, 0)),
        conv.to_world(GridCoord::new(b.max_x, b.max_y, 0)),
    );
    let factor = cfg.subgrid_factor.max(1);
    let mut fine = DenseGrid::from_region(
        db,
        rules,
        region,
        conv.resolution() / factor as f64,
        Backend::Serial,
    );

    for z in 0..fine.layers() {
        for y in 0..fine.height() {
            for x in 0..fine.width() {
                let c = GridCoord::new(x, y, z);
                let coarse = main.world_to_grid(fine.grid_to_world(c), z);
                let carried = main.get_cost(coarse) - 1.0;
                if carried > 0.0 {
                    fine.seed_history(c, carried as f32);
                }
            }
        }
    }
    log::debug!(
        "Subgrid {}x{}x{} over coarse cells ({}, {})..({}, {})",
        fine.width(),
        fine.height(),
        fine.layers(),
        b.min_x,
        b.min_y,
        b.max_x,
        b.max_y
    );
    fine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::conversion::GridConverter;
    use pcb_common::geom::point::Point;

    #[test]
    fn fine_grid_inherits_coarse_cost() {
        let mut db = BoardDB::new("b", Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        db.add_layer("F.Cu");
        let rules = DesignRules {
            grid_resolution: 0.5,
            ..DesignRules::default()
        };
        let conv = GridConverter::new(db.outline, 0.5);
        let mut main = DenseGrid::new(conv, 1, Backend::Serial);
        main.set_penalty(2.0);
        let hot = main.index(GridCoord::new(6, 6, 0)) as u32;
        main.claim(&[hot]);

        let cfg = OrchestratorConfig {
            subgrid_factor: 2,
            subgrid_margin: 1,
            ..OrchestratorConfig::default()
        };
        let fine = refine(&db, &rules, &main, CellBox::new(4, 8, 4, 8), &cfg);
        assert_eq!(fine.converter().resolution(), 0.25);
        assert_eq!(fine.width(), 13);
        let at_hot = fine.world_to_grid(Point::new(3.0, 3.0), 0);
        assert!((fine.get_cost(at_hot) - 3.0).abs() < 1e-6);
        let cool = fine.world_to_grid(Point::new(2.0, 2.0), 0);
        assert!((fine.get_cost(cool) - 1.0).abs() < 1e-6);
    }
}
