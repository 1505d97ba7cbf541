//! Escape routing: a short breadth-first walk on a finer local grid that
//! leads a trace out from between fine-pitch pads to the first coarse cell
//! where a full-width trace fits.

use super::RoutedPath;
use crate::algo::ClearanceModel;
use crate::algo::astar::DIRS;
use crate::grid::backend::Backend;
use crate::grid::{DenseGrid, RoutingGrid};
use pcb_common::db::core::BoardDB;
use pcb_common::db::indices::PadId;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::{DesignRules, OrchestratorConfig};
use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub struct Escape {
    pub pad: PadId,
    /// Pad centre cell first, exit last, on the fine lattice.
    pub path: RoutedPath,
    /// Where the escape meets the routing grid.
    pub exit: GridCoord,
}

/// `None` when the pad's own cell already takes a full-width trace or no
/// exit lies within the escape margin.
pub fn escape_pad(
    db: &BoardDB,
    rules: &DesignRules,
    main: &DenseGrid,
    clearance: &ClearanceModel,
    pad_id: PadId,
    cfg: &OrchestratorConfig,
) -> Option<Escape> {
    let pad = &db.pads[pad_id.index()];
    let net = pad.net;
    let layer = pad.entry_layer();
    let conv = main.converter();
    let origin = main.world_to_grid(pad.position, layer);
    if !main.is_blocked(origin, net, clearance.nominal_halo()) {
        return None;
    }

    // Align the fine lattice with the coarse one so every `factor`-th fine
    // cell is a coarse cell.
    let factor = cfg.subgrid_factor.max(1);
    let (x0, x1, y0, y1) = conv.cells_touching(&pad.rect().expand(cfg.escape_margin as f64 * conv.resolution()))?;
    let region = Rect::new(
        conv.to_world(GridCoord::new(x0, y0, 0)),
        conv.to_world(GridCoord::new(x1, y1, 0)),
    );
    let fine_res = conv.resolution() / factor as f64;
    let fine = DenseGrid::from_region(db, rules, region, fine_res, Backend::Serial);
    let fine_clear = ClearanceModel::new(rules, fine_res, clearance.neck().cloned());

    let start = fine.world_to_grid(pad.position, layer);
    let (w, h) = (fine.width(), fine.height());
    let mut parent = vec![u32::MAX; (w * h) as usize];
    let mut seen = vec![false; (w * h) as usize];
    let local = |c: GridCoord| (c.y * w + c.x) as usize;
    let mut queue = VecDeque::from([start]);
    seen[local(start)] = true;

    while let Some(c) = queue.pop_front() {
        if c != start && c.x % factor == 0 && c.y % factor == 0 {
            let exit = GridCoord::new(x0 + c.x / factor, y0 + c.y / factor, layer);
            if exit != origin && !main.is_blocked(exit, net, clearance.nominal_halo()) {
                let mut cells = vec![c];
                let mut cur = parent[local(c)];
                while cur != u32::MAX {
                    let p = GridCoord::new(cur % w, cur / w, layer);
                    cells.push(p);
                    cur = parent[local(p)];
                }
                cells.reverse();
                return Some(Escape {
                    pad: pad_id,
                    path: RoutedPath::new(cells, fine.converter().clone()),
                    exit,
                });
            }
        }
        for &(dx, dy) in &DIRS {
            let nx = c.x as i64 + dx as i64;
            let ny = c.y as i64 + dy as i64;
            if !fine.in_bounds(nx, ny) {
                continue;
            }
            let n = GridCoord::new(nx as u32, ny as u32, layer);
            if seen[local(n)] {
                continue;
            }
            seen[local(n)] = true;
            if fine.is_blocked(n, net, fine_clear.trace_halo(fine.converter(), n)) {
                continue;
            }
            parent[local(n)] = local(c) as u32;
            queue.push_back(n);
        }
    }
    log::debug!(
        "No escape for {}.{} within {} cells",
        pad.ref_des,
        pad.pin,
        cfg.escape_margin
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::NeckDown;
    use pcb_common::db::core::{Pad, PadLayers};
    use pcb_common::geom::point::Point;

    /// A row of 0.5 mm pitch pads; the middle one must escape sideways out
    /// of the row before a nominal trace fits.
    fn board() -> (BoardDB, PadId) {
        let mut db = BoardDB::new("esc", Rect::new(Point::new(0.0, 0.0), Point::new(6.0, 6.0)));
        db.add_layer("F.Cu");
        let mut mid = PadId(0);
        for i in 0..5 {
            let net = db.add_net(format!("N{i}"));
            let id = db.add_pad(Pad {
                net,
                ref_des: "U1".into(),
                pin: (i + 1).to_string(),
                position: Point::new(2.0 + 0.5 * i as f64, 3.0),
                width: 0.25,
                height: 1.0,
                layers: PadLayers::Single(0),
            });
            if i == 2 {
                mid = id;
            }
        }
        (db, mid)
    }

    #[test]
    fn middle_pad_escapes_out_of_the_row() {
        let (db, mid) = board();
        let rules = DesignRules {
            trace_width: 0.25,
            clearance: 0.15,
            grid_resolution: 0.1,
            ..DesignRules::default()
        };
        let main = DenseGrid::from_board(&db, &rules, Backend::Serial);
        let neck = NeckDown::for_net(&db, db.pads[mid.index()].net, &rules);
        assert!(neck.is_some());
        let cl = ClearanceModel::new(&rules, 0.1, neck);
        let cfg = OrchestratorConfig {
            escape_margin: 12,
            subgrid_factor: 2,
            ..OrchestratorConfig::default()
        };
        let esc = escape_pad(&db, &rules, &main, &cl, mid, &cfg).expect("escape");
        let exit = main.grid_to_world(esc.exit);
        assert!((exit.y - 3.0).abs() > 0.5, "exit {exit:?} still inside the row");
        assert!(!main.is_blocked(esc.exit, db.pads[mid.index()].net, cl.nominal_halo()));
        assert_eq!(esc.path.conv.resolution(), 0.05);
    }
}
