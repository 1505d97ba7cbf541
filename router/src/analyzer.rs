//! Routability diagnostics for nets that failed or look stressed.

use crate::algo::{AStar, ClearanceModel, CostModel, NeckDown, NoGuide, SearchMode, SearchRequest};
use crate::grid::{CellKind, DenseGrid, RoutingGrid};
use pcb_common::db::core::{BoardDB, PadLayers};
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::{CellBox, GridCoord};
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::geom::rtree::SpatialIndex;
use pcb_common::util::config::Config;
use serde::Serialize;

/// What sits in the way. Shorted cells carry no net.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ObstacleKind {
    Pad {
        net: Option<String>,
        ref_des: String,
        pin: String,
    },
    Trace {
        net: Option<String>,
    },
    Via {
        net: Option<String>,
    },
    Zone {
        net: Option<String>,
    },
    Keepout,
    BoardEdge,
}

#[derive(Clone, Debug, Serialize)]
pub struct BlockingObstacle {
    pub kind: ObstacleKind,
    pub at: Point<f64>,
    pub layer: u8,
}

#[derive(Clone, Debug, Serialize)]
pub struct CongestionZone {
    pub bounds: Rect,
    /// Nets whose terminal box reaches into the tile.
    pub competing: usize,
    /// Full-width traces that fit across the tile's free cells.
    pub channels: usize,
    pub bottleneck: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AlternativeKind {
    /// Accept extra length on the terminal layer.
    Detour,
    LayerChange,
    AddVias,
}

#[derive(Clone, Debug, Serialize)]
pub struct Alternative {
    pub kind: AlternativeKind,
    pub feasible: bool,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoutabilityReport {
    pub net: NetId,
    pub name: String,
    /// Longest straight line from the first terminal to another.
    pub distance: f64,
    pub blocking: Vec<BlockingObstacle>,
    pub congestion: Vec<CongestionZone>,
    pub alternatives: Vec<Alternative>,
}

impl RoutabilityReport {
    pub fn has_bottleneck(&self) -> bool {
        self.congestion.iter().any(|z| z.bottleneck)
    }

    pub fn feasible(&self) -> impl Iterator<Item = &Alternative> + '_ {
        self.alternatives.iter().filter(|a| a.feasible)
    }
}

pub struct RoutabilityAnalyzer<'a> {
    db: &'a BoardDB,
    config: &'a Config,
    grid: &'a DenseGrid,
    pads: SpatialIndex,
    /// Terminal box of every net with at least two pads.
    spans: Vec<(NetId, CellBox)>,
    costs: CostModel,
}

impl<'a> RoutabilityAnalyzer<'a> {
    pub fn new(db: &'a BoardDB, config: &'a Config, grid: &'a DenseGrid) -> Self {
        let pads = SpatialIndex::bulk_load(
            db.pads
                .iter()
                .enumerate()
                .map(|(i, p)| (p.rect(), i))
                .collect(),
        );
        let spans = (0..db.num_nets())
            .map(NetId::new)
            .filter(|n| db.nets[n.index()].pads.len() >= 2)
            .filter_map(|n| {
                let cells: Vec<GridCoord> = db
                    .net_pads(n)
                    .map(|p| grid.world_to_grid(p.position, 0))
                    .collect();
                CellBox::from_coords(&cells).map(|b| (n, b))
            })
            .collect();
        Self {
            db,
            config,
            grid,
            pads,
            spans,
            costs: CostModel::new(&config.design_rules.costs),
        }
    }

    pub fn analyze(&self, net: NetId) -> RoutabilityReport {
        let db = self.db;
        let rules = &self.config.design_rules;
        let grid = self.grid;
        let clearance = ClearanceModel::new(
            rules,
            grid.converter().resolution(),
            NeckDown::for_net(db, net, rules),
        );
        let terminals: Vec<(GridCoord, bool)> = db
            .net_pads(net)
            .map(|p| {
                (
                    grid.world_to_grid(p.position, p.entry_layer()),
                    p.layers == PadLayers::Through,
                )
            })
            .collect();

        let distance = match db.net_pads(net).next() {
            Some(first) => db
                .net_pads(net)
                .map(|p| p.position.distance(&first.position))
                .fold(0.0, f64::max),
            None => 0.0,
        };

        let mut blocking = Vec::new();
        if let Some(&(from, _)) = terminals.first() {
            for &(to, _) in &terminals[1..] {
                self.walk(net, from, to, from.z, &clearance, &mut blocking);
            }
        }

        let report = RoutabilityReport {
            net,
            name: db.net_name(net).to_string(),
            distance,
            blocking,
            congestion: self.congestion(net, &clearance),
            alternatives: self.alternatives(net, &terminals, &clearance),
        };
        log::debug!(
            "{}: {} blocking obstacles, {} congestion zones, {} feasible alternatives",
            report.name,
            report.blocking.len(),
            report.congestion.len(),
            report.feasible().count()
        );
        report
    }

    /// First foreign feature at or around `c`, as `is_blocked` sees it.
    fn foreign_at(&self, c: GridCoord, net: NetId, halo: &[(i32, i32)]) -> Option<GridCoord> {
        let grid = self.grid;
        let own = grid.cell(c);
        if own.kind != CellKind::Free && own.owner != Some(net) {
            return Some(c);
        }
        halo.iter().find_map(|&(dx, dy)| {
            let x = c.x as i64 + dx as i64;
            let y = c.y as i64 + dy as i64;
            if !grid.in_bounds(x, y) {
                return None;
            }
            let n = GridCoord::new(x as u32, y as u32, c.z);
            let s = grid.cell(n);
            match s.kind {
                CellKind::Free | CellKind::BoardEdge => None,
                _ if s.owner == Some(net) => None,
                _ => Some(n),
            }
        })
    }

    fn classify(&self, c: GridCoord) -> Option<ObstacleKind> {
        let db = self.db;
        let cell = self.grid.cell(c);
        let net = cell.owner.map(|n| db.net_name(n).to_string());
        let kind = match cell.kind {
            CellKind::Free => return None,
            CellKind::Pad => {
                let square = self.grid.converter().cell_rect(c.x, c.y);
                let pad = self
                    .pads
                    .query(square)
                    .into_iter()
                    .map(|i| &db.pads[i])
                    .find(|p| p.layers.contains(c.z) && cell.owner.is_none_or(|o| o == p.net))?;
                ObstacleKind::Pad {
                    net,
                    ref_des: pad.ref_des.clone(),
                    pin: pad.pin.clone(),
                }
            }
            CellKind::Trace => ObstacleKind::Trace { net },
            CellKind::Via => ObstacleKind::Via { net },
            CellKind::Zone => ObstacleKind::Zone { net },
            CellKind::Keepout => ObstacleKind::Keepout,
            CellKind::BoardEdge => ObstacleKind::BoardEdge,
        };
        Some(kind)
    }

    /// Cells of the straight line `a..b` on `layer`, both ends included.
    fn line(a: GridCoord, b: GridCoord, layer: u8) -> impl Iterator<Item = GridCoord> {
        let dx = b.x as f64 - a.x as f64;
        let dy = b.y as f64 - a.y as f64;
        let steps = dx.abs().max(dy.abs()).max(1.0) as u32;
        (0..=steps).map(move |i| {
            let t = i as f64 / steps as f64;
            GridCoord::new(
                (a.x as f64 + dx * t).round() as u32,
                (a.y as f64 + dy * t).round() as u32,
                layer,
            )
        })
    }

    /// Records every distinct obstacle within clearance of the direct line.
    /// Pads of the net's own terminals never count.
    fn walk(
        &self,
        net: NetId,
        a: GridCoord,
        b: GridCoord,
        layer: u8,
        clearance: &ClearanceModel,
        out: &mut Vec<BlockingObstacle>,
    ) -> usize {
        let limit = self.config.analyzer.max_obstacles;
        let conv = self.grid.converter();
        let mut hits = 0;
        for c in Self::line(a, b, layer) {
            let Some(at) = self.foreign_at(c, net, clearance.trace_halo(conv, c)) else {
                continue;
            };
            hits += 1;
            let Some(kind) = self.classify(at) else {
                continue;
            };
            if out.len() >= limit || out.iter().any(|o| o.kind == kind && o.layer == layer) {
                continue;
            }
            out.push(BlockingObstacle {
                kind,
                at: conv.to_world(at),
                layer,
            });
        }
        hits
    }

    /// Tiles over the net's terminal box where more nets compete than
    /// traces fit.
    fn congestion(&self, net: NetId, clearance: &ClearanceModel) -> Vec<CongestionZone> {
        let grid = self.grid;
        let tile = self.config.analyzer.tile_size.max(1);
        let Some(&(_, span)) = self.spans.iter().find(|(n, _)| *n == net) else {
            return Vec::new();
        };
        let area = span.expand(tile, grid.width(), grid.height());
        let pitch = 2 * clearance.nominal_claim() as usize + 1;
        let conv = grid.converter();

        let mut zones = Vec::new();
        let mut ty = area.min_y;
        while ty <= area.max_y {
            let mut tx = area.min_x;
            while tx <= area.max_x {
                let bounds = CellBox::new(
                    tx,
                    (tx + tile - 1).min(grid.width() - 1),
                    ty,
                    (ty + tile - 1).min(grid.height() - 1),
                );
                let competing = self
                    .spans
                    .iter()
                    .filter(|(_, b)| b.intersects(&bounds))
                    .count();
                let side = bounds.width().min(bounds.height()) as usize;
                let cells = (bounds.width() * bounds.height()) as usize;
                let channels: usize = (0..grid.layers())
                    .map(|z| {
                        let free = (bounds.min_y..=bounds.max_y)
                            .flat_map(|y| (bounds.min_x..=bounds.max_x).map(move |x| (x, y)))
                            .filter(|&(x, y)| {
                                let s = grid.cell(GridCoord::new(x, y, z));
                                s.kind == CellKind::Free || s.owner == Some(net)
                            })
                            .count();
                        free * side / cells / pitch
                    })
                    .sum();
                if competing > 1 && competing >= channels {
                    let lo = conv.cell_rect(bounds.min_x, bounds.min_y);
                    let hi = conv.cell_rect(bounds.max_x, bounds.max_y);
                    zones.push(CongestionZone {
                        bounds: lo.union(&hi),
                        competing,
                        channels,
                        bottleneck: competing > channels,
                    });
                }
                tx += tile;
            }
            ty += tile;
        }
        zones.sort_by_key(|z| std::cmp::Reverse(z.competing as i64 - z.channels as i64));
        zones
    }

    fn alternatives(
        &self,
        net: NetId,
        terminals: &[(GridCoord, bool)],
        clearance: &ClearanceModel,
    ) -> Vec<Alternative> {
        let grid = self.grid;
        let Some(&(first, first_through)) = terminals.first() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(3);

        let detour = self.connects(net, terminals, clearance, false);
        out.push(Alternative {
            kind: AlternativeKind::Detour,
            feasible: detour.is_ok(),
            reason: match detour {
                Ok(len) => format!("planar path of {:.3} found", len),
                Err(e) => format!("no planar path on layer {}: {}", first.z, e),
            },
        });

        let clear_layer = (0..grid.layers()).filter(|&z| z != first.z).find(|&z| {
            let mut scratch = Vec::new();
            terminals[1..]
                .iter()
                .all(|&(to, _)| self.walk(net, first, to, z, clearance, &mut scratch) == 0)
        });
        out.push(Alternative {
            kind: AlternativeKind::LayerChange,
            feasible: clear_layer.is_some(),
            reason: match clear_layer {
                Some(z) => format!("direct line is clear on layer {}", z),
                None if grid.layers() < 2 => "single-layer board".to_string(),
                None => "direct line is blocked on every other layer".to_string(),
            },
        });

        let vias = if grid.layers() < 2 {
            None
        } else {
            Some(self.connects(net, terminals, clearance, true))
        };
        out.push(Alternative {
            kind: AlternativeKind::AddVias,
            feasible: matches!(vias, Some(Ok(_))),
            reason: match vias {
                None => "single-layer board".to_string(),
                Some(Ok(len)) => format!(
                    "path of {:.3} found using vias{}",
                    len,
                    if first_through { " from a through-hole pad" } else { "" }
                ),
                Some(Err(e)) => format!("no path even with vias: {}", e),
            },
        });
        out
    }

    /// Whole-board search from the first terminal to every other one.
    /// Returns the summed path length.
    fn connects(
        &self,
        net: NetId,
        terminals: &[(GridCoord, bool)],
        clearance: &ClearanceModel,
        allow_vias: bool,
    ) -> Result<f64, crate::algo::SearchFailure> {
        let grid = self.grid;
        let (first, first_through) = terminals[0];
        let starts: Vec<GridCoord> = if first_through {
            (0..grid.layers()).map(|z| first.with_layer(z)).collect()
        } else {
            vec![first]
        };
        let mut astar = AStar::new();
        let mut length = 0.0;
        for &(end, through) in &terminals[1..] {
            let req = SearchRequest {
                net,
                starts: &starts,
                end,
                end_any_layer: through,
                costs: &self.costs,
                clearance,
                oracle: &NoGuide,
                guide_penalty: 0,
                allow_vias,
                forbidden_vias: &[],
                window: CellBox::new(0, grid.width() - 1, 0, grid.height() - 1),
                max_expansions: self.config.search.max_expansions,
            };
            let path = astar.find_path(grid, &req, SearchMode::Unidirectional)?;
            length += crate::utils::segments::path_length(&path.cells, grid.converter().resolution());
        }
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::backend::Backend;
    use pcb_common::db::core::Pad;

    fn pad(net: NetId, x: f64, y: f64, layers: PadLayers) -> Pad {
        Pad {
            net,
            ref_des: format!("U{}", net.0),
            pin: format!("{x}"),
            position: Point::new(x, y),
            width: 0.5,
            height: 0.5,
            layers,
        }
    }

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.design_rules.grid_resolution = 0.5;
        cfg.design_rules.trace_width = 0.2;
        cfg.design_rules.clearance = 0.1;
        cfg
    }

    #[test]
    fn wall_on_top_layer_suggests_vias() {
        let mut db = BoardDB::new("a", Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        db.add_layer("F.Cu");
        db.add_layer("B.Cu");
        let n = db.add_net("N");
        db.add_pad(pad(n, 2.0, 5.0, PadLayers::Single(0)));
        db.add_pad(pad(n, 8.0, 5.0, PadLayers::Single(0)));
        db.add_keepout(Some(0), Rect::new(Point::new(4.8, 0.0), Point::new(5.2, 10.0)));

        let cfg = config();
        let grid = DenseGrid::from_board(&db, &cfg.design_rules, Backend::Serial);
        let report = RoutabilityAnalyzer::new(&db, &cfg, &grid).analyze(n);

        assert!((report.distance - 6.0).abs() < 1e-9);
        assert!(report.blocking.iter().any(|o| o.kind == ObstacleKind::Keepout));
        let kinds: Vec<(AlternativeKind, bool)> =
            report.alternatives.iter().map(|a| (a.kind, a.feasible)).collect();
        assert_eq!(
            kinds,
            vec![
                (AlternativeKind::Detour, false),
                (AlternativeKind::LayerChange, true),
                (AlternativeKind::AddVias, true),
            ]
        );
    }

    #[test]
    fn foreign_pad_on_the_line_is_named() {
        let mut db = BoardDB::new("b", Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        db.add_layer("F.Cu");
        let n = db.add_net("N");
        let m = db.add_net("M");
        db.add_pad(pad(n, 2.0, 5.0, PadLayers::Single(0)));
        db.add_pad(pad(n, 8.0, 5.0, PadLayers::Single(0)));
        db.add_pad(pad(m, 5.0, 5.0, PadLayers::Single(0)));

        let cfg = config();
        let grid = DenseGrid::from_board(&db, &cfg.design_rules, Backend::Serial);
        let report = RoutabilityAnalyzer::new(&db, &cfg, &grid).analyze(n);
        assert_eq!(report.blocking.len(), 1);
        assert_eq!(
            report.blocking[0].kind,
            ObstacleKind::Pad {
                net: Some("M".into()),
                ref_des: "U1".into(),
                pin: "5".into(),
            }
        );
        assert!(report.alternatives[0].feasible);
        assert!(!report.alternatives[1].feasible);
    }
}
