//! Copper pours: point-in-polygon rasterisation onto the routing grid with
//! clearance to foreign copper, thermal relief around same-net pads and a
//! minimum copper thickness.

use crate::grid::{CellKind, DenseGrid, RoutingGrid};
use crate::outcome::ZoneReport;
use pcb_common::db::core::{BoardDB, ThermalRelief, ZoneData, ZoneFill};
use pcb_common::error::InputError;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::ZoneConfig;

/// Row-major mask over an inclusive cell range.
struct Mask {
    x0: u32,
    y0: u32,
    w: usize,
    h: usize,
    bits: Vec<bool>,
}

impl Mask {
    fn new(x0: u32, x1: u32, y0: u32, y1: u32) -> Self {
        let w = (x1 - x0 + 1) as usize;
        let h = (y1 - y0 + 1) as usize;
        Self {
            x0,
            y0,
            w,
            h,
            bits: vec![false; w * h],
        }
    }

    fn local(&self, x: i64, y: i64) -> Option<usize> {
        let lx = x - self.x0 as i64;
        let ly = y - self.y0 as i64;
        (lx >= 0 && ly >= 0 && (lx as usize) < self.w && (ly as usize) < self.h)
            .then(|| ly as usize * self.w + lx as usize)
    }

    fn get(&self, x: i64, y: i64) -> bool {
        self.local(x, y).is_some_and(|i| self.bits[i])
    }

    fn set(&mut self, x: i64, y: i64, v: bool) {
        if let Some(i) = self.local(x, y) {
            self.bits[i] = v;
        }
    }

    fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.h).flat_map(move |ly| {
            (0..self.w)
                .filter(move |&lx| self.bits[ly * self.w + lx])
                .map(move |lx| (self.x0 + lx as u32, self.y0 + ly as u32))
        })
    }
}

/// Offsets whose cell square comes closer than `clearance` to the square
/// of the centre cell.
fn clearance_stencil(clearance: f64, resolution: f64) -> Vec<(i32, i32)> {
    let reach = (clearance / resolution).ceil() as i32 + 1;
    let limit = clearance.max(1e-9);
    let mut out = Vec::new();
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            let gx = (dx.abs() - 1).max(0) as f64;
            let gy = (dy.abs() - 1).max(0) as f64;
            if resolution * gx.hypot(gy) < limit {
                out.push((dx, dy));
            }
        }
    }
    out
}

pub struct ZoneFiller<'a> {
    cfg: &'a ZoneConfig,
}

impl<'a> ZoneFiller<'a> {
    pub fn new(cfg: &'a ZoneConfig) -> Self {
        Self { cfg }
    }

    /// Drops every previous fill and pours all zones again in index order.
    /// Each poured zone is foreign copper for the zones after it.
    pub fn fill_all(&self, db: &mut BoardDB, grid: &mut DenseGrid) -> Result<Vec<ZoneReport>, InputError> {
        grid.clear_zones();
        for zone in &mut db.zones {
            zone.fill = None;
        }
        if !self.cfg.fill {
            return Ok(Vec::new());
        }
        let mut reports = Vec::with_capacity(db.zones.len());
        for i in 0..db.zones.len() {
            let fill = self.fill(db, grid, i)?;
            let zone = &db.zones[i];
            log::info!(
                "Zone {} ({} on layer {}): {} cells, {:.3} area",
                i,
                db.net_name(zone.net),
                zone.layer,
                fill.cells,
                fill.area
            );
            reports.push(ZoneReport {
                zone: i,
                net: db.net_name(zone.net).to_string(),
                layer: zone.layer,
                cells: fill.cells,
                area: fill.area,
            });
            db.zones[i].fill = Some(fill);
        }
        Ok(reports)
    }

    /// Pours one zone onto `grid` and returns its copper.
    pub fn fill(&self, db: &BoardDB, grid: &mut DenseGrid, index: usize) -> Result<ZoneFill, InputError> {
        let zone = &db.zones[index];
        db.check_layer(zone.layer)?;
        if zone.outline.is_degenerate() {
            return Err(InputError::DegenerateZone {
                zone: index,
                net: db.net_name(zone.net).to_string(),
            });
        }
        let conv = grid.converter().clone();
        let res = conv.resolution();
        let Some(bbox) = zone.outline.bounding_box() else {
            return Ok(ZoneFill::default());
        };
        let Some((x0, x1, y0, y1)) = conv.cells_touching(&bbox) else {
            return Ok(ZoneFill::default());
        };

        let mut keep = Mask::new(x0, x1, y0, y1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let c = GridCoord::new(x, y, zone.layer);
                let inside = zone.outline.contains(conv.to_world(c));
                keep.set(x as i64, y as i64, inside && grid.cell(c).kind == CellKind::Free);
            }
        }

        self.exclude_foreign(grid, zone, &mut keep);
        if let Some(thermal) = zone.thermal.filter(|_| self.cfg.thermal_relief) {
            self.cut_thermal_gaps(db, zone, &thermal, res, &conv, &mut keep);
        }
        let t = (zone.min_thickness / res / 2.0 + 1e-9).floor() as i64;
        let keep = open(&keep, t);

        let mut runs: Vec<Rect> = Vec::new();
        let mut cells = 0;
        for (x, y) in keep.cells() {
            grid.add_zone_cell(GridCoord::new(x, y, zone.layer), zone.net);
            cells += 1;
            let square = conv.cell_rect(x, y);
            match runs.last_mut() {
                Some(run) if run.min.y == square.min.y && (run.max.x - square.min.x).abs() < 1e-9 => {
                    run.max.x = square.max.x;
                }
                _ => runs.push(square),
            }
        }
        Ok(ZoneFill {
            runs,
            cells,
            area: cells as f64 * res * res,
        })
    }

    /// Bounded radius scan: every foreign copper cell near the zone clears
    /// the stencil around itself. Keepouts and the board edge only remove
    /// their own cells.
    fn exclude_foreign(&self, grid: &DenseGrid, zone: &ZoneData, keep: &mut Mask) {
        let res = grid.converter().resolution();
        let stencil = clearance_stencil(zone.clearance, res);
        let reach = stencil
            .iter()
            .map(|(dx, dy)| dx.abs().max(dy.abs()))
            .max()
            .unwrap_or(0) as i64;
        let sx0 = (keep.x0 as i64 - reach).max(0);
        let sy0 = (keep.y0 as i64 - reach).max(0);
        let sx1 = (keep.x0 as i64 + keep.w as i64 - 1 + reach).min(grid.width() as i64 - 1);
        let sy1 = (keep.y0 as i64 + keep.h as i64 - 1 + reach).min(grid.height() as i64 - 1);
        for y in sy0..=sy1 {
            for x in sx0..=sx1 {
                let cell = grid.cell(GridCoord::new(x as u32, y as u32, zone.layer));
                match cell.kind {
                    CellKind::Free => {}
                    CellKind::Keepout | CellKind::BoardEdge => keep.set(x, y, false),
                    _ if cell.owner == Some(zone.net) => {}
                    _ => {
                        for &(dx, dy) in &stencil {
                            keep.set(x + dx as i64, y + dy as i64, false);
                        }
                    }
                }
            }
        }
    }

    /// Clears a ring of `gap` around each same-net pad on the zone layer,
    /// leaving `spoke_count` spokes of `spoke_width` to connect it.
    fn cut_thermal_gaps(
        &self,
        db: &BoardDB,
        zone: &ZoneData,
        thermal: &ThermalRelief,
        res: f64,
        conv: &crate::utils::conversion::GridConverter,
        keep: &mut Mask,
    ) {
        let spokes: Vec<Point<f64>> = (0..thermal.spoke_count)
            .map(|k| {
                let a = std::f64::consts::TAU * k as f64 / thermal.spoke_count as f64;
                Point::new(a.cos(), a.sin())
            })
            .collect();
        let half = thermal.spoke_width / 2.0;
        for pad in db.net_pads(zone.net).filter(|p| p.layers.contains(zone.layer)) {
            let ring = pad.rect().expand(thermal.gap + res);
            let Some((x0, x1, y0, y1)) = conv.cells_touching(&ring) else {
                continue;
            };
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if !keep.get(x as i64, y as i64) {
                        continue;
                    }
                    if pad.rect().gap(&conv.cell_rect(x, y)) >= thermal.gap {
                        continue;
                    }
                    let d = conv.to_world(GridCoord::new(x, y, 0)) - pad.position;
                    let on_spoke = spokes.iter().any(|u| {
                        let along = d.x * u.x + d.y * u.y;
                        let across = (d.x * u.y - d.y * u.x).abs();
                        along > 0.0 && across <= half
                    });
                    if !on_spoke {
                        keep.set(x as i64, y as i64, false);
                    }
                }
            }
        }
    }
}

/// Morphological opening with a `(2t + 1)` square: drops copper narrower
/// than the minimum thickness and keeps everything else.
fn open(mask: &Mask, t: i64) -> Mask {
    if t <= 0 {
        return Mask {
            bits: mask.bits.clone(),
            ..*mask
        };
    }
    let x1 = mask.x0 + mask.w as u32 - 1;
    let y1 = mask.y0 + mask.h as u32 - 1;
    let mut eroded = Mask::new(mask.x0, x1, mask.y0, y1);
    for (x, y) in mask.cells() {
        let (x, y) = (x as i64, y as i64);
        let solid = (-t..=t).all(|dy| (-t..=t).all(|dx| mask.get(x + dx, y + dy)));
        eroded.set(x, y, solid);
    }
    let mut out = Mask::new(mask.x0, x1, mask.y0, y1);
    for (x, y) in eroded.cells() {
        let (x, y) = (x as i64, y as i64);
        for dy in -t..=t {
            for dx in -t..=t {
                if mask.get(x + dx, y + dy) {
                    out.set(x + dx, y + dy, true);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::backend::Backend;
    use pcb_common::db::core::{Pad, PadLayers};
    use pcb_common::geom::polygon::Polygon;
    use pcb_common::util::config::DesignRules;

    fn board() -> BoardDB {
        let mut db = BoardDB::new("z", Rect::new(Point::new(0.0, 0.0), Point::new(4.0, 4.0)));
        db.add_layer("F.Cu");
        db
    }

    fn rules() -> DesignRules {
        DesignRules {
            grid_resolution: 0.1,
            ..DesignRules::default()
        }
    }

    fn zone(db: &mut BoardDB, net: &str, thermal: Option<ThermalRelief>) {
        let net = db.add_net(net);
        db.add_zone(ZoneData {
            net,
            layer: 0,
            outline: Polygon::from_rect(&Rect::new(Point::new(0.5, 0.5), Point::new(3.5, 3.5))),
            clearance: 0.2,
            min_thickness: 0.0,
            thermal,
            fill: None,
        });
    }

    #[test]
    fn stencil_matches_square_gaps() {
        let s = clearance_stencil(0.2, 0.1);
        assert!(s.contains(&(0, 0)));
        assert!(s.contains(&(2, 2)));
        assert!(!s.contains(&(3, 0)));
        assert!(!s.contains(&(3, 2)));
    }

    #[test]
    fn foreign_pad_keeps_its_clearance() {
        let mut db = board();
        zone(&mut db, "GND", None);
        let sig = db.add_net("SIG");
        db.add_pad(Pad {
            net: sig,
            ref_des: "R1".into(),
            pin: "1".into(),
            position: Point::new(2.0, 2.0),
            width: 0.4,
            height: 0.4,
            layers: PadLayers::Single(0),
        });
        let mut grid = DenseGrid::from_board(&db, &rules(), Backend::Serial);
        let cfg = ZoneConfig::default();
        let filler = ZoneFiller::new(&cfg);
        let reports = filler.fill_all(&mut db, &mut grid).unwrap();
        assert_eq!(reports.len(), 1);
        let fill = db.zones[0].fill.as_ref().unwrap();
        let pad = db.pads[0].rect();
        for run in &fill.runs {
            assert!(pad.gap(run) >= 0.2 - 1e-9, "run {run:?} too close");
        }
        assert!(fill.cells > 700);
    }

    #[test]
    fn thermal_spokes_connect_same_net_pad() {
        let mut db = board();
        zone(
            &mut db,
            "GND",
            Some(ThermalRelief {
                gap: 0.3,
                spoke_width: 0.2,
                spoke_count: 4,
            }),
        );
        let gnd = db.zones[0].net;
        db.add_pad(Pad {
            net: gnd,
            ref_des: "C1".into(),
            pin: "2".into(),
            position: Point::new(2.0, 2.0),
            width: 0.4,
            height: 0.4,
            layers: PadLayers::Single(0),
        });
        let mut grid = DenseGrid::from_board(&db, &rules(), Backend::Serial);
        ZoneFiller::new(&ZoneConfig::default())
            .fill_all(&mut db, &mut grid)
            .unwrap();
        let conv = grid.converter().clone();
        let at = |x: f64, y: f64| grid.cell(conv.to_grid(Point::new(x, y), 0)).kind;
        // Spoke to the right, gap on the diagonal.
        assert_eq!(at(2.4, 2.0), CellKind::Zone);
        assert_eq!(at(2.4, 2.4), CellKind::Free);
        assert_eq!(at(3.0, 3.0), CellKind::Zone);
    }

    #[test]
    fn opening_drops_slivers() {
        let mut m = Mask::new(0, 9, 0, 9);
        for y in 0..10 {
            for x in 0..5 {
                m.set(x, y, true);
            }
        }
        m.set(7, 5, true);
        let opened = open(&m, 1);
        assert!(!opened.get(7, 5));
        assert!(opened.get(0, 0));
        assert!(opened.get(4, 9));
        assert_eq!(opened.cells().count(), 50);
    }
}
