use super::backend::Backend;
use super::{CellKind, CellState, RoutingGrid};
use crate::utils::conversion::GridConverter;
use pcb_common::db::core::{BoardDB, Keepout, Pad, PadLayers, Segment, Via};
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::check::point_to_segment_dist;
use pcb_common::util::config::DesignRules;

pub(crate) const NO_NET: u32 = u32::MAX;

// 16 bytes per cell.
#[derive(Clone, Copy, Debug)]
pub struct GridNode {
    pub(crate) owner: u32,
    pub(crate) kind: CellKind,
    pub(crate) present: u16,
    pub(crate) history: f32,
    pub(crate) cost: f32,
}

impl Default for GridNode {
    fn default() -> Self {
        Self {
            owner: NO_NET,
            kind: CellKind::Free,
            present: 0,
            history: 0.0,
            cost: 1.0,
        }
    }
}

impl GridNode {
    #[inline(always)]
    pub(crate) fn refresh(&mut self, penalty: f32) {
        self.cost = 1.0 + self.history + penalty * self.present as f32;
    }
}

fn precedence(kind: CellKind) -> u8 {
    match kind {
        CellKind::Free => 0,
        CellKind::Zone => 1,
        CellKind::Trace => 2,
        CellKind::Via => 3,
        CellKind::Pad => 4,
        CellKind::Keepout | CellKind::BoardEdge => 5,
    }
}

pub struct DenseGrid {
    width: u32,
    height: u32,
    layers: u8,
    converter: GridConverter,
    nodes: Vec<GridNode>,
    penalty: f32,
    backend: Backend,
}

impl DenseGrid {
    pub fn new(converter: GridConverter, layers: u8, backend: Backend) -> Self {
        let (width, height) = (converter.grid_w(), converter.grid_h());
        let size = (width as usize) * (height as usize) * (layers as usize);

        if size > 200_000_000 {
            log::warn!(
                "Allocating large DenseGrid: {} cells. Ensure sufficient RAM.",
                size
            );
        }

        Self {
            width,
            height,
            layers,
            converter,
            nodes: vec![GridNode::default(); size],
            penalty: 0.0,
            backend,
        }
    }

    /// Grid seeded with every fixed obstacle on the board: edge band,
    /// keepouts, pads, fixed vias and fixed segments.
    pub fn from_board(db: &BoardDB, rules: &DesignRules, backend: Backend) -> Self {
        let grid = Self::from_region(db, rules, db.outline, rules.grid_resolution, backend);
        log::info!(
            "Routing grid: {}x{}x{} at {:.3} per cell",
            grid.width,
            grid.height,
            grid.layers,
            rules.grid_resolution
        );
        grid
    }

    /// Grid over `region` of the board at its own resolution, holding only
    /// the fixed obstacles that reach into it.
    pub fn from_region(
        db: &BoardDB,
        rules: &DesignRules,
        region: Rect,
        resolution: f64,
        backend: Backend,
    ) -> Self {
        let converter = GridConverter::new(region, resolution);
        let mut grid = Self::new(converter, db.num_layers() as u8, backend);
        let reach = region.expand(rules.via_diameter.max(rules.trace_width) + rules.clearance);

        if rules.edge_clearance > 0.0 {
            grid.mark_board_edge(&db.outline, rules.edge_clearance + rules.trace_width / 2.0);
        }
        for k in db.keepouts.iter().filter(|k| k.rect.overlaps(&reach)) {
            grid.add_keepout(k);
        }
        for pad in db.pads.iter().filter(|p| p.rect().overlaps(&reach)) {
            grid.add_pad(pad);
        }
        for via in db.fixed_vias.iter().filter(|v| reach.expand(v.diameter).contains(v.position)) {
            grid.add_via(via);
        }
        for seg in &db.fixed_segments {
            grid.add_segment(seg);
        }
        grid
    }

    /// Blocks every cell whose centre lies within `band` of the edge of
    /// `outline`, measured in whole cells of the board lattice.
    pub fn mark_board_edge(&mut self, outline: &Rect, band: f64) {
        let res = self.converter.resolution();
        let cells = (band / res - 1e-9).ceil().max(0.0);
        let last_x = (outline.width() / res + 1e-9).floor();
        let last_y = (outline.height() / res + 1e-9).floor();
        for y in 0..self.height {
            for x in 0..self.width {
                let p = self.converter.to_world(GridCoord::new(x, y, 0));
                let gx = (p.x - outline.min.x) / res;
                let gy = (p.y - outline.min.y) / res;
                let near = gx < cells - 1e-6
                    || gy < cells - 1e-6
                    || last_x - gx < cells - 1e-6
                    || last_y - gy < cells - 1e-6;
                if !near {
                    continue;
                }
                for z in 0..self.layers {
                    let idx = self.index(GridCoord::new(x, y, z));
                    self.occupy(idx, NO_NET, CellKind::BoardEdge);
                }
            }
        }
    }

    fn occupy(&mut self, idx: usize, owner: u32, kind: CellKind) {
        let node = &mut self.nodes[idx];
        if matches!(kind, CellKind::Keepout | CellKind::BoardEdge) {
            node.kind = kind;
            node.owner = NO_NET;
            return;
        }
        match node.kind {
            CellKind::Free => {
                node.kind = kind;
                node.owner = owner;
            }
            CellKind::Keepout | CellKind::BoardEdge => {}
            _ if node.owner == owner => {
                if precedence(kind) > precedence(node.kind) {
                    node.kind = kind;
                }
            }
            _ => {
                node.owner = NO_NET;
                if precedence(kind) > precedence(node.kind) {
                    node.kind = kind;
                }
            }
        }
    }

    fn layer_span(&self, lo: u8, hi: u8) -> std::ops::RangeInclusive<u8> {
        lo.min(self.layers.saturating_sub(1))..=hi.min(self.layers.saturating_sub(1))
    }

    fn raster_rect(&mut self, r: &Rect, layers: std::ops::RangeInclusive<u8>, owner: u32, kind: CellKind) {
        let Some((x0, x1, y0, y1)) = self.converter.cells_touching(r) else {
            return;
        };
        for z in layers {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let idx = self.index(GridCoord::new(x, y, z));
                    self.occupy(idx, owner, kind);
                }
            }
        }
    }

    /// Cells whose square can touch the capsule around `a..b`.
    fn raster_capsule(
        &mut self,
        a: Point<f64>,
        b: Point<f64>,
        radius: f64,
        layers: std::ops::RangeInclusive<u8>,
        owner: u32,
        kind: CellKind,
    ) {
        let bounds = Rect::new(
            Point::new(a.x.min(b.x), a.y.min(b.y)),
            Point::new(a.x.max(b.x), a.y.max(b.y)),
        )
        .expand(radius);
        let Some((x0, x1, y0, y1)) = self.converter.cells_touching(&bounds) else {
            return;
        };
        let slack = self.converter.resolution() * std::f64::consts::FRAC_1_SQRT_2;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = self.converter.to_world(GridCoord::new(x, y, 0));
                if point_to_segment_dist(p, a, b) > radius + slack {
                    continue;
                }
                for z in layers.clone() {
                    let idx = self.index(GridCoord::new(x, y, z));
                    self.occupy(idx, owner, kind);
                }
            }
        }
    }

    pub fn add_zone_cell(&mut self, c: GridCoord, net: NetId) {
        let idx = self.index(c);
        if self.nodes[idx].kind == CellKind::Free {
            self.nodes[idx].kind = CellKind::Zone;
            self.nodes[idx].owner = net.0;
        }
    }

    /// Drops every zone cell so zones can be refilled from scratch.
    pub fn clear_zones(&mut self) {
        for n in &mut self.nodes {
            if n.kind == CellKind::Zone {
                n.kind = CellKind::Free;
                n.owner = NO_NET;
            }
        }
    }

    /// Raises history at `c` to at least `h`. Used to carry congestion
    /// into a derived grid.
    pub fn seed_history(&mut self, c: GridCoord, h: f32) {
        let idx = self.index(c);
        let penalty = self.penalty;
        let node = &mut self.nodes[idx];
        node.history = node.history.max(h);
        node.refresh(penalty);
    }
}

impl RoutingGrid for DenseGrid {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn layers(&self) -> u8 {
        self.layers
    }
    fn converter(&self) -> &GridConverter {
        &self.converter
    }

    fn cell(&self, c: GridCoord) -> CellState {
        let n = &self.nodes[self.index(c)];
        CellState {
            kind: n.kind,
            owner: (n.owner != NO_NET).then_some(NetId(n.owner)),
            present: n.present,
            history: n.history,
        }
    }

    fn add_pad(&mut self, pad: &Pad) {
        let layers = match pad.layers {
            PadLayers::Single(l) => self.layer_span(l, l),
            PadLayers::Through => self.layer_span(0, u8::MAX),
        };
        self.raster_rect(&pad.rect(), layers, pad.net.0, CellKind::Pad);
    }

    fn add_via(&mut self, via: &Via) {
        let layers = self.layer_span(via.layers.0, via.layers.1);
        self.raster_capsule(
            via.position,
            via.position,
            via.diameter / 2.0,
            layers,
            via.net.0,
            CellKind::Via,
        );
    }

    fn add_segment(&mut self, seg: &Segment) {
        let layers = self.layer_span(seg.layer, seg.layer);
        self.raster_capsule(seg.p1, seg.p2, seg.width / 2.0, layers, seg.net.0, CellKind::Trace);
    }

    fn add_keepout(&mut self, keepout: &Keepout) {
        let layers = match keepout.layer {
            Some(l) => self.layer_span(l, l),
            None => self.layer_span(0, u8::MAX),
        };
        self.raster_rect(&keepout.rect, layers, NO_NET, CellKind::Keepout);
    }

    #[inline]
    fn is_blocked(&self, c: GridCoord, net: NetId, halo: &[(i32, i32)]) -> bool {
        if c.x >= self.width || c.y >= self.height || c.z >= self.layers {
            return true;
        }
        let plane = (c.z as usize) * (self.width as usize) * (self.height as usize);
        let w = self.width as usize;
        let own = unsafe { self.nodes.get_unchecked(self.index(c)) };
        if own.kind != CellKind::Free && own.owner != net.0 {
            return true;
        }
        for &(dx, dy) in halo {
            let x = c.x as i64 + dx as i64;
            let y = c.y as i64 + dy as i64;
            if !self.in_bounds(x, y) {
                continue;
            }
            let node = unsafe { self.nodes.get_unchecked(plane + y as usize * w + x as usize) };
            match node.kind {
                CellKind::Free | CellKind::BoardEdge => {}
                _ if node.owner != net.0 => return true,
                _ => {}
            }
        }
        false
    }

    fn claim(&mut self, cells: &[u32]) {
        let penalty = self.penalty;
        for &i in cells {
            let node = &mut self.nodes[i as usize];
            node.present = node.present.saturating_add(1);
            node.refresh(penalty);
        }
    }

    fn release(&mut self, cells: &[u32]) {
        let penalty = self.penalty;
        for &i in cells {
            let node = &mut self.nodes[i as usize];
            node.present = node.present.saturating_sub(1);
            node.refresh(penalty);
        }
    }

    #[inline(always)]
    fn get_cost(&self, c: GridCoord) -> f64 {
        let idx = self.index(c);
        unsafe { self.nodes.get_unchecked(idx).cost as f64 }
    }

    fn update_history(&mut self, increment: f64, cap: f64) -> usize {
        let congested = self
            .backend
            .accumulate_history(&mut self.nodes, increment as f32, cap as f32);
        self.backend.refresh(&mut self.nodes, self.penalty);
        congested
    }

    fn total_history(&self) -> f64 {
        self.nodes.iter().map(|n| n.history as f64).sum()
    }

    fn is_congested(&self, c: GridCoord) -> bool {
        self.nodes[self.index(c)].present > 1
    }

    fn total_conflicts(&self) -> usize {
        self.nodes.iter().filter(|n| n.present > 1).count()
    }

    fn set_penalty(&mut self, penalty: f64) {
        self.penalty = penalty as f32;
        self.backend.refresh(&mut self.nodes, self.penalty);
    }

    fn penalty(&self) -> f64 {
        self.penalty as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: f64, res: f64, layers: u8) -> DenseGrid {
        let conv = GridConverter::new(Rect::new(Point::new(0.0, 0.0), Point::new(w, w)), res);
        DenseGrid::new(conv, layers, Backend::Serial)
    }

    fn pad(net: u32, x: f64, y: f64) -> Pad {
        Pad {
            net: NetId(net),
            ref_des: "U1".into(),
            pin: "1".into(),
            position: Point::new(x, y),
            width: 1.0,
            height: 1.0,
            layers: PadLayers::Single(0),
        }
    }

    #[test]
    fn same_net_never_blocks() {
        let mut g = grid(10.0, 0.5, 1);
        g.add_pad(&pad(0, 5.0, 5.0));
        let halo = super::super::stencil::disc(3.0);
        let c = GridCoord::new(10, 10, 0);
        assert!(!g.is_blocked(c, NetId(0), &halo));
        assert!(g.is_blocked(c, NetId(1), &halo));
        // Pad cells span 9..=11; the halo reaches strictly less than 3 cells.
        assert!(g.is_blocked(GridCoord::new(13, 10, 0), NetId(1), &halo));
        assert!(!g.is_blocked(GridCoord::new(14, 10, 0), NetId(1), &halo));
    }

    #[test]
    fn overlapping_foreign_copper_blocks_both() {
        let mut g = grid(10.0, 0.5, 1);
        g.add_pad(&pad(0, 5.0, 5.0));
        g.add_pad(&pad(1, 5.5, 5.0));
        let shared = GridCoord::new(11, 10, 0);
        assert_eq!(g.cell(shared).owner, None);
        assert!(g.is_blocked(shared, NetId(0), &[]));
        assert!(g.is_blocked(shared, NetId(1), &[]));
    }

    #[test]
    fn history_is_monotone_and_capped() {
        let mut g = grid(2.0, 0.5, 1);
        let idx = g.index(GridCoord::new(1, 1, 0)) as u32;
        g.claim(&[idx]);
        g.claim(&[idx]);
        g.claim(&[idx]);
        assert_eq!(g.total_conflicts(), 1);
        let mut last = 0.0;
        for _ in 0..10 {
            assert_eq!(g.update_history(1.0, 5.0), 1);
            let h = g.total_history();
            assert!(h >= last);
            last = h;
        }
        assert_eq!(last, 5.0);
        g.release(&[idx, idx]);
        assert_eq!(g.total_conflicts(), 0);
        assert_eq!(g.total_history(), 5.0);
    }

    #[test]
    fn cost_tracks_penalty_and_claims() {
        let mut g = grid(2.0, 0.5, 1);
        let c = GridCoord::new(2, 2, 0);
        let idx = g.index(c) as u32;
        g.set_penalty(3.0);
        assert_eq!(g.get_cost(c), 1.0);
        g.claim(&[idx]);
        assert_eq!(g.get_cost(c), 4.0);
        assert_eq!(g.footprint_cost(GridCoord::new(1, 1, 0), 1), 4.0);
        assert_eq!(g.footprint_cost(GridCoord::new(0, 0, 0), 1), 1.0);
    }

    #[test]
    fn edge_band_blocks_border_cells() {
        let mut g = grid(10.0, 0.5, 2);
        let outline = Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        g.mark_board_edge(&outline, 1.0);
        assert_eq!(g.cell(GridCoord::new(19, 5, 0)).kind, CellKind::BoardEdge);
        assert_eq!(g.cell(GridCoord::new(18, 5, 0)).kind, CellKind::Free);
        assert_eq!(g.cell(GridCoord::new(1, 10, 1)).kind, CellKind::BoardEdge);
        assert_eq!(g.cell(GridCoord::new(2, 10, 1)).kind, CellKind::Free);
        assert!(g.is_blocked(GridCoord::new(0, 0, 0), NetId(0), &[]));
        // The band itself is not copper, so it does not widen halos.
        assert!(!g.is_blocked(GridCoord::new(2, 10, 0), NetId(0), &[(-1, 0)]));
    }
}
