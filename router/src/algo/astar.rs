use super::window::RoutingWindow;
use super::{SearchFailure, SearchMode, SearchPath, SearchRequest};
use crate::grid::RoutingGrid;
use pcb_common::geom::coord::{CellBox, GridCoord};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Planar step directions; odd indices are diagonal.
pub(crate) const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
/// Direction of a path that just changed layer or has not moved yet.
pub(crate) const NO_DIR: u8 = 8;
pub(crate) const NO_PARENT: u32 = u32::MAX;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct OpenEntry {
    pub f: u64,
    /// Insertion counter; earlier entries win ties.
    pub order: u64,
    pub g: u64,
    pub idx: u32,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub trait GuideOracle: Sync {
    /// Cells outside the guide cost the request's guide penalty to enter.
    fn is_in_guide(&self, c: GridCoord) -> bool;
    /// Cells that are not allowed are never entered.
    fn is_allowed(&self, _c: GridCoord) -> bool {
        true
    }
}

pub struct NoGuide;
impl GuideOracle for NoGuide {
    fn is_in_guide(&self, _c: GridCoord) -> bool {
        true
    }
}

/// Search states per cell: the heading of the step that arrived, or
/// [`NO_DIR`]. Turn costs depend on the heading, so two arrivals at one cell
/// are different states.
pub(crate) const HEADINGS: usize = 9;

#[inline(always)]
pub(crate) fn state(cell: usize, dir: u8) -> usize {
    cell * HEADINGS + dir as usize
}

#[inline(always)]
pub(crate) fn cell_of(state: usize) -> usize {
    state / HEADINGS
}

#[inline(always)]
pub(crate) fn dir_of(state: usize) -> u8 {
    (state % HEADINGS) as u8
}

/// Per-search scratch indexed by window-local state. Reused across
/// searches; a generation tag stands in for clearing.
#[derive(Clone, Default)]
pub(crate) struct SearchArena {
    parent: Vec<u32>,
    g: Vec<u64>,
    tag: Vec<u32>,
    /// Per cell, not per state.
    seed: Vec<u32>,
    current: u32,
}

impl SearchArena {
    pub fn prepare(&mut self, cells: usize) {
        let states = cells * HEADINGS;
        if states > self.parent.len() {
            self.parent.resize(states, NO_PARENT);
            self.g.resize(states, u64::MAX);
            self.tag.resize(states, 0);
        }
        if cells > self.seed.len() {
            self.seed.resize(cells, 0);
        }
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.tag.fill(0);
            self.seed.fill(0);
            self.current = 1;
        }
    }

    #[inline(always)]
    pub fn seen(&self, s: usize) -> bool {
        self.tag[s] == self.current
    }

    #[inline(always)]
    pub fn g(&self, s: usize) -> u64 {
        if self.seen(s) { self.g[s] } else { u64::MAX }
    }

    #[inline(always)]
    pub fn parent(&self, s: usize) -> u32 {
        self.parent[s]
    }

    #[inline(always)]
    pub fn set(&mut self, s: usize, g: u64, parent: u32) {
        self.tag[s] = self.current;
        self.g[s] = g;
        self.parent[s] = parent;
    }

    #[inline(always)]
    pub fn mark_seed(&mut self, cell: usize) {
        self.seed[cell] = self.current;
    }

    #[inline(always)]
    pub fn is_seed(&self, cell: usize) -> bool {
        self.seed[cell] == self.current
    }

    /// Cells from a seed to state `s`, seed first.
    pub fn chain(&self, window: &RoutingWindow, s: usize) -> Vec<GridCoord> {
        let mut out = Vec::new();
        let mut cur = s as u32;
        while cur != NO_PARENT {
            out.push(window.coord(cell_of(cur as usize) as u32));
            cur = self.parent[cur as usize];
        }
        out.reverse();
        out
    }
}

/// Cost and validity of moves for one request on one grid.
pub(crate) struct Edges<'a, G: RoutingGrid + ?Sized> {
    pub grid: &'a G,
    pub req: &'a SearchRequest<'a>,
}

impl<G: RoutingGrid + ?Sized> Edges<'_, G> {
    #[inline(always)]
    pub fn guide(&self, c: GridCoord) -> u64 {
        if self.req.is_goal(c) || self.req.oracle.is_in_guide(c) {
            0
        } else {
            self.req.guide_penalty
        }
    }

    /// Congestion and guide cost of standing on planar cell `c`.
    #[inline]
    pub fn node_cost(&self, c: GridCoord) -> u64 {
        if self.req.is_goal(c) {
            return 0;
        }
        let k = self.req.clearance.claim_radius(self.grid.converter(), c);
        self.req.costs.extra(self.grid.footprint_cost(c, k)) + self.guide(c)
    }

    #[inline]
    pub fn can_enter(&self, c: GridCoord) -> bool {
        if self.req.is_goal(c) {
            return true;
        }
        self.req.oracle.is_allowed(c)
            && !self.grid.is_blocked(
                c,
                self.req.net,
                self.req.clearance.trace_halo(self.grid.converter(), c),
            )
    }

    /// Extra cost of a via at `(x, y)`, or `None` where one may not go.
    pub fn via_site(&self, x: u32, y: u32) -> Option<u64> {
        let req = self.req;
        if !req.allow_vias
            || self.grid.layers() < 2
            || req.via_forbidden(x, y)
            || !req.clearance.via_fits_board(self.grid, x, y)
            || self
                .grid
                .is_via_site_blocked(x, y, req.net, req.clearance.via_halo())
        {
            return None;
        }
        Some(req.costs.extra(req.clearance.via_footprint_cost(self.grid, x, y)))
    }

    #[inline(always)]
    pub fn step(&self, d: usize) -> u64 {
        if d % 2 == 1 {
            self.req.costs.diag
        } else {
            self.req.costs.ortho
        }
    }

    #[inline(always)]
    pub fn turn(&self, a: u8, b: u8) -> u64 {
        if a != NO_DIR && b != NO_DIR && a != b {
            self.req.costs.turn
        } else {
            0
        }
    }
}

/// Clamps the requested window to the grid.
pub(crate) fn search_window<G: RoutingGrid + ?Sized>(grid: &G, req: &SearchRequest<'_>) -> (RoutingWindow, bool) {
    let w = &req.window;
    let bounds = CellBox::new(
        w.min_x.min(grid.width() - 1),
        w.max_x.min(grid.width() - 1),
        w.min_y.min(grid.height() - 1),
        w.max_y.min(grid.height() - 1),
    );
    let full = bounds.min_x == 0
        && bounds.min_y == 0
        && bounds.max_x == grid.width() - 1
        && bounds.max_y == grid.height() - 1;
    (RoutingWindow::new(bounds, grid.layers()), full)
}

pub(crate) fn exhausted(full_window: bool) -> SearchFailure {
    if full_window {
        SearchFailure::Unreachable
    } else {
        SearchFailure::OutsideWindow
    }
}

/// Reusable pathfinder. Holds scratch for both search directions so one
/// instance can serve a worker thread for many nets.
#[derive(Clone, Default)]
pub struct AStar {
    pub(crate) fwd: SearchArena,
    pub(crate) bwd: SearchArena,
}

impl AStar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_path<G: RoutingGrid + ?Sized>(
        &mut self,
        grid: &G,
        req: &SearchRequest<'_>,
        mode: SearchMode,
    ) -> Result<SearchPath, SearchFailure> {
        if req.starts.is_empty() {
            return Err(SearchFailure::Unreachable);
        }
        match mode {
            SearchMode::Unidirectional => self.unidirectional(grid, req),
            SearchMode::Bidirectional => super::bidirectional::search(self, grid, req),
        }
    }

    fn unidirectional<G: RoutingGrid + ?Sized>(
        &mut self,
        grid: &G,
        req: &SearchRequest<'_>,
    ) -> Result<SearchPath, SearchFailure> {
        let (window, full) = search_window(grid, req);
        let edges = Edges { grid, req };
        let arena = &mut self.fwd;
        arena.prepare(window.size());

        let mut heap = BinaryHeap::new();
        let mut order = 0u64;
        let h = |c: GridCoord| req.costs.heuristic(c, req.end, req.end_any_layer);

        for &s in req.starts {
            if !window.contains(s) {
                continue;
            }
            let cell = window.local_idx(s);
            if arena.is_seed(cell) {
                continue;
            }
            let i = state(cell, NO_DIR);
            arena.set(i, 0, NO_PARENT);
            arena.mark_seed(cell);
            heap.push(OpenEntry {
                f: h(s),
                order,
                g: 0,
                idx: i as u32,
            });
            order += 1;
        }
        if heap.is_empty() {
            return Err(SearchFailure::OutsideWindow);
        }

        let layers = grid.layers();
        let mut expansions = 0usize;
        while let Some(OpenEntry { g, idx, .. }) = heap.pop() {
            let cur_i = idx as usize;
            if g > arena.g(cur_i) {
                continue;
            }
            let cur = window.coord(cell_of(cur_i) as u32);
            if req.is_goal(cur) {
                return Ok(SearchPath {
                    cells: arena.chain(&window, cur_i),
                    cost: g,
                    expansions,
                });
            }
            expansions += 1;
            if expansions > req.max_expansions {
                return Err(SearchFailure::ExpansionBudget);
            }
            let cur_dir = dir_of(cur_i);

            for (d, &(dx, dy)) in DIRS.iter().enumerate() {
                let nx = cur.x as i64 + dx as i64;
                let ny = cur.y as i64 + dy as i64;
                if !window.contains_xy(nx, ny) {
                    continue;
                }
                let n = GridCoord::new(nx as u32, ny as u32, cur.z);
                if !edges.can_enter(n) {
                    continue;
                }
                let ni = state(window.local_idx(n), d as u8);
                let ng = g + edges.step(d) + edges.turn(cur_dir, d as u8) + edges.node_cost(n);
                if ng < arena.g(ni) {
                    arena.set(ni, ng, idx);
                    heap.push(OpenEntry {
                        f: ng + h(n),
                        order,
                        g: ng,
                        idx: ni as u32,
                    });
                    order += 1;
                }
            }

            if layers > 1 {
                if let Some(site) = edges.via_site(cur.x, cur.y) {
                    for z in (0..layers).filter(|&z| z != cur.z) {
                        let n = cur.with_layer(z);
                        if !edges.can_enter(n) {
                            continue;
                        }
                        let ni = state(window.local_idx(n), NO_DIR);
                        let ng = g + req.costs.via + site + edges.guide(n);
                        if ng < arena.g(ni) {
                            arena.set(ni, ng, idx);
                            heap.push(OpenEntry {
                                f: ng + h(n),
                                order,
                                g: ng,
                                idx: ni as u32,
                            });
                            order += 1;
                        }
                    }
                }
            }
        }
        Err(exhausted(full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::{ClearanceModel, CostModel};
    use crate::grid::DenseGrid;
    use crate::grid::backend::Backend;
    use crate::utils::conversion::GridConverter;
    use pcb_common::db::core::Keepout;
    use pcb_common::db::indices::NetId;
    use pcb_common::geom::point::Point;
    use pcb_common::geom::rect::Rect;
    use pcb_common::util::config::{CostWeights, DesignRules};

    fn rules() -> DesignRules {
        DesignRules {
            trace_width: 0.1,
            clearance: 0.1,
            via_diameter: 0.3,
            grid_resolution: 0.5,
            ..DesignRules::default()
        }
    }

    fn setup(layers: u8) -> (DenseGrid, CostModel, ClearanceModel) {
        let r = rules();
        let conv = GridConverter::new(Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)), 0.5);
        (
            DenseGrid::new(conv, layers, Backend::Serial),
            CostModel::new(&CostWeights::default()),
            ClearanceModel::new(&r, 0.5, None),
        )
    }

    fn request<'a>(
        starts: &'a [GridCoord],
        end: GridCoord,
        costs: &'a CostModel,
        clearance: &'a ClearanceModel,
    ) -> SearchRequest<'a> {
        SearchRequest {
            net: NetId(0),
            starts,
            end,
            end_any_layer: false,
            costs,
            clearance,
            oracle: &NoGuide,
            guide_penalty: 0,
            allow_vias: true,
            forbidden_vias: &[],
            window: CellBox::new(0, 20, 0, 20),
            max_expansions: 100_000,
        }
    }

    #[test]
    fn straight_line_on_empty_grid() {
        let (g, costs, cl) = setup(1);
        let starts = [GridCoord::new(2, 5, 0)];
        let req = request(&starts, GridCoord::new(12, 5, 0), &costs, &cl);
        let path = AStar::new()
            .find_path(&g, &req, SearchMode::Unidirectional)
            .expect("path");
        assert_eq!(path.cells.len(), 11);
        assert_eq!(path.cost, 10 * costs.ortho);
        assert!(path.cells.iter().all(|c| c.y == 5));
    }

    #[test]
    fn offset_target_costs_one_bend() {
        let (g, costs, cl) = setup(1);
        let starts = [GridCoord::new(2, 2, 0)];
        let req = request(&starts, GridCoord::new(12, 5, 0), &costs, &cl);
        let mut astar = AStar::new();
        for mode in [SearchMode::Unidirectional, SearchMode::Bidirectional] {
            let path = astar.find_path(&g, &req, mode).expect("path");
            assert_eq!(path.cost, 7 * costs.ortho + 3 * costs.diag + costs.turn, "{mode:?}");
            let bends = path
                .cells
                .windows(3)
                .filter(|w| {
                    (w[1].x as i64 - w[0].x as i64, w[1].y as i64 - w[0].y as i64)
                        != (w[2].x as i64 - w[1].x as i64, w[2].y as i64 - w[1].y as i64)
                })
                .count();
            assert_eq!(bends, 1, "{mode:?}");
        }
    }

    #[test]
    fn full_wall_is_unreachable_and_layer_change_crosses_it() {
        let (mut g, costs, cl) = setup(2);
        g.add_keepout(&Keepout {
            layer: Some(0),
            rect: Rect::new(Point::new(4.9, -1.0), Point::new(5.1, 11.0)),
        });
        let starts = [GridCoord::new(2, 5, 0)];
        let end = GridCoord::new(18, 5, 0);
        let mut req = request(&starts, end, &costs, &cl);
        req.allow_vias = false;
        let mut astar = AStar::new();
        assert_eq!(
            astar.find_path(&g, &req, SearchMode::Unidirectional),
            Err(SearchFailure::Unreachable)
        );
        req.allow_vias = true;
        let path = astar
            .find_path(&g, &req, SearchMode::Unidirectional)
            .expect("path over the wall");
        assert_eq!(path.via_count(), 2);
    }

    #[test]
    fn narrow_window_reports_window_failure() {
        let (mut g, costs, cl) = setup(1);
        g.add_keepout(&Keepout {
            layer: None,
            rect: Rect::new(Point::new(4.9, 1.0), Point::new(5.1, 9.0)),
        });
        let starts = [GridCoord::new(6, 10, 0)];
        let mut req = request(&starts, GridCoord::new(14, 10, 0), &costs, &cl);
        req.window = CellBox::new(4, 16, 8, 12);
        let mut astar = AStar::new();
        assert_eq!(
            astar.find_path(&g, &req, SearchMode::Unidirectional),
            Err(SearchFailure::OutsideWindow)
        );
        req.window = CellBox::new(0, 20, 0, 20);
        let path = astar
            .find_path(&g, &req, SearchMode::Unidirectional)
            .expect("detour around the wall");
        assert!(path.cells.iter().any(|c| c.y <= 1 || c.y >= 19));
    }

    #[test]
    fn expansion_budget_is_honoured() {
        let (g, costs, cl) = setup(1);
        let starts = [GridCoord::new(0, 0, 0)];
        let mut req = request(&starts, GridCoord::new(20, 20, 0), &costs, &cl);
        req.max_expansions = 3;
        assert_eq!(
            AStar::new().find_path(&g, &req, SearchMode::Unidirectional),
            Err(SearchFailure::ExpansionBudget)
        );
    }

    #[test]
    fn congestion_pushes_the_path_aside() {
        let (mut g, costs, cl) = setup(1);
        g.set_penalty(50.0);
        let mut cells = Vec::new();
        for x in 5..=15 {
            g.footprint_cells(GridCoord::new(x, 10, 0), 0, &mut cells);
        }
        g.claim(&cells);
        let starts = [GridCoord::new(2, 10, 0)];
        let req = request(&starts, GridCoord::new(18, 10, 0), &costs, &cl);
        let path = AStar::new()
            .find_path(&g, &req, SearchMode::Unidirectional)
            .expect("path");
        assert!(path.cells.iter().all(|c| !(5..=15).contains(&c.x) || c.y != 10));
    }
}
