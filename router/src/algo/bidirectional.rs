//! Bidirectional A*: one frontier grows from the connected tree, the other
//! from the target, and the cheapest meeting point found so far is kept as
//! the incumbent until neither frontier can beat it.

use super::astar::{
    AStar, DIRS, Edges, HEADINGS, NO_DIR, NO_PARENT, OpenEntry, SearchArena, cell_of, dir_of,
    exhausted, search_window, state,
};
use super::window::RoutingWindow;
use super::{SearchFailure, SearchPath, SearchRequest};
use crate::grid::RoutingGrid;
use pcb_common::geom::coord::{CellBox, GridCoord};
use std::collections::BinaryHeap;

/// Best complete path seen so far, as the forward and backward states that
/// meet in one cell.
struct Meeting {
    cost: u64,
    fwd: usize,
    bwd: usize,
}

fn offer(best: &mut Option<Meeting>, join: Option<(u64, usize, usize)>) {
    let Some((cost, fwd, bwd)) = join else {
        return;
    };
    if best.as_ref().is_none_or(|m| cost < m.cost) {
        *best = Some(Meeting { cost, fwd, bwd });
    }
}

/// Cheapest way to finish the forward state `f` with a backward state of the
/// same cell. Backward states carry the heading the path leaves with, so the
/// bend at the meeting cell is priced here.
fn join_forward<G: RoutingGrid + ?Sized>(
    edges: &Edges<'_, G>,
    bwd: &SearchArena,
    f: usize,
    g: u64,
) -> Option<(u64, usize, usize)> {
    let cell = cell_of(f);
    let arrive = dir_of(f);
    (0..HEADINGS as u8)
        .map(|d| state(cell, d))
        .filter(|&b| bwd.seen(b))
        .map(|b| (g + bwd.g(b) + edges.turn(arrive, dir_of(b)), f, b))
        .min_by_key(|j| j.0)
}

fn join_backward<G: RoutingGrid + ?Sized>(
    edges: &Edges<'_, G>,
    fwd: &SearchArena,
    b: usize,
    g: u64,
) -> Option<(u64, usize, usize)> {
    let cell = cell_of(b);
    let leave = dir_of(b);
    (0..HEADINGS as u8)
        .map(|d| state(cell, d))
        .filter(|&f| fwd.seen(f))
        .map(|f| (fwd.g(f) + g + edges.turn(dir_of(f), leave), f, b))
        .min_by_key(|j| j.0)
}

pub(crate) fn search<G: RoutingGrid + ?Sized>(
    astar: &mut AStar,
    grid: &G,
    req: &SearchRequest<'_>,
) -> Result<SearchPath, SearchFailure> {
    let (window, full) = search_window(grid, req);
    let edges = Edges { grid, req };
    let AStar { fwd, bwd } = astar;
    fwd.prepare(window.size());
    bwd.prepare(window.size());

    let layers = grid.layers();
    let mut order = 0u64;
    let mut open_f = BinaryHeap::new();
    let mut open_b = BinaryHeap::new();

    let h_f = |c: GridCoord| req.costs.heuristic(c, req.end, req.end_any_layer);
    let start_box = CellBox::from_coords(req.starts.iter().filter(|s| window.contains(**s)));
    let mut start_layers = [false; 256];
    for s in req.starts {
        start_layers[s.z as usize] = true;
    }
    let h_b = |c: GridCoord| match &start_box {
        Some(b) => req.costs.heuristic_to_box(c, b, start_layers[c.z as usize]),
        None => 0,
    };

    for &s in req.starts {
        if !window.contains(s) {
            continue;
        }
        let cell = window.local_idx(s);
        if fwd.is_seed(cell) {
            continue;
        }
        let i = state(cell, NO_DIR);
        fwd.set(i, 0, NO_PARENT);
        fwd.mark_seed(cell);
        open_f.push(OpenEntry {
            f: h_f(s),
            order,
            g: 0,
            idx: i as u32,
        });
        order += 1;
    }
    if open_f.is_empty() || !window.bounds.contains(req.end.x, req.end.y) {
        return Err(SearchFailure::OutsideWindow);
    }

    let mut best: Option<Meeting> = None;
    let goal_layers: Vec<u8> = if req.end_any_layer {
        (0..layers).collect()
    } else {
        vec![req.end.z]
    };
    for z in goal_layers {
        let t = req.end.with_layer(z);
        let i = state(window.local_idx(t), NO_DIR);
        bwd.set(i, 0, NO_PARENT);
        open_b.push(OpenEntry {
            f: h_b(t),
            order,
            g: 0,
            idx: i as u32,
        });
        order += 1;
        offer(&mut best, join_backward(&edges, fwd, i, 0));
    }

    let mut expansions = 0usize;
    loop {
        let (Some(top_f), Some(top_b)) = (open_f.peek().copied(), open_b.peek().copied()) else {
            break;
        };
        if let Some(m) = &best {
            if m.cost <= top_f.f.max(top_b.f) {
                break;
            }
        }
        expansions += 1;
        if expansions > req.max_expansions {
            return Err(SearchFailure::ExpansionBudget);
        }

        // The frontier whose best entry sorts first advances.
        if top_f > top_b {
            open_f.pop();
            if top_f.g > fwd.g(top_f.idx as usize) {
                continue;
            }
            expand_forward(&edges, &window, fwd, bwd, top_f, &mut open_f, &mut order, &mut best, &h_f);
        } else {
            open_b.pop();
            if top_b.g > bwd.g(top_b.idx as usize) {
                continue;
            }
            expand_backward(&edges, &window, fwd, bwd, top_b, &mut open_b, &mut order, &mut best, &h_b);
        }
    }

    let Some(meet) = best else {
        return Err(exhausted(full));
    };
    let mut cells = fwd.chain(&window, meet.fwd);
    let mut cur = bwd.parent(meet.bwd);
    while cur != NO_PARENT {
        cells.push(window.coord(cell_of(cur as usize) as u32));
        cur = bwd.parent(cur as usize);
    }
    Ok(SearchPath {
        cells,
        cost: meet.cost,
        expansions,
    })
}

#[allow(clippy::too_many_arguments)]
fn expand_forward<G: RoutingGrid + ?Sized>(
    edges: &Edges<'_, G>,
    window: &RoutingWindow,
    fwd: &mut SearchArena,
    bwd: &SearchArena,
    entry: OpenEntry,
    open: &mut BinaryHeap<OpenEntry>,
    order: &mut u64,
    best: &mut Option<Meeting>,
    h: &dyn Fn(GridCoord) -> u64,
) {
    let cur_i = entry.idx as usize;
    let cur = window.coord(cell_of(cur_i) as u32);
    let g = entry.g;
    offer(best, join_forward(edges, bwd, cur_i, g));
    let cur_dir = dir_of(cur_i);
    let mut relax = |fwd: &mut SearchArena, n: GridCoord, ng: u64, dir: u8| {
        let ni = state(window.local_idx(n), dir);
        if ng < fwd.g(ni) {
            fwd.set(ni, ng, entry.idx);
            open.push(OpenEntry {
                f: ng + h(n),
                order: *order,
                g: ng,
                idx: ni as u32,
            });
            *order += 1;
            offer(best, join_forward(edges, bwd, ni, ng));
        }
    };

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
        let ng = g + edges.step(d) + edges.turn(cur_dir, d as u8) + edges.node_cost(n);
        relax(fwd, n, ng, d as u8);
    }
    if edges.grid.layers() > 1 {
        if let Some(site) = edges.via_site(cur.x, cur.y) {
            for z in (0..edges.grid.layers()).filter(|&z| z != cur.z) {
                let n = cur.with_layer(z);
                if !edges.can_enter(n) {
                    continue;
                }
                let ng = g + edges.req.costs.via + site + edges.guide(n);
                relax(fwd, n, ng, NO_DIR);
            }
        }
    }
}

/// Grows the target side. A backward state is a cell plus the heading the
/// path leaves it with. Stepping back from `cur` to a predecessor `n` in
/// heading `d` prices the edge `n -> cur` the way the forward side would:
/// the step, the cost of standing on `cur`, and the bend at `cur` between
/// `d` and the heading already leaving it.
#[allow(clippy::too_many_arguments)]
fn expand_backward<G: RoutingGrid + ?Sized>(
    edges: &Edges<'_, G>,
    window: &RoutingWindow,
    fwd: &SearchArena,
    bwd: &mut SearchArena,
    entry: OpenEntry,
    open: &mut BinaryHeap<OpenEntry>,
    order: &mut u64,
    best: &mut Option<Meeting>,
    h: &dyn Fn(GridCoord) -> u64,
) {
    let cur_i = entry.idx as usize;
    let cur = window.coord(cell_of(cur_i) as u32);
    let g = entry.g;
    offer(best, join_backward(edges, fwd, cur_i, g));
    let out_dir = dir_of(cur_i);
    let stand = edges.node_cost(cur);
    let mut relax = |bwd: &mut SearchArena, n: GridCoord, ng: u64, dir: u8| {
        let ni = state(window.local_idx(n), dir);
        if ng < bwd.g(ni) {
            bwd.set(ni, ng, entry.idx);
            open.push(OpenEntry {
                f: ng + h(n),
                order: *order,
                g: ng,
                idx: ni as u32,
            });
            *order += 1;
            offer(best, join_backward(edges, fwd, ni, ng));
        }
    };

    for (d, &(dx, dy)) in DIRS.iter().enumerate() {
        let nx = cur.x as i64 - dx as i64;
        let ny = cur.y as i64 - dy as i64;
        if !window.contains_xy(nx, ny) {
            continue;
        }
        let n = GridCoord::new(nx as u32, ny as u32, cur.z);
        if !fwd.is_seed(window.local_idx(n)) && !edges.can_enter(n) {
            continue;
        }
        let ng = g + edges.step(d) + stand + edges.turn(d as u8, out_dir);
        relax(bwd, n, ng, d as u8);
    }
    if edges.grid.layers() > 1 {
        if let Some(site) = edges.via_site(cur.x, cur.y) {
            let enter = edges.guide(cur);
            for z in (0..edges.grid.layers()).filter(|&z| z != cur.z) {
                let n = cur.with_layer(z);
                if !fwd.is_seed(window.local_idx(n)) && !edges.can_enter(n) {
                    continue;
                }
                let ng = g + edges.req.costs.via + site + enter;
                relax(bwd, n, ng, NO_DIR);
            }
        }
    }
}
