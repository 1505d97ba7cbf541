//! Rip-up and reroute negotiation over the shared routing grid.
//!
//! Every net keeps its claimed footprint on the grid between rounds. A
//! round reroutes the nets that are unrouted or sit on a congested cell,
//! then raises history on every cell still claimed more than once and
//! grows the present-congestion penalty. Batches of nets with disjoint
//! reach are pathfound in parallel against one grid snapshot and
//! committed in plan order.

use crate::algo::astar::NoGuide;
use crate::algo::cost::COST_SCALE;
use crate::algo::{AStar, ClearanceModel, CostModel, GuideOracle, NeckDown, SearchFailure, SearchRequest, select_mode};
use crate::batch::{BatchItem, BatchScheduler};
use crate::grid::{CellKind, DenseGrid, RoutingGrid};
use crate::orchestrator::{Coupling, NetPlan, Strategy};
use crate::outcome::{FailureKind, NetRoute, RoundStats, ViaAdjustment};
use crate::strategy::escape::{Escape, escape_pad};
use crate::strategy::pair::{CouplingGuide, coupling_spacing};
use crate::strategy::{RoutedPath, subgrid};
use crate::utils::segments::{pad_stub, path_length, path_to_copper};
use pcb_common::db::core::{BoardDB, PadLayers, Segment, Via};
use pcb_common::db::indices::{NetId, PadId};
use pcb_common::geom::coord::{CellBox, GridCoord};
use pcb_common::geom::point::Point;
use pcb_common::util::config::Config;
use rayon::prelude::*;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug)]
struct Terminal {
    pad: PadId,
    /// Where the route has to arrive: the pad centre, or the exit of its
    /// escape.
    anchor: Point<f64>,
    layer: u8,
    through: bool,
}

/// Geometry found for one net in one round.
#[derive(Clone, Debug)]
pub struct JobRoute {
    pub paths: Vec<RoutedPath>,
    /// Pad, landing point and layer of each pad-to-grid stub.
    pub stubs: Vec<(PadId, Point<f64>, u8)>,
    /// The route on the routing grid's lattice.
    pub cells: Vec<GridCoord>,
    /// Routing grid `(x, y)` of every via.
    pub vias: Vec<(u32, u32)>,
}

#[derive(Clone, Debug)]
enum JobState {
    Pending,
    Routed(JobRoute),
    Failed(SearchFailure),
}

struct NetJob {
    net: NetId,
    name: String,
    strategy: Strategy,
    coupling: Option<Coupling>,
    terminals: Vec<Terminal>,
    clearance: ClearanceModel,
    escapes: Vec<Escape>,
    /// Window margin in cells; `None` searches the whole grid.
    margin: Option<u32>,
    forbidden_vias: Vec<(u32, u32)>,
    state: JobState,
    claimed: Vec<u32>,
    /// Forced reroute in the next round.
    dirty: bool,
}

impl NetJob {
    fn route(&self) -> Option<&JobRoute> {
        match &self.state {
            JobState::Routed(r) => Some(r),
            _ => None,
        }
    }

    /// Ran out of expansions; the cost field of a later round may let it
    /// through.
    fn out_of_budget(&self) -> bool {
        matches!(self.state, JobState::Failed(SearchFailure::ExpansionBudget))
    }
}

/// Result of one pathfinding attempt, possibly after widening and fallback.
struct Attempt {
    result: Result<JobRoute, SearchFailure>,
    strategy: Strategy,
    margin: Option<u32>,
}

/// Everything negotiation decided, ready to be committed.
pub struct Negotiation {
    pub routes: Vec<NetRoute>,
    pub failures: Vec<(NetId, String, FailureKind, String)>,
    pub rounds: Vec<RoundStats>,
    pub converged: bool,
    pub via_adjustments: Vec<ViaAdjustment>,
}

pub struct NegotiatedRouter<'a> {
    db: &'a BoardDB,
    config: &'a Config,
    costs: CostModel,
    jobs: Vec<NetJob>,
    via_adjustments: Vec<ViaAdjustment>,
}

impl<'a> NegotiatedRouter<'a> {
    /// One job per planned net, in plan order. Escape routes for fine-pitch
    /// terminals are found once here against the fixed obstacles.
    pub fn new(db: &'a BoardDB, config: &'a Config, grid: &DenseGrid, plans: &[NetPlan]) -> Self {
        let rules = &config.design_rules;
        let res = grid.converter().resolution();
        let jobs = plans
            .iter()
            .map(|plan| {
                let net = plan.profile.net;
                let clearance = ClearanceModel::new(rules, res, NeckDown::for_net(db, net, rules));
                let escapes: Vec<Escape> = if plan.strategy.escapes() {
                    db.nets[net.index()]
                        .pads
                        .iter()
                        .filter(|&&p| {
                            db.pad_pitch(p)
                                .is_some_and(|pitch| pitch < rules.neck_down.pitch_threshold)
                        })
                        .filter_map(|&p| escape_pad(db, rules, grid, &clearance, p, &config.orchestrator))
                        .collect()
                } else {
                    Vec::new()
                };
                if !escapes.is_empty() {
                    log::debug!("{}: {} escape routes", db.net_name(net), escapes.len());
                }
                let terminals = db.nets[net.index()]
                    .pads
                    .iter()
                    .map(|&p| {
                        let pad = &db.pads[p.index()];
                        let anchor = escapes
                            .iter()
                            .find(|e| e.pad == p)
                            .map_or(pad.position, |e| grid.grid_to_world(e.exit));
                        Terminal {
                            pad: p,
                            anchor,
                            layer: pad.entry_layer(),
                            through: pad.layers == PadLayers::Through,
                        }
                    })
                    .collect();
                NetJob {
                    net,
                    name: db.net_name(net).to_string(),
                    strategy: plan.strategy,
                    coupling: plan.coupling,
                    terminals,
                    clearance,
                    escapes,
                    margin: Some(config.search.window_margin),
                    forbidden_vias: Vec::new(),
                    state: JobState::Pending,
                    claimed: Vec::new(),
                    dirty: false,
                }
            })
            .collect();
        Self {
            db,
            config,
            costs: CostModel::new(&rules.costs),
            jobs,
            via_adjustments: Vec::new(),
        }
    }

    pub fn run(mut self, grid: &mut DenseGrid) -> Negotiation {
        let config = self.config;
        let neg = &config.negotiation;
        let mut penalty = neg.initial_penalty;
        grid.set_penalty(penalty);
        let mut rounds = Vec::new();
        let mut converged = false;

        for round in 1..=neg.max_iterations {
            let todo = self.reroute_set(grid);
            if todo.is_empty() && grid.total_conflicts() == 0 {
                converged = true;
                break;
            }

            let mut failed = 0;
            for batch in self.schedule(grid, &todo) {
                failed += self.route_batch(grid, &batch);
            }
            self.resolve_via_conflicts(grid, round);

            let conflicts = grid.total_conflicts();
            let dirty = self.jobs.iter().any(|j| j.dirty);
            // Budget failures are retried only while some reroute in the
            // round changed the grid they would see.
            let retry = failed < todo.len() && self.jobs.iter().any(|j| j.out_of_budget());
            if conflicts > 0 {
                grid.update_history(neg.history_increment, neg.history_cap);
                penalty = (penalty * neg.penalty_multiplier).min(neg.max_penalty);
                grid.set_penalty(penalty);
            }
            let stats = RoundStats {
                round,
                conflicts,
                total_history: grid.total_history(),
                penalty: grid.penalty(),
                rerouted: todo.len(),
                failed,
            };
            log::info!(
                "Round {}: {} conflicts, history {:.1}, penalty {:.2}, rerouted {}",
                stats.round,
                stats.conflicts,
                stats.total_history,
                stats.penalty,
                stats.rerouted
            );
            rounds.push(stats);
            if conflicts == 0 && !dirty && !retry {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "Negotiation stopped after {} rounds with {} conflicting cells",
                rounds.len(),
                grid.total_conflicts()
            );
        }
        self.finish(grid, rounds, converged)
    }

    /// Unrouted nets, nets that ran out of expansions, nets marked for
    /// rerouting, and every net with a claimed cell that another net also
    /// claims.
    fn reroute_set(&self, grid: &DenseGrid) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| match j.state {
                JobState::Pending => true,
                JobState::Failed(SearchFailure::ExpansionBudget) => true,
                JobState::Failed(_) => false,
                JobState::Routed(_) => {
                    j.dirty
                        || j
                            .claimed
                            .iter()
                            .any(|&i| grid.is_congested(grid.coord(i as usize)))
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn window(&self, grid: &DenseGrid, job: &NetJob, margin: Option<u32>) -> CellBox {
        let full = CellBox::new(0, grid.width() - 1, 0, grid.height() - 1);
        let Some(margin) = margin else {
            return full;
        };
        let mut cells: Vec<GridCoord> = job
            .terminals
            .iter()
            .map(|t| grid.world_to_grid(t.anchor, t.layer))
            .collect();
        cells.extend(
            job.terminals
                .iter()
                .map(|t| grid.world_to_grid(self.db.pads[t.pad.index()].position, t.layer)),
        );
        CellBox::from_coords(&cells).map_or(full, |b| b.expand(margin, grid.width(), grid.height()))
    }

    fn schedule(&self, grid: &DenseGrid, todo: &[usize]) -> Vec<Vec<usize>> {
        let batch = &self.config.batch;
        if !batch.enabled {
            return todo.iter().map(|&j| vec![j]).collect();
        }
        let items: Vec<BatchItem> = todo
            .iter()
            .map(|&j| {
                let job = &self.jobs[j];
                let mut extra = job.clearance.reach() + 1;
                if job.strategy.refines() {
                    extra += self.config.orchestrator.subgrid_margin;
                }
                let reach = self
                    .window(grid, job, job.margin)
                    .expand(extra, grid.width(), grid.height());
                let after = match job.coupling {
                    Some(Coupling::Follower { partner, .. }) => todo
                        .iter()
                        .copied()
                        .find(|&k| self.jobs[k].net == partner),
                    _ => None,
                };
                BatchItem { id: j, reach, after }
            })
            .collect();
        BatchScheduler::new(batch.max_batch_size).schedule(&items)
    }

    /// Rips up, reroutes and recommits one batch. Returns how many nets
    /// failed.
    fn route_batch(&mut self, grid: &mut DenseGrid, batch: &[usize]) -> usize {
        for &j in batch {
            let claimed = std::mem::take(&mut self.jobs[j].claimed);
            grid.release(&claimed);
        }
        let partners: Vec<Option<Vec<GridCoord>>> = batch
            .iter()
            .map(|&j| self.partner_cells(j))
            .collect();

        let snapshot: &DenseGrid = grid;
        let attempts: Vec<Attempt> = if batch.len() > 1 {
            batch
                .par_iter()
                .zip(partners.par_iter())
                .map_with(AStar::new(), |astar, (&j, partner)| {
                    self.attempt(snapshot, j, partner.as_deref(), astar)
                })
                .collect()
        } else {
            let mut astar = AStar::new();
            batch
                .iter()
                .zip(&partners)
                .map(|(&j, partner)| self.attempt(snapshot, j, partner.as_deref(), &mut astar))
                .collect()
        };

        let mut failed = 0;
        for (&j, attempt) in batch.iter().zip(attempts) {
            let claims = match &attempt.result {
                Ok(route) => self.claims(grid, &self.jobs[j], route),
                Err(_) => Vec::new(),
            };
            grid.claim(&claims);
            let job = &mut self.jobs[j];
            if attempt.strategy != job.strategy {
                log::warn!("{}: fell back from {:?} to {:?}", job.name, job.strategy, attempt.strategy);
                if !attempt.strategy.escapes() {
                    job.escapes.clear();
                    for t in &mut job.terminals {
                        t.anchor = self.db.pads[t.pad.index()].position;
                    }
                }
                job.strategy = attempt.strategy;
            }
            job.margin = attempt.margin;
            job.claimed = claims;
            job.dirty = false;
            job.state = match attempt.result {
                Ok(route) => JobState::Routed(route),
                Err(e) => {
                    log::warn!("{}: {}", job.name, e);
                    failed += 1;
                    JobState::Failed(e)
                }
            };
        }
        self.track_relocations(grid);
        failed
    }

    fn partner_cells(&self, j: usize) -> Option<Vec<GridCoord>> {
        let job = &self.jobs[j];
        if !job.strategy.couples() {
            return None;
        }
        let Some(Coupling::Follower { partner, .. }) = job.coupling else {
            return None;
        };
        self.jobs
            .iter()
            .find(|k| k.net == partner)
            .and_then(|k| k.route())
            .map(|r| r.cells.clone())
    }

    /// Routes a net, widening a window that turned out too small and then
    /// walking down the fallback chain.
    fn attempt(
        &self,
        grid: &DenseGrid,
        j: usize,
        partner: Option<&[GridCoord]>,
        astar: &mut AStar,
    ) -> Attempt {
        let job = &self.jobs[j];
        let search = &self.config.search;
        let mut strategy = job.strategy;
        let mut margin = job.margin;
        loop {
            match self.route_job(grid, job, strategy, margin, partner, astar) {
                Err(SearchFailure::OutsideWindow) => {
                    margin = margin.and_then(|m| {
                        let next = m.saturating_mul(2).max(m + 1);
                        (next <= search.window_margin_max).then_some(next)
                    });
                    log::debug!("{}: widening search window to {:?}", job.name, margin);
                }
                Err(e) if self.config.orchestrator.fallback => match strategy.fallback() {
                    Some(next) => {
                        log::debug!("{}: {:?} failed ({}), trying {:?}", job.name, strategy, e, next);
                        strategy = next;
                    }
                    None => {
                        return Attempt {
                            result: Err(e),
                            strategy,
                            margin,
                        };
                    }
                },
                result => {
                    return Attempt {
                        result,
                        strategy,
                        margin,
                    };
                }
            }
        }
    }

    fn route_job(
        &self,
        grid: &DenseGrid,
        job: &NetJob,
        strategy: Strategy,
        margin: Option<u32>,
        partner: Option<&[GridCoord]>,
        astar: &mut AStar,
    ) -> Result<JobRoute, SearchFailure> {
        let rules = &self.config.design_rules;
        let orch = &self.config.orchestrator;
        let conv = grid.converter();
        let window = self.window(grid, job, margin);
        let escapes: &[Escape] = if strategy.escapes() { &job.escapes } else { &[] };
        let anchor_of = |t: &Terminal| {
            escapes
                .iter()
                .find(|e| e.pad == t.pad)
                .map_or(self.db.pads[t.pad.index()].position, |_| t.anchor)
        };

        let fine;
        let fine_clearance;
        let fine_forbidden: Vec<(u32, u32)>;
        let (search_grid, clearance, search_window, forbidden): (&DenseGrid, &ClearanceModel, CellBox, &[(u32, u32)]) =
            if strategy.refines() {
                fine = subgrid::refine(self.db, rules, grid, window, orch);
                fine_clearance = ClearanceModel::new(
                    rules,
                    fine.converter().resolution(),
                    job.clearance.neck().cloned(),
                );
                fine_forbidden = fine_via_sites(&fine, grid, &job.forbidden_vias);
                let all = CellBox::new(0, fine.width() - 1, 0, fine.height() - 1);
                (&fine, &fine_clearance, all, &fine_forbidden)
            } else {
                (grid, &job.clearance, window, &job.forbidden_vias)
            };

        let guide = match (strategy.couples(), job.coupling, partner) {
            (true, Some(Coupling::Follower { gap, .. }), Some(cells)) if !cells.is_empty() => {
                let spacing = coupling_spacing(gap, rules.trace_width, conv.resolution(), clearance.nominal_claim());
                let own: Vec<GridCoord> = job
                    .terminals
                    .iter()
                    .map(|t| grid.world_to_grid(anchor_of(t), t.layer))
                    .collect();
                Some(CouplingGuide::new(cells, window, spacing, &own))
            }
            _ => None,
        };
        let oracle: &dyn GuideOracle = match &guide {
            Some(g) => g,
            None => &NoGuide,
        };
        let guide_penalty = if guide.is_some() {
            (orch.pair_guide_penalty * COST_SCALE).round() as u64
        } else {
            0
        };

        let anchors: Vec<GridCoord> = job
            .terminals
            .iter()
            .map(|t| search_grid.world_to_grid(anchor_of(t), t.layer))
            .collect();
        let layers = search_grid.layers();
        let spread = |c: GridCoord, through: bool, tree: &mut Vec<GridCoord>| {
            if through {
                tree.extend((0..layers).map(|z| c.with_layer(z)));
            } else {
                tree.push(c);
            }
        };

        let mut paths: Vec<RoutedPath> = Vec::new();
        let mut tree: Vec<GridCoord> = Vec::new();
        if let (Some(&first), Some(t)) = (anchors.first(), job.terminals.first()) {
            spread(first, t.through, &mut tree);
        }
        let mut remaining: Vec<usize> = (1..anchors.len()).collect();
        while !remaining.is_empty() {
            let Some(bbox) = CellBox::from_coords(&tree) else {
                break;
            };
            let (pos, _) = remaining
                .iter()
                .enumerate()
                .map(|(pos, &i)| (pos, bbox.distance_to(anchors[i].x, anchors[i].y)))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });
            let i = remaining.remove(pos);
            let target = anchors[i];
            let through = job.terminals[i].through;

            let req = SearchRequest {
                net: job.net,
                starts: &tree,
                end: target,
                end_any_layer: through,
                costs: &self.costs,
                clearance,
                oracle,
                guide_penalty,
                allow_vias: layers > 1,
                forbidden_vias: forbidden,
                window: search_window,
                max_expansions: self.config.search.max_expansions,
            };
            let mode = select_mode(&req, &rules.bidirectional);
            let found = astar.find_path(search_grid, &req, mode)?;
            tree.extend_from_slice(&found.cells);
            spread(target, through, &mut tree);
            if found.cells.len() > 1 {
                paths.push(RoutedPath::new(found.cells, search_grid.converter().clone()));
            }
        }

        let mut stubs = Vec::with_capacity(job.terminals.len());
        for (t, &a) in job.terminals.iter().zip(&anchors) {
            let landing = match escapes.iter().find(|e| e.pad == t.pad) {
                Some(e) => match e.path.cells.first() {
                    Some(&c) => e.path.conv.to_world(c),
                    None => search_grid.grid_to_world(a),
                },
                None => search_grid.grid_to_world(a),
            };
            stubs.push((t.pad, landing, t.layer));
        }
        for e in escapes {
            if e.path.cells.len() > 1 {
                paths.push(e.path.clone());
            }
        }

        let mut cells = Vec::new();
        let mut vias = Vec::new();
        for p in &paths {
            let on_grid = p.on_grid(conv);
            vias.extend(
                on_grid
                    .windows(2)
                    .filter(|w| w[0].z != w[1].z)
                    .map(|w| (w[0].x, w[0].y)),
            );
            cells.extend(on_grid);
        }
        vias.sort_unstable();
        vias.dedup();
        Ok(JobRoute {
            paths,
            stubs,
            cells,
            vias,
        })
    }

    /// Cells the route occupies for negotiation: the claim square around
    /// every cell of every path, and the via square on every layer. Cells on
    /// the net's own pads claim nothing. Pad copper is fixed and foreign
    /// routes are already kept off it by the hard clearance check.
    fn claims(&self, grid: &DenseGrid, job: &NetJob, route: &JobRoute) -> Vec<u32> {
        let conv = grid.converter();
        let mut out = Vec::new();
        for p in &route.paths {
            // Off-lattice paths may sit up to half a cell from the cell
            // they are counted on.
            let extra = if p.is_native(conv) { 0 } else { 1 };
            for c in p.on_grid(conv) {
                if on_own_pad(grid, job.net, c) {
                    continue;
                }
                let k = job.clearance.claim_radius(conv, c) + extra;
                grid.footprint_cells(c, k, &mut out);
            }
        }
        for &(x, y) in &route.vias {
            for z in 0..grid.layers() {
                grid.footprint_cells(GridCoord::new(x, y, z), job.clearance.via_claim(), &mut out);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Two nets wanting vias in the same or adjacent sites: the net that
    /// resolves via conflicts is pushed off the other's site and rerouted.
    fn resolve_via_conflicts(&mut self, grid: &DenseGrid, round: usize) {
        let config = self.config;
        let neg = &config.negotiation;
        if !neg.resolve_via_conflicts {
            return;
        }
        let radius = neg.via_conflict_radius as i64;
        let n = self.jobs.len();
        let mut moves: Vec<(usize, (u32, u32), (u32, u32))> = Vec::new();
        for a in 0..n {
            for b in a + 1..n {
                let (Some(ra), Some(rb)) = (self.jobs[a].route(), self.jobs[b].route()) else {
                    continue;
                };
                if self.jobs[a].net == self.jobs[b].net {
                    continue;
                }
                // Later net moves when it can; otherwise the earlier one.
                let mover = if self.jobs[b].strategy.resolves_vias() {
                    b
                } else if self.jobs[a].strategy.resolves_vias() {
                    a
                } else {
                    continue;
                };
                for &va in &ra.vias {
                    for &vb in &rb.vias {
                        let d = (va.0 as i64 - vb.0 as i64)
                            .abs()
                            .max((va.1 as i64 - vb.1 as i64).abs());
                        if d <= radius {
                            let (own, other) = if mover == a { (va, vb) } else { (vb, va) };
                            moves.push((mover, own, other));
                        }
                    }
                }
            }
        }

        for (j, own, other) in moves {
            let job = &mut self.jobs[j];
            let before = job.forbidden_vias.len();
            for y in other.1 as i64 - radius..=other.1 as i64 + radius {
                for x in other.0 as i64 - radius..=other.0 as i64 + radius {
                    if grid.in_bounds(x, y) {
                        job.forbidden_vias.push((x as u32, y as u32));
                    }
                }
            }
            job.forbidden_vias.sort_unstable();
            job.forbidden_vias.dedup();
            if job.forbidden_vias.len() == before {
                continue;
            }
            job.dirty = true;
            let original = grid.grid_to_world(GridCoord::new(own.0, own.1, 0));
            log::debug!(
                "{}: via at ({:.3}, {:.3}) clashes, moving it",
                job.name,
                original.x,
                original.y
            );
            self.via_adjustments.push(ViaAdjustment {
                net: job.net,
                name: job.name.clone(),
                round,
                original,
                relocated: None,
            });
        }
    }

    /// Points each recorded via adjustment at the net's nearest via now.
    fn track_relocations(&mut self, grid: &DenseGrid) {
        for adj in &mut self.via_adjustments {
            let Some(route) = self
                .jobs
                .iter()
                .find(|j| j.net == adj.net)
                .and_then(|j| j.route())
            else {
                continue;
            };
            adj.relocated = route
                .vias
                .iter()
                .map(|&(x, y)| grid.grid_to_world(GridCoord::new(x, y, 0)))
                .min_by(|p, q| {
                    p.distance(&adj.original)
                        .total_cmp(&q.distance(&adj.original))
                });
        }
    }

    /// Accepts routes greedily in plan order. A route whose claims overlap
    /// an accepted route is rejected as congested.
    fn finish(self, grid: &DenseGrid, rounds: Vec<RoundStats>, converged: bool) -> Negotiation {
        let rules = &self.config.design_rules;
        let layers = grid.layers();
        let mut taken: HashSet<u32> = HashSet::new();
        let mut routes = Vec::new();
        let mut failures = Vec::new();

        for job in &self.jobs {
            match &job.state {
                JobState::Failed(e) => failures.push((
                    job.net,
                    job.name.clone(),
                    match e {
                        SearchFailure::ExpansionBudget => FailureKind::BudgetExhausted,
                        _ => FailureKind::Infeasible,
                    },
                    format!("{} ({:?})", e, job.strategy),
                )),
                JobState::Pending => failures.push((
                    job.net,
                    job.name.clone(),
                    FailureKind::Congested,
                    "never routed before the round limit".to_string(),
                )),
                JobState::Routed(route) => {
                    if job.claimed.iter().any(|c| taken.contains(c)) {
                        failures.push((
                            job.net,
                            job.name.clone(),
                            FailureKind::Congested,
                            "still shares cells with an accepted route".to_string(),
                        ));
                        continue;
                    }
                    taken.extend(job.claimed.iter().copied());
                    routes.push(self.to_copper(job, route, layers, rules.trace_width));
                }
            }
        }
        log::info!(
            "Negotiation accepted {} of {} nets",
            routes.len(),
            self.jobs.len()
        );
        Negotiation {
            routes,
            failures,
            rounds,
            converged,
            via_adjustments: self.via_adjustments,
        }
    }

    fn to_copper(&self, job: &NetJob, route: &JobRoute, layers: u8, nominal: f64) -> NetRoute {
        let rules = &self.config.design_rules;
        let mut segments: Vec<Segment> = Vec::new();
        let mut vias: Vec<Via> = Vec::new();
        let mut length = 0.0;
        for p in &route.paths {
            let (s, v) = path_to_copper(&p.cells, job.net, &p.conv, rules, &job.clearance, layers);
            segments.extend(s);
            vias.extend(v);
            length += path_length(&p.cells, p.conv.resolution());
        }
        for &(pad_id, landing, layer) in &route.stubs {
            let pad = &self.db.pads[pad_id.index()];
            let width = job.clearance.width_at(pad.position, nominal);
            if let Some(stub) = pad_stub(pad, landing, layer, width) {
                length += stub.length();
                segments.push(stub);
            }
        }
        vias.sort_by(|a, b| {
            a.position
                .x
                .total_cmp(&b.position.x)
                .then(a.position.y.total_cmp(&b.position.y))
        });
        vias.dedup_by(|a, b| a.position == b.position);
        NetRoute {
            net: job.net,
            name: job.name.clone(),
            segments,
            vias,
            length,
            strategy: job.strategy,
        }
    }
}

fn on_own_pad(grid: &DenseGrid, net: NetId, c: GridCoord) -> bool {
    let cell = grid.cell(c);
    cell.kind == CellKind::Pad && cell.owner == Some(net)
}

/// Fine cells lying in any of the listed routing-grid via sites.
fn fine_via_sites(fine: &DenseGrid, main: &DenseGrid, sites: &[(u32, u32)]) -> Vec<(u32, u32)> {
    if sites.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for y in 0..fine.height() {
        for x in 0..fine.width() {
            let m = main.world_to_grid(fine.grid_to_world(GridCoord::new(x, y, 0)), 0);
            if sites.binary_search(&(m.x, m.y)).is_ok() {
                out.push((x, y));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::backend::Backend;
    use crate::orchestrator::RoutingOrchestrator;
    use pcb_common::db::core::Pad;
    use pcb_common::geom::rect::Rect;

    fn pad(net: NetId, x: f64, y: f64) -> Pad {
        Pad {
            net,
            ref_des: format!("J{}", net.0),
            pin: format!("{x}"),
            position: Point::new(x, y),
            width: 0.5,
            height: 0.5,
            layers: PadLayers::Single(0),
        }
    }

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.design_rules.grid_resolution = 0.5;
        cfg.design_rules.trace_width = 0.2;
        cfg.design_rules.clearance = 0.1;
        cfg.negotiation.max_iterations = 30;
        cfg
    }

    /// Two nets that both want the middle row of a narrow board.
    fn crossing_board() -> BoardDB {
        let mut db = BoardDB::new("x", Rect::new(Point::new(0.0, 0.0), Point::new(20.0, 10.0)));
        db.add_layer("F.Cu");
        let a = db.add_net("A");
        let b = db.add_net("B");
        db.add_pad(pad(a, 2.0, 5.0));
        db.add_pad(pad(a, 18.0, 5.0));
        db.add_pad(pad(b, 2.0, 6.0));
        db.add_pad(pad(b, 18.0, 6.0));
        db
    }

    fn negotiate(db: &BoardDB, cfg: &Config) -> (Negotiation, DenseGrid) {
        let mut grid = DenseGrid::from_board(db, &cfg.design_rules, Backend::Serial);
        let plans = RoutingOrchestrator::new(db, cfg).plan();
        let out = NegotiatedRouter::new(db, cfg, &grid, &plans).run(&mut grid);
        (out, grid)
    }

    #[test]
    fn neighbouring_nets_negotiate_apart() {
        let db = crossing_board();
        let cfg = config();
        let (out, grid) = negotiate(&db, &cfg);
        assert!(out.converged, "rounds: {:?}", out.rounds);
        assert_eq!(out.routes.len(), 2);
        assert!(out.failures.is_empty());
        assert_eq!(grid.total_conflicts(), 0);
    }

    #[test]
    fn own_pad_cells_are_not_claimed() {
        let db = crossing_board();
        let cfg = config();
        let grid = DenseGrid::from_board(&db, &cfg.design_rules, Backend::Serial);
        let plans = RoutingOrchestrator::new(&db, &cfg).plan();
        let router = NegotiatedRouter::new(&db, &cfg, &grid, &plans);
        let conv = grid.converter().clone();
        let start = grid.world_to_grid(Point::new(2.0, 5.0), 0);
        let cells: Vec<GridCoord> = (0..=4).map(|i| GridCoord::new(start.x + i, start.y, 0)).collect();
        let route = JobRoute {
            paths: vec![RoutedPath::new(cells, conv)],
            stubs: Vec::new(),
            cells: Vec::new(),
            vias: Vec::new(),
        };
        let job = router.jobs.iter().find(|j| j.net == NetId(0)).expect("job");
        let claims = router.claims(&grid, job, &route);
        let at = |dx: i64, dy: i64| {
            grid.index(GridCoord::new((start.x as i64 + dx) as u32, (start.y as i64 + dy) as u32, 0)) as u32
        };
        // The pad covers three cells a side; its cells claim nothing.
        assert!(!claims.contains(&at(-1, 0)));
        assert!(!claims.contains(&at(0, 1)));
        // The first cell off the pad claims its whole square, which reaches
        // back onto the pad.
        assert!(claims.contains(&at(1, 1)));
        assert!(claims.contains(&at(3, -1)));
        assert!(!claims.contains(&at(6, 1)));
    }

    #[test]
    fn exhausted_budget_is_retried_and_reported_apart() {
        let db = crossing_board();
        let mut cfg = config();
        cfg.search.max_expansions = 5;
        let (out, _) = negotiate(&db, &cfg);
        assert!(out.routes.is_empty());
        assert_eq!(out.failures.len(), 2);
        assert!(out.failures.iter().all(|f| f.2 == FailureKind::BudgetExhausted));

        let grid = DenseGrid::from_board(&db, &cfg.design_rules, Backend::Serial);
        let plans = RoutingOrchestrator::new(&db, &cfg).plan();
        let mut router = NegotiatedRouter::new(&db, &cfg, &grid, &plans);
        router.jobs[0].state = JobState::Failed(SearchFailure::ExpansionBudget);
        router.jobs[1].state = JobState::Failed(SearchFailure::Unreachable);
        assert_eq!(router.reroute_set(&grid), vec![0]);
    }

    #[test]
    fn history_never_drops_between_rounds() {
        let db = crossing_board();
        let cfg = config();
        let (out, _) = negotiate(&db, &cfg);
        for w in out.rounds.windows(2) {
            assert!(w[1].total_history >= w[0].total_history);
            assert!(w[1].penalty >= w[0].penalty);
        }
    }

    #[test]
    fn batched_and_sequential_runs_agree() {
        let db = crossing_board();
        let mut cfg = config();
        let (seq, _) = negotiate(&db, &cfg);
        cfg.batch.enabled = true;
        let (bat, _) = negotiate(&db, &cfg);
        let lengths = |n: &Negotiation| n.routes.iter().map(|r| (r.net, r.length)).collect::<Vec<_>>();
        assert_eq!(lengths(&seq), lengths(&bat));
    }

    #[test]
    fn walled_off_terminal_is_infeasible() {
        let mut db = crossing_board();
        db.add_keepout(None, Rect::new(Point::new(16.0, 0.0), Point::new(16.5, 10.0)));
        let cfg = config();
        let (out, _) = negotiate(&db, &cfg);
        assert!(out.routes.is_empty());
        assert_eq!(out.failures.len(), 2);
        assert!(out.failures.iter().all(|f| f.2 == FailureKind::Infeasible));
    }
}
