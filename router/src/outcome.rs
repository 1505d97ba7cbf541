use crate::analyzer::RoutabilityReport;
use crate::orchestrator::Strategy;
use pcb_common::db::core::{Segment, Via};
use pcb_common::db::indices::NetId;
use pcb_common::geom::point::Point;
use serde::Serialize;

/// Accepted copper for one net.
#[derive(Clone, Debug, Serialize)]
pub struct NetRoute {
    pub net: NetId,
    pub name: String,
    pub segments: Vec<Segment>,
    pub vias: Vec<Via>,
    pub length: f64,
    /// Strategy that produced the route, after any fallback.
    pub strategy: Strategy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// No path under the current obstacles and rules.
    Infeasible,
    /// Still in conflict when the iteration ceiling was reached.
    Congested,
    /// The search gave up at its node expansion budget in every round it
    /// was tried. A path may still exist.
    BudgetExhausted,
}

#[derive(Clone, Debug, Serialize)]
pub struct NetFailure {
    pub net: NetId,
    pub name: String,
    pub kind: FailureKind,
    pub reason: String,
    pub diagnostics: Option<RoutabilityReport>,
}

/// Negotiation state after one rip-up and reroute round.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RoundStats {
    pub round: usize,
    pub conflicts: usize,
    pub total_history: f64,
    pub penalty: f64,
    pub rerouted: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ViaAdjustment {
    pub net: NetId,
    pub name: String,
    pub round: usize,
    /// Via site that clashed with another net's via.
    pub original: Point<f64>,
    /// Nearest via of the net once it was rerouted away from the clash.
    pub relocated: Option<Point<f64>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PairReport {
    pub name: String,
    pub positive_length: f64,
    pub negative_length: f64,
    pub skew: f64,
    pub within_tolerance: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ZoneReport {
    pub zone: usize,
    pub net: String,
    pub layer: u8,
    pub cells: usize,
    pub area: f64,
}

/// Everything a routing session produced. Always returned, even when some
/// nets could not be routed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RoutingOutcome {
    pub routes: Vec<NetRoute>,
    pub failures: Vec<NetFailure>,
    pub rounds: Vec<RoundStats>,
    pub converged: bool,
    pub via_adjustments: Vec<ViaAdjustment>,
    pub pairs: Vec<PairReport>,
    pub zones: Vec<ZoneReport>,
}

impl RoutingOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn route(&self, net: NetId) -> Option<&NetRoute> {
        self.routes.iter().find(|r| r.net == net)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &NetFailure> + '_ {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Congested)
    }

    pub fn total_length(&self) -> f64 {
        self.routes.iter().map(|r| r.length).sum()
    }

    pub fn via_count(&self) -> usize {
        self.routes.iter().map(|r| r.vias.len()).sum()
    }
}
