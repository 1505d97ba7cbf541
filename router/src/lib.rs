pub mod algo;
pub mod analyzer;
pub mod batch;
pub mod error;
pub mod grid;
pub mod negotiated_router;
pub mod orchestrator;
pub mod outcome;
pub mod strategy;
pub mod utils;
pub mod zone_filler;

use analyzer::{RoutabilityAnalyzer, RoutabilityReport};
use error::RoutingError;
use grid::backend::Backend;
use grid::{DenseGrid, RoutingGrid};
use negotiated_router::NegotiatedRouter;
use orchestrator::RoutingOrchestrator;
use outcome::{NetFailure, PairReport, RoutingOutcome};
use pcb_common::db::core::BoardDB;
use pcb_common::db::indices::NetId;
use pcb_common::util::config::Config;
use pcb_common::util::profiler::ScopedTimer;
use zone_filler::ZoneFiller;

fn resolve_backend(config: &Config) -> Result<Backend, RoutingError> {
    if config.batch.enabled {
        Backend::resolve(config.batch.backend, config.batch.fallback)
    } else {
        Ok(Backend::Serial)
    }
}

/// Routes every net of `db`, writes the accepted copper and zone fills back
/// into it and reports what happened. Only malformed input or an
/// unavailable backend under a strict policy is an error.
pub fn route(db: &mut BoardDB, config: &Config) -> Result<RoutingOutcome, RoutingError> {
    config.validate()?;
    db.validate()?;
    db.clear_routes();
    let backend = resolve_backend(config)?;

    let mut grid = {
        let _t = ScopedTimer::new("Grid construction");
        DenseGrid::from_board(db, &config.design_rules, backend)
    };

    let plans = RoutingOrchestrator::new(db, config).plan();
    let negotiation = {
        let _t = ScopedTimer::new("Negotiated routing");
        NegotiatedRouter::new(db, config, &grid, &plans).run(&mut grid)
    };

    for r in &negotiation.routes {
        let net = &mut db.nets[r.net.index()];
        net.segments = r.segments.clone();
        net.vias = r.vias.clone();
        for seg in &r.segments {
            grid.add_segment(seg);
        }
        for via in &r.vias {
            grid.add_via(via);
        }
    }

    let mut outcome = RoutingOutcome {
        rounds: negotiation.rounds,
        converged: negotiation.converged,
        via_adjustments: negotiation.via_adjustments,
        routes: negotiation.routes,
        ..RoutingOutcome::default()
    };

    outcome.pairs = db
        .pairs
        .iter()
        .filter_map(|p| {
            let pos = outcome.route(p.positive)?.length;
            let neg = outcome.route(p.negative)?.length;
            let skew = (pos - neg).abs();
            let within = skew <= config.orchestrator.pair_skew_tolerance;
            if !within {
                log::warn!("Pair {} skew {:.3} exceeds tolerance", p.name, skew);
            }
            Some(PairReport {
                name: p.name.clone(),
                positive_length: pos,
                negative_length: neg,
                skew,
                within_tolerance: within,
            })
        })
        .collect();

    if !negotiation.failures.is_empty() {
        let _t = ScopedTimer::new("Routability analysis");
        let analyzer = RoutabilityAnalyzer::new(db, config, &grid);
        outcome.failures = negotiation
            .failures
            .into_iter()
            .map(|(net, name, kind, reason)| {
                log::warn!("{} unrouted ({:?}): {}", name, kind, reason);
                NetFailure {
                    net,
                    name,
                    kind,
                    reason,
                    diagnostics: Some(analyzer.analyze(net)),
                }
            })
            .collect();
    }

    outcome.zones = {
        let _t = ScopedTimer::new("Zone fill");
        ZoneFiller::new(&config.zones).fill_all(db, &mut grid)?
    };

    log::info!(
        "Routed {}/{} nets, length {:.3}, {} vias, {} rounds{}",
        outcome.routes.len(),
        outcome.routes.len() + outcome.failures.len(),
        outcome.total_length(),
        outcome.via_count(),
        outcome.rounds.len(),
        if outcome.converged { "" } else { " (not converged)" }
    );
    Ok(outcome)
}

/// Routability reports for `nets` against the board's fixed obstacles and
/// whatever copper `db` already holds. Every multi-pad net when `nets` is
/// empty.
pub fn diagnose(
    db: &BoardDB,
    config: &Config,
    nets: &[NetId],
) -> Result<Vec<RoutabilityReport>, RoutingError> {
    config.validate()?;
    db.validate()?;
    let mut grid = DenseGrid::from_board(db, &config.design_rules, resolve_backend(config)?);
    for net in &db.nets {
        for seg in &net.segments {
            grid.add_segment(seg);
        }
        for via in &net.vias {
            grid.add_via(via);
        }
    }
    let targets: Vec<NetId> = if nets.is_empty() {
        (0..db.num_nets())
            .map(NetId::new)
            .filter(|n| db.nets[n.index()].pads.len() >= 2)
            .collect()
    } else {
        nets.to_vec()
    };
    let analyzer = RoutabilityAnalyzer::new(db, config, &grid);
    Ok(targets.into_iter().map(|n| analyzer.analyze(n)).collect())
}
