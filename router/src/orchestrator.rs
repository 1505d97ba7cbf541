//! Per-net strategy selection and routing order.

use pcb_common::db::core::{BoardDB, PadLayers};
use pcb_common::db::indices::NetId;
use pcb_common::geom::rect::Rect;
use pcb_common::geom::rtree::SpatialIndex;
use pcb_common::util::config::Config;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Strategy {
    GlobalWithRepair,
    EscapeThenGlobal,
    Hierarchical,
    SubgridAdaptive,
    ViaConflictResolution,
    FullPipeline,
}

impl Strategy {
    /// Next simpler strategy to try when this one cannot route the net.
    pub fn fallback(self) -> Option<Strategy> {
        match self {
            Strategy::FullPipeline => Some(Strategy::EscapeThenGlobal),
            Strategy::EscapeThenGlobal
            | Strategy::SubgridAdaptive
            | Strategy::Hierarchical
            | Strategy::ViaConflictResolution => Some(Strategy::GlobalWithRepair),
            Strategy::GlobalWithRepair => None,
        }
    }

    pub fn escapes(self) -> bool {
        matches!(self, Strategy::EscapeThenGlobal | Strategy::FullPipeline)
    }

    pub fn refines(self) -> bool {
        matches!(self, Strategy::SubgridAdaptive | Strategy::FullPipeline)
    }

    pub fn resolves_vias(self) -> bool {
        matches!(
            self,
            Strategy::ViaConflictResolution | Strategy::FullPipeline
        )
    }

    pub fn couples(self) -> bool {
        self == Strategy::Hierarchical
    }
}

/// The characteristics strategy selection looks at.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NetProfile {
    pub net: NetId,
    pub pins: usize,
    /// Smallest pin pitch among the net's terminals.
    pub min_pitch: Option<f64>,
    /// Most pads of any net found around one of this net's pads.
    pub density: usize,
    pub paired: bool,
    /// Terminals sit on different layers with no through-hole among them.
    pub needs_via: bool,
    /// Half perimeter of the terminal bounding box.
    pub hpwl: f64,
}

/// Pure strategy choice for one net.
pub fn select_strategy(p: &NetProfile, pitch_threshold: f64, density_threshold: usize) -> Strategy {
    let fine = p.min_pitch.is_some_and(|pitch| pitch < pitch_threshold);
    let dense = p.density >= density_threshold;
    match (p.paired, fine, dense) {
        (true, _, _) => Strategy::Hierarchical,
        (false, true, true) => Strategy::FullPipeline,
        (false, true, false) => Strategy::EscapeThenGlobal,
        (false, false, true) => Strategy::SubgridAdaptive,
        (false, false, false) if p.needs_via => Strategy::ViaConflictResolution,
        _ => Strategy::GlobalWithRepair,
    }
}

/// Coupled-pair membership of a planned net.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum Coupling {
    /// Routed first; its path guides the partner.
    Leader { partner: NetId },
    Follower { partner: NetId, gap: f64 },
}

#[derive(Clone, Debug, Serialize)]
pub struct NetPlan {
    pub profile: NetProfile,
    pub strategy: Strategy,
    pub coupling: Option<Coupling>,
}

pub struct RoutingOrchestrator<'a> {
    db: &'a BoardDB,
    config: &'a Config,
    pads: SpatialIndex,
}

impl<'a> RoutingOrchestrator<'a> {
    pub fn new(db: &'a BoardDB, config: &'a Config) -> Self {
        let pads = SpatialIndex::bulk_load(
            db.pads
                .iter()
                .enumerate()
                .map(|(i, p)| (p.rect(), i))
                .collect(),
        );
        Self { db, config, pads }
    }

    pub fn profile(&self, net: NetId) -> NetProfile {
        let db = self.db;
        let data = &db.nets[net.index()];
        let radius = self.config.orchestrator.density_radius;

        let density = db
            .net_pads(net)
            .map(|p| {
                let window = Rect::from_center(p.position, 2.0 * radius, 2.0 * radius);
                self.pads
                    .query(window)
                    .into_iter()
                    .filter(|&i| db.pads[i].position.distance(&p.position) <= radius)
                    .count()
            })
            .max()
            .unwrap_or(0);

        let through = db.net_pads(net).any(|p| p.layers == PadLayers::Through);
        let mut layers: Vec<u8> = db.net_pads(net).map(|p| p.entry_layer()).collect();
        layers.sort_unstable();
        layers.dedup();

        let hpwl = db
            .net_pads(net)
            .map(|p| Rect::from_center(p.position, 0.0, 0.0))
            .reduce(|a, b| a.union(&b))
            .map_or(0.0, |r| r.width() + r.height());

        NetProfile {
            net,
            pins: data.pads.len(),
            min_pitch: db.net_min_pitch(net),
            density,
            paired: self.coupling(net).is_some(),
            needs_via: !through && layers.len() > 1,
            hpwl,
        }
    }

    /// Every net with at least two terminals, in routing order: coupled
    /// pairs first (leader before follower), then nets that need a special
    /// strategy, then the rest by increasing size.
    pub fn plan(&self) -> Vec<NetPlan> {
        let rules = &self.config.design_rules;
        let thresholds = (
            rules.neck_down.pitch_threshold,
            self.config.orchestrator.density_threshold,
        );
        let mut plans: Vec<NetPlan> = (0..self.db.num_nets())
            .map(NetId::new)
            .filter(|&n| self.db.nets[n.index()].pads.len() >= 2)
            .map(|net| {
                let profile = self.profile(net);
                let strategy = select_strategy(&profile, thresholds.0, thresholds.1);
                NetPlan {
                    coupling: self.coupling(net),
                    profile,
                    strategy,
                }
            })
            .collect();

        plans.sort_by(|a, b| plan_order(self.db, a, b));
        for p in &plans {
            log::debug!(
                "Plan {}: {:?} ({} pins, density {}, pitch {:?})",
                self.db.net_name(p.profile.net),
                p.strategy,
                p.profile.pins,
                p.profile.density,
                p.profile.min_pitch
            );
        }
        plans
    }

    fn coupling(&self, net: NetId) -> Option<Coupling> {
        let pair = &self.db.pairs[self.db.nets[net.index()].pair?.index()];
        if self.db.nets[pair.positive.index()].pads.len() < 2
            || self.db.nets[pair.negative.index()].pads.len() < 2
        {
            return None;
        }
        if net == pair.positive {
            Some(Coupling::Leader {
                partner: pair.negative,
            })
        } else {
            Some(Coupling::Follower {
                partner: pair.positive,
                gap: pair.gap,
            })
        }
    }
}

fn plan_order(db: &BoardDB, a: &NetPlan, b: &NetPlan) -> Ordering {
    let pair_key = |p: &NetPlan| {
        db.nets[p.profile.net.index()]
            .pair
            .filter(|_| p.coupling.is_some())
            .map(|id| (id.index(), matches!(p.coupling, Some(Coupling::Follower { .. }))))
    };
    match (pair_key(a), pair_key(b)) {
        (Some(x), Some(y)) => return x.cmp(&y),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => {}
    }
    let plain = |p: &NetPlan| p.strategy == Strategy::GlobalWithRepair;
    plain(a)
        .cmp(&plain(b))
        .then_with(|| a.profile.hpwl.total_cmp(&b.profile.hpwl))
        .then_with(|| a.profile.net.cmp(&b.profile.net))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn profile() -> NetProfile {
        NetProfile {
            net: NetId(0),
            pins: 2,
            min_pitch: None,
            density: 0,
            paired: false,
            needs_via: false,
            hpwl: 1.0,
        }
    }

    #[rstest]
    #[case(false, Some(0.5), 20, false, Strategy::FullPipeline)]
    #[case(false, Some(0.5), 2, false, Strategy::EscapeThenGlobal)]
    #[case(false, Some(1.27), 20, false, Strategy::SubgridAdaptive)]
    #[case(true, Some(0.5), 20, true, Strategy::Hierarchical)]
    #[case(false, None, 0, true, Strategy::ViaConflictResolution)]
    #[case(false, None, 0, false, Strategy::GlobalWithRepair)]
    fn selection_is_a_function_of_the_profile(
        #[case] paired: bool,
        #[case] min_pitch: Option<f64>,
        #[case] density: usize,
        #[case] needs_via: bool,
        #[case] expected: Strategy,
    ) {
        let p = NetProfile {
            paired,
            min_pitch,
            density,
            needs_via,
            ..profile()
        };
        assert_eq!(select_strategy(&p, 0.65, 8), expected);
        assert_eq!(select_strategy(&p, 0.65, 8), expected);
    }

    #[test]
    fn fallback_chain_ends_at_global() {
        let mut s = Strategy::FullPipeline;
        let mut chain = vec![s];
        while let Some(next) = s.fallback() {
            chain.push(next);
            s = next;
        }
        assert_eq!(
            chain,
            vec![
                Strategy::FullPipeline,
                Strategy::EscapeThenGlobal,
                Strategy::GlobalWithRepair
            ]
        );
        assert_eq!(Strategy::Hierarchical.fallback(), Some(Strategy::GlobalWithRepair));
    }
}
