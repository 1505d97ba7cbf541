use pcb_common::db::core::Keepout;
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::{CellBox, GridCoord};
use pcb_common::geom::point::Point;
use pcb_common::geom::polygon::Polygon;
use pcb_common::geom::rect::Rect;
use pcb_common::util::check;
use pcb_common::util::config::{Config, CostWeights, DesignRules};
use pcb_common::util::generator;
use pcb_router::algo::{AStar, ClearanceModel, CostModel, NoGuide, SearchMode, SearchRequest};
use pcb_router::grid::backend::Backend;
use pcb_router::grid::{DenseGrid, RoutingGrid};
use pcb_router::utils::conversion::GridConverter;
use proptest::prelude::*;

const SIDE: f64 = 15.0;
const RES: f64 = 0.5;

fn obstacle() -> impl Strategy<Value = Rect> {
    (0.0..SIDE, 0.0..SIDE, 0.2..5.0f64, 0.2..5.0f64)
        .prop_map(|(x, y, w, h)| Rect::new(Point::new(x, y), Point::new(x + w, y + h)))
}

fn cell() -> impl Strategy<Value = (u32, u32)> {
    let n = (SIDE / RES) as u32;
    (0..=n, 0..=n)
}

fn grid_with(obstacles: &[(Rect, Option<u8>)], layers: u8) -> DenseGrid {
    let conv = GridConverter::new(Rect::new(Point::new(0.0, 0.0), Point::new(SIDE, SIDE)), RES);
    let mut g = DenseGrid::new(conv, layers, Backend::Serial);
    for &(rect, layer) in obstacles {
        g.add_keepout(&Keepout {
            layer: layer.filter(|&z| z < layers),
            rect,
        });
    }
    g
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn both_search_modes_find_equal_cost(
        obstacles in prop::collection::vec((obstacle(), prop::option::of(0u8..2)), 0..6),
        layers in 1u8..=2,
        (sx, sy) in cell(),
        (ex, ey) in cell(),
        ez in 0u8..2,
    ) {
        let rules = DesignRules {
            trace_width: 0.1,
            clearance: 0.1,
            grid_resolution: RES,
            ..DesignRules::default()
        };
        let g = grid_with(&obstacles, layers);
        let cl = ClearanceModel::new(&rules, RES, None);
        let net = NetId(0);
        let start = GridCoord::new(sx, sy, 0);
        let end = GridCoord::new(ex, ey, ez % layers);
        prop_assume!(start != end);
        prop_assume!(!g.is_blocked(start, net, cl.nominal_halo()));
        prop_assume!(!g.is_blocked(end, net, cl.nominal_halo()));

        let costs = CostModel::new(&CostWeights::default());
        let starts = [start];
        let req = SearchRequest {
            net,
            starts: &starts,
            end,
            end_any_layer: false,
            costs: &costs,
            clearance: &cl,
            oracle: &NoGuide,
            guide_penalty: 0,
            allow_vias: layers > 1,
            forbidden_vias: &[],
            window: CellBox::new(0, g.width() - 1, 0, g.height() - 1),
            max_expansions: 1_000_000,
        };
        let mut astar = AStar::new();
        let uni = astar.find_path(&g, &req, SearchMode::Unidirectional);
        let bi = astar.find_path(&g, &req, SearchMode::Bidirectional);
        match (uni, bi) {
            (Ok(u), Ok(b)) => {
                prop_assert_eq!(u.cost, b.cost);
                for path in [&u.cells, &b.cells] {
                    prop_assert_eq!(path.first(), Some(&start));
                    prop_assert_eq!(path.last(), Some(&end));
                    for w in path.windows(2) {
                        let planar = w[0].z == w[1].z && w[0].chebyshev(&w[1]) == 1;
                        let via = w[0].z != w[1].z && w[0].chebyshev(&w[1]) == 0;
                        prop_assert!(planar || via, "broken step {:?} -> {:?}", w[0], w[1]);
                    }
                }
            }
            (Err(u), Err(b)) => prop_assert_eq!(u, b),
            (u, b) => prop_assert!(false, "modes disagree: {:?} vs {:?}", u, b),
        }
    }

    #[test]
    fn rectangle_polygon_contains_its_interior(
        r in obstacle(),
        (fx, fy) in (0.01..0.99f64, 0.01..0.99f64),
    ) {
        let poly = Polygon::from_rect(&r);
        let inside = Point::new(r.min.x + fx * r.width(), r.min.y + fy * r.height());
        prop_assert!(poly.contains(inside));
        prop_assert!(!poly.contains(Point::new(r.max.x + 1.0, inside.y)));
        prop_assert!(!poly.contains(Point::new(inside.x, r.min.y - 1.0)));
        prop_assert!((poly.area() - r.area()).abs() < 1e-9);
    }
}

proptest! {
    // Each case routes a whole board.
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn routed_copper_keeps_its_clearance(
        clearance in 0.1..0.3f64,
        seed in 0u64..1_000,
    ) {
        let mut db = generator::random_board(4, 3, 2, seed);
        let mut cfg = Config::default();
        cfg.design_rules.grid_resolution = 0.2;
        cfg.design_rules.trace_width = 0.15;
        cfg.design_rules.clearance = clearance;
        cfg.negotiation.max_iterations = 20;
        let outcome = pcb_router::route(&mut db, &cfg).expect("route");
        let report = check::run(&db, clearance, 1e-6);
        prop_assert!(
            report.violations.is_empty(),
            "{} routed, violations {:?}",
            outcome.routes.len(),
            report.violations
        );
    }
}
