use crate::db::core::{BoardDB, PadLayers};
use crate::db::indices::NetId;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rayon::prelude::*;
use serde::Serialize;

const BIN_SIZE: f64 = 5.0;

#[derive(Clone, Copy, Debug)]
enum Shape {
    /// Segment swept by a disc. Vias are zero-length capsules.
    Capsule {
        a: Point<f64>,
        b: Point<f64>,
        radius: f64,
    },
    Box(Rect),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CopperKind {
    Pad,
    Segment,
    Via,
    Zone,
}

#[derive(Clone, Copy, Debug)]
struct Copper {
    net: NetId,
    kind: CopperKind,
    layers: (u8, u8),
    shape: Shape,
}

impl Copper {
    fn bounds(&self) -> Rect {
        match self.shape {
            Shape::Capsule { a, b, radius } => Rect::new(
                Point::new(a.x.min(b.x), a.y.min(b.y)),
                Point::new(a.x.max(b.x), a.y.max(b.y)),
            )
            .expand(radius),
            Shape::Box(r) => r,
        }
    }

    fn shares_layer(&self, other: &Copper) -> bool {
        self.layers.0 <= other.layers.1 && other.layers.0 <= self.layers.1
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ClearanceViolation {
    pub net_a: String,
    pub net_b: String,
    pub kinds: (CopperKind, CopperKind),
    pub layer: u8,
    pub distance: f64,
    pub at: Point<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OpenNet {
    pub net: String,
    pub islands: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckReport {
    pub violations: Vec<ClearanceViolation>,
    pub opens: Vec<OpenNet>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.opens.is_empty()
    }
}

/// Clearance and connectivity check over all copper on the board.
///
/// A pair of different-net shapes sharing a layer is a violation when their
/// edge distance is below `clearance - tolerance`. Pad-to-pad pairs are input
/// geometry and are not checked.
pub fn run(db: &BoardDB, clearance: f64, tolerance: f64) -> CheckReport {
    log::info!("Starting copper verification (clearance {:.3})", clearance);
    let copper = collect_copper(db);

    let (violations, opens) = rayon::join(
        || check_clearance(db, &copper, clearance - tolerance),
        || check_opens(db, &copper, tolerance),
    );

    if violations.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: no clearance violations");
    } else {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} clearance violations",
            violations.len()
        );
    }
    if opens.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: all nets connected");
    } else {
        log::error!("\x1b[31mFAIL\x1b[0m: {} open nets", opens.len());
    }

    CheckReport { violations, opens }
}

fn collect_copper(db: &BoardDB) -> Vec<Copper> {
    let top = db.num_layers().saturating_sub(1) as u8;
    let mut out = Vec::new();

    for pad in &db.pads {
        let layers = match pad.layers {
            PadLayers::Single(l) => (l, l),
            PadLayers::Through => (0, top),
        };
        out.push(Copper {
            net: pad.net,
            kind: CopperKind::Pad,
            layers,
            shape: Shape::Box(pad.rect()),
        });
    }

    let routed_segments = db.nets.iter().flat_map(|n| n.segments.iter());
    for seg in db.fixed_segments.iter().chain(routed_segments) {
        out.push(Copper {
            net: seg.net,
            kind: CopperKind::Segment,
            layers: (seg.layer, seg.layer),
            shape: Shape::Capsule {
                a: seg.p1,
                b: seg.p2,
                radius: seg.width / 2.0,
            },
        });
    }

    let routed_vias = db.nets.iter().flat_map(|n| n.vias.iter());
    for via in db.fixed_vias.iter().chain(routed_vias) {
        out.push(Copper {
            net: via.net,
            kind: CopperKind::Via,
            layers: via.layers,
            shape: Shape::Capsule {
                a: via.position,
                b: via.position,
                radius: via.diameter / 2.0,
            },
        });
    }

    for zone in &db.zones {
        if let Some(fill) = &zone.fill {
            for run in &fill.runs {
                out.push(Copper {
                    net: zone.net,
                    kind: CopperKind::Zone,
                    layers: (zone.layer, zone.layer),
                    shape: Shape::Box(*run),
                });
            }
        }
    }
    out
}

fn check_clearance(db: &BoardDB, copper: &[Copper], min_gap: f64) -> Vec<ClearanceViolation> {
    let reach = min_gap.max(0.0);
    let mut entries: Vec<((i32, i32), usize)> = copper
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, c)| {
            let b = c.bounds().expand(reach / 2.0);
            let (bx0, by0) = bin_of(b.min);
            let (bx1, by1) = bin_of(b.max);
            (bx0..=bx1).flat_map(move |bx| (by0..=by1).map(move |by| ((bx, by), i)))
        })
        .collect();
    entries.par_sort_unstable();

    let mut chunks = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0 != entries[i - 1].0 {
            if start < i {
                chunks.push((start, i));
            }
            start = i;
        }
    }

    let mut hits: Vec<(usize, usize, f64)> = chunks
        .par_iter()
        .flat_map_iter(|&(s, e)| {
            let slice = &entries[s..e];
            let mut local = Vec::new();
            for x in 0..slice.len() {
                for y in (x + 1)..slice.len() {
                    let (i, j) = (slice[x].1.min(slice[y].1), slice[x].1.max(slice[y].1));
                    let (a, b) = (&copper[i], &copper[j]);
                    if a.net == b.net || !a.shares_layer(b) {
                        continue;
                    }
                    if a.kind == CopperKind::Pad && b.kind == CopperKind::Pad {
                        continue;
                    }
                    let d = shape_distance(&a.shape, &b.shape);
                    if d < min_gap {
                        local.push((i, j, d));
                    }
                }
            }
            local
        })
        .collect();

    hits.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    hits.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);

    hits.into_iter()
        .map(|(i, j, d)| {
            let (a, b) = (&copper[i], &copper[j]);
            ClearanceViolation {
                net_a: db.net_name(a.net).to_string(),
                net_b: db.net_name(b.net).to_string(),
                kinds: (a.kind, b.kind),
                layer: a.layers.0.max(b.layers.0),
                distance: d.max(0.0),
                at: a.bounds().center(),
            }
        })
        .collect()
}

fn check_opens(db: &BoardDB, copper: &[Copper], tolerance: f64) -> Vec<OpenNet> {
    let mut by_net: Vec<Vec<usize>> = vec![Vec::new(); db.num_nets()];
    for (i, c) in copper.iter().enumerate() {
        by_net[c.net.index()].push(i);
    }

    let mut opens: Vec<OpenNet> = by_net
        .par_iter()
        .enumerate()
        .filter_map(|(net_idx, items)| {
            let net = &db.nets[net_idx];
            if net.pads.len() < 2 {
                return None;
            }
            let n = items.len();
            let mut parent: Vec<usize> = (0..n).collect();
            for x in 0..n {
                for y in (x + 1)..n {
                    let (a, b) = (&copper[items[x]], &copper[items[y]]);
                    if a.shares_layer(b) && shape_distance(&a.shape, &b.shape) <= tolerance {
                        union(&mut parent, x, y);
                    }
                }
            }
            let mut roots: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(_, i)| copper[**i].kind == CopperKind::Pad)
                .map(|(x, _)| find(&mut parent, x))
                .collect();
            roots.sort_unstable();
            roots.dedup();
            (roots.len() > 1).then(|| OpenNet {
                net: net.name.clone(),
                islands: roots.len(),
            })
        })
        .collect();
    opens.sort_by(|a, b| a.net.cmp(&b.net));
    opens
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

fn bin_of(p: Point<f64>) -> (i32, i32) {
    (
        (p.x / BIN_SIZE).floor() as i32,
        (p.y / BIN_SIZE).floor() as i32,
    )
}

fn shape_distance(a: &Shape, b: &Shape) -> f64 {
    match (a, b) {
        (
            Shape::Capsule {
                a: a1,
                b: b1,
                radius: r1,
            },
            Shape::Capsule {
                a: a2,
                b: b2,
                radius: r2,
            },
        ) => segment_segment_dist(*a1, *b1, *a2, *b2) - r1 - r2,
        (Shape::Capsule { a, b, radius }, Shape::Box(r))
        | (Shape::Box(r), Shape::Capsule { a, b, radius }) => segment_rect_dist(*a, *b, r) - radius,
        (Shape::Box(r1), Shape::Box(r2)) => r1.gap(r2),
    }
}

fn orientation(p: Point<f64>, q: Point<f64>, r: Point<f64>) -> f64 {
    (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
}

fn segments_cross(a1: Point<f64>, b1: Point<f64>, a2: Point<f64>, b2: Point<f64>) -> bool {
    let o1 = orientation(a1, b1, a2);
    let o2 = orientation(a1, b1, b2);
    let o3 = orientation(a2, b2, a1);
    let o4 = orientation(a2, b2, b1);
    o1 * o2 < 0.0 && o3 * o4 < 0.0
}

fn segment_segment_dist(a1: Point<f64>, b1: Point<f64>, a2: Point<f64>, b2: Point<f64>) -> f64 {
    if segments_cross(a1, b1, a2, b2) {
        return 0.0;
    }
    point_to_segment_dist(a1, a2, b2)
        .min(point_to_segment_dist(b1, a2, b2))
        .min(point_to_segment_dist(a2, a1, b1))
        .min(point_to_segment_dist(b2, a1, b1))
}

fn segment_rect_dist(a: Point<f64>, b: Point<f64>, r: &Rect) -> f64 {
    if r.contains(a) || r.contains(b) {
        return 0.0;
    }
    let corners = [
        r.min,
        Point::new(r.max.x, r.min.y),
        r.max,
        Point::new(r.min.x, r.max.y),
    ];
    let mut best = r.distance_to(a).min(r.distance_to(b));
    for k in 0..4 {
        let (c1, c2) = (corners[k], corners[(k + 1) % 4]);
        best = best.min(segment_segment_dist(a, b, c1, c2));
    }
    best
}

pub fn point_to_segment_dist(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> f64 {
    let l2 = (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
    if l2 == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }

    let t = ((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / l2;
    let t = t.clamp(0.0, 1.0);

    let proj_x = a.x + t * (b.x - a.x);
    let proj_y = a.y + t * (b.y - a.y);

    ((p.x - proj_x).powi(2) + (p.y - proj_y).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::{Pad, Segment};

    fn board() -> BoardDB {
        let mut db = BoardDB::new("t", Rect::new(Point::new(0.0, 0.0), Point::new(20.0, 20.0)));
        db.add_layer("F.Cu");
        db
    }

    fn pad(db: &mut BoardDB, net: NetId, r: &str, x: f64, y: f64) {
        db.add_pad(Pad {
            net,
            ref_des: r.into(),
            pin: "1".into(),
            position: Point::new(x, y),
            width: 0.5,
            height: 0.5,
            layers: PadLayers::Single(0),
        });
    }

    fn seg(db: &mut BoardDB, net: NetId, a: (f64, f64), b: (f64, f64)) {
        db.nets[net.index()].segments.push(Segment {
            net,
            layer: 0,
            p1: Point::new(a.0, a.1),
            p2: Point::new(b.0, b.1),
            width: 0.2,
        });
    }

    #[test]
    fn parallel_traces_too_close_are_flagged() {
        let mut db = board();
        let a = db.add_net("A");
        let b = db.add_net("B");
        seg(&mut db, a, (1.0, 5.0), (9.0, 5.0));
        seg(&mut db, b, (1.0, 5.3), (9.0, 5.3));
        let report = run(&db, 0.2, 0.0);
        assert_eq!(report.violations.len(), 1);
        assert!((report.violations[0].distance - 0.1).abs() < 1e-9);

        let relaxed = run(&db, 0.09, 0.0);
        assert!(relaxed.violations.is_empty());
    }

    #[test]
    fn connected_net_has_no_opens() {
        let mut db = board();
        let a = db.add_net("A");
        pad(&mut db, a, "U1", 2.0, 2.0);
        pad(&mut db, a, "U2", 8.0, 2.0);
        seg(&mut db, a, (2.0, 2.0), (5.0, 2.0));
        seg(&mut db, a, (5.0, 2.0), (8.0, 2.0));
        assert!(run(&db, 0.2, 0.0).is_clean());
    }

    #[test]
    fn broken_net_reports_islands() {
        let mut db = board();
        let a = db.add_net("A");
        pad(&mut db, a, "U1", 2.0, 2.0);
        pad(&mut db, a, "U2", 8.0, 2.0);
        seg(&mut db, a, (2.0, 2.0), (4.0, 2.0));
        let report = run(&db, 0.2, 0.0);
        assert_eq!(report.opens.len(), 1);
        assert_eq!(report.opens[0].islands, 2);
    }

    #[test]
    fn crossing_segments_have_zero_distance() {
        let d = segment_segment_dist(
            Point::new(0.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 0.0),
        );
        assert_eq!(d, 0.0);
    }
}
