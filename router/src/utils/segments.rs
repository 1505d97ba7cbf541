use crate::algo::ClearanceModel;
use crate::utils::conversion::GridConverter;
use pcb_common::db::core::{Pad, Segment, Via};
use pcb_common::db::indices::NetId;
use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::util::config::DesignRules;

const WIDTH_EPS: f64 = 1e-9;

/// Turns a grid path into board copper: one segment per straight run of
/// equal width, and a through via wherever the path changes layer.
pub fn path_to_copper(
    path: &[GridCoord],
    net: NetId,
    conv: &GridConverter,
    rules: &DesignRules,
    clearance: &ClearanceModel,
    layers: u8,
) -> (Vec<Segment>, Vec<Via>) {
    let mut segments: Vec<Segment> = Vec::new();
    let mut vias: Vec<Via> = Vec::new();
    let mut run_dir: Option<(i64, i64)> = None;

    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let (pa, pb) = (conv.to_world(a), conv.to_world(b));
        if a.z != b.z {
            if vias.last().is_none_or(|v| v.position != pa) {
                vias.push(Via {
                    net,
                    position: pa,
                    drill: rules.via_drill,
                    diameter: rules.via_diameter,
                    layers: (0, layers.saturating_sub(1)),
                });
            }
            run_dir = None;
            continue;
        }

        // The narrower end governs, which is the end nearer a pad.
        let width = clearance
            .width_at(pa, rules.trace_width)
            .min(clearance.width_at(pb, rules.trace_width));
        let dir = (b.x as i64 - a.x as i64, b.y as i64 - a.y as i64);
        if let Some(last) = segments.last_mut() {
            if run_dir == Some(dir)
                && last.layer == a.z
                && last.p2 == pa
                && (last.width - width).abs() < WIDTH_EPS
            {
                last.p2 = pb;
                continue;
            }
        }
        segments.push(Segment {
            net,
            layer: a.z,
            p1: pa,
            p2: pb,
            width,
        });
        run_dir = Some(dir);
    }
    (segments, vias)
}

/// Short segment joining a pad centre to the grid cell its route lands on.
pub fn pad_stub(pad: &Pad, cell: Point<f64>, layer: u8, width: f64) -> Option<Segment> {
    (pad.position.distance(&cell) > WIDTH_EPS).then(|| Segment {
        net: pad.net,
        layer,
        p1: pad.position,
        p2: cell,
        width,
    })
}

/// Board length of a routed path, vias excluded.
pub fn path_length(path: &[GridCoord], resolution: f64) -> f64 {
    path.windows(2)
        .filter(|w| w[0].z == w[1].z)
        .map(|w| w[0].planar_distance(&w[1]) * resolution)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcb_common::geom::rect::Rect;

    fn conv() -> GridConverter {
        GridConverter::new(Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)), 0.5)
    }

    #[test]
    fn collinear_steps_merge() {
        let rules = DesignRules::default();
        let cl = ClearanceModel::new(&rules, 0.5, None);
        let path: Vec<GridCoord> = (0..=6)
            .map(|x| GridCoord::new(x, 2, 0))
            .chain((3..=5).map(|y| GridCoord::new(6, y, 0)))
            .collect();
        let (segs, vias) = path_to_copper(&path, NetId(0), &conv(), &rules, &cl, 2);
        assert!(vias.is_empty());
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].p1, Point::new(0.0, 1.0));
        assert_eq!(segs[0].p2, Point::new(3.0, 1.0));
        assert_eq!(segs[1].p2, Point::new(3.0, 2.5));
        assert!((path_length(&path, 0.5) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn layer_change_emits_through_via() {
        let rules = DesignRules::default();
        let cl = ClearanceModel::new(&rules, 0.5, None);
        let path = vec![
            GridCoord::new(1, 1, 0),
            GridCoord::new(2, 1, 0),
            GridCoord::new(2, 1, 3),
            GridCoord::new(3, 1, 3),
        ];
        let (segs, vias) = path_to_copper(&path, NetId(4), &conv(), &rules, &cl, 4);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[1].layer, 3);
        assert_eq!(vias.len(), 1);
        assert_eq!(vias[0].layers, (0, 3));
        assert_eq!(vias[0].position, Point::new(1.0, 0.5));
    }
}
