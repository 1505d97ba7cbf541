use crate::db::core::{BoardDB, Pad, PadLayers};
use crate::db::parser::board;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Pin pitch used for generated IC footprints.
const IC_PITCH: f64 = 1.27;
const IC_PINS_PER_SIDE: usize = 4;

/// Builds a random benchmark board: a mix of two-pin passives and small
/// dual-row ICs scattered on a grid of component slots, with nets wired
/// between random pins. The same `seed` always yields the same board.
pub fn random_board(num_components: usize, num_nets: usize, layers: usize, seed: u64) -> BoardDB {
    let mut rng = StdRng::seed_from_u64(seed);

    let slots_per_side = ((num_components as f64).sqrt().ceil() as usize).max(1);
    let slot = 8.0;
    let side = slot * slots_per_side as f64 + slot;

    log::info!(
        "Generating benchmark board: {} components, {} nets, {}x{} mm, {} layers",
        num_components,
        num_nets,
        side,
        side,
        layers
    );

    let mut db = BoardDB::new(
        format!("random_{seed}"),
        Rect::new(Point::new(0.0, 0.0), Point::new(side, side)),
    );
    for l in 0..layers.max(1) {
        match l {
            0 => db.add_layer("F.Cu"),
            l if l + 1 == layers => db.add_layer("B.Cu"),
            l => db.add_layer(format!("In{l}.Cu")),
        };
    }
    let mut slots: Vec<usize> = (0..slots_per_side * slots_per_side).collect();
    slots.shuffle(&mut rng);

    let mut specs: Vec<(String, String, Point<f64>, f64)> = Vec::new();
    for (c, &s) in slots.iter().take(num_components).enumerate() {
        let cx = slot * (s % slots_per_side) as f64 + slot;
        let cy = slot * (s / slots_per_side) as f64 + slot;
        let is_ic = rng.gen_bool(0.3);
        let ref_des = if is_ic { format!("U{c}") } else { format!("R{c}") };

        let offsets: Vec<Point<f64>> = if is_ic {
            let row = IC_PITCH * (IC_PINS_PER_SIDE as f64 - 1.0) / 2.0;
            (0..IC_PINS_PER_SIDE * 2)
                .map(|i| {
                    let x = if i < IC_PINS_PER_SIDE { -2.5 } else { 2.5 };
                    let y = (i % IC_PINS_PER_SIDE) as f64 * IC_PITCH - row;
                    Point::new(x, y)
                })
                .collect()
        } else {
            vec![Point::new(-1.0, 0.0), Point::new(1.0, 0.0)]
        };

        let size = if is_ic { 0.6 } else { 1.0 };
        for (i, off) in offsets.into_iter().enumerate() {
            specs.push((ref_des.clone(), (i + 1).to_string(), Point::new(cx, cy) + off, size));
        }
    }

    let mut order: Vec<usize> = (0..specs.len()).collect();
    order.shuffle(&mut rng);
    let mut net_of = vec![None; specs.len()];
    let mut cursor = 0;
    for n in 0..num_nets {
        let fanout = rng.gen_range(2..=3);
        if cursor + fanout > order.len() {
            break;
        }
        for &p in &order[cursor..cursor + fanout] {
            net_of[p] = Some(format!("N{n}"));
        }
        cursor += fanout;
    }

    for (i, (ref_des, pin, position, size)) in specs.into_iter().enumerate() {
        // Unconnected pins get a single-pad net of their own.
        let name = net_of[i].take().unwrap_or_else(|| format!("NC_{ref_des}_{pin}"));
        let net = db.add_net(name);
        db.add_pad(Pad {
            net,
            ref_des,
            pin,
            position,
            width: size,
            height: size,
            layers: PadLayers::Single(0),
        });
    }

    db
}

pub fn generate_random_board(
    path: &Path,
    num_components: usize,
    num_nets: usize,
    layers: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let db = random_board(num_components, num_nets, layers, seed);
    board::write(&db, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_board() {
        let a = random_board(12, 8, 2, 7);
        let b = random_board(12, 8, 2, 7);
        assert_eq!(a.pads.len(), b.pads.len());
        for (p, q) in a.pads.iter().zip(&b.pads) {
            assert_eq!(p.position, q.position);
            assert_eq!(p.net, q.net);
        }
        assert!(a.validate().is_ok());
    }

    #[test]
    fn net_membership_matches_pads() {
        let db = random_board(20, 10, 2, 3);
        for (i, net) in db.nets.iter().enumerate() {
            for pad in &net.pads {
                assert_eq!(db.pads[pad.index()].net.index(), i);
            }
        }
    }
}
