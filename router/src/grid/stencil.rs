/// Offsets of every cell whose centre lies strictly inside a disc of
/// `radius` cells, origin excluded, nearest first.
pub fn disc(radius: f64) -> Vec<(i32, i32)> {
    let r = radius.max(0.0);
    let reach = r.ceil() as i32;
    let r2 = r * r;
    let mut out = Vec::with_capacity(((2 * reach + 1) * (2 * reach + 1)) as usize);
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            if (dx, dy) == (0, 0) {
                continue;
            }
            if ((dx * dx + dy * dy) as f64) < r2 {
                out.push((dx, dy));
            }
        }
    }
    out.sort_by_key(|&(dx, dy)| (dx * dx + dy * dy, dy, dx));
    out
}

/// Halo radius, in cells, that keeps copper of the given edge extent clear
/// of any conservatively rasterised obstacle. The `SQRT_2` term covers both
/// cell-square rasterisation and points between two grid nodes of a step.
pub fn halo_radius(extent: f64, resolution: f64) -> f64 {
    extent / resolution + std::f64::consts::SQRT_2
}

/// Chebyshev radius of the square a copper feature of `span` (width plus
/// clearance) claims, so that two overlapping claims are the only way two
/// features can come closer than their combined clearance.
pub fn claim_radius(span: f64, resolution: f64) -> u32 {
    let k = ((span / resolution + std::f64::consts::SQRT_2 - 1.0) / 2.0).ceil();
    k.max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_excludes_boundary_and_origin() {
        let d = disc(2.0);
        assert!(!d.contains(&(0, 0)));
        assert!(d.contains(&(1, 1)));
        assert!(!d.contains(&(2, 0)));
        assert_eq!(d.len(), 8);
        assert_eq!(d[0..4].iter().filter(|(x, y)| x * x + y * y == 1).count(), 4);
    }

    #[test]
    fn claim_radius_grows_with_span() {
        assert_eq!(claim_radius(0.45, 0.1), 3);
        assert_eq!(claim_radius(0.3, 0.1), 2);
        assert_eq!(claim_radius(0.45, 0.5), 1);
    }
}
