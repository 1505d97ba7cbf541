use super::point::Point;
use super::rect::Rect;
use serde::{Deserialize, Serialize};

/// Simple polygon, implicitly closed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point<f64>>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point<f64>>) -> Self {
        Self { vertices }
    }

    pub fn from_rect(r: &Rect) -> Self {
        Self::new(vec![
            r.min,
            Point::new(r.max.x, r.min.y),
            r.max,
            Point::new(r.min.x, r.max.y),
        ])
    }

    /// Shoelace area, always non-negative.
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            acc += a.x * b.y - b.x * a.y;
        }
        acc.abs() / 2.0
    }

    /// Fewer than three vertices or zero area.
    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3 || self.area() <= f64::EPSILON
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        let first = *self.vertices.first()?;
        let mut r = Rect::new(first, first);
        for v in &self.vertices[1..] {
            r.min.x = r.min.x.min(v.x);
            r.min.y = r.min.y.min(v.y);
            r.max.x = r.max.x.max(v.x);
            r.max.y = r.max.y.max(v.y);
        }
        Some(r)
    }

    /// Even-odd ray cast.
    pub fn contains(&self, p: Point<f64>) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            if (vi.y > p.y) != (vj.y > p.y) {
                let x_cross = vj.x + (p.y - vj.y) * (vi.x - vj.x) / (vi.y - vj.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l_shape() -> Polygon {
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 4.0),
            Point::new(0.0, 4.0),
        ])
    }

    #[test]
    fn area_of_l_shape() {
        assert!((l_shape().area() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn containment_respects_notch() {
        let p = l_shape();
        assert!(p.contains(Point::new(1.0, 1.0)));
        assert!(p.contains(Point::new(3.0, 1.0)));
        assert!(!p.contains(Point::new(3.0, 3.0)));
        assert!(!p.contains(Point::new(-1.0, 1.0)));
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let p = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
        ]);
        assert!(p.is_degenerate());
        assert!(Polygon::new(vec![Point::new(0.0, 0.0)]).is_degenerate());
    }
}
