use super::rect::Rect;
use rstar::{AABB, RTree};

/// Rectangle index over ids, backed by an R*-tree.
pub struct SpatialIndex {
    tree: RTree<IndexedRect>,
}

struct IndexedRect {
    rect: Rect,
    id: usize,
}

impl rstar::RTreeObject for IndexedRect {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.min.x, self.rect.min.y],
            [self.rect.max.x, self.rect.max.y],
        )
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn bulk_load(items: Vec<(Rect, usize)>) -> Self {
        let items = items
            .into_iter()
            .map(|(rect, id)| IndexedRect { rect, id })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, rect: Rect, id: usize) {
        self.tree.insert(IndexedRect { rect, id });
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids whose envelope intersects `rect`, boundary contact included.
    /// Sorted so callers see a stable order.
    pub fn query(&self, rect: Rect) -> Vec<usize> {
        let aabb = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        let mut ids: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&aabb)
            .map(|item| item.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::point::Point;

    #[test]
    fn query_returns_sorted_hits() {
        let mut idx = SpatialIndex::new();
        idx.insert(Rect::new(Point::new(5.0, 5.0), Point::new(6.0, 6.0)), 7);
        idx.insert(Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)), 3);
        idx.insert(Rect::new(Point::new(0.5, 0.5), Point::new(2.0, 2.0)), 1);
        let hits = idx.query(Rect::new(Point::new(0.0, 0.0), Point::new(1.5, 1.5)));
        assert_eq!(hits, vec![1, 3]);
    }
}
