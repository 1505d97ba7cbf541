//! Groups nets whose search regions cannot touch the same cells so each
//! group can be pathfound in parallel against one grid snapshot.

use pcb_common::geom::coord::CellBox;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::geom::rtree::SpatialIndex;

#[derive(Clone, Copy, Debug)]
pub struct BatchItem {
    pub id: usize,
    /// Every cell the net may read or claim while routing.
    pub reach: CellBox,
    /// Item that has to finish in an earlier batch.
    pub after: Option<usize>,
}

struct Batch {
    index: SpatialIndex,
    ids: Vec<usize>,
}

pub struct BatchScheduler {
    max_batch_size: usize,
}

fn to_rect(b: &CellBox) -> Rect {
    Rect::new(
        Point::new(b.min_x as f64, b.min_y as f64),
        Point::new(b.max_x as f64, b.max_y as f64),
    )
}

impl BatchScheduler {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Greedy colouring in item order. An item lands in the first batch that
    /// has room and comes after every batch holding an earlier item it
    /// overlaps, so running the batches in order sees the same grid state a
    /// one-net-at-a-time pass would.
    pub fn schedule(&self, items: &[BatchItem]) -> Vec<Vec<usize>> {
        let mut batches: Vec<Batch> = Vec::new();
        let mut placed: Vec<(usize, usize)> = Vec::with_capacity(items.len());

        for item in items {
            let rect = to_rect(&item.reach);
            let mut lowest = batches
                .iter()
                .rposition(|b| !b.index.query(rect).is_empty())
                .map_or(0, |b| b + 1);
            if let Some(dep) = item.after {
                if let Some(&(_, b)) = placed.iter().find(|(id, _)| *id == dep) {
                    lowest = lowest.max(b + 1);
                }
            }
            let slot = (lowest..batches.len())
                .find(|&b| batches[b].ids.len() < self.max_batch_size)
                .unwrap_or_else(|| {
                    batches.push(Batch {
                        index: SpatialIndex::new(),
                        ids: Vec::new(),
                    });
                    batches.len() - 1
                });
            let batch = &mut batches[slot];
            batch.index.insert(rect, batch.ids.len());
            batch.ids.push(item.id);
            placed.push((item.id, slot));
        }

        log::debug!(
            "Scheduled {} nets into {} batches",
            items.len(),
            batches.len()
        );
        batches.into_iter().map(|b| b.ids).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: usize, x0: u32, x1: u32) -> BatchItem {
        BatchItem {
            id,
            reach: CellBox::new(x0, x1, 0, 10),
            after: None,
        }
    }

    #[test]
    fn disjoint_regions_share_a_batch() {
        let s = BatchScheduler::new(8);
        let batches = s.schedule(&[item(0, 0, 10), item(1, 20, 30), item(2, 40, 50)]);
        assert_eq!(batches, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn overlapping_regions_keep_their_order() {
        let s = BatchScheduler::new(8);
        // 2 overlaps 1 only, and must not jump ahead of it.
        let batches = s.schedule(&[item(0, 0, 10), item(1, 5, 15), item(2, 14, 20)]);
        assert_eq!(batches, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn batches_respect_capacity_and_dependencies() {
        let s = BatchScheduler::new(2);
        let mut items = vec![item(0, 0, 1), item(1, 10, 11), item(2, 20, 21), item(3, 30, 31)];
        items[3].after = Some(1);
        let batches = s.schedule(&items);
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3]]);
        for batch in &batches {
            for (i, &a) in batch.iter().enumerate() {
                for &b in &batch[i + 1..] {
                    assert!(!items[a].reach.intersects(&items[b].reach));
                }
            }
        }
    }
}
