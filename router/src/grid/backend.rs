//! Array backends for the per-cell cost pass.
//!
//! Only the cost-cache refresh and the history accumulation run on a
//! backend. Batching and the negotiation loop stay on the host.

use super::dense::GridNode;
use crate::error::RoutingError;
use pcb_common::util::config::{BackendKind, FallbackPolicy};
use rayon::prelude::*;

const CHUNK: usize = 1 << 14;

mod sealed {
    pub trait Sealed {}
}

/// Per-cell cost evaluation. Sealed: the set of kernels is closed and
/// dispatched through [`Backend`].
pub trait CostKernel: sealed::Sealed {
    fn refresh(&self, nodes: &mut [GridNode], penalty: f32);
    /// Grows history on congested cells and returns how many there were.
    fn accumulate_history(&self, nodes: &mut [GridNode], increment: f32, cap: f32) -> usize;
}

pub struct SerialKernel;
pub struct RayonKernel;

impl sealed::Sealed for SerialKernel {}
impl sealed::Sealed for RayonKernel {}

#[inline(always)]
fn grow(node: &mut GridNode, increment: f32, cap: f32) -> bool {
    if node.present > 1 {
        let overflow = (node.present - 1) as f32;
        node.history = (node.history + increment * overflow).min(cap).max(node.history);
        true
    } else {
        false
    }
}

impl CostKernel for SerialKernel {
    fn refresh(&self, nodes: &mut [GridNode], penalty: f32) {
        for n in nodes {
            n.refresh(penalty);
        }
    }

    fn accumulate_history(&self, nodes: &mut [GridNode], increment: f32, cap: f32) -> usize {
        nodes
            .iter_mut()
            .map(|n| grow(n, increment, cap))
            .filter(|&grew| grew)
            .count()
    }
}

impl CostKernel for RayonKernel {
    fn refresh(&self, nodes: &mut [GridNode], penalty: f32) {
        nodes.par_chunks_mut(CHUNK).for_each(|chunk| {
            for n in chunk {
                n.refresh(penalty);
            }
        });
    }

    fn accumulate_history(&self, nodes: &mut [GridNode], increment: f32, cap: f32) -> usize {
        nodes
            .par_chunks_mut(CHUNK)
            .map(|chunk| {
                chunk
                    .iter_mut()
                    .map(|n| grow(n, increment, cap))
                    .filter(|&grew| grew)
                    .count()
            })
            .sum()
    }
}

/// Backend actually compiled into this build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    Serial,
    Rayon,
}

impl Backend {
    /// Maps a requested backend onto an available one. Accelerator backends
    /// are not built in; the policy decides between CPU and an error.
    pub fn resolve(kind: BackendKind, policy: FallbackPolicy) -> Result<Backend, RoutingError> {
        match kind {
            BackendKind::Cpu => Ok(Backend::Serial),
            BackendKind::Parallel => Ok(Backend::Rayon),
            BackendKind::Cuda | BackendKind::Metal => match policy {
                FallbackPolicy::FallbackToCpu => {
                    log::warn!("{} backend unavailable, falling back to parallel CPU", kind);
                    Ok(Backend::Rayon)
                }
                FallbackPolicy::Strict => Err(RoutingError::BackendUnavailable(kind)),
            },
        }
    }

    pub fn refresh(&self, nodes: &mut [GridNode], penalty: f32) {
        match self {
            Backend::Serial => SerialKernel.refresh(nodes, penalty),
            Backend::Rayon => RayonKernel.refresh(nodes, penalty),
        }
    }

    pub fn accumulate_history(&self, nodes: &mut [GridNode], increment: f32, cap: f32) -> usize {
        match self {
            Backend::Serial => SerialKernel.accumulate_history(nodes, increment, cap),
            Backend::Rayon => RayonKernel.accumulate_history(nodes, increment, cap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerators_follow_policy() {
        assert_eq!(
            Backend::resolve(BackendKind::Cuda, FallbackPolicy::FallbackToCpu).unwrap(),
            Backend::Rayon
        );
        assert!(matches!(
            Backend::resolve(BackendKind::Metal, FallbackPolicy::Strict),
            Err(RoutingError::BackendUnavailable(BackendKind::Metal))
        ));
        assert_eq!(
            Backend::resolve(BackendKind::Cpu, FallbackPolicy::Strict).unwrap(),
            Backend::Serial
        );
    }

    #[test]
    fn kernels_agree() {
        let mut a = vec![GridNode::default(); 40_000];
        for (i, n) in a.iter_mut().enumerate() {
            n.present = (i % 4) as u16;
        }
        let mut b = a.clone();
        let ca = Backend::Serial.accumulate_history(&mut a, 0.5, 10.0);
        let cb = Backend::Rayon.accumulate_history(&mut b, 0.5, 10.0);
        assert_eq!(ca, cb);
        assert_eq!(ca, 20_000);
        assert_eq!(a[3].history, 1.0);
        assert_eq!(b[2].history, 0.5);
        assert_eq!(a[1].history, 0.0);
        Backend::Serial.refresh(&mut a, 2.0);
        Backend::Rayon.refresh(&mut b, 2.0);
        assert!(a.iter().zip(&b).all(|(x, y)| x.cost == y.cost));
    }
}
