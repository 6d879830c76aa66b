//! Resolution context and cycle detection.
//!
//! Every construction runs inside a task-local [`Frame`] naming the holder
//! being built and its parent frame. Lookups made while constructing can
//! therefore tell that they are asking for something already on their own
//! chain. Waits that cross tasks are tracked in a [`WaitGraph`] so that two
//! constructions blocked on each other fail instead of hanging.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DiError, DiResult};

pub(crate) const MAX_DEPTH: usize = 1024;

tokio::task_local! {
    static CURRENT: Frame;
}

struct FrameNode {
    holder_id: u64,
    name: String,
    depth: usize,
    parent: Option<Frame>,
}

/// One link of the in-progress construction chain.
#[derive(Clone)]
pub(crate) struct Frame(Arc<FrameNode>);

impl Frame {
    /// The frame of the construction currently running on this task, if any.
    pub(crate) fn current() -> Option<Frame> {
        CURRENT.try_with(|frame| frame.clone()).ok()
    }

    /// Pushes a construction of `holder_id` under the current frame.
    pub(crate) fn child_of_current(holder_id: u64, name: &str) -> DiResult<Frame> {
        let parent = Frame::current();
        let depth = parent.as_ref().map_or(0, |p| p.0.depth + 1);
        if depth >= MAX_DEPTH {
            return Err(DiError::DepthExceeded(depth));
        }
        Ok(Frame(Arc::new(FrameNode {
            holder_id,
            name: name.to_string(),
            depth,
            parent,
        })))
    }

    /// Polls `fut` with this frame installed as the current one.
    pub(crate) async fn enter<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    fn iter(&self) -> impl Iterator<Item = &FrameNode> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let frame = next?;
            next = frame.0.parent.as_ref();
            Some(&*frame.0)
        })
    }

    pub(crate) fn contains_holder(&self, holder_id: u64) -> bool {
        self.iter().any(|node| node.holder_id == holder_id)
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.iter().any(|node| node.name == name)
    }

    pub(crate) fn holder_ids(&self) -> Vec<u64> {
        self.iter().map(|node| node.holder_id).collect()
    }

    /// Chain from the outermost construction down to this one, then `next`.
    pub(crate) fn path_to(&self, next: &str) -> Vec<String> {
        let mut path: Vec<String> = self.iter().map(|node| node.name.clone()).collect();
        path.reverse();
        path.push(next.to_string());
        path
    }
}

/// Who is waiting for whom, keyed by holder id.
///
/// Edge counts allow the same pair to be registered by several concurrent waits.
#[derive(Default)]
pub(crate) struct WaitGraph {
    edges: Mutex<HashMap<u64, HashMap<u64, usize>>>,
}

impl WaitGraph {
    /// Records that every holder in `waiters` now waits on `target`.
    ///
    /// Fails when `target` already (transitively) waits on one of `waiters`.
    pub(crate) fn begin_wait(self: &Arc<Self>, waiters: Vec<u64>, target: u64) -> Option<WaitGuard> {
        let mut edges = self.edges.lock();
        if waiters.contains(&target) || Self::reaches(&edges, target, &waiters) {
            return None;
        }
        for &waiter in &waiters {
            *edges.entry(waiter).or_default().entry(target).or_insert(0) += 1;
        }
        Some(WaitGuard {
            graph: self.clone(),
            waiters,
            target,
        })
    }

    fn reaches(edges: &HashMap<u64, HashMap<u64, usize>>, from: u64, goals: &[u64]) -> bool {
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = edges.get(&node) {
                for &target in next.keys() {
                    if goals.contains(&target) {
                        return true;
                    }
                    stack.push(target);
                }
            }
        }
        false
    }

    fn release(&self, waiters: &[u64], target: u64) {
        let mut edges = self.edges.lock();
        for waiter in waiters {
            if let Some(targets) = edges.get_mut(waiter) {
                if let Some(count) = targets.get_mut(&target) {
                    *count -= 1;
                    if *count == 0 {
                        targets.remove(&target);
                    }
                }
                if targets.is_empty() {
                    edges.remove(waiter);
                }
            }
        }
    }

    #[cfg(test)]
    fn edge_count(&self) -> usize {
        self.edges.lock().values().map(|t| t.len()).sum()
    }
}

/// Removes its edges from the wait graph when dropped.
pub(crate) struct WaitGuard {
    graph: Arc<WaitGraph>,
    waiters: Vec<u64>,
    target: u64,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.graph.release(&self.waiters, self.target);
    }
}
