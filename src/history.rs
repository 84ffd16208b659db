use log::debug;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::model::Snapshot;

/// Receives a full snapshot after every mutation of the group tree.
pub trait CheckpointSink {
    fn checkpoint(&mut self, snapshot: Snapshot);
}

/// Lets a host keep a handle on its sink while the manager owns a clone.
impl<T: CheckpointSink + ?Sized> CheckpointSink for Rc<RefCell<T>> {
    fn checkpoint(&mut self, snapshot: Snapshot) {
        self.borrow_mut().checkpoint(snapshot);
    }
}

impl CheckpointSink for Vec<Box<dyn CheckpointSink>> {
    fn checkpoint(&mut self, snapshot: Snapshot) {
        for sink in self.iter_mut() {
            sink.checkpoint(snapshot.clone());
        }
    }
}

pub struct NullSink;

impl CheckpointSink for NullSink {
    fn checkpoint(&mut self, _snapshot: Snapshot) {}
}

/// Bounded undo/redo stack.
///
/// The back of `undo` is always the current state; it starts with the empty
/// tree so the first checkpoint can be undone.
pub struct History {
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    depth: usize,
}

impl History {
    pub fn new(depth: usize) -> Self {
        Self::with_base(depth, Snapshot::default())
    }

    pub fn with_base(depth: usize, base: Snapshot) -> Self {
        Self {
            undo: VecDeque::from([base]),
            redo: Vec::new(),
            depth: depth.max(1),
        }
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.undo.back()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Steps back; returns the snapshot to restore.
    pub fn undo(&mut self) -> Option<Snapshot> {
        if !self.can_undo() {
            return None;
        }
        let current = self.undo.pop_back()?;
        self.redo.push(current);
        debug!("[HISTORY] Undo ({} left)", self.undo.len() - 1);
        self.undo.back().cloned()
    }

    pub fn redo(&mut self) -> Option<Snapshot> {
        let next = self.redo.pop()?;
        self.undo.push_back(next.clone());
        debug!("[HISTORY] Redo ({} left)", self.redo.len());
        Some(next)
    }
}

impl CheckpointSink for History {
    fn checkpoint(&mut self, snapshot: Snapshot) {
        if self.undo.back() == Some(&snapshot) {
            return;
        }
        self.undo.push_back(snapshot);
        self.redo.clear();
        while self.undo.len() > self.depth + 1 {
            self.undo.pop_front();
        }
    }
}
