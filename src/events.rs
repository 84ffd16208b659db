use std::cell::RefCell;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::model::{Color, GroupId, MappingId};

/// Tree / inspector notifications. UI code mirrors the group tree from these.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupEvent {
    GroupCreated { group: GroupId, name: String, color: Color },
    GroupRenamed { group: GroupId, name: String },
    GroupRecolored { group: GroupId, color: Color },
    GroupDestroyed { group: GroupId },
    MappingCreated { group: GroupId, mapping: MappingId, name: String },
    MappingRenamed { group: GroupId, mapping: MappingId, name: String },
    MappingDestroyed { group: GroupId, mapping: MappingId },
    EditingStarted { group: GroupId, mapping: MappingId },
    EditingStopped { group: GroupId, mapping: MappingId },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Sender<GroupEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<GroupEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Drops subscribers whose receiver has gone away.
    pub fn emit(&self, event: GroupEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
