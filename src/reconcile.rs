//! Snapshot reconciliation
//!
//! Brings a table of live objects in line with a snapshot table keyed by the
//! same ids. Objects present on both sides are updated in place, so anyone
//! holding a reference keeps a working handle. Ids only in the snapshot get
//! a freshly constructed object; ids only in the live table are torn down.
//! Group -> mapping nesting is handled by the group's own `restore`, which
//! runs this again one level down.

use std::collections::BTreeMap;

pub(crate) trait Reconciler<K, E, S> {
    fn create(&mut self, id: K) -> E;
    fn restore(&mut self, id: K, entity: &E, snapshot: &S);
    fn destroy(&mut self, id: K, entity: E);
}

pub(crate) fn reconcile<K, E, S, R>(live: &mut BTreeMap<K, E>, snapshot: &BTreeMap<K, S>, reconciler: &mut R)
where
    K: Ord + Copy,
    R: Reconciler<K, E, S>,
{
    let mut previous = std::mem::take(live);

    for (&id, sub) in snapshot {
        let entity = match previous.remove(&id) {
            Some(existing) => existing,
            None => reconciler.create(id),
        };
        reconciler.restore(id, &entity, sub);
        live.insert(id, entity);
    }

    for (id, entity) in previous {
        reconciler.destroy(id, entity);
    }
}
