//! Port implementations: stores and simulated external collaborators.

use crate::domain::address::PaymentId;
use serde::{Deserialize, Serialize};

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;

/// Per-username bookkeeping shared by the store implementations: live ids
/// in creation order plus creation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIndex {
    pub streams: Vec<PaymentId>,
    pub schedules: Vec<PaymentId>,
    pub stream_sequence: u64,
    pub schedule_sequence: u64,
}

impl UserIndex {
    pub fn track_stream(&mut self, id: PaymentId, is_new: bool, live: bool) {
        if is_new {
            self.stream_sequence += 1;
        }
        track(&mut self.streams, id, live);
    }

    pub fn track_schedule(&mut self, id: PaymentId, is_new: bool, live: bool) {
        if is_new {
            self.schedule_sequence += 1;
        }
        track(&mut self.schedules, id, live);
    }
}

/// Keeps `id` in `ids` exactly while `live`, preserving insertion order.
pub fn track(ids: &mut Vec<PaymentId>, id: PaymentId, live: bool) {
    let position = ids.iter().position(|existing| *existing == id);
    match (live, position) {
        (true, None) => ids.push(id),
        (false, Some(index)) => {
            ids.remove(index);
        }
        _ => {}
    }
}
