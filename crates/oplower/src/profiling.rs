use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilingStatus {
    Executed,
    /// The primitive became a no-op (e.g. a reshape aliasing its input).
    OptimizedOut,
}

/// Per-primitive profiling record, seeded at lowering time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingEntry {
    pub primitive_id: String,
    pub layer_type: String,
    pub origin_op_name: String,
    pub status: ProfilingStatus,
    /// Whether the primitive ran on the host instead of the device.
    pub is_cpu: bool,
    pub cpu_micros: u64,
    pub device_micros: u64,
}

/// Profiling entries keyed by primitive id, iterated in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingTable {
    order: Vec<String>,
    entries: HashMap<String, ProfilingEntry>,
}

impl ProfilingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry; recording an id twice keeps the first position.
    pub fn record(&mut self, primitive_id: &str, layer_type: &str, origin_op_name: &str) {
        let entry = ProfilingEntry {
            primitive_id: primitive_id.to_string(),
            layer_type: layer_type.to_string(),
            origin_op_name: origin_op_name.to_string(),
            status: ProfilingStatus::Executed,
            is_cpu: false,
            cpu_micros: 0,
            device_micros: 0,
        };
        if self.entries.insert(primitive_id.to_string(), entry).is_none() {
            self.order.push(primitive_id.to_string());
        }
    }

    pub fn get(&self, primitive_id: &str) -> Option<&ProfilingEntry> {
        self.entries.get(primitive_id)
    }

    /// Stores measured timings; unknown ids are ignored.
    pub fn update(&mut self, primitive_id: &str, status: ProfilingStatus, cpu_micros: u64, device_micros: u64) {
        if let Some(entry) = self.entries.get_mut(primitive_id) {
            entry.status = status;
            entry.cpu_micros = cpu_micros;
            entry.device_micros = device_micros;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProfilingEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_recording_order_and_update_by_id() {
        let mut table = ProfilingTable::new();
        for id in ["c", "a", "b"] {
            table.record(id, "eltwise", id);
        }
        table.record("a", "eltwise", "again");
        table.update("b", ProfilingStatus::OptimizedOut, 7, 0);
        table.update("missing", ProfilingStatus::Executed, 1, 1);

        let ids: Vec<&str> = table.entries().map(|entry| entry.primitive_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(table.len(), 3);
        let b = table.get("b").expect("b");
        assert_eq!(b.status, ProfilingStatus::OptimizedOut);
        assert_eq!(b.cpu_micros, 7);
        assert!(!b.is_cpu);
        assert!(table.get("missing").is_none());
    }
}
