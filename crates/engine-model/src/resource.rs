//! Resource pool state: per-type capacity accounting.
//!
//! This module holds the data only. Reservation/commit/release logic lives in
//! `engine_core::resource`, which operates on a `&mut ResourcePoolState`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceCounts {
    pub capacity: u64,
    pub allocated: u64,
    pub reserved: u64,
}

impl ResourceCounts {
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.allocated + self.reserved)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePoolState {
    pools: BTreeMap<String, ResourceCounts>,
}

impl ResourcePoolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_capacity(&mut self, resource_type: impl Into<String>, capacity: u64) {
        self.pools.entry(resource_type.into()).or_default().capacity = capacity;
    }

    pub fn get(&self, resource_type: &str) -> ResourceCounts {
        self.pools.get(resource_type).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceCounts)> {
        self.pools.iter()
    }

    pub fn entry_mut(&mut self, resource_type: &str) -> &mut ResourceCounts {
        self.pools.entry(resource_type.to_string()).or_default()
    }

    /// Average utilization across all declared pools, used by metrics/health and by
    /// HYBRID_ADAPTIVE's `resourceUtilization` signal.
    pub fn average_utilization(&self) -> f64 {
        if self.pools.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .pools
            .values()
            .map(|c| if c.capacity == 0 { 0.0 } else { (c.allocated + c.reserved) as f64 / c.capacity as f64 })
            .sum();
        total / self.pools.len() as f64
    }

    /// Resets every pool's live counters to zero, keeping capacities. Used on recovery.
    pub fn reset_live_counters(&mut self) {
        for counts in self.pools.values_mut() {
            counts.allocated = 0;
            counts.reserved = 0;
        }
    }
}
