//! Resource accounting logic: atomic reserve/commit/release over a
//! [`ResourcePoolState`], plus the default per-category multiplier estimator.

use std::collections::BTreeMap;

use engine_model::task::Category;
use engine_model::{ResourcePoolState, TaskId};

/// `(cpu, memory, network, disk, ai_tokens)` multipliers per category.
const MULTIPLIER_TABLE: &[(Category, [f64; 5])] = &[
    (Category::Feature, [1.5, 1.2, 1.0, 1.0, 2.0]),
    (Category::BugFix, [1.0, 1.0, 0.8, 0.8, 1.0]),
    (Category::Test, [2.0, 1.5, 1.2, 1.0, 1.5]),
    (Category::Documentation, [0.5, 0.8, 0.5, 1.5, 1.8]),
    (Category::Refactor, [1.8, 1.5, 1.0, 1.2, 2.5]),
    (Category::Security, [2.0, 1.8, 1.5, 1.0, 2.0]),
    (Category::Performance, [2.5, 2.0, 1.2, 1.0, 1.5]),
    (Category::Infrastructure, [1.2, 1.0, 2.0, 2.0, 1.0]),
];

pub const RESOURCE_TYPES: [&str; 5] = ["cpu", "memory", "network", "disk", "ai_tokens"];

/// Estimates integer resource units for each declared `requiredResources` type the caller
/// didn't already pin via `resourceConstraints`.
pub fn estimate_resources(category: Category, estimated_duration_ms: u64, required: &[String]) -> BTreeMap<String, u64> {
    let multipliers = MULTIPLIER_TABLE
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, m)| *m)
        .unwrap_or([1.0, 1.0, 1.0, 1.0, 1.0]);
    let complexity_factor = ((estimated_duration_ms as f64 / 60_000.0).floor()).max(1.0);

    let mut estimate = BTreeMap::new();
    for resource_type in required {
        let index = RESOURCE_TYPES.iter().position(|r| r == resource_type);
        let multiplier = index.map(|i| multipliers[i]).unwrap_or(1.0);
        let units = (multiplier * complexity_factor).round().max(1.0) as u64;
        estimate.insert(resource_type.clone(), units);
    }
    estimate
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("insufficient {resource_type}: requested {requested}, available {available}")]
pub struct ReservationError {
    pub resource_type: String,
    pub requested: u64,
    pub available: u64,
}

/// Atomic across every declared type: either all reservations succeed or none do.
pub fn reserve(
    pool: &mut ResourcePoolState,
    _task: &TaskId,
    requested: &BTreeMap<String, u64>,
) -> Result<(), ReservationError> {
    for (resource_type, units) in requested {
        let counts = pool.get(resource_type);
        if counts.available() < *units {
            return Err(ReservationError { resource_type: resource_type.clone(), requested: *units, available: counts.available() });
        }
    }
    for (resource_type, units) in requested {
        pool.entry_mut(resource_type).reserved += units;
    }
    Ok(())
}

/// Moves `reserved -> allocated` once the worker actually starts.
pub fn commit(pool: &mut ResourcePoolState, requested: &BTreeMap<String, u64>) {
    for (resource_type, units) in requested {
        let counts = pool.entry_mut(resource_type);
        counts.reserved = counts.reserved.saturating_sub(*units);
        counts.allocated += units;
    }
}

/// Returns units to the pool on COMPLETED, terminal FAILED, or CANCELLED.
pub fn release(pool: &mut ResourcePoolState, requested: &BTreeMap<String, u64>) {
    for (resource_type, units) in requested {
        let counts = pool.entry_mut(resource_type);
        counts.allocated = counts.allocated.saturating_sub(*units);
        counts.reserved = counts.reserved.saturating_sub(*units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_category_and_duration() {
        let required = vec!["cpu".to_string(), "ai_tokens".to_string()];
        let estimate = estimate_resources(Category::Performance, 120_000, &required);
        // complexity_factor = floor(120000/60000) = 2
        assert_eq!(estimate["cpu"], 5); // 2.5 * 2
        assert_eq!(estimate["ai_tokens"], 3); // 1.5 * 2 = 3
    }

    #[test]
    fn estimate_floors_complexity_factor_at_one() {
        let required = vec!["cpu".to_string()];
        let estimate = estimate_resources(Category::BugFix, 1_000, &required);
        assert_eq!(estimate["cpu"], 1);
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut pool = ResourcePoolState::new();
        pool.set_capacity("cpu", 4);
        pool.set_capacity("memory", 1);
        let task = TaskId::new("t");
        let mut request = BTreeMap::new();
        request.insert("cpu".to_string(), 2u64);
        request.insert("memory".to_string(), 2u64);

        let err = reserve(&mut pool, &task, &request).unwrap_err();
        assert_eq!(err.resource_type, "memory");
        assert_eq!(pool.get("cpu").reserved, 0, "partial reservation must not be left behind");
    }

    #[test]
    fn reserve_commit_release_round_trip() {
        let mut pool = ResourcePoolState::new();
        pool.set_capacity("cpu", 4);
        let task = TaskId::new("t");
        let mut request = BTreeMap::new();
        request.insert("cpu".to_string(), 2u64);

        reserve(&mut pool, &task, &request).unwrap();
        assert_eq!(pool.get("cpu").reserved, 2);

        commit(&mut pool, &request);
        assert_eq!(pool.get("cpu").reserved, 0);
        assert_eq!(pool.get("cpu").allocated, 2);

        release(&mut pool, &request);
        assert_eq!(pool.get("cpu").allocated, 0);
    }
}
