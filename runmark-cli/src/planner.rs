//! Workload Planner
//!
//! Builds the run plan by filtering registered workloads by regex on their
//! name. Workloads run in alphabetical order for deterministic execution.

use runmark_core::WorkloadDef;

/// Ordered workloads to run
pub struct RunPlan {
    /// Ordered list of workloads to run
    pub workloads: Vec<&'static WorkloadDef>,
}

/// Build a run plan from discovered workloads
pub fn build_plan(
    workloads: impl IntoIterator<Item = &'static WorkloadDef>,
    filter: Option<&regex::Regex>,
) -> RunPlan {
    let mut selected: Vec<_> = workloads
        .into_iter()
        .filter(|w| filter.is_none_or(|re| re.is_match(w.name)))
        .collect();

    selected.sort_by_key(|w| w.name);

    RunPlan {
        workloads: selected,
    }
}
