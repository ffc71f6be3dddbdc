//! Dependency resolution for a single phase.
//!
//! Produces a total order in which every unit follows all of its
//! dependencies. Units with no ordering constraint between them keep their
//! registration order, so identical registrations always resolve identically.

use std::collections::{BTreeSet, HashMap};

use crate::error::{InitError, Result};
use crate::registry::Unit;

/// Resolve the execution order of `units`, all registered under `phase`.
///
/// Pure: nothing runs and nothing is mutated. Unknown dependencies and cycles
/// are reported before any ordering is returned.
pub fn resolve(phase: &str, units: &[Unit]) -> Result<Vec<String>> {
    Ok(resolve_indices(phase, units)?
        .into_iter()
        .map(|i| units[i].name().to_string())
        .collect())
}

/// Same as [`resolve`], as positions into `units`.
pub(crate) fn resolve_indices(phase: &str, units: &[Unit]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, unit)| (unit.name(), i))
        .collect();

    // dependents[d] lists the units waiting on d; pending[u] counts what u still waits on.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    let mut pending: Vec<usize> = vec![0; units.len()];

    for (i, unit) in units.iter().enumerate() {
        for dependency in unit.dependencies() {
            let Some(&d) = index.get(dependency.as_str()) else {
                return Err(InitError::unknown_dependency(phase, unit.name(), dependency));
            };
            dependents[d].push(i);
            pending[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..units.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(units.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < units.len() {
        let cycle = find_cycle(units, &index, &pending);
        tracing::error!(phase = %phase, cycle = ?cycle, "Dependency cycle detected");
        return Err(InitError::CycleDetected {
            phase: phase.to_string(),
            cycle,
        });
    }

    tracing::debug!(
        phase = %phase,
        order = ?order.iter().map(|&i| units[i].name()).collect::<Vec<_>>(),
        "Phase resolved"
    );
    Ok(order)
}

/// Walk unsatisfied dependencies from the earliest stuck unit until a name
/// repeats. Every stuck unit has at least one stuck dependency, so the walk
/// always closes a loop.
fn find_cycle(units: &[Unit], index: &HashMap<&str, usize>, pending: &[usize]) -> Vec<String> {
    let stuck = |i: usize| pending[i] > 0;

    let Some(start) = (0..units.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(&current) {
            let mut cycle: Vec<String> = path[at..]
                .iter()
                .map(|&i| units[i].name().to_string())
                .collect();
            cycle.push(units[current].name().to_string());
            return cycle;
        }

        position.insert(current, path.len());
        path.push(current);

        let next = units[current]
            .dependencies()
            .iter()
            .filter_map(|dependency| index.get(dependency.as_str()).copied())
            .find(|&d| stuck(d));

        match next {
            Some(d) => current = d,
            None => return path.iter().map(|&i| units[i].name().to_string()).collect(),
        }
    }
}
