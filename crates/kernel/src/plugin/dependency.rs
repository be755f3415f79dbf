//! Plugin dependency resolution for autoload ordering.
//!
//! Orders the plugins autoload is about to bring up so that declared
//! dependencies load first. Uses Kahn's algorithm with name-sorted ties for
//! reproducible logs. Dependencies only order the batch, they never gate
//! it: a plugin whose dependency is unavailable or circular is still
//! attempted, after everything that could be ordered, and the unmet
//! dependency is reported so autoload can warn about it.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// A declared dependency that could not be honoured when ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmetDependency {
    /// A declared dependency is neither loaded nor part of the batch.
    Missing(String),
    /// The plugin is part of, or waits on, a dependency cycle.
    Cycle(Vec<String>),
}

impl std::fmt::Display for UnmetDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(dep) => write!(f, "depends on '{dep}' which is not available"),
            Self::Cycle(members) => {
                write!(f, "circular dependency involving: {}", members.join(", "))
            }
        }
    }
}

/// Result of planning an autoload batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// Every candidate, in load order.
    pub order: Vec<String>,
    /// Candidates with a dependency the order could not satisfy.
    pub unmet: Vec<(String, UnmetDependency)>,
}

/// Plan the load order for `candidates` (plugin name → declared
/// dependencies). `already_loaded` names count as satisfied dependencies.
pub fn plan_load_order(
    candidates: &BTreeMap<String, Vec<String>>,
    already_loaded: &BTreeSet<String>,
) -> LoadPlan {
    let mut unmet = Vec::new();

    // in_degree[p] = number of batch members p waits for
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in candidates {
        let mut waiting: BTreeSet<&str> = BTreeSet::new();
        for dep in deps {
            if already_loaded.contains(dep) {
                continue;
            }
            if candidates.contains_key(dep) {
                waiting.insert(dep);
            } else {
                unmet.push((name.clone(), UnmetDependency::Missing(dep.clone())));
            }
        }
        in_degree.insert(name, waiting.len());
        for dep in waiting {
            dependents.entry(dep).or_default().push(name);
        }
    }

    let mut order = Vec::with_capacity(candidates.len());
    let mut roots: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| *name)
        .collect();
    roots.sort_unstable();
    let mut queue: VecDeque<&str> = roots.into();

    while let Some(plugin) = queue.pop_front() {
        order.push(plugin.to_string());

        if let Some(deps) = dependents.get(plugin) {
            let mut newly_ready = Vec::new();
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(*dependent);
                    }
                }
            }
            newly_ready.sort_unstable();
            queue.extend(newly_ready);
        }
    }

    if order.len() != candidates.len() {
        // BTreeMap keys: the leftovers come out name-sorted.
        let leftover: Vec<String> = candidates
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect();
        for name in &leftover {
            unmet.push((name.clone(), UnmetDependency::Cycle(leftover.clone())));
        }
        order.extend(leftover);
    }

    LoadPlan { order, unmet }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn candidates(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn pos(plan: &LoadPlan, name: &str) -> usize {
        plan.order.iter().position(|x| x == name).unwrap()
    }

    #[test]
    fn independent_plugins_load_in_name_order() {
        let plan = plan_load_order(
            &candidates(&[("zebra", &[]), ("alpha", &[]), ("middle", &[])]),
            &BTreeSet::new(),
        );
        assert_eq!(plan.order, vec!["alpha", "middle", "zebra"]);
        assert!(plan.unmet.is_empty());
    }

    #[test]
    fn dependencies_load_first() {
        let plan = plan_load_order(
            &candidates(&[("reports", &["powertable"]), ("powertable", &[])]),
            &BTreeSet::new(),
        );
        assert_eq!(plan.order, vec!["powertable", "reports"]);
    }

    #[test]
    fn diamond_dependency() {
        let plan = plan_load_order(
            &candidates(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]),
            &BTreeSet::new(),
        );
        assert!(pos(&plan, "d") < pos(&plan, "b"));
        assert!(pos(&plan, "d") < pos(&plan, "c"));
        assert!(pos(&plan, "b") < pos(&plan, "a"));
        assert!(pos(&plan, "c") < pos(&plan, "a"));
    }

    #[test]
    fn already_loaded_dependency_is_satisfied() {
        let loaded: BTreeSet<String> = ["powertable".to_string()].into();
        let plan = plan_load_order(&candidates(&[("reports", &["powertable"])]), &loaded);
        assert_eq!(plan.order, vec!["reports"]);
    }

    #[test]
    fn missing_dependency_is_reported_but_still_ordered() {
        let plan = plan_load_order(
            &candidates(&[("a", &["missing"]), ("b", &["a"]), ("c", &[])]),
            &BTreeSet::new(),
        );
        assert_eq!(plan.order, vec!["a", "c", "b"]);
        assert_eq!(
            plan.unmet,
            vec![(
                "a".to_string(),
                UnmetDependency::Missing("missing".to_string())
            )]
        );
    }

    #[test]
    fn cycle_members_are_attempted_last() {
        let plan = plan_load_order(
            &candidates(&[("a", &["b"]), ("b", &["a"]), ("solo", &[])]),
            &BTreeSet::new(),
        );
        assert_eq!(plan.order, vec!["solo", "a", "b"]);
        assert_eq!(plan.unmet.len(), 2);
        assert!(
            plan.unmet
                .iter()
                .all(|(_, reason)| matches!(reason, UnmetDependency::Cycle(m) if m == &["a", "b"]))
        );
        assert!(plan.unmet[0].1.to_string().contains("circular"));
    }
}
