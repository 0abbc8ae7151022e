use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tasker_flow::TaskPriority;

/// Any instant between 2000 and 2100, to the second
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800i64).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    })
}

/// Valid `(hour, minute)` pairs
pub fn time_of_day_strategy() -> impl Strategy<Value = (u32, u32)> {
    (0u32..24, 0u32..60)
}

pub fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Low),
        Just(TaskPriority::Normal),
        Just(TaskPriority::High),
        Just(TaskPriority::Critical),
    ]
}

/// Acyclic dependency lists: step `i` may only depend on steps `0..i`
pub fn dag_strategy(max_steps: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_steps).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::btree_set(0..i, 0..=i.min(3))
                        .prop_map(|deps| deps.into_iter().collect::<Vec<usize>>())
                        .boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

/// A DAG plus one back edge `(from, to)` with `to <= from`, which closes a cycle
pub fn cyclic_graph_strategy(max_steps: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    dag_strategy(max_steps)
        .prop_flat_map(|deps| {
            let n = deps.len();
            (Just(deps), 0..n)
        })
        .prop_flat_map(|(deps, from)| (Just(deps), Just(from), 0..=from))
        .prop_map(|(mut deps, from, to)| {
            // `from` reaches `to` through the chain; the back edge closes the loop
            chain(&mut deps, to, from);
            if !deps[to].contains(&from) {
                deps[to].push(from);
            }
            deps
        })
}

/// Make `later` depend on `earlier` through direct edges along `earlier..=later`
fn chain(deps: &mut [Vec<usize>], earlier: usize, later: usize) {
    for i in earlier + 1..=later {
        if !deps[i].contains(&(i - 1)) {
            deps[i].push(i - 1);
        }
    }
}

pub fn step_name(i: usize) -> String {
    format!("step_{i}")
}
