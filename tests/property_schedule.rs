// tests/property_schedule.rs

mod common;
use crate::common::builders::{FlowSpecBuilder, task};

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use taskdag::dag::{FlowSpec, NodeId, compile};
use taskdag::errors::CompileErrorKind;

// Random DAG: task N may only depend on tasks 0..N-1, so the graph is
// acyclic by construction. Every task's value is a flow output, which keeps
// the validator quiet about unused outputs.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    if i == 0 {
                        BTreeSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    }
                })
                .collect()
        })
    })
}

fn spec_for(deps: &[BTreeSet<usize>]) -> FlowSpec {
    let names: Vec<String> = (0..deps.len()).map(|i| format!("t{i}")).collect();
    let mut builder = FlowSpecBuilder::new("random");
    for name in &names {
        builder = builder.output(name);
    }
    for (i, node_deps) in deps.iter().enumerate() {
        let needs: Vec<&str> = node_deps.iter().map(|d| names[*d].as_str()).collect();
        builder = builder.task(task(&names[i]).needs(&needs).provides(&[names[i].as_str()]));
    }
    builder.build()
}

proptest! {
    #[test]
    fn levels_partition_the_tasks_and_respect_dependencies(deps in dag_strategy(12)) {
        let plan = compile(&spec_for(&deps)).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut level_of: HashMap<NodeId, usize> = HashMap::new();
        for (level, nodes) in plan.schedule().levels().iter().enumerate() {
            prop_assert!(!nodes.is_empty(), "empty level {}", level);
            for id in nodes {
                prop_assert!(level_of.insert(*id, level).is_none(), "{} scheduled twice", id);
            }
        }
        prop_assert_eq!(level_of.len(), deps.len());

        for (i, node_deps) in deps.iter().enumerate() {
            for d in node_deps {
                prop_assert!(
                    level_of[&NodeId(*d)] < level_of[&NodeId(i)],
                    "t{} must run before t{}", d, i
                );
            }
        }
    }

    #[test]
    fn topological_order_puts_providers_first(deps in dag_strategy(12)) {
        let plan = compile(&spec_for(&deps)).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let order = plan.topo_order();
        prop_assert_eq!(order.len(), deps.len());
        let position: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        prop_assert_eq!(position.len(), deps.len());

        for (i, node_deps) in deps.iter().enumerate() {
            for d in node_deps {
                prop_assert!(position[&NodeId(*d)] < position[&NodeId(i)]);
            }
        }
    }

    #[test]
    fn closing_a_loop_is_always_reported_as_a_cycle(mut deps in dag_strategy(8)) {
        let last = deps.len() - 1;
        deps[0].insert(last);
        if last > 0 {
            deps[last].insert(0);
        }

        let errors = match compile(&spec_for(&deps)) {
            Ok(_) => return Err(TestCaseError::fail("cyclic graph compiled")),
            Err(errors) => errors,
        };
        let cycle = errors.cycle().ok_or_else(|| TestCaseError::fail(errors.to_string()))?;
        let CompileErrorKind::Cycle(chain) = &cycle.kind else {
            return Err(TestCaseError::fail("cycle error without a chain"));
        };
        prop_assert!(chain.len() >= 2);
        prop_assert_eq!(&chain[0].provides, &chain[chain.len() - 1].provides);
        // The only edge pointing forward is t0 -> t_last, so any loop uses it.
        prop_assert!(chain.iter().any(|step| step.node == NodeId(0)));
        prop_assert!(chain.iter().any(|step| step.node == NodeId(last)));
    }
}
