//! DAG拓扑排序的性质测试
//!
//! 随机生成保证无环的依赖图, 校验排序结果总是满足"依赖先于任务";
//! 注入回边后校验环总能被拒绝。

use std::collections::HashMap;

use proptest::prelude::*;

use cronflow_dispatcher::graph::kahn;
use cronflow_domain::entities::TaskRef;

fn node(index: usize) -> TaskRef {
    TaskRef::new(1, format!("t{index}"))
}

/// 生成每个节点只依赖更小编号节点的图, 因此必然无环
fn acyclic_deps() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::<usize>::new()).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..=i.min(3)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn build_graph(deps: &[Vec<usize>]) -> HashMap<TaskRef, Vec<TaskRef>> {
    deps.iter()
        .enumerate()
        .map(|(i, dep_indexes)| {
            (
                node(i),
                dep_indexes.iter().map(|&d| node(d)).collect::<Vec<_>>(),
            )
        })
        .collect()
}

proptest! {
    /// 任意被接受的DAG, 排序结果中每个依赖都出现在其任务之前
    #[test]
    fn order_puts_every_dependency_first(deps in acyclic_deps()) {
        let graph = build_graph(&deps);
        let order = kahn(&graph).unwrap();
        prop_assert_eq!(order.len(), graph.len());

        let position: HashMap<&TaskRef, usize> =
            order.iter().enumerate().map(|(pos, task)| (task, pos)).collect();
        for (i, dep_indexes) in deps.iter().enumerate() {
            let task_pos = position[&node(i)];
            for &d in dep_indexes {
                prop_assert!(
                    position[&node(d)] < task_pos,
                    "依赖 t{} 应先于 t{}", d, i
                );
            }
        }
    }

    /// 在链上注入一条回边后, 图含环, 必须被拒绝
    #[test]
    fn injected_back_edge_is_rejected(n in 2usize..10, back in 0usize..8) {
        let back_target = back % n;
        let mut deps: Vec<Vec<usize>> = (0..n)
            .map(|i| if i == 0 { Vec::new() } else { vec![i - 1] })
            .collect();
        // 让编号小的节点依赖链尾, 构成 back_target -> ... -> n-1 -> back_target
        deps[back_target].push(n - 1);

        let graph = build_graph(&deps);
        prop_assert!(kahn(&graph).is_err());
    }
}
