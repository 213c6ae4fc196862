//! 任务DAG的拓扑排序

use std::collections::{HashMap, VecDeque};

use cronflow_domain::entities::TaskRef;
use cronflow_errors::{SchedError, SchedResult};

/// Kahn拓扑排序
///
/// 入参为“任务 -> 其依赖”的前驱图, 返回一个可行的执行顺序。
/// 若有节点始终无法入度清零, 说明图中存在环, 返回[`SchedError::InvalidDag`]。
/// 同一层级内节点的先后顺序不作保证。
pub fn kahn(igraph: &HashMap<TaskRef, Vec<TaskRef>>) -> SchedResult<Vec<TaskRef>> {
    let graph = inverse_graph(igraph);

    let mut in_count: HashMap<TaskRef, usize> = HashMap::with_capacity(igraph.len());
    let mut ready: VecDeque<TaskRef> = VecDeque::new();
    for (node, incomes) in igraph {
        in_count.insert(node.clone(), incomes.len());
        if incomes.is_empty() {
            ready.push_back(node.clone());
        }
    }

    let mut order = Vec::with_capacity(igraph.len());
    while let Some(node) = ready.pop_front() {
        if let Some(outcomes) = graph.get(&node) {
            for outcome in outcomes {
                if let Some(count) = in_count.get_mut(outcome) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(outcome.clone());
                    }
                }
            }
        }
        order.push(node);
    }

    for (node, count) in &in_count {
        if *count > 0 {
            return Err(SchedError::invalid_dag(node.to_string()));
        }
    }

    Ok(order)
}

/// 前驱图取反, 得到“任务 -> 其后继”
fn inverse_graph(igraph: &HashMap<TaskRef, Vec<TaskRef>>) -> HashMap<TaskRef, Vec<TaskRef>> {
    let mut graph: HashMap<TaskRef, Vec<TaskRef>> = HashMap::with_capacity(igraph.len());
    for (node, incomes) in igraph {
        for income in incomes {
            graph.entry(income.clone()).or_default().push(node.clone());
        }
        graph.entry(node.clone()).or_default();
    }
    graph
}
