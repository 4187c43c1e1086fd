//! 依赖图构建和拓扑排序
//!
//! 节点是 pass 的注册下标，边从必须先执行的 pass 指向后执行的 pass。

use std::{cmp::Reverse, collections::BinaryHeap, hash::Hash};

use indexmap::IndexMap;

/// pass 之间的依赖图
pub struct DependencyGraph {
    /// 邻接表（出边）：pass_index -> [后继 pass]
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
}

impl DependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); pass_count],
            in_degrees: vec![0; pass_count],
        }
    }

    /// `producer` 必须在 `consumer` 之前执行，自环和重复边会被忽略
    pub fn add_edge(&mut self, producer: usize, consumer: usize) {
        if producer == consumer || self.adjacency[producer].contains(&consumer) {
            return;
        }
        self.adjacency[producer].push(consumer);
        self.in_degrees[consumer] += 1;
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.adjacency.len()
    }

    #[inline]
    pub fn successors(&self, pass_index: usize) -> &[usize] {
        &self.adjacency[pass_index]
    }

    /// Kahn 算法，就绪的 pass 中总是先取注册下标最小的
    ///
    /// # 返回
    /// - `Ok(order)`: 排序后的 pass 下标
    /// - `Err(remaining)`: 存在环，返回无法排序的 pass 下标（升序）。
    ///   除了环上的 pass，也包含只是位于环下游的 pass
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready = in_degrees
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect::<BinaryHeap<_>>();
        let mut order = Vec::with_capacity(self.pass_count());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.adjacency[node] {
                in_degrees[next] -= 1;
                if in_degrees[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.pass_count() {
            Ok(order)
        } else {
            Err((0..self.pass_count()).filter(|i| in_degrees[*i] > 0).collect())
        }
    }
}

/// 从每个 pass 的读写列表构建依赖图
///
/// 规则：
/// - 读依赖写：写入 T 的每个 pass 都在读取 T 的每个 pass 之前，与注册顺序无关
/// - 写后写：只写 T 的 pass 排在既读又写 T 的 pass 之前，两组内部各自按注册顺序，然后依次串联。
///   这样写后写的边不会和读依赖写的边方向相反，只有读写关系本身成环时才会排序失败
pub fn analyze<R: Hash + Eq + Copy>(reads: &[Vec<R>], writes: &[Vec<R>]) -> DependencyGraph {
    debug_assert_eq!(reads.len(), writes.len());
    let mut graph = DependencyGraph::new(reads.len());

    // resource -> (writers, readers)，都按注册顺序
    let mut accesses: IndexMap<R, (Vec<usize>, Vec<usize>)> = IndexMap::new();
    for (pass, resources) in writes.iter().enumerate() {
        for resource in resources {
            accesses.entry(*resource).or_default().0.push(pass);
        }
    }
    for (pass, resources) in reads.iter().enumerate() {
        for resource in resources {
            accesses.entry(*resource).or_default().1.push(pass);
        }
    }

    for (writers, readers) in accesses.values_mut() {
        // 稳定排序，同组内保持注册顺序
        writers.sort_by_key(|writer| readers.contains(writer));
        for pair in writers.windows(2) {
            graph.add_edge(pair[0], pair[1]);
        }
        for &writer in writers.iter() {
            for &reader in readers.iter() {
                graph.add_edge(writer, reader);
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_dependency() {
        // Pass 0 -> Pass 1 -> Pass 2
        let reads = vec![vec![], vec![0], vec![1]];
        let writes = vec![vec![0], vec![1], vec![]];
        assert_eq!(analyze(&reads, &writes).topological_sort().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reader_registered_before_writer() {
        // Pass 0 读取 image 0，Pass 1 写入 image 0
        let reads = vec![vec![0], vec![]];
        let writes = vec![vec![], vec![0]];
        assert_eq!(analyze(&reads, &writes).topological_sort().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_independent_passes_keep_registration_order() {
        // Pass 3 写入 image 0，Pass 1 读取；0 和 2 没有依赖
        let reads = vec![vec![], vec![0], vec![], vec![]];
        let writes = vec![vec![], vec![], vec![], vec![0]];
        assert_eq!(analyze(&reads, &writes).topological_sort().unwrap(), vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_multiple_writers_precede_reader() {
        let reads = vec![vec![7], vec![], vec![]];
        let writes = vec![vec![], vec![7], vec![7]];
        let graph = analyze(&reads, &writes);
        assert_eq!(graph.successors(1), &[2, 0]);
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_read_write_same_resource_is_not_a_cycle() {
        let reads = vec![vec![0], vec![0]];
        let writes = vec![vec![0], vec![]];
        assert_eq!(analyze(&reads, &writes).topological_sort().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_pure_writer_precedes_earlier_read_write_pass() {
        // Pass 0 读写 image 0，Pass 1 只写 image 0
        let reads = vec![vec![0], vec![]];
        let writes = vec![vec![0], vec![0]];
        let graph = analyze(&reads, &writes);
        assert_eq!(graph.successors(1), &[0]);
        assert!(graph.successors(0).is_empty());
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_two_read_write_passes_form_a_cycle() {
        let reads = vec![vec![0], vec![0]];
        let writes = vec![vec![0], vec![0]];
        assert_eq!(analyze(&reads, &writes).topological_sort(), Err(vec![0, 1]));
    }

    #[test]
    fn test_cycle_reports_remaining_passes() {
        // Pass 1 写 0 读 1；Pass 2 写 1 读 0；Pass 0 和它们无关
        let reads = vec![vec![], vec![1], vec![0]];
        let writes = vec![vec![], vec![0], vec![1]];
        assert_eq!(analyze(&reads, &writes).topological_sort(), Err(vec![1, 2]));
    }

    #[test]
    fn test_cycle_remaining_includes_downstream_passes() {
        // Pass 3 只读 1，本身不在环上，但它的 writer 在环上
        let reads = vec![vec![], vec![1], vec![0], vec![1]];
        let writes = vec![vec![], vec![0], vec![1], vec![]];
        assert_eq!(analyze(&reads, &writes).topological_sort(), Err(vec![1, 2, 3]));
    }
}
