//! Threshold clustering over a disjoint-set forest.
//!
//! Every pair of vectors whose cosine similarity meets the threshold is
//! merged, so clusters are the connected components of the similarity graph.

use crate::features::cosine;

#[derive(Clone, Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[node] != node {
            let parent = self.parent[node];
            self.parent[node] = root;
            node = parent;
        }
        root
    }

    fn union(&mut self, left: usize, right: usize) {
        let mut left = self.find(left);
        let mut right = self.find(right);
        if left == right {
            return;
        }
        let left_rank = self.rank[left];
        let right_rank = self.rank[right];
        if left_rank < right_rank {
            std::mem::swap(&mut left, &mut right);
        }
        self.parent[right] = left;
        if left_rank == right_rank {
            self.rank[left] = left_rank.saturating_add(1);
        }
    }
}

/// Cluster membership of one input vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Membership {
    pub(crate) cluster: u64,
    pub(crate) confidence: f32,
}

/// Clusters `vectors`, returning one membership per input in input order.
///
/// Cluster ids are dense and numbered by first appearance. Confidence is the
/// mean similarity to the other members of the cluster, `1.0` when alone.
/// Time is quadratic in the number of vectors; memory stays linear because
/// similarities within a cluster are recomputed for the confidence pass.
pub(crate) fn cluster(vectors: &[&[f32]], threshold: f32) -> Vec<Membership> {
    let n = vectors.len();
    let mut forest = DisjointSet::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine(vectors[i], vectors[j]) >= threshold {
                forest.union(i, j);
            }
        }
    }

    let mut dense: Vec<Option<usize>> = vec![None; n];
    let mut members: Vec<Vec<usize>> = Vec::new();
    let mut clusters = Vec::with_capacity(n);
    for node in 0..n {
        let root = forest.find(node);
        let id = *dense[root].get_or_insert_with(|| {
            members.push(Vec::new());
            members.len() - 1
        });
        members[id].push(node);
        clusters.push(id);
    }

    let mut totals = vec![0.0_f32; n];
    for group in &members {
        for (offset, &i) in group.iter().enumerate() {
            for &j in &group[offset + 1..] {
                let value = cosine(vectors[i], vectors[j]);
                totals[i] += value;
                totals[j] += value;
            }
        }
    }

    clusters
        .iter()
        .zip(totals)
        .map(|(&id, total)| {
            let peers = members[id].len() - 1;
            Membership {
                cluster: id as u64,
                confidence: if peers == 0 {
                    1.0
                } else {
                    total / peers as f32
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn similar_vectors_share_a_cluster() {
        let a = [1.0, 0.0];
        let b = [0.99, 0.141_067];
        let c = [0.0, 1.0];
        let memberships = cluster(&[&c, &a, &b], 0.9);
        let ids: Vec<_> = memberships.iter().map(|m| m.cluster).collect();
        assert_eq!(ids, [0, 1, 1]);
        assert!((memberships[0].confidence - 1.0).abs() < f32::EPSILON);
        assert!((memberships[1].confidence - 0.99).abs() < 1e-3);
    }

    #[rstest]
    fn merging_is_transitive() {
        let a = [1.0, 0.0];
        let b = [0.95, 0.312_25];
        let c = [0.805_5, 0.592_6];
        let ids: Vec<_> = cluster(&[&a, &b, &c], 0.9)
            .iter()
            .map(|m| m.cluster)
            .collect();
        assert_eq!(ids, [0, 0, 0]);
    }

    #[rstest]
    fn confidence_is_mean_peer_similarity() {
        let a = [1.0, 0.0];
        let b = [0.95, 0.312_25];
        let c = [0.805_5, 0.592_6];
        let far = [-1.0, 0.0];
        let memberships = cluster(&[&a, &far, &b, &c], 0.9);
        let expected = |x: &[f32], y: &[f32], z: &[f32]| (cosine(x, y) + cosine(x, z)) / 2.0;
        assert_eq!(memberships[1].cluster, 1);
        assert!((memberships[1].confidence - 1.0).abs() < f32::EPSILON);
        assert!((memberships[0].confidence - expected(&a, &b, &c)).abs() < 1e-6);
        assert!((memberships[2].confidence - expected(&b, &a, &c)).abs() < 1e-6);
        assert!((memberships[3].confidence - expected(&c, &a, &b)).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn cluster_ids_are_dense_by_first_appearance(
            raw in proptest::collection::vec((-1.0f32..1.0, -1.0f32..1.0), 0..20),
        ) {
            let vectors: Vec<[f32; 2]> = raw.iter().map(|&(x, y)| [x, y]).collect();
            let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
            let memberships = cluster(&refs, 0.5);
            prop_assert_eq!(memberships.len(), refs.len());
            let mut highest = None;
            for membership in &memberships {
                match highest {
                    None => prop_assert_eq!(membership.cluster, 0),
                    Some(top) => prop_assert!(membership.cluster <= top + 1),
                }
                highest = Some(highest.map_or(membership.cluster, |top: u64| top.max(membership.cluster)));
            }
        }
    }
}
