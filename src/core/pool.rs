use crate::core::assignment::{CostMatrix, Matching};
use crate::models::{ParticipantId, MAX_SCORE};

/// Cost placed on the diagonal; never chosen while any real pairing exists
pub const SELF_COST: f64 = 1.0e9;

/// Default cost of pairing anyone with the phantom
pub const DEFAULT_PHANTOM_COST: f64 = 1_000.0;

/// Cost of a pair that fails the mutual preference check
pub const FORBIDDEN_COST: f64 = 10_000.0;

/// A slot in the solver's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolMember {
    Real(ParticipantId),
    /// Synthetic member added to make an odd pool even
    Phantom,
}

/// One entry of a solved matching, translated back to participants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Pair(ParticipantId, ParticipantId),
    Unmatched(ParticipantId),
}

/// Convert a 0-100 compatibility score into a cost
#[inline]
pub fn score_to_cost(score: f64) -> f64 {
    MAX_SCORE - score.clamp(0.0, MAX_SCORE)
}

/// Pool members plus the square cost matrix the solver consumes
#[derive(Debug, Clone)]
pub struct PreparedPool {
    members: Vec<PoolMember>,
    costs: CostMatrix,
}

impl PreparedPool {
    /// Build the pool for `participants` with `pair_cost(i, j)` giving the
    /// cost between the i-th and j-th participant. An odd pool gets one
    /// phantom whose every edge costs `phantom_cost`.
    pub fn prepare<F>(participants: &[ParticipantId], phantom_cost: f64, pair_cost: F) -> Self
    where
        F: Fn(usize, usize) -> f64,
    {
        let real = participants.len();
        let mut members: Vec<PoolMember> = participants.iter().map(|id| PoolMember::Real(*id)).collect();
        if real % 2 == 1 {
            members.push(PoolMember::Phantom);
        }

        let n = members.len();
        let mut costs = CostMatrix::filled(n, phantom_cost);
        for i in 0..n {
            costs.set(i, i, SELF_COST);
        }
        for i in 0..real {
            for j in 0..real {
                if i != j {
                    costs.set(i, j, pair_cost(i, j));
                }
            }
        }

        Self { members, costs }
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    pub fn costs(&self) -> &CostMatrix {
        &self.costs
    }

    pub fn has_phantom(&self) -> bool {
        self.members.contains(&PoolMember::Phantom)
    }

    /// Translate index pairs back into participant assignments
    pub fn resolve(&self, matching: &Matching) -> Vec<Assignment> {
        matching
            .pairs
            .iter()
            .filter_map(|&(i, j)| match (self.members[i], self.members[j]) {
                (PoolMember::Real(a), PoolMember::Real(b)) => Some(Assignment::Pair(a, b)),
                (PoolMember::Real(a), PoolMember::Phantom) | (PoolMember::Phantom, PoolMember::Real(a)) => {
                    Some(Assignment::Unmatched(a))
                }
                (PoolMember::Phantom, PoolMember::Phantom) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assignment::solve;

    #[test]
    fn test_score_to_cost() {
        assert_eq!(score_to_cost(100.0), 0.0);
        assert_eq!(score_to_cost(30.0), 70.0);
        assert_eq!(score_to_cost(140.0), 0.0);
        assert_eq!(score_to_cost(-5.0), 100.0);
    }

    #[test]
    fn test_even_pool_has_no_phantom() {
        let pool = PreparedPool::prepare(&[1, 2, 3, 4], DEFAULT_PHANTOM_COST, |_, _| 10.0);
        assert!(!pool.has_phantom());
        assert_eq!(pool.costs().size(), 4);
        assert_eq!(pool.costs().get(2, 2), SELF_COST);
    }

    #[test]
    fn test_odd_pool_gets_phantom() {
        let pool = PreparedPool::prepare(&[1, 2, 3], DEFAULT_PHANTOM_COST, |_, _| 10.0);
        assert!(pool.has_phantom());
        assert_eq!(pool.members()[3], PoolMember::Phantom);
        assert_eq!(pool.costs().get(0, 3), DEFAULT_PHANTOM_COST);
        assert_eq!(pool.costs().get(3, 1), DEFAULT_PHANTOM_COST);
    }

    #[test]
    fn test_resolve_emits_unmatched_for_phantom_partner() {
        // Participant 30 is expensive for everyone, so it sits out
        let ids = [10, 20, 30];
        let pool = PreparedPool::prepare(&ids, DEFAULT_PHANTOM_COST, |i, j| {
            if ids[i] == 30 || ids[j] == 30 {
                90.0
            } else {
                5.0
            }
        });

        let matching = solve(pool.costs()).unwrap();
        let assignments = pool.resolve(&matching);

        assert_eq!(assignments.len(), 2);
        assert!(assignments.contains(&Assignment::Pair(10, 20)));
        assert!(assignments.contains(&Assignment::Unmatched(30)));
    }
}
