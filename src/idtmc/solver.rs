//! Reachability solvers for interval DTMCs.

use log::debug;

use crate::idtmc::IntervalDtmc;
use crate::model::{Direction, Interval, StateIndex, StateSet};

/// A solver computing reachability values of an interval DTMC against the
/// best or worst resolution of the edge intervals.
///
/// Implementations are best-effort numerical oracles: they must accept
/// non-convergence without error and return whatever vector they reached.
pub trait IdtmcSolver {
    /// Computes, per state, the probability of reaching a target state while
    /// staying inside the remain set, with the intervals resolved in the
    /// given direction.
    fn compute_reach_probs(
        &self,
        dtmc: &IntervalDtmc,
        remain: &StateSet,
        target: &StateSet,
        adversary: Direction,
    ) -> Vec<f64>;

    /// Computes, per state, the expected cumulative reward until reaching a
    /// target state, with the intervals resolved in the given direction.
    fn compute_reach_rewards(
        &self,
        dtmc: &IntervalDtmc,
        target: &StateSet,
        adversary: Direction,
    ) -> Vec<f64>;
}

/// Robust value iteration over the interval simplex of every state.
///
/// Each sweep resolves the intervals of a state greedily: all edges start at
/// their lower bounds and the remaining mass is distributed to successors in
/// order of preference, capped by the interval widths. Sweeps stop when the
/// sup-norm difference drops below `epsilon` or after `max_iterations`
/// sweeps, whichever comes first.
pub struct ValueIteration {
    max_iterations: usize,
    epsilon: f64,
}

impl ValueIteration {
    pub fn new(max_iterations: usize, epsilon: f64) -> Self {
        Self {
            max_iterations,
            epsilon,
        }
    }

    fn iterate<F>(&self, dtmc: &IntervalDtmc, mut values: Vec<f64>, update: F) -> Vec<f64>
    where
        F: Fn(StateIndex, &[f64]) -> Option<f64>,
    {
        let n = dtmc.num_states();
        let mut next = values.clone();
        let mut residual = 0.0;
        for _ in 0..self.max_iterations {
            residual = 0.0;
            for s in 0..n {
                let value = match update(s, &values) {
                    Some(value) => value,
                    None => values[s],
                };
                let diff = (value - values[s]).abs();
                if diff > residual {
                    residual = diff;
                }
                next[s] = value;
            }
            std::mem::swap(&mut values, &mut next);
            if residual < self.epsilon {
                return values;
            }
        }
        debug!(
            "value iteration stopped after {} sweeps with residual {}",
            self.max_iterations, residual
        );
        values
    }
}

/// Resolves the intervals of the given edges in the given direction against
/// the value vector and returns the resulting expectation.
pub(crate) fn resolve_intervals(
    edges: &[(StateIndex, Interval)],
    values: &[f64],
    direction: Direction,
) -> f64 {
    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by(|&a, &b| {
        let cmp = values[edges[a].0].total_cmp(&values[edges[b].0]);
        match direction {
            Direction::Minimise => cmp,
            Direction::Maximise => cmp.reverse(),
        }
    });
    let mut mass = 1.0;
    let mut value = 0.0;
    for &(target, interval) in edges {
        mass -= interval.lower;
        value += interval.lower * values[target];
    }
    for &i in &order {
        if mass <= 0.0 {
            break;
        }
        let (target, interval) = edges[i];
        let slack = (interval.upper - interval.lower).min(mass);
        value += slack * values[target];
        mass -= slack;
    }
    value
}

impl IdtmcSolver for ValueIteration {
    fn compute_reach_probs(
        &self,
        dtmc: &IntervalDtmc,
        remain: &StateSet,
        target: &StateSet,
        adversary: Direction,
    ) -> Vec<f64> {
        let n = dtmc.num_states();
        let mut values = vec![0.0; n];
        for s in target.states() {
            values[s] = 1.0;
        }
        self.iterate(dtmc, values, |s, values| {
            if target[s] || !remain[s] {
                None
            } else {
                Some(resolve_intervals(dtmc.edges(s), values, adversary))
            }
        })
    }

    fn compute_reach_rewards(
        &self,
        dtmc: &IntervalDtmc,
        target: &StateSet,
        adversary: Direction,
    ) -> Vec<f64> {
        let values = vec![0.0; dtmc.num_states()];
        self.iterate(dtmc, values, |s, values| {
            if target[s] {
                None
            } else {
                Some(dtmc.reward(s) + resolve_intervals(dtmc.edges(s), values, adversary))
            }
        })
    }
}

/// Tests for robust value iteration.
#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> ValueIteration {
        ValueIteration::new(2000, 1e-9)
    }

    /// State 0 moves to the target 1 or the sink 2 with probability in
    /// [0.4, 0.6] each; states 1 and 2 are absorbing.
    fn branch_chain() -> IntervalDtmc {
        let mut dtmc = IntervalDtmc::new();
        dtmc.add_state(vec![(1, Interval::new(0.4, 0.6)), (2, Interval::new(0.4, 0.6))], 0.0);
        dtmc.add_state(vec![(1, Interval::point(1.0))], 0.0);
        dtmc.add_state(vec![(2, Interval::point(1.0))], 0.0);
        dtmc
    }

    #[test]
    fn test_reach_probs_bounds() {
        let dtmc = branch_chain();
        let remain = StateSet::full(3);
        let mut target = StateSet::empty(3);
        target.insert(1);
        let max = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Maximise);
        let min = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Minimise);
        assert!((max[0] - 0.6).abs() < 1e-9);
        assert!((min[0] - 0.4).abs() < 1e-9);
        assert!((max[1] - 1.0).abs() < 1e-9);
        assert!(max[2].abs() < 1e-9);
    }

    #[test]
    fn test_reach_probs_remain() {
        let dtmc = branch_chain();
        // state 0 is outside the remain set, so its value is pinned at zero
        let mut remain = StateSet::empty(3);
        remain.insert(1);
        remain.insert(2);
        let mut target = StateSet::empty(3);
        target.insert(1);
        let values = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Maximise);
        assert!(values[0].abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reach_probs_loop() {
        // state 0 retries through a self-loop; the reach probability is 1
        // under both resolutions
        let mut dtmc = IntervalDtmc::new();
        dtmc.add_state(vec![(1, Interval::new(0.4, 0.6)), (0, Interval::new(0.4, 0.6))], 0.0);
        dtmc.add_state(vec![(1, Interval::point(1.0))], 0.0);
        let remain = StateSet::full(2);
        let mut target = StateSet::empty(2);
        target.insert(1);
        let max = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Maximise);
        let min = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Minimise);
        assert!((max[0] - 1.0).abs() < 1e-6);
        assert!((min[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reach_rewards_geometric() {
        // state 0 collects reward 1 and self-loops with probability in
        // [0.0, 0.5]; the expected reward is 1/(1-p) at the resolved p
        let mut dtmc = IntervalDtmc::new();
        dtmc.add_state(vec![(0, Interval::new(0.0, 0.5)), (1, Interval::new(0.5, 1.0))], 1.0);
        dtmc.add_state(vec![(1, Interval::point(1.0))], 0.0);
        let mut target = StateSet::empty(2);
        target.insert(1);
        let max = ValueIteration::new(5000, 1e-12)
            .compute_reach_rewards(&dtmc, &target, Direction::Maximise);
        let min = ValueIteration::new(5000, 1e-12)
            .compute_reach_rewards(&dtmc, &target, Direction::Minimise);
        assert!((max[0] - 2.0).abs() < 1e-6);
        assert!((min[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_intervals_coincide() {
        let mut dtmc = IntervalDtmc::new();
        dtmc.add_state(vec![(1, Interval::point(0.3)), (2, Interval::point(0.7))], 0.0);
        dtmc.add_state(vec![(1, Interval::point(1.0))], 0.0);
        dtmc.add_state(vec![(2, Interval::point(1.0))], 0.0);
        let remain = StateSet::full(3);
        let mut target = StateSet::empty(3);
        target.insert(1);
        let max = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Maximise);
        let min = solver().compute_reach_probs(&dtmc, &remain, &target, Direction::Minimise);
        assert!((max[0] - min[0]).abs() < 1e-12);
        assert!((max[0] - 0.3).abs() < 1e-9);
    }
}
