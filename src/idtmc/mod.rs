//! Interval DTMCs and their reachability solvers.

pub mod solver;

use tinyvec::TinyVec;

use crate::model::{Interval, StateIndex};

/// A Markov chain whose edge probabilities are intervals.
///
/// Each state carries a reward, collected once per visit; probability
/// queries ignore it. Reachability values are computed against the best or
/// worst resolution of the intervals by a [`solver::IdtmcSolver`].
#[derive(Debug, Clone, Default)]
pub struct IntervalDtmc {
    states: Vec<DtmcState>,
}

#[derive(Debug, Clone, Default)]
struct DtmcState {
    edges: TinyVec<[(StateIndex, Interval); 2]>,
    reward: f64,
}

impl IntervalDtmc {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty chain with capacity for `n` states.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            states: Vec::with_capacity(n),
        }
    }

    /// Adds a new state with the given interval-weighted edges and reward,
    /// and returns its index.
    pub fn add_state(
        &mut self,
        edges: impl IntoIterator<Item = (StateIndex, Interval)>,
        reward: f64,
    ) -> StateIndex {
        let index = self.states.len();
        self.states.push(DtmcState {
            edges: edges.into_iter().collect(),
            reward,
        });
        index
    }

    /// Returns the number of states of the chain.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Returns the interval-weighted edges of the given state.
    pub fn edges(&self, state: StateIndex) -> &[(StateIndex, Interval)] {
        &self.states[state].edges
    }

    /// Returns the reward of the given state.
    pub fn reward(&self, state: StateIndex) -> f64 {
        self.states[state].reward
    }
}
