//! The sequential-convex-programming solver over simple models.

pub(crate) mod induced;
pub(crate) mod point;
pub(crate) mod scp;
pub(crate) mod search;

use crate::model::StateIndex;
use crate::simple::{SimpleIpomdp, StateKind};

/// A randomised policy over a simple model.
///
/// Two entries per state: for an action state, the probabilities of its two
/// edges (summing to one); for an uncertain state, the first entry is one
/// and the second is unused.
#[derive(Debug, Clone)]
pub(crate) struct Policy {
    data: Vec<f64>,
}

impl Policy {
    /// Creates the uniform policy: both edges of every action state get
    /// probability one half.
    pub(crate) fn uniform(simple: &SimpleIpomdp) -> Self {
        let mut data = vec![0.0; 2 * simple.num_states()];
        for s in simple.states() {
            match simple[s].kind {
                StateKind::Action => {
                    data[2 * s] = 0.5;
                    data[2 * s + 1] = 0.5;
                }
                StateKind::Uncertain => {
                    data[2 * s] = 1.0;
                }
            }
        }
        Self { data }
    }

    /// Returns the probability of the given branch of the given state.
    pub(crate) fn probability(&self, state: StateIndex, branch: usize) -> f64 {
        self.data[2 * state + branch]
    }

    pub(crate) fn set(&mut self, state: StateIndex, branch: usize, probability: f64) {
        self.data[2 * state + branch] = probability;
    }
}

/// Interval witnesses of an evaluation: for every existentially-quantified
/// interior uncertain state, the resolved edge probabilities explaining the
/// value of the induced chain. Used to linearise the bilinear terms of the
/// next step.
#[derive(Debug, Clone)]
pub(crate) struct Witnesses {
    data: Vec<Vec<f64>>,
}

impl Witnesses {
    pub(crate) fn empty(num_states: usize) -> Self {
        Self {
            data: vec![Vec::new(); num_states],
        }
    }

    pub(crate) fn get(&self, state: StateIndex) -> &[f64] {
        &self.data[state]
    }

    pub(crate) fn set(&mut self, state: StateIndex, witness: Vec<f64>) {
        self.data[state] = witness;
    }
}

/// The result of evaluating a policy on the induced chain.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub(crate) values: Vec<f64>,
    pub(crate) witnesses: Witnesses,
}

/// Tests for the policy representation.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::{build_product, SimpleConstructor};
    use crate::model::{ExplicitIpomdp, ExplicitRewards, Interval};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_uniform_policy() {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(1);
        model.add_choice(s0, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s0, vec![(s0, Interval::point(1.0))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.set_initial_state(s0);
        let product = build_product(&model, None::<&ExplicitRewards>, 1);
        let simple =
            SimpleConstructor::new(&product, false).construct(&mut SmallRng::seed_from_u64(0));

        let policy = Policy::uniform(&simple);
        for s in simple.states() {
            match simple[s].kind {
                StateKind::Action => {
                    assert!((policy.probability(s, 0) + policy.probability(s, 1) - 1.0).abs() < 1e-12);
                }
                StateKind::Uncertain => {
                    assert_eq!(policy.probability(s, 0), 1.0);
                }
            }
        }
    }
}
