//! Evaluation of a policy through the induced interval DTMC.

use good_lp::{constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError,
    Solution, SolverModel};
use log::trace;

use crate::idtmc::solver::IdtmcSolver;
use crate::idtmc::IntervalDtmc;
use crate::model::{Interval, Quantifier, StateIndex};
use crate::options::SolverOptions;
use crate::simple::spec::SimpleSpecification;
use crate::simple::{SimpleEdge, SimpleIpomdp, StateKind};
use crate::solver::{Evaluation, Policy, Witnesses};

/// The bracket half-width beyond which witness recovery gives up on the
/// program and falls back to a greedy feasible point.
const BRACKET_LIMIT: f64 = 1e15;

/// Builds the interval DTMC induced by a policy, delegates the reachability
/// computation to the oracle, and recovers interval witnesses for
/// existentially-quantified uncertain states.
pub(crate) struct InducedEvaluator<'a, O> {
    simple: &'a SimpleIpomdp,
    spec: &'a SimpleSpecification,
    oracle: &'a O,
    options: &'a SolverOptions,
}

impl<'a, O: IdtmcSolver> InducedEvaluator<'a, O> {
    pub(crate) fn new(
        simple: &'a SimpleIpomdp,
        spec: &'a SimpleSpecification,
        oracle: &'a O,
        options: &'a SolverOptions,
    ) -> Self {
        Self {
            simple,
            spec,
            oracle,
            options,
        }
    }

    /// Evaluates the given policy: the returned values are the oracle's
    /// answer on the induced chain, not the linearised estimate of the
    /// program that produced the policy.
    pub(crate) fn evaluate(&self, policy: &Policy) -> Evaluation {
        let dtmc = self.induced_chain(policy);
        let values = if self.spec.rewards {
            self.oracle
                .compute_reach_rewards(&dtmc, &self.spec.target, self.spec.adversary)
        } else {
            self.oracle.compute_reach_probs(
                &dtmc,
                &self.spec.remain,
                &self.spec.target,
                self.spec.adversary,
            )
        };
        let mut witnesses = Witnesses::empty(self.simple.num_states());
        if self.spec.quantifier == Quantifier::Exists {
            for s in self.simple.states() {
                if self.simple[s].kind == StateKind::Uncertain && self.spec.is_interior(s) {
                    witnesses.set(s, self.recover_witness(&dtmc, s, &values));
                }
            }
        }
        Evaluation { values, witnesses }
    }

    /// Builds the induced chain: uncertain states keep their edge intervals,
    /// action states emit two point intervals weighted by the policy.
    /// Transition rewards of action edges fold into the state reward,
    /// weighted by the policy.
    fn induced_chain(&self, policy: &Policy) -> IntervalDtmc {
        let mut dtmc = IntervalDtmc::with_capacity(self.simple.num_states());
        for s in self.simple.states() {
            let state = &self.simple[s];
            match state.kind {
                StateKind::Action => {
                    let mut reward = state.state_reward;
                    let mut edges = Vec::with_capacity(state.edges.len());
                    for (k, edge) in state.edges.iter().enumerate() {
                        let probability = policy.probability(s, k);
                        reward += probability * edge.reward;
                        edges.push((edge.target, Interval::point(probability)));
                    }
                    dtmc.add_state(edges, reward);
                }
                StateKind::Uncertain => {
                    dtmc.add_state(
                        state.edges.iter().map(|edge| (edge.target, edge.interval)),
                        state.state_reward,
                    );
                }
            }
        }
        dtmc
    }

    /// Recovers edge probabilities inside the declared intervals that explain
    /// the oracle's value at the given uncertain state: they must sum to one
    /// and reproduce `values[s] - r(s)` as the successor expectation. Both
    /// equalities are relaxed to a ±ε bracket that doubles on infeasibility.
    fn recover_witness(&self, dtmc: &IntervalDtmc, s: StateIndex, values: &[f64]) -> Vec<f64> {
        let edges = &self.simple[s].edges;
        let expectation = values[s] - dtmc.reward(s);
        let mut bracket = self.options.witness_bracket;
        while bracket <= BRACKET_LIMIT {
            match solve_bracket(edges, values, expectation, bracket) {
                Ok(witness) => return witness,
                Err(error) => {
                    trace!(
                        "witness recovery at state {} infeasible with bracket {}: {}",
                        s,
                        bracket,
                        error
                    );
                    bracket *= 2.0;
                }
            }
        }
        greedy_witness(edges)
    }
}

fn solve_bracket(
    edges: &[SimpleEdge],
    values: &[f64],
    expectation: f64,
    bracket: f64,
) -> Result<Vec<f64>, ResolutionError> {
    let mut vars = ProblemVariables::new();
    let x: Vec<_> = edges
        .iter()
        .map(|edge| vars.add(variable().min(edge.interval.lower).max(edge.interval.upper)))
        .collect();
    let mut total = Expression::default();
    let mut weighted = Expression::default();
    for (&var, edge) in x.iter().zip(edges.iter()) {
        total += 1.0 * var;
        weighted += values[edge.target] * var;
    }
    let solution = vars
        .minimise(Expression::default())
        .using(default_solver)
        .with(constraint::geq(total.clone(), 1.0 - bracket))
        .with(constraint::leq(total, 1.0 + bracket))
        .with(constraint::geq(weighted.clone(), expectation - bracket))
        .with(constraint::leq(weighted, expectation + bracket))
        .solve()?;
    Ok(x.iter().map(|&var| solution.value(var)).collect())
}

/// A feasible point of the interval simplex: lower bounds plus the missing
/// mass distributed in edge order, capped by the interval widths.
fn greedy_witness(edges: &[SimpleEdge]) -> Vec<f64> {
    let mut witness: Vec<f64> = edges.iter().map(|edge| edge.interval.lower).collect();
    let mut mass = 1.0 - witness.iter().sum::<f64>();
    for (value, edge) in witness.iter_mut().zip(edges.iter()) {
        if mass <= 0.0 {
            break;
        }
        let slack = (edge.interval.upper - edge.interval.lower).min(mass);
        *value += slack;
        mass -= slack;
    }
    witness
}

/// Tests for the induced-chain evaluation.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::{build_product, SimpleConstructor};
    use crate::idtmc::solver::ValueIteration;
    use crate::model::{ExplicitIpomdp, ExplicitRewards, Ipomdp, MinMax, StateSet};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// State 0 chooses between a sure step to the target 1 and a sure step
    /// to the sink 2.
    fn choice_model() -> ExplicitIpomdp {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(1);
        let s2 = model.add_state(2);
        model.add_choice(s0, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s0, vec![(s2, Interval::point(1.0))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s2, vec![(s2, Interval::point(1.0))]);
        model.set_initial_state(s0);
        model
    }

    fn setup(
        model: &ExplicitIpomdp,
        target_states: &[usize],
    ) -> (crate::constructor::Product, StateSet, StateSet) {
        let product = build_product(model, None::<&ExplicitRewards>, 1);
        let n = product.model.num_states();
        let mut target = StateSet::empty(n);
        for &s in target_states {
            target.insert(s);
        }
        let remain = StateSet::full(n);
        (product, remain, target)
    }

    #[test]
    fn test_dirac_policy_round_trip() {
        // a Dirac policy through the gadget reproduces the value of the
        // corresponding deterministic choice
        let model = choice_model();
        let (product, remain, target) = setup(&model, &[1]);
        let simple =
            SimpleConstructor::new(&product, false).construct(&mut SmallRng::seed_from_u64(0));
        let spec =
            SimpleSpecification::adapt(&simple, &remain, &target, MinMax::max_max(), false);
        let options = SolverOptions::default();
        let oracle = ValueIteration::new(2000, 1e-9);
        let evaluator = InducedEvaluator::new(&simple, &spec, &oracle, &options);

        let mut policy = Policy::uniform(&simple);
        let root = simple.initial_state();
        // first branch leads to the leaf of the first choice
        policy.set(root, 0, 1.0);
        policy.set(root, 1, 0.0);
        let evaluation = evaluator.evaluate(&policy);
        assert!((evaluation.values[root] - 1.0).abs() < 1e-9);

        policy.set(root, 0, 0.0);
        policy.set(root, 1, 1.0);
        let evaluation = evaluator.evaluate(&policy);
        assert!(evaluation.values[root].abs() < 1e-9);
    }

    #[test]
    fn test_witness_recovery() {
        // one uncertain state with interval edges: the recovered witness is
        // a distribution inside the intervals matching the oracle's value
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(1);
        let s2 = model.add_state(2);
        model.add_choice(s0, vec![(s1, Interval::new(0.4, 0.6)), (s2, Interval::new(0.4, 0.6))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s2, vec![(s2, Interval::point(1.0))]);
        model.set_initial_state(s0);
        let (product, remain, target) = setup(&model, &[1]);
        let simple =
            SimpleConstructor::new(&product, false).construct(&mut SmallRng::seed_from_u64(0));
        let spec =
            SimpleSpecification::adapt(&simple, &remain, &target, MinMax::max_max(), false);
        let options = SolverOptions::default();
        let oracle = ValueIteration::new(2000, 1e-9);
        let evaluator = InducedEvaluator::new(&simple, &spec, &oracle, &options);

        let policy = Policy::uniform(&simple);
        let evaluation = evaluator.evaluate(&policy);
        let root = simple.initial_state();
        assert!((evaluation.values[root] - 0.6).abs() < 1e-6);
        let witness = evaluation.witnesses.get(root);
        assert_eq!(witness.len(), 2);
        assert!((witness[0] + witness[1] - 1.0).abs() < 1e-4);
        assert!((witness[0] - 0.6).abs() < 1e-4);
        for (value, edge) in witness.iter().zip(simple[root].edges.iter()) {
            assert!(*value >= edge.interval.lower - 1e-9);
            assert!(*value <= edge.interval.upper + 1e-9);
        }
    }

    #[test]
    fn test_greedy_witness() {
        let edges = vec![
            SimpleEdge {
                target: 0,
                interval: Interval::new(0.2, 0.5),
                reward: 0.0,
            },
            SimpleEdge {
                target: 1,
                interval: Interval::new(0.1, 0.9),
                reward: 0.0,
            },
        ];
        let witness = greedy_witness(&edges);
        assert!((witness.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(witness[0] >= 0.2 && witness[0] <= 0.5);
        assert!(witness[1] >= 0.1 && witness[1] <= 0.9);
    }
}
