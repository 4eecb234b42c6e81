//! A single local search driven by sequential convex programming.

use log::{trace, warn};

use crate::idtmc::solver::IdtmcSolver;
use crate::options::SolverOptions;
use crate::simple::spec::SimpleSpecification;
use crate::simple::SimpleIpomdp;
use crate::solver::induced::InducedEvaluator;
use crate::solver::scp::LinearisedStep;
use crate::solver::{Policy, Witnesses};

/// One member of the outer search: a simple model with its own gadget
/// permutation, a current policy with its evaluation, and the trust-region
/// state of the local optimisation.
pub(crate) struct SolutionPoint<'a, O> {
    simple: SimpleIpomdp,
    spec: SimpleSpecification,
    oracle: &'a O,
    options: &'a SolverOptions,
    policy: Policy,
    values: Vec<f64>,
    witnesses: Witnesses,
    trust_region: f64,
    iterations_left: usize,
    objective: f64,
    done: bool,
}

impl<'a, O: IdtmcSolver> SolutionPoint<'a, O> {
    /// Creates a point over the given simple model, starting from the
    /// uniform policy evaluated on its induced chain.
    pub(crate) fn new(
        simple: SimpleIpomdp,
        spec: SimpleSpecification,
        oracle: &'a O,
        options: &'a SolverOptions,
    ) -> Self {
        let policy = Policy::uniform(&simple);
        let evaluation = InducedEvaluator::new(&simple, &spec, oracle, options).evaluate(&policy);
        let objective = evaluation.values[simple.initial_state()];
        Self {
            simple,
            spec,
            oracle,
            options,
            policy,
            values: evaluation.values,
            witnesses: evaluation.witnesses,
            trust_region: options.trust_region_initial,
            iterations_left: options.max_iterations,
            objective,
            done: false,
        }
    }

    /// Returns the current objective, the evaluated value at the initial
    /// state.
    pub(crate) fn objective(&self) -> f64 {
        self.objective
    }

    /// Performs one step towards the local optimum: solve the linearised
    /// program around the current point, re-evaluate the candidate policy on
    /// its induced chain, and accept it only on strict improvement in the
    /// controller's direction. The trust region grows on acceptance and
    /// shrinks on rejection.
    ///
    /// Returns `true` once the point is done: the trust region collapsed,
    /// the iteration budget ran out, or a program failed.
    pub(crate) fn advance(&mut self) -> bool {
        if self.done {
            return true;
        }
        if self.trust_region <= self.options.trust_region_threshold || self.iterations_left == 0 {
            self.done = true;
            return true;
        }

        let step = LinearisedStep::new(&self.simple, &self.spec, self.options);
        let candidate =
            match step.solve(&self.policy, &self.values, &self.witnesses, self.trust_region) {
                Ok(candidate) => candidate,
                Err(error) => {
                    warn!("abandoning solution point, linearised program failed: {}", error);
                    self.done = true;
                    return true;
                }
            };

        let evaluation = InducedEvaluator::new(&self.simple, &self.spec, self.oracle, self.options)
            .evaluate(&candidate);
        let candidate_objective = evaluation.values[self.simple.initial_state()];
        if self.spec.strategy.improves(candidate_objective, self.objective) {
            self.policy = candidate;
            self.values = evaluation.values;
            self.witnesses = evaluation.witnesses;
            self.objective = candidate_objective;
            self.trust_region *= self.options.trust_region_factor;
            trace!(
                "accepted step, objective {}, trust region {}",
                self.objective,
                self.trust_region
            );
        } else {
            self.trust_region /= self.options.trust_region_factor;
            trace!(
                "rejected step with objective {}, trust region {}",
                candidate_objective,
                self.trust_region
            );
        }
        self.iterations_left -= 1;
        false
    }

    /// Drives the point until it reports done.
    pub(crate) fn converge(&mut self) {
        while !self.advance() {}
    }
}
