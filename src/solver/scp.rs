//! One linearised program of the sequential-convex-programming loop.
//!
//! The bilinear Bellman terms are expanded to first order around the current
//! point: the factor being solved for stays exact, the other factor is the
//! constant taken from the last iterate. A multiplicative trust region
//! bounds the policy variables and soft penalties keep the program feasible
//! away from the linearisation point.

use good_lp::{
    constraint, default_solver, variable, Constraint, Expression, ProblemVariables,
    ResolutionError, Solution, SolverModel, Variable,
};
use log::trace;

use crate::model::{Direction, Quantifier};
use crate::options::SolverOptions;
use crate::simple::spec::SimpleSpecification;
use crate::simple::{SimpleIpomdp, StateKind};
use crate::solver::{Policy, Witnesses};

pub(crate) struct LinearisedStep<'a> {
    simple: &'a SimpleIpomdp,
    spec: &'a SimpleSpecification,
    options: &'a SolverOptions,
}

impl<'a> LinearisedStep<'a> {
    pub(crate) fn new(
        simple: &'a SimpleIpomdp,
        spec: &'a SimpleSpecification,
        options: &'a SolverOptions,
    ) -> Self {
        Self {
            simple,
            spec,
            options,
        }
    }

    /// Builds and solves the program around the current point
    /// `(policy, values, witnesses)` and returns the policy read back from
    /// the optimum. The value variables of the program are only linearised
    /// estimates; callers re-evaluate the returned policy on the induced
    /// chain.
    pub(crate) fn solve(
        &self,
        policy: &Policy,
        values: &[f64],
        witnesses: &Witnesses,
        trust_region: f64,
    ) -> Result<Policy, ResolutionError> {
        let simple = self.simple;
        let spec = self.spec;
        let n = simple.num_states();
        let sign = spec.sign();
        let box_factor = 1.0 + trust_region;

        let mut vars = ProblemVariables::new();
        let (low, high) = spec.value_bounds;
        let value_vars: Vec<Variable> = (0..n)
            .map(|_| vars.add(variable().min(low).max(high)))
            .collect();

        // one shared pair of policy variables per observation with action
        // states; sharing the variables is the observation-based policy
        // constraint, with the class leader supplying the current point
        let leaders = simple.observation_leaders();
        let mut policy_vars: Vec<Option<[Variable; 2]>> = vec![None; simple.num_observations()];
        for (observation, &leader) in leaders.iter().enumerate() {
            if simple[leader].kind == StateKind::Action {
                let pair = [
                    self.policy_variable(&mut vars, policy.probability(leader, 0), box_factor),
                    self.policy_variable(&mut vars, policy.probability(leader, 1), box_factor),
                ];
                policy_vars[observation] = Some(pair);
            }
        }

        let mut penalties: Vec<Variable> = Vec::new();
        let mut penalty_vars: Vec<Option<Variable>> = vec![None; n];
        let mut interval_vars: Vec<Vec<Variable>> = vec![Vec::new(); n];
        let mut dual_vars: Vec<Vec<Variable>> = vec![Vec::new(); n];
        for s in 0..n {
            if !spec.is_interior(s) {
                continue;
            }
            match simple[s].kind {
                StateKind::Action => {
                    let penalty = vars.add(variable().min(0.0));
                    penalty_vars[s] = Some(penalty);
                    penalties.push(penalty);
                }
                StateKind::Uncertain => match spec.quantifier {
                    Quantifier::Exists => {
                        let penalty = vars.add(variable().min(0.0));
                        penalty_vars[s] = Some(penalty);
                        penalties.push(penalty);
                        interval_vars[s] = simple[s]
                            .edges
                            .iter()
                            .map(|edge| {
                                vars.add(
                                    variable()
                                        .min(edge.interval.lower)
                                        .max(edge.interval.upper),
                                )
                            })
                            .collect();
                    }
                    Quantifier::Forall => {
                        let count = 2 * simple[s].edges.len() + 2;
                        dual_vars[s] = (0..count).map(|_| vars.add(variable().min(0.0))).collect();
                    }
                },
            }
        }

        // objective: the value at the initial state, with the penalties
        // always working against the optimisation direction
        let mut objective = Expression::default();
        objective += 1.0 * value_vars[simple.initial_state()];
        for &penalty in &penalties {
            objective += (-sign * self.options.penalty_weight) * penalty;
        }
        let mut model = match spec.strategy {
            Direction::Maximise => vars.maximise(objective),
            Direction::Minimise => vars.minimise(objective),
        }
        .using(default_solver);

        // pin goal states to the goal constant and bad states to zero
        for s in spec.target.states() {
            model = model.with(constraint::eq(1.0 * value_vars[s], spec.goal_value));
        }
        for s in spec.bad.states() {
            model = model.with(constraint::eq(1.0 * value_vars[s], 0.0));
        }

        // policy validity, once per observation class
        for pair in policy_vars.iter().flatten() {
            model = model.with(constraint::eq(1.0 * pair[0] + 1.0 * pair[1], 1.0));
        }

        for s in 0..n {
            if !spec.is_interior(s) {
                continue;
            }
            let state = &simple[s];
            match state.kind {
                StateKind::Action => {
                    let pair =
                        policy_vars[state.observation].expect("action state without policy pair");
                    let penalty = penalty_vars[s].expect("interior state without penalty");
                    let mut lhs = Expression::default();
                    lhs += -1.0 * value_vars[s];
                    lhs += sign * penalty;
                    let mut rhs = -state.state_reward;
                    for (k, edge) in state.edges.iter().enumerate() {
                        let current = policy.probability(s, k);
                        let current_value = values[edge.target];
                        lhs += current * value_vars[edge.target];
                        lhs += (current_value + edge.reward) * pair[k];
                        rhs += current * current_value;
                    }
                    model = model.with(self.relation(lhs, rhs));
                }
                StateKind::Uncertain => match spec.quantifier {
                    Quantifier::Exists => {
                        let penalty = penalty_vars[s].expect("interior state without penalty");
                        let witness = witnesses.get(s);
                        let mut lhs = Expression::default();
                        lhs += -1.0 * value_vars[s];
                        lhs += sign * penalty;
                        let mut total = Expression::default();
                        let mut rhs = -state.state_reward;
                        for ((edge, &interval_var), &current) in state
                            .edges
                            .iter()
                            .zip(interval_vars[s].iter())
                            .zip(witness.iter())
                        {
                            let current_value = values[edge.target];
                            lhs += current_value * interval_var;
                            lhs += current * value_vars[edge.target];
                            rhs += current_value * current;
                            total += 1.0 * interval_var;
                        }
                        model = model
                            .with(self.relation(lhs, rhs))
                            .with(constraint::eq(total, 1.0));
                    }
                    Quantifier::Forall => {
                        // the adversary polytope l <= x <= u, sum x = 1 enters
                        // through its dual: one variable per polytope row and
                        // the constraint vector g = (-l_1, u_1, ..., -1, 1)
                        let duals = &dual_vars[s];
                        let count = state.edges.len();
                        let lambda_pos = duals[2 * count];
                        let lambda_neg = duals[2 * count + 1];
                        for (i, edge) in state.edges.iter().enumerate() {
                            let mut row = Expression::default();
                            row += 1.0 * duals[2 * i];
                            row += -1.0 * duals[2 * i + 1];
                            row += 1.0 * lambda_pos;
                            row += -1.0 * lambda_neg;
                            row += -sign * value_vars[edge.target];
                            model = model.with(constraint::eq(row, 0.0));
                        }
                        let mut lhs = Expression::default();
                        lhs += -1.0 * value_vars[s];
                        for (i, edge) in state.edges.iter().enumerate() {
                            lhs += sign * edge.interval.lower * duals[2 * i];
                            lhs += -sign * edge.interval.upper * duals[2 * i + 1];
                        }
                        lhs += sign * lambda_pos;
                        lhs += -sign * lambda_neg;
                        model = model.with(self.relation(lhs, -state.state_reward));
                    }
                },
            }
        }

        let solution = model.solve()?;
        trace!(
            "linearised program solved, estimated value {}",
            solution.value(value_vars[simple.initial_state()])
        );

        // read the optimised policy back through the observation classes
        let mut next = policy.clone();
        for s in 0..n {
            if simple[s].kind == StateKind::Action {
                let pair =
                    policy_vars[simple[s].observation].expect("action state without policy pair");
                for (k, &var) in pair.iter().enumerate() {
                    let probability = solution.value(var).max(0.0).min(1.0);
                    next.set(s, k, probability);
                }
            }
        }
        Ok(next)
    }

    fn relation(&self, lhs: Expression, rhs: f64) -> Constraint {
        match self.spec.strategy {
            Direction::Maximise => constraint::geq(lhs, rhs),
            Direction::Minimise => constraint::leq(lhs, rhs),
        }
    }

    fn policy_variable(
        &self,
        vars: &mut ProblemVariables,
        current: f64,
        box_factor: f64,
    ) -> Variable {
        let lower = (current / box_factor).max(self.options.policy_floor);
        let upper = (current * box_factor).min(1.0);
        vars.add(variable().min(lower).max(upper))
    }
}
