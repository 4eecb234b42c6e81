//! Quiver library crate for quantitative verification of interval POMDPs.
//!
//! The engine computes the worst- or best-case expected reaching probability
//! or expected cumulative reward achievable by an observation-based
//! controller of fixed memory size, quantifying over the interval
//! uncertainty of the transition probabilities. It builds the product of the
//! model with the controller memory, reduces it to a binary-branching simple
//! model, and optimises the controller by sequential convex programming
//! wrapped in a randomised outer search.

mod constructor;
pub mod idtmc;
pub mod model;
pub mod options;
mod simple;
mod solver;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use constructor::{build_product, lift_state_set};
use idtmc::solver::ValueIteration;
use model::{ExplicitRewards, Ipomdp, MinMax, RewardModel, StateSet};
use options::SolverOptions;
use solver::search::Search;

/// An error of the value-computation engine.
///
/// Numerical failures inside the optimisation are downgraded to early
/// termination of the affected search member; only problems with the input
/// model itself surface as errors.
#[derive(Debug)]
pub enum Error {
    /// The input model violates an admissibility requirement.
    InvalidModel(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModel(reason) => write!(f, "invalid model: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

/// Computes the reachability probability of the target set from the initial
/// state, staying inside the remain set (all states when `None`), under the
/// given objective.
///
/// Uses a controller without memory and the multi-start search. The returned
/// vector has one entry per model state; only the initial state's entry is
/// computed, all others are zero.
///
/// # Errors
///
/// Returns an error if the model fails the admissibility check.
pub fn compute_reach_probs<'a, M: Ipomdp<'a>>(
    model: &'a M,
    remain: Option<&StateSet>,
    target: &StateSet,
    min_max: MinMax,
) -> Result<Vec<f64>, Error> {
    compute_reach_probs_with(model, remain, target, min_max, &SolverOptions::default())
}

/// Computes reachability probabilities like [`compute_reach_probs`], using
/// the given solver options.
///
/// # Errors
///
/// Returns an error if the model fails the admissibility check.
pub fn compute_reach_probs_with<'a, M: Ipomdp<'a>>(
    model: &'a M,
    remain: Option<&StateSet>,
    target: &StateSet,
    min_max: MinMax,
    options: &SolverOptions,
) -> Result<Vec<f64>, Error> {
    validate(model)?;
    let n = model.num_states();
    info!(
        "computing P{}=? reachability for {} states",
        min_max, n
    );
    let remain = match remain {
        Some(set) => set.clone(),
        None => StateSet::full(n),
    };
    let memory = 1;
    let product = build_product(model, None::<&ExplicitRewards>, memory);
    let product_remain = lift_state_set(&remain, memory, n);
    let product_target = lift_state_set(target, memory, n);
    let oracle = ValueIteration::new(options.vi_iterations_probs, options.vi_epsilon);
    let search = Search::new(
        &product,
        &product_remain,
        &product_target,
        min_max,
        false,
        &oracle,
        options,
    );
    let value = search.multi_start(&mut seeded_rng(options));
    let mut result = vec![0.0; n];
    result[model.initial_state()] = value;
    Ok(result)
}

/// Computes the probability of reaching the target set while remaining in
/// the given set of states. Alias for [`compute_reach_probs`].
///
/// # Errors
///
/// Returns an error if the model fails the admissibility check.
pub fn compute_until_probs<'a, M: Ipomdp<'a>>(
    model: &'a M,
    remain: Option<&StateSet>,
    target: &StateSet,
    min_max: MinMax,
) -> Result<Vec<f64>, Error> {
    compute_reach_probs(model, remain, target, min_max)
}

/// Computes the expected cumulative reward until reaching the target set
/// from the initial state, under the given objective.
///
/// Uses a controller with two memory states and the generational search.
/// The returned vector has one entry per model state; only the initial
/// state's entry is computed, all others are zero.
///
/// # Errors
///
/// Returns an error if the model fails the admissibility check.
pub fn compute_reach_rewards<'a, M: Ipomdp<'a>, R: RewardModel>(
    model: &'a M,
    rewards: &R,
    target: &StateSet,
    min_max: MinMax,
) -> Result<Vec<f64>, Error> {
    compute_reach_rewards_with(model, rewards, target, min_max, &SolverOptions::default())
}

/// Computes expected rewards like [`compute_reach_rewards`], using the given
/// solver options.
///
/// # Errors
///
/// Returns an error if the model fails the admissibility check.
pub fn compute_reach_rewards_with<'a, M: Ipomdp<'a>, R: RewardModel>(
    model: &'a M,
    rewards: &R,
    target: &StateSet,
    min_max: MinMax,
    options: &SolverOptions,
) -> Result<Vec<f64>, Error> {
    validate(model)?;
    let n = model.num_states();
    info!("computing R{}=? reachability reward for {} states", min_max, n);
    let memory = 2;
    let product = build_product(model, Some(rewards), memory);
    let product_remain = lift_state_set(&StateSet::full(n), memory, n);
    let product_target = lift_state_set(target, memory, n);
    let oracle = ValueIteration::new(options.vi_iterations_rewards, options.vi_epsilon);
    let search = Search::new(
        &product,
        &product_remain,
        &product_target,
        min_max,
        true,
        &oracle,
        options,
    );
    let value = search.generational(&mut seeded_rng(options));
    let mut result = vec![0.0; n];
    result[model.initial_state()] = value;
    Ok(result)
}

fn seeded_rng(options: &SolverOptions) -> SmallRng {
    match options.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

/// Checks the admissibility of the model: every state has a choice, every
/// interval is a probability interval, every choice admits a distribution
/// inside its intervals, and observation-equal states have equal numbers of
/// choices.
fn validate<'a, M: Ipomdp<'a>>(model: &'a M) -> Result<(), Error> {
    let n = model.num_states();
    if n == 0 {
        return Err(Error::InvalidModel("model has no states".to_owned()));
    }
    if model.initial_state() >= n {
        return Err(Error::InvalidModel(format!(
            "initial state {} out of range",
            model.initial_state()
        )));
    }
    let mut observation_choices: HashMap<usize, usize> = HashMap::new();
    for s in 0..n {
        let choices = model.num_choices(s);
        if choices == 0 {
            return Err(Error::InvalidModel(format!("state {} has no choices", s)));
        }
        match observation_choices.entry(model.observation(s)) {
            Entry::Vacant(entry) => {
                entry.insert(choices);
            }
            Entry::Occupied(entry) => {
                if *entry.get() != choices {
                    return Err(Error::InvalidModel(format!(
                        "states with observation {} have different numbers of choices",
                        model.observation(s)
                    )));
                }
            }
        }
        for a in 0..choices {
            let mut lower_sum = 0.0;
            let mut upper_sum = 0.0;
            for (t, interval) in model.transitions(s, a) {
                if t >= n {
                    return Err(Error::InvalidModel(format!(
                        "choice {} of state {} leads to unknown state {}",
                        a, s, t
                    )));
                }
                if !(0.0 <= interval.lower
                    && interval.lower <= interval.upper
                    && interval.upper <= 1.0)
                {
                    return Err(Error::InvalidModel(format!(
                        "choice {} of state {} carries malformed interval {}",
                        a, s, interval
                    )));
                }
                lower_sum += interval.lower;
                upper_sum += interval.upper;
            }
            if lower_sum > 1.0 + 1e-9 || upper_sum < 1.0 - 1e-9 {
                return Err(Error::InvalidModel(format!(
                    "choice {} of state {} admits no distribution inside its intervals",
                    a, s
                )));
            }
        }
    }
    Ok(())
}

/// Tests for the model admissibility check.
#[cfg(test)]
mod tests {
    use super::*;
    use model::{ExplicitIpomdp, Interval};

    #[test]
    fn test_validate_rejects_empty_intervals() {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        model.add_choice(s0, vec![(s0, Interval::new(0.2, 0.3))]);
        model.set_initial_state(s0);
        assert!(validate(&model).is_err());
    }

    #[test]
    fn test_validate_rejects_observation_mismatch() {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(0);
        model.add_choice(s0, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s0, vec![(s0, Interval::point(1.0))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.set_initial_state(s0);
        assert!(validate(&model).is_err());
    }

    #[test]
    fn test_validate_accepts_admissible_model() {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(1);
        model.add_choice(s0, vec![(s1, Interval::new(0.4, 0.6)), (s0, Interval::new(0.4, 0.6))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.set_initial_state(s0);
        assert!(validate(&model).is_ok());
    }
}
