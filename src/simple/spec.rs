//! Translation of a reachability query onto the simple state space.

use crate::model::{Direction, MinMax, Quantifier, StateSet};
use crate::simple::SimpleIpomdp;

/// A reachability query adapted to a simple model.
///
/// Carries the lifted target and bad sets, the optimisation direction of the
/// controller, the resolution direction and quantifier of the interval
/// adversary, and the constants that depend on whether the query asks for
/// probabilities or expected rewards.
#[derive(Debug, Clone)]
pub(crate) struct SimpleSpecification {
    /// Gadget roots of target product states.
    pub(crate) target: StateSet,
    /// Gadget roots of product states outside the remain set.
    pub(crate) bad: StateSet,
    /// All simple states except the bad ones.
    pub(crate) remain: StateSet,
    /// Optimisation direction of the controller.
    pub(crate) strategy: Direction,
    /// Resolution direction of the interval uncertainty.
    pub(crate) adversary: Direction,
    /// Quantifier of the adversary relative to the controller.
    pub(crate) quantifier: Quantifier,
    /// Whether the query asks for expected rewards instead of probabilities.
    pub(crate) rewards: bool,
    /// The value pinned at target states: 1 for probabilities, 0 for rewards.
    pub(crate) goal_value: f64,
    /// Bounds bracketing the value variables in the linear programs.
    pub(crate) value_bounds: (f64, f64),
}

/// The bracket for value variables of expected-reward queries.
const REWARD_BOUND: f64 = 1e6;

impl SimpleSpecification {
    /// Adapts a query over the product state space to the given simple model.
    ///
    /// Target product states mark their gadget roots as target; product
    /// states outside the remain set mark their gadget roots as bad unless
    /// they are targets (reaching a target always counts). Interior gadget
    /// states and leaves survive the split as remain states.
    pub(crate) fn adapt(
        simple: &SimpleIpomdp,
        product_remain: &StateSet,
        product_target: &StateSet,
        min_max: MinMax,
        rewards: bool,
    ) -> Self {
        let n = simple.num_states();
        let mut target = StateSet::empty(n);
        let mut bad = StateSet::empty(n);
        for p in 0..simple.num_product_states() {
            let root = simple.gadget_root(p);
            if product_target[p] {
                target.insert(root);
            } else if !product_remain[p] {
                bad.insert(root);
            }
        }
        let mut remain = StateSet::full(n);
        for s in bad.states() {
            remain.set(s, false);
        }
        let (goal_value, value_bounds) = if rewards {
            (0.0, (-REWARD_BOUND, REWARD_BOUND))
        } else {
            (1.0, (0.0, 1.0))
        };
        Self {
            target,
            bad,
            remain,
            strategy: min_max.strategy(),
            adversary: min_max.uncertainty(),
            quantifier: min_max.quantifier(),
            rewards,
            goal_value,
            value_bounds,
        }
    }

    /// Returns the penalty sign of the controller direction.
    pub(crate) fn sign(&self) -> f64 {
        self.strategy.sign()
    }

    /// Returns whether the given simple state is interior, i.e. subject to a
    /// Bellman constraint: neither a target nor a bad state.
    pub(crate) fn is_interior(&self, state: usize) -> bool {
        !self.target[state] && !self.bad[state]
    }
}
