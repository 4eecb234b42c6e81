//! Interval POMDP models and the vocabulary shared by all solver components.

use std::fmt;
use std::ops::Index;

use fixedbitset::FixedBitSet;

/// The type for an index of a state in a model.
pub type StateIndex = usize;
/// The type for an index of a choice of a state.
pub type ChoiceIndex = usize;
/// The type for an observation label of a state.
pub type Observation = usize;

/// A closed probability interval attached to a transition.
///
/// The invariant `0 <= lower <= upper <= 1` holds for every interval of a
/// probabilistic transition. Edges of action states in the simple model carry
/// the sentinel interval `[-1, 1]`, which has no probability content.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Interval {
    /// The lower bound of the interval.
    pub lower: f64,
    /// The upper bound of the interval.
    pub upper: f64,
}

impl Interval {
    /// The sentinel interval labelling edges of action states.
    pub(crate) const SENTINEL: Self = Self {
        lower: -1.0,
        upper: 1.0,
    };

    /// Creates a new interval with the given bounds.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Creates a degenerate interval containing exactly the given probability.
    pub fn point(probability: f64) -> Self {
        Self {
            lower: probability,
            upper: probability,
        }
    }

    /// Returns whether the interval has equal bounds.
    pub fn is_point(&self) -> bool {
        self.lower == self.upper
    }

    /// Returns whether the given value lies inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// An optimisation direction, for the controller or for the interval adversary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Minimise the value.
    Minimise,
    /// Maximise the value.
    Maximise,
}

impl std::ops::Not for Direction {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Minimise => Self::Maximise,
            Self::Maximise => Self::Minimise,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Self::Minimise => "min",
            Self::Maximise => "max",
        };
        write!(f, "{}", string)
    }
}

impl Direction {
    /// Returns the sign of the direction: `+1` for maximise, `-1` for minimise.
    ///
    /// The sign orients inequality directions and penalty terms in the
    /// linearised programs.
    pub fn sign(self) -> f64 {
        match self {
            Self::Minimise => -1.0,
            Self::Maximise => 1.0,
        }
    }

    /// Returns whether `candidate` is a strict improvement over `current`
    /// in this direction.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Minimise => candidate < current,
            Self::Maximise => candidate > current,
        }
    }

    /// Returns the better of the two values in this direction.
    pub fn better(self, a: f64, b: f64) -> f64 {
        if self.improves(b, a) {
            b
        } else {
            a
        }
    }
}

/// Quantification over the interval uncertainty relative to the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Quantifier {
    /// The adversary cooperates with the controller; interval probabilities
    /// become decision variables.
    Exists,
    /// The adversary opposes the controller; interval probabilities are
    /// resolved against it and enter the programs through their dual.
    Forall,
}

/// The objective of a computation: a direction for the controller and a
/// direction for the resolution of the interval uncertainty.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MinMax {
    strategy: Direction,
    uncertainty: Direction,
}

impl MinMax {
    /// Creates an objective with the given controller and uncertainty directions.
    pub fn new(strategy: Direction, uncertainty: Direction) -> Self {
        Self {
            strategy,
            uncertainty,
        }
    }

    /// Maximising controller against best-case intervals.
    pub fn max_max() -> Self {
        Self::new(Direction::Maximise, Direction::Maximise)
    }

    /// Maximising controller against worst-case intervals.
    pub fn max_min() -> Self {
        Self::new(Direction::Maximise, Direction::Minimise)
    }

    /// Minimising controller against best-case (for the controller) intervals.
    pub fn min_min() -> Self {
        Self::new(Direction::Minimise, Direction::Minimise)
    }

    /// Minimising controller against worst-case intervals.
    pub fn min_max() -> Self {
        Self::new(Direction::Minimise, Direction::Maximise)
    }

    /// Returns the optimisation direction of the controller.
    pub fn strategy(&self) -> Direction {
        self.strategy
    }

    /// Returns the resolution direction of the interval uncertainty.
    pub fn uncertainty(&self) -> Direction {
        self.uncertainty
    }

    /// Returns the adversary quantifier: existential when the uncertainty is
    /// resolved in the controller's direction, universal otherwise.
    pub fn quantifier(&self) -> Quantifier {
        if self.strategy == self.uncertainty {
            Quantifier::Exists
        } else {
            Quantifier::Forall
        }
    }
}

impl fmt::Display for MinMax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy, self.uncertainty)
    }
}

/// A set of states of a model, backed by a bitset.
///
/// A state set can be indexed by a state index, which returns `true` if the
/// state is in the set.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StateSet {
    data: FixedBitSet,
}

impl Index<StateIndex> for StateSet {
    type Output = bool;

    fn index(&self, index: StateIndex) -> &Self::Output {
        &self.data[index]
    }
}

impl StateSet {
    /// Creates an empty set over `n` states.
    pub fn empty(n: usize) -> Self {
        Self {
            data: FixedBitSet::with_capacity(n),
        }
    }

    /// Creates the full set over `n` states.
    pub fn full(n: usize) -> Self {
        let mut data = FixedBitSet::with_capacity(n);
        data.insert_range(..);
        Self { data }
    }

    /// Inserts the given state into the set.
    pub fn insert(&mut self, index: StateIndex) {
        self.data.insert(index);
    }

    /// Sets membership of the given state.
    pub fn set(&mut self, index: StateIndex, value: bool) {
        self.data.set(index, value);
    }

    /// Returns the number of states in the set.
    pub fn size(&self) -> usize {
        self.data.count_ones(..)
    }

    /// Returns an iterator over the states in the set.
    pub fn states(&self) -> fixedbitset::Ones {
        self.data.ones()
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for index in self.data.ones() {
            write!(f, " {}", index)?;
        }
        write!(f, " }}")?;
        Ok(())
    }
}

impl std::iter::Extend<StateIndex> for StateSet {
    fn extend<T: IntoIterator<Item = StateIndex>>(&mut self, iter: T) {
        self.data.extend(iter)
    }
}

/// An interval POMDP, the input model of all computations.
///
/// States are indexed consecutively from zero. Each state has an ordered list
/// of choices; each choice induces a set of successor states weighted by
/// probability intervals. Each state carries an observation label; states
/// sharing an observation must offer the same number of choices, as an
/// observation-based controller cannot distinguish them.
pub trait Ipomdp<'a> {
    /// The type for the iterator returned by [`Self::transitions`].
    type Transitions: Iterator<Item = (StateIndex, Interval)> + 'a;

    /// Returns the number of states of the model.
    fn num_states(&self) -> usize;
    /// Returns the index of the initial state.
    fn initial_state(&self) -> StateIndex;
    /// Returns the number of choices of the given state.
    fn num_choices(&self, state: StateIndex) -> usize;
    /// Returns an iterator over the interval-weighted transitions of the
    /// given choice of the given state.
    fn transitions(&'a self, state: StateIndex, choice: ChoiceIndex) -> Self::Transitions;
    /// Returns the observation label of the given state.
    fn observation(&self, state: StateIndex) -> Observation;
}

/// A reward structure over an interval POMDP.
pub trait RewardModel {
    /// Returns the reward collected in the given state.
    fn state_reward(&self, state: StateIndex) -> f64;
    /// Returns the reward collected when taking the given choice in the
    /// given state.
    fn transition_reward(&self, state: StateIndex, choice: ChoiceIndex) -> f64;
}

#[derive(Debug, Clone)]
struct ExplicitState {
    observation: Observation,
    choices: Vec<Vec<(StateIndex, Interval)>>,
}

/// A vector-backed interval POMDP.
///
/// Used for the product models built by the engine and as the simplest way
/// to hand a model to the caller-facing operations.
#[derive(Debug, Clone)]
pub struct ExplicitIpomdp {
    states: Vec<ExplicitState>,
    initial: StateIndex,
}

impl Default for ExplicitIpomdp {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            initial: 0,
        }
    }
}

impl ExplicitIpomdp {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new state with the given observation and returns its index.
    pub fn add_state(&mut self, observation: Observation) -> StateIndex {
        let index = self.states.len();
        self.states.push(ExplicitState {
            observation,
            choices: Vec::new(),
        });
        index
    }

    /// Adds a new choice to the given state and returns its index.
    pub fn add_choice(
        &mut self,
        state: StateIndex,
        transitions: Vec<(StateIndex, Interval)>,
    ) -> ChoiceIndex {
        let choices = &mut self.states[state].choices;
        choices.push(transitions);
        choices.len() - 1
    }

    /// Marks the given state as the initial state.
    pub fn set_initial_state(&mut self, state: StateIndex) {
        self.initial = state;
    }
}

impl<'a> Ipomdp<'a> for ExplicitIpomdp {
    type Transitions = std::iter::Cloned<std::slice::Iter<'a, (StateIndex, Interval)>>;

    fn num_states(&self) -> usize {
        self.states.len()
    }

    fn initial_state(&self) -> StateIndex {
        self.initial
    }

    fn num_choices(&self, state: StateIndex) -> usize {
        self.states[state].choices.len()
    }

    fn transitions(&'a self, state: StateIndex, choice: ChoiceIndex) -> Self::Transitions {
        self.states[state].choices[choice].iter().cloned()
    }

    fn observation(&self, state: StateIndex) -> Observation {
        self.states[state].observation
    }
}

/// A vector-backed reward structure.
#[derive(Debug, Clone)]
pub struct ExplicitRewards {
    state: Vec<f64>,
    transition: Vec<Vec<f64>>,
}

impl ExplicitRewards {
    /// Creates a reward structure from per-state rewards and per-choice
    /// transition rewards.
    pub fn new(state: Vec<f64>, transition: Vec<Vec<f64>>) -> Self {
        Self { state, transition }
    }
}

impl RewardModel for ExplicitRewards {
    fn state_reward(&self, state: StateIndex) -> f64 {
        self.state.get(state).copied().unwrap_or(0.0)
    }

    fn transition_reward(&self, state: StateIndex, choice: ChoiceIndex) -> f64 {
        self.transition
            .get(state)
            .and_then(|t| t.get(choice))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Tests for the model vocabulary.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval() {
        let i = Interval::new(0.25, 0.75);
        assert!(i.contains(0.25));
        assert!(i.contains(0.5));
        assert!(!i.contains(0.8));
        assert!(!i.is_point());
        assert!(Interval::point(0.3).is_point());
    }

    #[test]
    fn test_quantifier() {
        assert_eq!(MinMax::max_max().quantifier(), Quantifier::Exists);
        assert_eq!(MinMax::min_min().quantifier(), Quantifier::Exists);
        assert_eq!(MinMax::max_min().quantifier(), Quantifier::Forall);
        assert_eq!(MinMax::min_max().quantifier(), Quantifier::Forall);
    }

    #[test]
    fn test_direction() {
        assert!(Direction::Maximise.improves(0.6, 0.5));
        assert!(!Direction::Maximise.improves(0.5, 0.5));
        assert!(Direction::Minimise.improves(0.4, 0.5));
        assert_eq!(Direction::Maximise.sign(), 1.0);
        assert_eq!(Direction::Minimise.sign(), -1.0);
        assert_eq!(!Direction::Minimise, Direction::Maximise);
    }

    #[test]
    fn test_state_set() {
        let mut set = StateSet::empty(8);
        assert_eq!(set.size(), 0);
        set.insert(2);
        set.insert(5);
        assert!(set[2] && set[5] && !set[3]);
        assert_eq!(set.size(), 2);
        let full = StateSet::full(8);
        assert_eq!(full.size(), 8);
        assert!(full[0] && full[7]);
    }

    #[test]
    fn test_explicit_model() {
        let mut model = ExplicitIpomdp::new();
        let s0 = model.add_state(0);
        let s1 = model.add_state(1);
        model.add_choice(s0, vec![(s1, Interval::new(0.4, 0.6)), (s0, Interval::new(0.4, 0.6))]);
        model.add_choice(s0, vec![(s1, Interval::point(1.0))]);
        model.add_choice(s1, vec![(s1, Interval::point(1.0))]);
        model.set_initial_state(s0);

        assert_eq!(model.num_states(), 2);
        assert_eq!(model.num_choices(s0), 2);
        assert_eq!(model.num_choices(s1), 1);
        assert_eq!(model.initial_state(), s0);
        assert_eq!(model.observation(s1), 1);
        let transitions: Vec<_> = model.transitions(s0, 0).collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].0, s1);
    }
}
