//! Construction of the memory product and its binarised simple model.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use tinyvec::TinyVec;

use crate::model::{
    ChoiceIndex, ExplicitIpomdp, ExplicitRewards, Interval, Ipomdp, Observation, RewardModel,
    StateIndex, StateSet,
};
use crate::simple::{SimpleEdge, SimpleIpomdp, SimpleState, StateKind};

/// The product of an interval POMDP with a finite-state controller of fixed
/// memory size.
///
/// Product state `(s, m)` has index `s·k + m`; product choice `(a, m')` has
/// index `a·k + m'`, where the second component becomes the next memory
/// state regardless of the current one. Observations are `obs(s)·k + m`.
pub(crate) struct Product {
    pub(crate) model: ExplicitIpomdp,
    pub(crate) rewards: Option<ExplicitRewards>,
}

/// Builds the product of the given model with a controller of `memory`
/// memory states. Rewards of the underlying model are duplicated over the
/// memory dimension; transition rewards are independent of the chosen next
/// memory state. A missing reward structure signals a probability query.
pub(crate) fn build_product<'a, M, R>(model: &'a M, rewards: Option<&R>, memory: usize) -> Product
where
    M: Ipomdp<'a>,
    R: RewardModel,
{
    let n = model.num_states();
    let mut product = ExplicitIpomdp::new();
    for s in 0..n {
        for m in 0..memory {
            product.add_state(model.observation(s) * memory + m);
        }
    }
    let mut state_rewards = vec![0.0; n * memory];
    let mut transition_rewards: Vec<Vec<f64>> = vec![Vec::new(); n * memory];
    for s in 0..n {
        let choices = model.num_choices(s);
        for m in 0..memory {
            let p = s * memory + m;
            for a in 0..choices {
                for next_memory in 0..memory {
                    let transitions = model
                        .transitions(s, a)
                        .map(|(t, interval)| (t * memory + next_memory, interval))
                        .collect();
                    product.add_choice(p, transitions);
                    if let Some(r) = rewards {
                        transition_rewards[p].push(r.transition_reward(s, a));
                    }
                }
            }
            if let Some(r) = rewards {
                state_rewards[p] = r.state_reward(s);
            }
        }
    }
    product.set_initial_state(model.initial_state() * memory);
    debug!(
        "built product with {} states over {} memory states",
        product.num_states(),
        memory
    );
    Product {
        model: product,
        rewards: rewards.map(|_| ExplicitRewards::new(state_rewards, transition_rewards)),
    }
}

/// Lifts a state set of the underlying model to the product state space.
pub(crate) fn lift_state_set(set: &StateSet, memory: usize, num_states: usize) -> StateSet {
    let mut lifted = StateSet::empty(num_states * memory);
    for s in set.states() {
        for m in 0..memory {
            lifted.insert(s * memory + m);
        }
    }
    lifted
}

/// Builds the simple model of a product by replacing every multi-way choice
/// with a gadget: a chain of action states whose leaves are uncertain states,
/// one per original choice.
///
/// Per observation, the first gadget fixes a permutation of its choices
/// (shuffled when requested); every later gadget with the same observation
/// reuses it, so that observation-equal gadgets have identical shapes and
/// position-wise identical observation sequences.
pub(crate) struct SimpleConstructor<'a> {
    product: &'a Product,
    shuffle: bool,
    permutations: HashMap<Observation, Vec<ChoiceIndex>>,
}

impl<'a> SimpleConstructor<'a> {
    pub(crate) fn new(product: &'a Product, shuffle: bool) -> Self {
        Self {
            product,
            shuffle,
            permutations: HashMap::new(),
        }
    }

    fn permutation(
        &mut self,
        observation: Observation,
        choices: usize,
        rng: &mut SmallRng,
    ) -> &[ChoiceIndex] {
        let shuffle = self.shuffle;
        match self.permutations.entry(observation) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut order: Vec<ChoiceIndex> = (0..choices).collect();
                if shuffle {
                    order.shuffle(rng);
                }
                entry.insert(order)
            }
        }
    }

    pub(crate) fn construct(mut self, rng: &mut SmallRng) -> SimpleIpomdp {
        let product = self.product;
        let model = &product.model;
        let rewards = product.rewards.as_ref();
        let n = model.num_states();

        // gadget roots by prefix sums of the per-state gadget sizes
        let mut gadget = vec![0; n];
        let mut total = 0;
        for s in 0..n {
            gadget[s] = total;
            total += 2 * model.num_choices(s) - 1;
        }

        let mut states = Vec::with_capacity(total);
        for s in 0..n {
            let choices = model.num_choices(s);
            let state_reward = rewards.map_or(0.0, |r| r.state_reward(s));
            let order = self.permutation(model.observation(s), choices, rng).to_vec();
            if choices == 1 {
                // the gadget collapses to a single uncertain state; the
                // transition reward of the lone choice folds into its
                // state reward
                let transition_reward = rewards.map_or(0.0, |r| r.transition_reward(s, 0));
                states.push(SimpleState {
                    kind: StateKind::Uncertain,
                    observation: 0,
                    state_reward: state_reward + transition_reward,
                    edges: uncertain_edges(model, &gadget, s, 0),
                });
                continue;
            }
            let base = gadget[s];
            let leaf = |index: usize| base + choices - 1 + index;
            for j in 0..choices - 1 {
                let last = j == choices - 2;
                let (first, second) = if last {
                    (leaf(choices - 2), leaf(choices - 1))
                } else {
                    (base + j + 1, leaf(j))
                };
                let mut edges: TinyVec<[SimpleEdge; 2]> = TinyVec::new();
                edges.push(SimpleEdge {
                    target: first,
                    interval: Interval::SENTINEL,
                    reward: if last {
                        rewards.map_or(0.0, |r| r.transition_reward(s, order[choices - 2]))
                    } else {
                        0.0
                    },
                });
                edges.push(SimpleEdge {
                    target: second,
                    interval: Interval::SENTINEL,
                    reward: if last {
                        rewards.map_or(0.0, |r| r.transition_reward(s, order[choices - 1]))
                    } else {
                        rewards.map_or(0.0, |r| r.transition_reward(s, order[j]))
                    },
                });
                states.push(SimpleState {
                    kind: StateKind::Action,
                    observation: 0,
                    state_reward: if j == 0 { state_reward } else { 0.0 },
                    edges,
                });
            }
            for i in 0..choices {
                states.push(SimpleState {
                    kind: StateKind::Uncertain,
                    observation: 0,
                    state_reward: 0.0,
                    edges: uncertain_edges(model, &gadget, s, order[i]),
                });
            }
        }

        // relabel observations in traversal order: the root of each gadget
        // receives a fresh base the first time its product observation is
        // encountered; the remaining gadget states get consecutive labels
        let mut observation_map: HashMap<Observation, Observation> = HashMap::new();
        let mut next_observation = 0;
        for s in 0..n {
            let block = 2 * model.num_choices(s) - 1;
            let base_observation = match observation_map.entry(model.observation(s)) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    let base = next_observation;
                    next_observation += block;
                    *entry.insert(base)
                }
            };
            for offset in 0..block {
                states[gadget[s] + offset].observation = base_observation + offset;
            }
        }

        debug!(
            "binarised {} product states into {} simple states with {} observations",
            n, total, next_observation
        );
        let initial = gadget[model.initial_state()];
        SimpleIpomdp::new(states, initial, gadget, next_observation)
    }
}

fn uncertain_edges(
    model: &ExplicitIpomdp,
    gadget: &[StateIndex],
    state: StateIndex,
    choice: ChoiceIndex,
) -> TinyVec<[SimpleEdge; 2]> {
    model
        .transitions(state, choice)
        .map(|(target, interval)| SimpleEdge {
            target: gadget[target],
            interval,
            reward: 0.0,
        })
        .collect()
}
