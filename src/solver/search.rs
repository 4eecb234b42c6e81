//! Outer search strategies wrapping the local SCP optimisation.
//!
//! Sequential convex programming is a local method; both strategies exist to
//! escape poor local optima by running several independently binarised
//! points, not for correctness.

use std::cmp::Ordering;

use log::{debug, info};
use min_max_heap::MinMaxHeap;
use rand::rngs::SmallRng;

use crate::constructor::{Product, SimpleConstructor};
use crate::idtmc::solver::IdtmcSolver;
use crate::model::{MinMax, StateSet};
use crate::options::SolverOptions;
use crate::simple::spec::SimpleSpecification;
use crate::solver::point::SolutionPoint;

pub(crate) struct Search<'a, O> {
    product: &'a Product,
    remain: &'a StateSet,
    target: &'a StateSet,
    min_max: MinMax,
    rewards: bool,
    oracle: &'a O,
    options: &'a SolverOptions,
}

impl<'a, O: IdtmcSolver> Search<'a, O> {
    pub(crate) fn new(
        product: &'a Product,
        remain: &'a StateSet,
        target: &'a StateSet,
        min_max: MinMax,
        rewards: bool,
        oracle: &'a O,
        options: &'a SolverOptions,
    ) -> Self {
        Self {
            product,
            remain,
            target,
            min_max,
            rewards,
            oracle,
            options,
        }
    }

    fn build_point(&self, index: usize, rng: &mut SmallRng) -> SolutionPoint<'a, O> {
        // the first point keeps the natural choice order so that one
        // deterministic baseline always participates
        let shuffle = self.options.shuffle && index > 0;
        let simple = SimpleConstructor::new(self.product, shuffle).construct(rng);
        let spec = SimpleSpecification::adapt(
            &simple,
            self.remain,
            self.target,
            self.min_max,
            self.rewards,
        );
        SolutionPoint::new(simple, spec, self.oracle, self.options)
    }

    /// Runs independent solution points to completion and returns the best
    /// value at the initial state.
    pub(crate) fn multi_start(&self, rng: &mut SmallRng) -> f64 {
        let direction = self.min_max.strategy();
        let mut best: Option<f64> = None;
        for restart in 0..self.options.restarts.max(1) {
            let mut point = self.build_point(restart, rng);
            point.converge();
            let objective = point.objective();
            debug!("restart {} converged with value {}", restart, objective);
            best = Some(match best {
                None => objective,
                Some(previous) => direction.better(previous, objective),
            });
        }
        let best = best.unwrap_or(0.0);
        info!("multi-start search finished with value {}", best);
        best
    }

    /// Advances a population of solution points a few steps at a time,
    /// discarding the worst half after every round, until one point
    /// survives; that point is then driven to completion.
    pub(crate) fn generational(&self, rng: &mut SmallRng) -> f64 {
        let direction = self.min_max.strategy();
        let mut points: Vec<SolutionPoint<'a, O>> = (0..self.options.population.max(1))
            .map(|index| self.build_point(index, rng))
            .collect();
        let mut generation = 0;
        while points.len() > 1 {
            for point in &mut points {
                for _ in 0..self.options.prune_iterations {
                    if point.advance() {
                        break;
                    }
                }
            }
            // keep the better half, ranked in the controller's direction
            let survivors = points.len() / 2;
            let mut heap = MinMaxHeap::with_capacity(points.len());
            for point in points.drain(..) {
                heap.push(RankedPoint {
                    score: direction.sign() * point.objective(),
                    point,
                });
            }
            for _ in 0..survivors {
                match heap.pop_max() {
                    Some(ranked) => points.push(ranked.point),
                    None => break,
                }
            }
            generation += 1;
            debug!(
                "generation {} pruned population to {} points, best value {}",
                generation,
                points.len(),
                points.first().map_or(0.0, SolutionPoint::objective)
            );
        }
        let mut survivor = match points.pop() {
            Some(point) => point,
            None => return 0.0,
        };
        survivor.converge();
        let best = survivor.objective();
        info!(
            "generational search finished after {} generations with value {}",
            generation, best
        );
        best
    }
}

/// A solution point ranked by its direction-adjusted objective.
struct RankedPoint<'a, O> {
    score: f64,
    point: SolutionPoint<'a, O>,
}

impl<'a, O> PartialEq for RankedPoint<'a, O> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl<'a, O> Eq for RankedPoint<'a, O> {}

impl<'a, O> PartialOrd for RankedPoint<'a, O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, O> Ord for RankedPoint<'a, O> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}

/// Tests for the outer search strategies.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::build_product;
    use crate::idtmc::solver::ValueIteration;
    use crate::model::{ExplicitIpomdp, ExplicitRewards, Interval};
    use rand::SeedableRng;

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

    #[test]
    fn test_multi_start() {
        let model = choice_model();
        let product = build_product(&model, None::<&ExplicitRewards>, 1);
        let mut target = StateSet::empty(3);
        target.insert(1);
        let mut remain = StateSet::full(3);
        remain.set(2, false);
        let remain = crate::constructor::lift_state_set(&remain, 1, 3);
        let target = crate::constructor::lift_state_set(&target, 1, 3);
        let oracle = ValueIteration::new(2000, 1e-9);
        let mut options = SolverOptions::default();
        options.restarts = 3;
        let search = Search::new(
            &product,
            &remain,
            &target,
            MinMax::max_max(),
            false,
            &oracle,
            &options,
        );
        let value = search.multi_start(&mut SmallRng::seed_from_u64(11));
        assert!(value > 1.0 - 1e-6);
    }

    #[test]
    fn test_generational() {
        let model = choice_model();
        let product = build_product(&model, None::<&ExplicitRewards>, 1);
        let mut target = StateSet::empty(3);
        target.insert(1);
        let mut remain = StateSet::full(3);
        remain.set(2, false);
        let remain = crate::constructor::lift_state_set(&remain, 1, 3);
        let target = crate::constructor::lift_state_set(&target, 1, 3);
        let oracle = ValueIteration::new(2000, 1e-9);
        let mut options = SolverOptions::default();
        options.population = 4;
        let search = Search::new(
            &product,
            &remain,
            &target,
            MinMax::max_max(),
            false,
            &oracle,
            &options,
        );
        let value = search.generational(&mut SmallRng::seed_from_u64(11));
        assert!(value > 1.0 - 1e-6);
    }
}
