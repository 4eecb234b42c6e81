//! Options for the value-computation engine.

/// Options controlling the sequential-convex-programming engine.
///
/// The defaults reproduce the standard configuration; callers normally use
/// [`SolverOptions::default`] and override individual fields.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Initial size of the multiplicative trust region around the current
    /// policy. The box for an entry `x` is `[x / (1 + r), x · (1 + r)]`.
    pub trust_region_initial: f64,
    /// Factor applied to the trust region: multiplied after an accepted
    /// step, divided after a rejected one.
    pub trust_region_factor: f64,
    /// A solution point stops once its trust region shrinks below this
    /// threshold.
    pub trust_region_threshold: f64,
    /// Weight of the penalty terms relaxing the linearised Bellman
    /// constraints.
    pub penalty_weight: f64,
    /// Lower bound kept on every policy entry, preserving the graph of the
    /// induced chain.
    pub policy_floor: f64,
    /// Maximum number of linearisation steps per solution point.
    pub max_iterations: usize,
    /// Number of independent solution points driven by the multi-start
    /// search.
    pub restarts: usize,
    /// Initial population size of the generational search.
    pub population: usize,
    /// Number of linearisation steps every population member advances
    /// between two pruning rounds.
    pub prune_iterations: usize,
    /// Sweep cap of the value-iteration oracle for probability queries.
    pub vi_iterations_probs: usize,
    /// Sweep cap of the value-iteration oracle for reward queries.
    pub vi_iterations_rewards: usize,
    /// Convergence tolerance of the value-iteration oracle.
    pub vi_epsilon: f64,
    /// Initial half-width of the bracket relaxing the witness-recovery
    /// equalities; doubled until the program becomes feasible.
    pub witness_bracket: f64,
    /// Whether gadgets may shuffle their choice order. The first restart
    /// always keeps the natural order.
    pub shuffle: bool,
    /// Seed for the permutation shuffles; a fresh entropy seed when unset.
    pub seed: Option<u64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            trust_region_initial: 1.5,
            trust_region_factor: 1.5,
            trust_region_threshold: 1e-4,
            penalty_weight: 1e4,
            policy_floor: 1e-9,
            max_iterations: 50,
            restarts: 10,
            population: 32,
            prune_iterations: 4,
            vi_iterations_probs: 2000,
            vi_iterations_rewards: 5000,
            vi_epsilon: 1e-6,
            witness_bracket: 1e-6,
            shuffle: true,
            seed: None,
        }
    }
}
