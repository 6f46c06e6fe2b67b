//! Generic, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`estimate`] with the data
//! and [`RansacOptions`]. The engine never panics on failure: when no sample
//! produces a model, the returned [`RansacResult`] has `model == None` and a
//! failed evaluation.
//!
//! Model ranking uses the inlier fraction first. Among equally fit models the
//! one with the *larger* inlier RMSE wins; the comparison is kept as is so
//! that results stay reproducible against existing reconstructions.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Scalar quality of a model, used to rank hypotheses.
pub trait Score {
    /// `false` when the model is rejected outright (e.g. a geometric check failed).
    fn is_success(&self) -> bool;
    /// Inlier fraction in `[0, 1]`.
    fn fitness(&self) -> f64;
    /// Aggregate inlier residual, `INFINITY` without inliers.
    fn inlier_rmse(&self) -> f64;
}

/// Score of a model against a data set, together with its consensus set.
///
/// `Default` must be the worst possible evaluation.
pub trait Evaluation<D>: Score + Default {
    /// The data points that support the model.
    fn inliers(&self) -> &[D];
}

/// Stock [`Evaluation`] carrying the inlier subset and its residual sum.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult<D> {
    pub success: bool,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub inliers: Vec<D>,
    pub total_residual: f64,
}

impl<D> Default for EvalResult<D> {
    fn default() -> Self {
        Self {
            success: false,
            fitness: 0.0,
            inlier_rmse: f64::INFINITY,
            inliers: Vec::new(),
            total_residual: 0.0,
        }
    }
}

impl<D> Score for EvalResult<D> {
    fn is_success(&self) -> bool {
        self.success
    }

    fn fitness(&self) -> f64 {
        self.fitness
    }

    fn inlier_rmse(&self) -> f64 {
        self.inlier_rmse
    }
}

impl<D> Evaluation<D> for EvalResult<D> {
    fn inliers(&self) -> &[D] {
        &self.inliers
    }
}

/// A model family that RANSAC can hypothesise and score.
pub trait Estimator {
    type Datum: Clone;
    type Model;
    type Evaluation: Evaluation<Self::Datum>;

    /// Fit a model to a (minimal or inlier) subset; `None` on failure.
    fn fit(&self, sample: &[Self::Datum]) -> Option<Self::Model>;

    /// Score a model against the full data set.
    fn evaluate(&self, data: &[Self::Datum], model: &Self::Model) -> Self::Evaluation;
}

/// Configuration parameters for [`estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacOptions {
    /// Number of points drawn per hypothesis.
    pub sample_size: usize,
    /// Upper bound on hypotheses.
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample, used for early
    /// termination.
    pub confidence: f64,
    /// Generator seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl RansacOptions {
    pub const DEFAULT_MAX_ITERATIONS: usize = 1000;
    pub const DEFAULT_CONFIDENCE: f64 = 0.999_999_99;

    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            confidence: Self::DEFAULT_CONFIDENCE,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Output of [`estimate`].
#[derive(Debug, Clone)]
pub struct RansacResult<M, E> {
    /// Model refit on the best consensus set, `None` on failure.
    pub model: Option<M>,
    /// Evaluation of `model` on the full data set.
    pub evaluation: E,
    /// Number of hypotheses drawn.
    pub iterations: usize,
}

impl<M, E> RansacResult<M, E> {
    fn failure(evaluation: E, iterations: usize) -> Self {
        Self {
            model: None,
            evaluation,
            iterations,
        }
    }

    pub fn is_success(&self) -> bool
    where
        E: Score,
    {
        self.model.is_some() && self.evaluation.is_success()
    }
}

/// Adaptive hypothesis budget for the current best inlier fraction.
///
/// `None` means the budget is exhausted (a perfect model was found).
pub fn adaptive_iterations(
    confidence: f64,
    fitness: f64,
    sample_size: usize,
    max_iterations: usize,
) -> Option<usize> {
    if fitness >= 1.0 {
        return None;
    }
    if fitness <= 0.0 || !(0.0..1.0).contains(&confidence) {
        return Some(max_iterations);
    }
    let all_inliers = fitness.powi(sample_size as i32);
    let needed = ((1.0 - confidence).ln() / (1.0 - all_inliers).ln()).ceil();
    if needed.is_nan() || needed < 0.0 {
        return Some(0);
    }
    Some((needed as usize).min(max_iterations))
}

#[allow(clippy::float_cmp)]
fn improves<S: Score>(candidate: &S, best: &S) -> bool {
    candidate.fitness() > best.fitness()
        || (candidate.fitness() == best.fitness() && candidate.inlier_rmse() > best.inlier_rmse())
}

/// Run the RANSAC loop for `estimator` over `data`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(estimator, data), fields(n = data.len()))
)]
pub fn estimate<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model, E::Evaluation> {
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let sample_size = opts.sample_size.min(data.len());
    let mut cap = opts.max_iterations;
    let mut best: Option<(E::Model, E::Evaluation)> = None;
    let mut sample: Vec<E::Datum> = Vec::with_capacity(sample_size);
    let mut iterations = 0;

    while iterations < cap {
        iterations += 1;

        let mut picked = index::sample(&mut rng, data.len(), sample_size).into_vec();
        picked.sort_unstable();
        sample.clear();
        sample.extend(picked.iter().map(|&i| data[i].clone()));

        let Some(model) = estimator.fit(&sample) else {
            continue;
        };
        let eval = estimator.evaluate(data, &model);
        if !eval.is_success() {
            continue;
        }
        let improved = match &best {
            Some((_, current)) => improves(&eval, current),
            None => improves(&eval, &E::Evaluation::default()),
        };
        if !improved {
            continue;
        }

        cap = adaptive_iterations(opts.confidence, eval.fitness(), sample_size, opts.max_iterations)
            .unwrap_or(0);
        best = Some((model, eval));
    }

    let Some((_, best_score)) = best else {
        return RansacResult::failure(E::Evaluation::default(), iterations);
    };

    // Final refit on the consensus set, scored on everything.
    let Some(model) = estimator.fit(best_score.inliers()) else {
        return RansacResult::failure(E::Evaluation::default(), iterations);
    };
    let evaluation = estimator.evaluate(data, &model);
    if !evaluation.is_success() {
        return RansacResult::failure(evaluation, iterations);
    }
    RansacResult {
        model: Some(model),
        evaluation,
        iterations,
    }
}
