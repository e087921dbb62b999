//! Newton–Raphson driver for one unknown lattice cell.
//!
//! The driver owns the residual expression `F` and its symbolic derivative
//! with respect to the unknown leaf. Numeric state lives with the caller and
//! is reached only through `IterationHooks`, so the same driver serves an
//! in-memory grid and the out-of-core store alike.

use crate::error::SolveError;
use crate::expression::{CellSource, DiffCache, EvalCache, ImplicitSpace, Node};
use crate::traits::Algebraic;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do when the iteration cap is reached without convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exhaustion {
    /// Keep the last iterate and report `converged: false`.
    Accept,
    Fail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    /// Converged once `|F| <= tolerance`.
    pub tolerance: f64,
    pub on_exhausted: Exhaustion,
    pub predictor_corrector: bool,
    /// Run exactly `max_steps` updates and accept the result without a
    /// residual check. `tolerance` and `on_exhausted` are then unused.
    pub fixed_iterations: bool,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            tolerance: 1e-10,
            on_exhausted: Exhaustion::Accept,
            predictor_corrector: false,
            fixed_iterations: false,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> Result<(), SolveError> {
        if self.max_steps == 0 {
            return Err(SolveError::InvalidSettings(
                "max_steps must be greater than zero".into(),
            ));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(SolveError::InvalidSettings(
                "tolerance must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Converged,
    Exhausted,
}

/// Stopping rule, consulted before every update with the number of updates
/// applied so far and the current residual magnitude.
pub trait Termination {
    fn verdict(&self, iterations: usize, residual: f64) -> Verdict;
}

impl Termination for NewtonSettings {
    fn verdict(&self, iterations: usize, residual: f64) -> Verdict {
        if residual <= self.tolerance {
            Verdict::Converged
        } else if iterations >= self.max_steps {
            Verdict::Exhausted
        } else {
            Verdict::Continue
        }
    }
}

/// Runs exactly `n` updates and accepts the result without a residual check.
#[derive(Debug, Clone, Copy)]
pub struct FixedIterations(pub usize);

impl Termination for FixedIterations {
    fn verdict(&self, iterations: usize, _residual: f64) -> Verdict {
        if iterations >= self.0 {
            Verdict::Converged
        } else {
            Verdict::Continue
        }
    }
}

/// Caller-owned mutable state the driver iterates against.
pub trait IterationHooks<V: Algebraic> {
    /// Values for the `Cell` leaves of the residual, including the unknown.
    fn cells(&self) -> &dyn CellSource<V>;

    fn read_current_guess(&self) -> V;

    /// Adds `offset` to the unknown.
    fn apply_iteration_offset(&mut self, offset: &V);

    /// Replaces the predictor–corrector slot with its corrected value,
    /// remembering the original. Returns false if there is nothing to correct.
    ///
    /// The corrected value is transient. The driver calls
    /// `restore_correction_slot` as soon as the re-solve finishes, whether it
    /// succeeded or not, and before the caller reads or writes back anything.
    fn cache_correction_slot(&mut self) -> bool {
        false
    }

    fn restore_correction_slot(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct NewtonOutcome<V> {
    pub value: V,
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
    /// True when a predictor–corrector pass ran.
    pub corrected: bool,
}

pub struct NewtonRaphson<V: Algebraic> {
    function: Node<V>,
    derivative: Node<V>,
    unknown: Node<V>,
    space: ImplicitSpace<V>,
    settings: NewtonSettings,
}

impl<V: Algebraic> NewtonRaphson<V> {
    /// Differentiates `function` once with respect to `unknown`; the result is
    /// reused for every iteration and every cell that shares the expression.
    pub fn new(
        function: Node<V>,
        unknown: Node<V>,
        space: ImplicitSpace<V>,
        settings: NewtonSettings,
    ) -> Result<Self, SolveError> {
        settings.validate()?;
        let mut cache = DiffCache::new();
        let derivative =
            function.differentiate_cached(std::slice::from_ref(&unknown), &space, &mut cache)?;
        Ok(Self {
            function,
            derivative,
            unknown,
            space,
            settings,
        })
    }

    pub fn function(&self) -> &Node<V> {
        &self.function
    }

    pub fn derivative(&self) -> &Node<V> {
        &self.derivative
    }

    pub fn unknown(&self) -> &Node<V> {
        &self.unknown
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    /// Same driver, same derivative, different implicit space.
    pub fn rebind(&mut self, space: ImplicitSpace<V>) {
        self.space = space;
    }

    pub fn solve(&self, hooks: &mut dyn IterationHooks<V>) -> Result<NewtonOutcome<V>, SolveError> {
        if self.settings.fixed_iterations {
            return self.solve_with(hooks, &FixedIterations(self.settings.max_steps));
        }
        self.solve_with(hooks, &self.settings)
    }

    /// Iterates `u ← u − F′(u)⁻¹ · F(u)` until `termination` stops it.
    pub fn solve_with(
        &self,
        hooks: &mut dyn IterationHooks<V>,
        termination: &dyn Termination,
    ) -> Result<NewtonOutcome<V>, SolveError> {
        let mut iterations = 0;
        loop {
            // Values change every iteration, so the cache cannot outlive it.
            let mut cache = EvalCache::new();
            let f = self
                .function
                .evaluate_cached(&self.space, hooks.cells(), &mut cache)?;
            let residual = f.magnitude();

            match termination.verdict(iterations, residual) {
                Verdict::Continue => {}
                Verdict::Converged => {
                    return Ok(self.outcome(hooks, iterations, residual, true));
                }
                Verdict::Exhausted => {
                    return match self.settings.on_exhausted {
                        Exhaustion::Accept => {
                            debug!(iterations, residual, "newton iteration cap reached");
                            Ok(self.outcome(hooks, iterations, residual, false))
                        }
                        Exhaustion::Fail => Err(SolveError::DidNotConverge {
                            iterations,
                            residual,
                        }),
                    };
                }
            }

            let df = self
                .derivative
                .evaluate_cached(&self.space, hooks.cells(), &mut cache)?;
            let offset = -(df.left_inverse()? * f);
            hooks.apply_iteration_offset(&offset);
            iterations += 1;
        }
    }

    /// Plain solve, then, if enabled and the hooks offer a correction slot,
    /// one more solve from the corrected state. The slot is restored on every
    /// path.
    pub fn solve_corrected(
        &self,
        hooks: &mut dyn IterationHooks<V>,
    ) -> Result<NewtonOutcome<V>, SolveError> {
        let first = self.solve(hooks)?;
        if !self.settings.predictor_corrector || !hooks.cache_correction_slot() {
            return Ok(first);
        }
        let second = self.solve(hooks);
        hooks.restore_correction_slot();
        let mut second = second?;
        second.iterations += first.iterations;
        second.corrected = true;
        Ok(second)
    }

    fn outcome(
        &self,
        hooks: &dyn IterationHooks<V>,
        iterations: usize,
        residual: f64,
        converged: bool,
    ) -> NewtonOutcome<V> {
        NewtonOutcome {
            value: hooks.read_current_guess(),
            iterations,
            residual,
            converged,
            corrected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExprError;
    use crate::lattice::{OffsetKey, Ordinate};
    use num_complex::Complex;

    /// The unknown at the origin plus one parameter cell one step back in t.
    struct Scalar<V> {
        value: V,
        param: V,
        corrected: Option<V>,
        saved: Option<V>,
    }

    impl<V: Algebraic> Scalar<V> {
        fn new(value: V) -> Self {
            Self {
                value,
                param: V::zero(),
                corrected: None,
                saved: None,
            }
        }
    }

    impl<V: Algebraic> CellSource<V> for Scalar<V> {
        fn cell(&self, key: &OffsetKey) -> V {
            if *key == OffsetKey::ORIGIN {
                self.value.clone()
            } else if *key == OffsetKey::along(Ordinate::T, -1) {
                self.param.clone()
            } else {
                panic!("no cell at {key}")
            }
        }
    }

    impl<V: Algebraic> IterationHooks<V> for Scalar<V> {
        fn cells(&self) -> &dyn CellSource<V> {
            self
        }

        fn read_current_guess(&self) -> V {
            self.value.clone()
        }

        fn apply_iteration_offset(&mut self, offset: &V) {
            self.value = self.value.clone() + offset.clone();
        }

        fn cache_correction_slot(&mut self) -> bool {
            match self.corrected.clone() {
                Some(corrected) => {
                    self.saved = Some(std::mem::replace(&mut self.param, corrected));
                    true
                }
                None => false,
            }
        }

        fn restore_correction_slot(&mut self) {
            if let Some(param) = self.saved.take() {
                self.param = param;
            }
        }
    }

    fn u<V: Algebraic>() -> Node<V> {
        Node::cell(OffsetKey::ORIGIN)
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, SolveError>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn double_root_converges_within_twenty_iterations() {
        // (x - 3)², started one unit away; the error halves every step.
        let shifted = u::<f64>() - Node::real(3.0);
        let f = Node::product(shifted.clone(), shifted);
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), NewtonSettings::default())
            .expect("driver");
        let mut hooks = Scalar::new(4.0);
        let outcome = driver
            .solve_with(&mut hooks, &FixedIterations(20))
            .expect("solves");
        assert_eq!(outcome.iterations, 20);
        assert!((outcome.value - 3.0).abs() < 1e-6, "got {}", outcome.value);
    }

    #[test]
    fn fixed_iteration_mode_ignores_the_residual() {
        // x - 3 is solved by the first update; the fixed mode keeps going.
        let f = u::<f64>() - Node::real(3.0);
        let fixed = NewtonSettings {
            max_steps: 7,
            fixed_iterations: true,
            ..NewtonSettings::default()
        };
        let driver =
            NewtonRaphson::new(f.clone(), u(), ImplicitSpace::new(), fixed).expect("driver");
        let outcome = driver.solve(&mut Scalar::new(4.0)).expect("solves");
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 7);
        assert_eq!(outcome.value, 3.0);

        let residual = NewtonSettings {
            fixed_iterations: false,
            ..fixed
        };
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), residual).expect("driver");
        let outcome = driver.solve(&mut Scalar::new(4.0)).expect("solves");
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn residual_stopping_ends_early() {
        // x² - 2 converges quadratically.
        let f = Node::product(u::<f64>(), u()) - Node::real(2.0);
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), NewtonSettings::default())
            .expect("driver");
        let mut hooks = Scalar::new(1.0);
        let outcome = driver.solve(&mut hooks).expect("solves");
        assert!(outcome.converged);
        assert!(outcome.iterations < 8, "took {}", outcome.iterations);
        assert!((outcome.value - 2f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn exhaustion_policy_is_configurable() {
        // x² + 1 has no real root.
        let f = Node::product(u::<f64>(), u()) + Node::one();
        let accept = NewtonSettings {
            max_steps: 5,
            ..NewtonSettings::default()
        };
        let driver =
            NewtonRaphson::new(f.clone(), u(), ImplicitSpace::new(), accept).expect("driver");
        let outcome = driver.solve(&mut Scalar::new(0.5)).expect("accepted");
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 5);

        let fail = NewtonSettings {
            on_exhausted: Exhaustion::Fail,
            ..accept
        };
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), fail).expect("driver");
        assert_err_contains(driver.solve(&mut Scalar::new(0.5)), "failed to converge");
    }

    #[test]
    fn singular_jacobian_is_fatal() {
        let f = Node::product(u::<f64>(), u()) + Node::one();
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), NewtonSettings::default())
            .expect("driver");
        let err = driver.solve(&mut Scalar::new(0.0)).expect_err("F'(0) = 0");
        assert!(matches!(err, SolveError::Expr(ExprError::NotInvertible)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = NewtonSettings {
            max_steps: 0,
            ..NewtonSettings::default()
        };
        let result = NewtonRaphson::new(u::<f64>(), u(), ImplicitSpace::new(), settings);
        assert!(matches!(result, Err(SolveError::InvalidSettings(_))));
    }

    #[test]
    fn complex_roots_are_found() {
        // z² + 1 = 0 from a guess in the upper half plane reaches i.
        let f = Node::product(u::<Complex<f64>>(), u()) + Node::one();
        let driver = NewtonRaphson::new(f, u(), ImplicitSpace::new(), NewtonSettings::default())
            .expect("driver");
        let outcome = driver
            .solve(&mut Scalar::new(Complex::new(0.3, 0.8)))
            .expect("solves");
        assert!(outcome.converged);
        assert!((outcome.value - Complex::new(0.0, 1.0)).norm() < 1e-9);
    }

    #[test]
    fn corrector_reruns_from_the_slot_and_restores_it() {
        let f = || u::<f64>() - Node::cell(OffsetKey::along(Ordinate::T, -1));
        let settings = NewtonSettings {
            predictor_corrector: true,
            ..NewtonSettings::default()
        };
        let driver = NewtonRaphson::new(f(), u(), ImplicitSpace::new(), settings).expect("driver");
        let mut hooks = Scalar::new(0.0);
        hooks.param = 1.5;
        hooks.corrected = Some(4.0);
        let outcome = driver.solve_corrected(&mut hooks).expect("solves");
        assert!(outcome.corrected);
        assert_eq!(outcome.value, 4.0);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(hooks.param, 1.5);

        let plain = NewtonRaphson::new(f(), u(), ImplicitSpace::new(), NewtonSettings::default())
            .expect("driver");
        let outcome = plain.solve_corrected(&mut hooks).expect("solves");
        assert!(!outcome.corrected);
        assert_eq!(outcome.value, 1.5);
    }
}
