//! Generic gradient descent
//!
//! A [`GradientDescent`] minimises the sum of its [`CostTerm`]s over a flat
//! argument slice. Terms read an external data context `D`. An optional
//! [`DescentStepHook`] projects the arguments after every step, which is how
//! callers enforce joint limits or height floors.

use serde::{Deserialize, Serialize};

/// A differentiable cost term over a data context
pub trait CostTerm<D> {
    /// Cost at `args`
    fn value(&self, args: &[f32], data: &D) -> f32;

    /// Partial derivative of the cost with respect to `args[index]`
    fn partial_derivative(&self, args: &[f32], index: usize, data: &D) -> f32;

    /// Add this term's gradient into `gradient`. Override when the whole
    /// gradient is cheaper to compute in one pass.
    fn accumulate_gradient(&self, args: &[f32], data: &D, gradient: &mut [f32]) {
        for (index, slot) in gradient.iter_mut().enumerate() {
            *slot += self.partial_derivative(args, index, data);
        }
    }
}

/// Projection applied after each descent step
pub trait DescentStepHook<D> {
    fn after_step(&self, args: &mut [f32], previous: &[f32], data: &D);
}

/// Descent parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescentSettings {
    pub rate: f32,
    pub max_iterations: usize,
    /// Stop once no argument moves more than this in one step
    pub target_delta: f32,
    /// Bold-driver rate adaptation: grow after improving steps, revert and
    /// halve after steps that increase the cost
    pub adaptive: bool,
}

impl Default for DescentSettings {
    fn default() -> Self {
        Self {
            rate: 1e-3,
            max_iterations: 100,
            target_delta: 1e-6,
            adaptive: false,
        }
    }
}

/// Outcome of a descent run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescentReport {
    pub iterations: usize,
    pub cost: f32,
    pub converged: bool,
}

const RATE_GROWTH: f32 = 1.05;
const RATE_SHRINK: f32 = 0.5;

/// Steepest-descent optimiser over pluggable cost terms
pub struct GradientDescent<D> {
    terms: Vec<Box<dyn CostTerm<D>>>,
    hook: Option<Box<dyn DescentStepHook<D>>>,
    settings: DescentSettings,
}

impl<D> GradientDescent<D> {
    pub fn new(settings: DescentSettings) -> Self {
        Self {
            terms: Vec::new(),
            hook: None,
            settings,
        }
    }

    /// Builder-style [`GradientDescent::add_term`]
    pub fn with_term(mut self, term: impl CostTerm<D> + 'static) -> Self {
        self.add_term(Box::new(term));
        self
    }

    pub fn add_term(&mut self, term: Box<dyn CostTerm<D>>) {
        self.terms.push(term);
    }

    pub fn set_step_hook(&mut self, hook: impl DescentStepHook<D> + 'static) {
        self.hook = Some(Box::new(hook));
    }

    pub fn settings(&self) -> &DescentSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DescentSettings) {
        self.settings = settings;
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Total cost at `args`
    pub fn cost(&self, args: &[f32], data: &D) -> f32 {
        self.terms.iter().map(|term| term.value(args, data)).sum()
    }

    /// Total gradient at `args`
    pub fn gradient(&self, args: &[f32], data: &D) -> Vec<f32> {
        let mut gradient = vec![0.0; args.len()];
        for term in &self.terms {
            term.accumulate_gradient(args, data, &mut gradient);
        }
        gradient
    }

    /// Run the descent in place with the stored settings
    pub fn compute(&self, args: &mut [f32], data: &D) -> DescentReport {
        self.compute_with(args, data, &self.settings)
    }

    /// Run the descent in place with explicit settings
    pub fn compute_with(&self, args: &mut [f32], data: &D, settings: &DescentSettings) -> DescentReport {
        let mut rate = settings.rate;
        let mut cost = self.cost(args, data);
        let mut previous = args.to_vec();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < settings.max_iterations {
            iterations += 1;
            let gradient = self.gradient(args, data);
            previous.copy_from_slice(args);

            for (arg, slope) in args.iter_mut().zip(&gradient) {
                *arg -= rate * slope;
            }
            if let Some(hook) = &self.hook {
                hook.after_step(args, &previous, data);
            }

            if settings.adaptive {
                let next_cost = self.cost(args, data);
                if next_cost > cost {
                    args.copy_from_slice(&previous);
                    rate *= RATE_SHRINK;
                    if rate < f32::MIN_POSITIVE {
                        break;
                    }
                    continue;
                }
                cost = next_cost;
                rate *= RATE_GROWTH;
            }

            let delta = args
                .iter()
                .zip(&previous)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            if delta < settings.target_delta {
                converged = true;
                break;
            }
        }

        if !settings.adaptive {
            cost = self.cost(args, data);
        }
        log::trace!("Gradient descent finished after {iterations} iterations, cost {cost}");

        DescentReport {
            iterations,
            cost,
            converged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sum of (x_i - c_i)^2
    struct Bowl;

    impl CostTerm<Vec<f32>> for Bowl {
        fn value(&self, args: &[f32], centre: &Vec<f32>) -> f32 {
            args.iter().zip(centre).map(|(x, c)| (x - c) * (x - c)).sum()
        }

        fn partial_derivative(&self, args: &[f32], index: usize, centre: &Vec<f32>) -> f32 {
            2.0 * (args[index] - centre[index])
        }
    }

    struct Floor(f32);

    impl DescentStepHook<Vec<f32>> for Floor {
        fn after_step(&self, args: &mut [f32], _previous: &[f32], _data: &Vec<f32>) {
            for arg in args {
                *arg = arg.max(self.0);
            }
        }
    }

    fn settings() -> DescentSettings {
        DescentSettings {
            rate: 0.1,
            max_iterations: 500,
            target_delta: 1e-7,
            adaptive: false,
        }
    }

    #[test]
    fn test_descent_reaches_minimum() {
        let solver = GradientDescent::new(settings()).with_term(Bowl);
        let centre = vec![1.0, -2.0, 0.5];
        let mut args = vec![0.0; 3];
        let report = solver.compute(&mut args, &centre);
        assert!(report.converged);
        for (a, c) in args.iter().zip(&centre) {
            assert!((a - c).abs() < 1e-5);
        }
    }

    #[test]
    fn test_step_hook_projects_arguments() {
        let mut solver = GradientDescent::new(settings()).with_term(Bowl);
        solver.set_step_hook(Floor(0.0));
        let centre = vec![-1.0, 2.0];
        let mut args = vec![1.0, 1.0];
        solver.compute(&mut args, &centre);
        assert_eq!(args[0], 0.0);
        assert!((args[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_adaptive_rate_recovers_from_large_rate() {
        let settings = DescentSettings {
            rate: 5.0,
            adaptive: true,
            ..settings()
        };
        let solver = GradientDescent::new(settings).with_term(Bowl);
        let centre = vec![3.0];
        let mut args = vec![0.0];
        let report = solver.compute(&mut args, &centre);
        assert!(report.cost < 1e-8);
        assert!((args[0] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_iteration_budget_respected() {
        let settings = DescentSettings {
            rate: 1e-4,
            max_iterations: 3,
            ..settings()
        };
        let solver = GradientDescent::new(settings).with_term(Bowl);
        let mut args = vec![0.0];
        let report = solver.compute(&mut args, &vec![10.0]);
        assert_eq!(report.iterations, 3);
        assert!(!report.converged);
        assert_eq!(solver.term_count(), 1);
    }
}
