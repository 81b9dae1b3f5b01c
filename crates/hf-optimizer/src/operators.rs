//! Uniform crossover and bounded, quantized mutation.

use hf_types::{
    HfResult, MutationDetails, MutationRecord, ParameterSet, ParameterSpace, ParameterValue,
    SearchError, validation_error,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-dimension mutation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationSettings {
    /// Probability that a given dimension is perturbed.
    pub probability: f64,
    /// Maximum perturbation as a fraction of the dimension's span.
    pub strength: f64,
}

impl Default for MutationSettings {
    fn default() -> Self {
        Self {
            probability: 0.80,
            strength: 0.30,
        }
    }
}

impl MutationSettings {
    /// Settings that never perturb anything.
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> HfResult<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(validation_error!(
                "mutation probability must lie in [0, 1], got {}",
                self.probability
            ));
        }
        if !self.strength.is_finite() || self.strength < 0.0 {
            return Err(validation_error!(
                "mutation strength must be a non-negative number, got {}",
                self.strength
            ));
        }
        Ok(())
    }
}

fn value_of<'a>(params: &'a ParameterSet, name: &str) -> Result<&'a ParameterValue, SearchError> {
    params.get(name).ok_or_else(|| SearchError::MissingParameter {
        parameter: name.to_string(),
    })
}

/// Uniform crossover: each dimension independently takes `a`'s or `b`'s
/// value with equal probability. No blending.
pub fn crossover<R>(
    space: &ParameterSpace,
    a: &ParameterSet,
    b: &ParameterSet,
    rng: &mut R,
) -> Result<ParameterSet, SearchError>
where
    R: Rng + ?Sized,
{
    let mut child = ParameterSet::new();
    for spec in space.iter() {
        let from_a = value_of(a, &spec.name)?;
        let from_b = value_of(b, &spec.name)?;
        let picked = if rng.random_bool(0.5) { from_a } else { from_b };
        child.insert(spec.name.clone(), spec.clamp_and_quantize(picked.as_f64()));
    }
    Ok(child)
}

/// Perturbs each dimension with probability `settings.probability` by
/// `U(-1, 1) * strength * (max - min)`, then clamps and quantizes.
///
/// Returns the dimensions whose value actually changed.
pub fn mutate<R>(
    space: &ParameterSpace,
    params: &mut ParameterSet,
    settings: &MutationSettings,
    rng: &mut R,
) -> Result<MutationDetails, SearchError>
where
    R: Rng + ?Sized,
{
    let mut details = MutationDetails::new();
    for spec in space.iter() {
        if !rng.random_bool(settings.probability) {
            continue;
        }
        let before = *value_of(params, &spec.name)?;
        let delta = rng.random_range(-1.0..1.0) * settings.strength * spec.span();
        let after = spec.clamp_and_quantize(before.as_f64() + delta);
        if after != before {
            params.insert(spec.name.clone(), after);
            details.insert(spec.name.clone(), MutationRecord { before, after });
        }
    }
    Ok(details)
}
