//! Search-space declarations: bounded, typed and optionally quantized
//! hyperparameter dimensions.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{HfResult, SearchError};
use crate::validation_error;

/// Numeric type of a search dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Float,
}

/// A concrete value for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Parameter name to value, ordered by name for stable serialization.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// A single dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Hyperparameter name as understood by the trainer (e.g. "lr0").
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Quantization step, integer dimensions only.
    #[serde(default, rename = "quant", skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
}

impl ParameterSpec {
    pub fn float(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            kind: ParameterType::Float,
            step: None,
        }
    }

    pub fn int(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min: min as f64,
            max: max as f64,
            kind: ParameterType::Int,
            step: None,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Checks the declaration itself: finite bounds, `min < max`, a positive
    /// step only on integer dimensions, and at least one admissible value.
    pub fn validate(&self) -> HfResult<()> {
        if self.name.is_empty() {
            return Err(validation_error!("parameter name must not be empty"));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(validation_error!("parameter {} has non-finite bounds", self.name));
        }
        if self.min >= self.max {
            return Err(validation_error!(
                "parameter {}: min ({}) must be below max ({})",
                self.name,
                self.min,
                self.max
            ));
        }
        match (self.kind, self.step) {
            (ParameterType::Float, Some(_)) => Err(validation_error!(
                "parameter {}: quantization step is only valid for int parameters",
                self.name
            )),
            (ParameterType::Int, Some(step)) if step <= 0 => Err(validation_error!(
                "parameter {}: quantization step must be positive, got {}",
                self.name,
                step
            )),
            (ParameterType::Int, step) => {
                let step = step.unwrap_or(1) as f64;
                if (self.min / step).ceil() * step > self.max {
                    return Err(validation_error!(
                        "parameter {}: no multiple of {} lies in [{}, {}]",
                        self.name,
                        step,
                        self.min,
                        self.max
                    ));
                }
                Ok(())
            }
            (ParameterType::Float, None) => Ok(()),
        }
    }

    /// Draws a uniform value in `[min, max]`, rounded and quantized for
    /// integer dimensions.
    pub fn random<R>(&self, rng: &mut R) -> ParameterValue
    where
        R: Rng + ?Sized,
    {
        let raw = rng.random_range(self.min..=self.max);
        self.clamp_and_quantize(raw)
    }

    /// Clamps to `[min, max]`, then rounds to the nearest integer and the
    /// nearest multiple of the step for integer dimensions.
    ///
    /// A quantized value that would fall outside the bounds is moved one step
    /// back inside them.
    pub fn clamp_and_quantize(&self, value: f64) -> ParameterValue {
        let clamped = value.clamp(self.min, self.max);
        match self.kind {
            ParameterType::Float => ParameterValue::Float(clamped),
            ParameterType::Int => {
                let step = self.step.unwrap_or(1) as f64;
                let mut snapped = (clamped.round() / step).round() * step;
                if snapped > self.max {
                    snapped = (self.max / step).floor() * step;
                }
                if snapped < self.min {
                    snapped = (self.min / step).ceil() * step;
                }
                ParameterValue::Int(snapped as i64)
            }
        }
    }

    /// Verifies a value against the bounds and quantization of this dimension.
    pub fn check(&self, value: &ParameterValue) -> Result<(), SearchError> {
        let v = value.as_f64();
        if !(self.min..=self.max).contains(&v) {
            return Err(SearchError::OutOfBoundsValue {
                parameter: self.name.clone(),
                value: v,
                min: self.min,
                max: self.max,
            });
        }
        if self.kind == ParameterType::Int {
            let step = self.step.unwrap_or(1);
            let integral = match value {
                ParameterValue::Int(i) => Some(*i),
                ParameterValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
                ParameterValue::Float(_) => None,
            };
            if integral.map_or(true, |i| i % step != 0) {
                return Err(SearchError::Unquantized {
                    parameter: self.name.clone(),
                    value: v,
                    step,
                });
            }
        }
        Ok(())
    }
}

/// The full search space: an ordered list of parameter dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    pub parameters: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn add_float(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.add(ParameterSpec::float(name, min, max))
    }

    pub fn add_int(self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.add(ParameterSpec::int(name, min, max))
    }

    pub fn add_quantized_int(self, name: impl Into<String>, min: i64, max: i64, step: i64) -> Self {
        self.add(ParameterSpec::int(name, min, max).with_step(step))
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn validate(&self) -> HfResult<()> {
        if self.parameters.is_empty() {
            return Err(validation_error!("search space has no parameters"));
        }
        for (i, spec) in self.parameters.iter().enumerate() {
            spec.validate()?;
            if self.parameters[..i].iter().any(|p| p.name == spec.name) {
                return Err(validation_error!("duplicate parameter: {}", spec.name));
            }
        }
        Ok(())
    }

    /// Draws one value per dimension.
    pub fn random<R>(&self, rng: &mut R) -> ParameterSet
    where
        R: Rng + ?Sized,
    {
        self.parameters
            .iter()
            .map(|spec| (spec.name.clone(), spec.random(rng)))
            .collect()
    }

    /// Verifies that `values` holds exactly one admissible value per dimension.
    pub fn check(&self, values: &ParameterSet) -> Result<(), SearchError> {
        for spec in &self.parameters {
            let value = values.get(&spec.name).ok_or_else(|| SearchError::MissingParameter {
                parameter: spec.name.clone(),
            })?;
            spec.check(value)?;
        }
        if let Some(extra) = values.keys().find(|k| self.get(k).is_none()) {
            return Err(SearchError::UnknownParameter {
                parameter: extra.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_space() -> ParameterSpace {
        ParameterSpace::new()
            .add_float("lr0", 0.001, 0.1)
            .add_int("batch", 2, 4)
            .add_float("positive_ratio", 0.1, 0.9)
            .add_int("dataset_size", 200, 6000)
            .add_quantized_int("imgsz", 320, 960, 32)
    }

    #[test]
    fn random_draws_stay_in_bounds_and_on_grid() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let values = space.random(&mut rng);
            space.check(&values).unwrap();
            let imgsz = values["imgsz"].as_i64().unwrap();
            assert_eq!(imgsz % 32, 0);
            assert!(matches!(values["lr0"], ParameterValue::Float(_)));
        }
    }

    #[test]
    fn clamp_and_quantize_restores_bounds() {
        let imgsz = ParameterSpec::int("imgsz", 320, 960).with_step(32);
        assert_eq!(imgsz.clamp_and_quantize(2000.0), ParameterValue::Int(960));
        assert_eq!(imgsz.clamp_and_quantize(-5.0), ParameterValue::Int(320));
        assert_eq!(imgsz.clamp_and_quantize(500.0), ParameterValue::Int(512));
        assert_eq!(imgsz.clamp_and_quantize(330.0), ParameterValue::Int(320));

        let lr = ParameterSpec::float("lr0", 0.001, 0.1);
        assert_eq!(lr.clamp_and_quantize(0.5), ParameterValue::Float(0.1));
        assert_eq!(lr.clamp_and_quantize(0.05), ParameterValue::Float(0.05));
    }

    #[test]
    fn quantization_never_leaves_bounds() {
        // 100 and 150 are not multiples of 40; nearest multiples would be 80 and 160.
        let spec = ParameterSpec::int("width", 100, 150).with_step(40);
        spec.validate().unwrap();
        assert_eq!(spec.clamp_and_quantize(100.0), ParameterValue::Int(120));
        assert_eq!(spec.clamp_and_quantize(150.0), ParameterValue::Int(120));
    }

    #[test]
    fn unquantized_int_rounds_to_nearest_integer() {
        let batch = ParameterSpec::int("batch", 2, 4);
        assert_eq!(batch.clamp_and_quantize(2.5), ParameterValue::Int(3));
        assert_eq!(batch.clamp_and_quantize(3.49), ParameterValue::Int(3));
    }

    #[test]
    fn validation_rejects_bad_declarations() {
        assert!(ParameterSpec::float("x", 1.0, 1.0).validate().is_err());
        assert!(ParameterSpec::float("x", 0.0, 1.0).with_step(2).validate().is_err());
        assert!(ParameterSpec::int("x", 0, 10).with_step(0).validate().is_err());
        assert!(ParameterSpec::int("x", 1, 3).with_step(8).validate().is_err());
        assert!(ParameterSpec::int("x", 0, 10).with_step(5).validate().is_ok());

        let duplicated = ParameterSpace::new().add_int("a", 0, 1).add_int("a", 0, 2);
        assert!(duplicated.validate().is_err());
        assert!(ParameterSpace::new().validate().is_err());
    }

    #[test]
    fn check_reports_out_of_bounds_and_off_grid() {
        let imgsz = ParameterSpec::int("imgsz", 320, 960).with_step(32);
        assert!(matches!(
            imgsz.check(&ParameterValue::Int(992)),
            Err(SearchError::OutOfBoundsValue { .. })
        ));
        assert!(matches!(
            imgsz.check(&ParameterValue::Int(330)),
            Err(SearchError::Unquantized { .. })
        ));
        assert!(imgsz.check(&ParameterValue::Int(352)).is_ok());
    }

    #[test]
    fn check_flags_missing_and_unknown_parameters() {
        let space = ParameterSpace::new().add_int("batch", 2, 4);
        let empty = ParameterSet::new();
        assert!(matches!(
            space.check(&empty),
            Err(SearchError::MissingParameter { .. })
        ));

        let mut extra = ParameterSet::new();
        extra.insert("batch".into(), ParameterValue::Int(2));
        extra.insert("momentum".into(), ParameterValue::Float(0.9));
        assert!(matches!(
            space.check(&extra),
            Err(SearchError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn space_serializes_as_list_of_specs() {
        let space = ParameterSpace::new().add_quantized_int("imgsz", 320, 960, 32);
        let json = serde_json::to_value(&space).unwrap();
        assert_eq!(json[0]["type"], "int");
        assert_eq!(json[0]["quant"], 32);

        let back: ParameterSpace = serde_json::from_value(json).unwrap();
        assert_eq!(back, space);
    }
}
