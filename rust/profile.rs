use crate::config::EstimationParameters;
use crate::error::{StainError, StainResult};
use crate::stain_estimator::SeparationAlgorithm;
use crate::stain_matrix::{row, StainVectors, MAX_STAINS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One named stain and its unit-length optical density direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainComponent {
    pub name: String,
    rgb: [f64; 3],
}

impl StainComponent {
    /// Fails for non-finite or all-zero vectors; anything else is normalized.
    pub fn new(name: impl Into<String>, rgb: [f64; 3]) -> StainResult<Self> {
        Ok(Self {
            name: name.into(),
            rgb: unit_vector(rgb)?,
        })
    }

    pub fn rgb(&self) -> [f64; 3] {
        self.rgb
    }

    pub fn set_rgb(&mut self, rgb: [f64; 3]) -> StainResult<()> {
        self.rgb = unit_vector(rgb)?;
        Ok(())
    }
}

fn unit_vector(v: [f64; 3]) -> StainResult<[f64; 3]> {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(StainError::InvalidInput(format!("{v:?} is not a usable stain vector")));
    }
    Ok(v.map(|x| x / norm))
}

/// Result of one estimation run: named stains, the algorithm that found
/// them, and the parameters it ran with.
///
/// The parameter map uses the profile keys `numPixels`, `threshold`,
/// `percentile` and `histogramBins`; only the keys the algorithm reads
/// are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainProfile {
    pub name: String,
    pub algorithm: SeparationAlgorithm,
    components: Vec<StainComponent>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl StainProfile {
    pub fn new(name: impl Into<String>, algorithm: SeparationAlgorithm) -> Self {
        Self {
            name: name.into(),
            algorithm,
            components: Vec::with_capacity(MAX_STAINS),
            parameters: BTreeMap::new(),
        }
    }

    /// Build a profile from the first `names.len()` rows of a stain matrix.
    pub fn from_stain_vectors(
        name: impl Into<String>,
        algorithm: SeparationAlgorithm,
        stains: &StainVectors,
        names: &[&str],
    ) -> StainResult<Self> {
        let mut profile = Self::new(name, algorithm);
        for (i, stain_name) in names.iter().enumerate() {
            profile.add_component(StainComponent::new(*stain_name, row(stains, i))?)?;
        }
        profile.validate()?;
        Ok(profile)
    }

    pub fn add_component(&mut self, component: StainComponent) -> StainResult<()> {
        if self.components.len() >= MAX_STAINS {
            return Err(StainError::InvalidInput(format!(
                "a profile holds at most {MAX_STAINS} stains"
            )));
        }
        self.components.push(component);
        Ok(())
    }

    pub fn components(&self) -> &[StainComponent] {
        &self.components
    }

    pub fn component_mut(&mut self, index: usize) -> Option<&mut StainComponent> {
        self.components.get_mut(index)
    }

    pub fn num_stains(&self) -> usize {
        self.components.len()
    }

    /// Record the parameters the profile's algorithm uses.
    pub fn set_parameters(&mut self, params: &EstimationParameters) {
        self.parameters.clear();
        for &key in self.algorithm.info().parameters {
            let value = match key {
                "numPixels" => params.num_pixels as f64,
                "threshold" => params.od_threshold,
                "percentile" => params.percentile,
                "histogramBins" => params.histogram_bins as f64,
                _ => continue,
            };
            self.parameters.insert(key.to_string(), value);
        }
    }

    /// Rows in component order, trailing rows zero.
    pub fn stain_vectors(&self) -> StainVectors {
        let mut out = [0.0; 9];
        for (i, c) in self.components.iter().enumerate().take(MAX_STAINS) {
            out[i * 3..i * 3 + 3].copy_from_slice(&c.rgb);
        }
        out
    }

    /// Check the invariants a deserialized profile may have broken.
    pub fn validate(&self) -> StainResult<()> {
        let n = self.components.len();
        if !(1..=MAX_STAINS).contains(&n) {
            return Err(StainError::InvalidInput(format!(
                "a profile needs 1 to {MAX_STAINS} stains, found {n}"
            )));
        }
        self.algorithm.check_stain_count(n)?;
        for c in &self.components {
            let norm = (c.rgb[0] * c.rgb[0] + c.rgb[1] * c.rgb[1] + c.rgb[2] * c.rgb[2]).sqrt();
            if (norm - 1.0).abs() > 1e-6 {
                return Err(StainError::InvalidInput(format!(
                    "stain {:?} is not unit length ({norm})",
                    c.name
                )));
            }
        }
        Ok(())
    }

    /// Multi-line human readable summary.
    pub fn report(&self) -> String {
        let mut s = format!("Stain profile: {}\n", self.name);
        s += &format!("Algorithm: {}\n", self.algorithm.name());
        s += &format!("Number of stains: {}\n", self.components.len());
        for (i, c) in self.components.iter().enumerate() {
            s += &format!(
                "Stain {} ({}): {:.4} {:.4} {:.4}\n",
                i + 1,
                c.name,
                c.rgb[0],
                c.rgb[1],
                c.rgb[2]
            );
        }
        for (key, value) in &self.parameters {
            s += &format!("{key}: {value}\n");
        }
        s
    }
}

impl fmt::Display for StainProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn he_profile() -> StainProfile {
        let m = [0.65, 0.70, 0.29, 0.07, 0.99, 0.11, 0.0, 0.0, 0.0];
        let mut p = StainProfile::from_stain_vectors("H&E", SeparationAlgorithm::Macenko, &m, &["Hematoxylin", "Eosin"])
            .unwrap();
        p.set_parameters(&EstimationParameters::default());
        p
    }

    #[test]
    fn test_components_are_normalized() {
        let mut c = StainComponent::new("x", [3.0, 0.0, 4.0]).unwrap();
        assert_eq!(c.rgb(), [0.6, 0.0, 0.8]);
        c.set_rgb([0.0, 2.0, 0.0]).unwrap();
        assert_eq!(c.rgb(), [0.0, 1.0, 0.0]);
        assert!(c.set_rgb([0.0; 3]).is_err());
        assert!(StainComponent::new("nan", [f64::NAN, 1.0, 0.0]).is_err());
    }

    #[test]
    fn test_stain_vectors_round_trip() {
        let p = he_profile();
        let m = p.stain_vectors();
        assert_abs_diff_eq!(m[6], 0.0);
        let n: f64 = m[..3].iter().map(|v| v * v).sum();
        assert_abs_diff_eq!(n, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parameters_follow_registry() {
        let p = he_profile();
        let keys: Vec<_> = p.parameters.keys().map(String::as_str).collect();
        assert_eq!(keys, ["histogramBins", "numPixels", "percentile", "threshold"]);
        let mut roi = StainProfile::new("roi", SeparationAlgorithm::RegionOfInterest);
        roi.set_parameters(&EstimationParameters::default());
        assert!(roi.parameters.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(StainProfile::new("empty", SeparationAlgorithm::Nmf).validate().is_err());
        let m = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let three = StainProfile::from_stain_vectors("x", SeparationAlgorithm::Macenko, &m, &["a", "b", "c"]);
        assert!(matches!(three, Err(StainError::UnsupportedStainCount { .. })));
        let mut p = StainProfile::new("x", SeparationAlgorithm::RegionOfInterest);
        for name in ["a", "b", "c"] {
            p.add_component(StainComponent::new(name, [1.0, 1.0, 1.0]).unwrap()).unwrap();
        }
        assert!(p.add_component(StainComponent::new("d", [1.0, 0.0, 0.0]).unwrap()).is_err());
    }

    #[test]
    fn test_json_round_trip_and_report() {
        let p = he_profile();
        let json = serde_json::to_string(&p).unwrap();
        let back: StainProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, p.name);
        assert_eq!(back.algorithm, p.algorithm);
        assert_eq!(back.parameters, p.parameters);
        for (a, b) in back.stain_vectors().iter().zip(p.stain_vectors().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        back.validate().unwrap();
        let report = p.report();
        assert!(report.contains("Algorithm: Macenko decomposition"));
        assert!(report.contains("Stain 2 (Eosin)"));
        assert!(report.contains("numPixels: 10000"));
    }
}
