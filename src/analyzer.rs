use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::lifecycle::{Analysis, Analyzer};

pub const DEFAULT_ALLERGENS: [&str; 3] = ["Dairy", "Gluten", "Nuts"];

/// Stand-in for the homomorphic analysis service: waits, reports a fixed
/// allergen list, and marks the entry severe with the given probability.
#[derive(Debug, Clone)]
pub struct SimulatedAnalyzer {
    allergens: Vec<String>,
    flag_probability: f64,
    delay: Duration,
}

impl SimulatedAnalyzer {
    pub fn new(allergens: Vec<String>, flag_probability: f64, delay: Duration) -> Self {
        Self {
            allergens,
            flag_probability: flag_probability.clamp(0.0, 1.0),
            delay,
        }
    }
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLERGENS.iter().map(|s| s.to_string()).collect(),
            0.3,
            Duration::from_secs(3),
        )
    }
}

#[async_trait]
impl Analyzer for SimulatedAnalyzer {
    async fn analyze(&self, encrypted_food: &str, encrypted_symptoms: &str) -> Result<Analysis, String> {
        debug!(
            "simulated analysis over {} + {} payload bytes",
            encrypted_food.len(),
            encrypted_symptoms.len()
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let severe = rand::thread_rng().gen_bool(self.flag_probability);
        Ok(Analysis {
            allergens: self.allergens.clone(),
            severe,
        })
    }
}

/// Always answers with the same result.
#[derive(Debug, Clone, Default)]
pub struct FixedAnalyzer {
    pub allergens: Vec<String>,
    pub severe: bool,
}

impl FixedAnalyzer {
    pub fn new<S: Into<String>>(allergens: impl IntoIterator<Item = S>, severe: bool) -> Self {
        Self {
            allergens: allergens.into_iter().map(Into::into).collect(),
            severe,
        }
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _food: &str, _symptoms: &str) -> Result<Analysis, String> {
        Ok(Analysis {
            allergens: self.allergens.clone(),
            severe: self.severe,
        })
    }
}
