//! Seeded synthetic city profiles: a base category distribution with uniform
//! per-category noise, renormalized, exported as JSON lines.

use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::prediction::Prediction;

pub const DEFAULT_NOISE: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticCity {
    pub city_id: String,
    /// Category → share; sums to 1 unless every share was clipped to 0.
    pub purpose_profile: BTreeMap<String, f32>,
    /// Shannon entropy of the profile, in nats.
    pub entropy: f32,
}

pub struct SyntheticCityEngine {
    rng: StdRng,
    noise: f32,
}

impl SyntheticCityEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            noise: DEFAULT_NOISE,
        }
    }

    pub fn with_noise(mut self, noise: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&noise) {
            bail!("noise must be in [0, 1], got {noise}");
        }
        self.noise = noise;
        Ok(self)
    }

    /// One noisy draw around `base`. Negative shares are clipped to 0.
    pub fn generate_city(&mut self, base: &BTreeMap<String, f32>) -> BTreeMap<String, f32> {
        let mut profile: BTreeMap<String, f32> = base
            .iter()
            .map(|(k, p)| {
                let noise = self.rng.random_range(-self.noise..=self.noise);
                (k.clone(), (p + noise).max(0.0))
            })
            .collect();
        let total: f32 = profile.values().sum();
        if total > 0.0 {
            profile.values_mut().for_each(|v| *v /= total);
        }
        profile
    }

    pub fn generate(&mut self, base: &BTreeMap<String, f32>, n: usize) -> Result<Vec<SyntheticCity>> {
        validate_base(base)?;
        let cities = (0..n)
            .map(|i| {
                let purpose_profile = self.generate_city(base);
                SyntheticCity {
                    city_id: format!("synthetic_{i}"),
                    entropy: entropy(&purpose_profile),
                    purpose_profile,
                }
            })
            .collect();
        Ok(cities)
    }
}

fn validate_base(base: &BTreeMap<String, f32>) -> Result<()> {
    if base.is_empty() {
        bail!("base distribution is empty");
    }
    if let Some((k, v)) = base.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        bail!("base share for `{k}` must be finite and >= 0, got {v}");
    }
    Ok(())
}

/// `−Σ p ln p` over positive shares.
pub fn entropy(dist: &BTreeMap<String, f32>) -> f32 {
    -dist
        .values()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f32>()
}

/// Main-category scores of a prediction as a base distribution.
pub fn base_from_prediction(p: &Prediction) -> BTreeMap<String, f32> {
    p.main_scores
        .iter()
        .map(|s| (s.label.clone(), s.score))
        .collect()
}

/// One JSON object per line.
pub fn write_jsonl<W: Write>(cities: &[SyntheticCity], mut w: W) -> Result<()> {
    for c in cities {
        serde_json::to_writer(&mut w, c)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub fn export_jsonl<P: AsRef<Path>>(cities: &[SyntheticCity], path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_jsonl(cities, BufWriter::new(file))
        .with_context(|| format!("writing {}", path.display()))?;
    info!(target: "synthetic", path = %path.display(), cities = cities.len(), "synthetic cities exported");
    Ok(())
}
