use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use pursuit_core::{TargetType, Trajectory, TrialSpec};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::{Counterbalance, TrialCatalog};
use crate::error::{ExperimentError, Result};

/// One row of the persisted trial order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanRow {
    trial_index: usize,
    #[serde(flatten)]
    spec: TrialSpec,
}

/// Ordered trial sequence. Index `i` of `trials()` is trial number `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    trials: Vec<TrialSpec>,
}

impl TrialPlan {
    /// Shuffles catalog × repetitions under the counterbalancing rules.
    /// Deterministic for a given `seed`, OS-seeded otherwise.
    pub fn generate(
        catalog: &TrialCatalog,
        counterbalance: &Counterbalance,
        seed: Option<u64>,
    ) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let blocks: Vec<Vec<TrialSpec>> = if counterbalance.block_by_speed {
            let mut blocks = Vec::new();
            for repetition in 0..catalog.repetitions {
                for &speed in &catalog.target_speeds {
                    blocks.push(catalog.speed_block(speed, repetition));
                }
            }
            blocks
        } else {
            vec![catalog.cells()]
        };

        let mut trials = Vec::with_capacity(catalog.len());
        for mut block in blocks {
            let previous = trials.last().map(|t: &TrialSpec| t.trajectory);
            shuffle_block(&mut block, previous, counterbalance, &mut rng)?;
            trials.extend(block);
        }

        tracing::info!(trials = trials.len(), ?seed, "trial plan generated");
        Ok(Self { trials })
    }

    /// A plan holding exactly one trial, for showcasing a single condition.
    pub fn single(spec: TrialSpec) -> Self {
        Self { trials: vec![spec] }
    }

    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Trial by its 1-based index.
    pub fn get(&self, trial_index: usize) -> Option<&TrialSpec> {
        trial_index.checked_sub(1).and_then(|i| self.trials.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TrialSpec)> {
        self.trials.iter().enumerate().map(|(i, t)| (i + 1, t))
    }

    /// Writes one JSON row per trial. The file is replaced atomically so a
    /// crash never leaves a truncated order behind.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| ExperimentError::io(&tmp, e))?;
            for (trial_index, spec) in self.iter() {
                let row = PlanRow {
                    trial_index,
                    spec: *spec,
                };
                let line = serde_json::to_string(&row)?;
                writeln!(file, "{line}").map_err(|e| ExperimentError::io(&tmp, e))?;
            }
            file.sync_all().map_err(|e| ExperimentError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| ExperimentError::io(path, e))?;
        tracing::debug!(path = %path.display(), "trial order persisted");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|e| ExperimentError::io(path, e))?;
        let mut trials = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| ExperimentError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: PlanRow = serde_json::from_str(&line)?;
            if row.trial_index != trials.len() + 1 {
                return Err(ExperimentError::PlanMismatch(format!(
                    "row {} carries trial index {}",
                    trials.len() + 1,
                    row.trial_index
                )));
            }
            trials.push(row.spec);
        }
        Ok(Self { trials })
    }

    /// Checks the multiset against the catalog and the order against the
    /// adjacency rule.
    pub fn verify(&self, catalog: &TrialCatalog, counterbalance: &Counterbalance) -> Result<()> {
        let mut expected: HashMap<(TargetType, u64, Trajectory, u32), i64> = HashMap::new();
        for cell in catalog.cells() {
            *expected.entry(cell.key()).or_default() += 1;
        }
        for trial in &self.trials {
            *expected.entry(trial.key()).or_default() -= 1;
        }
        if let Some((key, diff)) = expected.iter().find(|(_, d)| **d != 0) {
            let what = if *diff > 0 { "missing" } else { "unexpected" };
            return Err(ExperimentError::PlanMismatch(format!(
                "{what} trial {} {} at {} deg/s (rep {})",
                key.0,
                key.2,
                f64::from_bits(key.1),
                key.3
            )));
        }
        if counterbalance.no_immediate_trajectory_repeat {
            if let Some(i) = first_repeat(&self.trials) {
                return Err(ExperimentError::PlanMismatch(format!(
                    "trials {} and {} share trajectory {}",
                    i + 1,
                    i + 2,
                    self.trials[i].trajectory
                )));
            }
        }
        Ok(())
    }

    /// Loads the persisted order at `path` when it exists, otherwise
    /// generates a new plan and persists it before returning.
    pub fn generate_or_resume(
        catalog: &TrialCatalog,
        counterbalance: &Counterbalance,
        seed: Option<u64>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let plan = Self::load(path)?;
            plan.verify(catalog, counterbalance)?;
            tracing::info!(path = %path.display(), trials = plan.len(), "resuming persisted trial order");
            return Ok(plan);
        }
        let plan = Self::generate(catalog, counterbalance, seed)?;
        plan.persist(path)?;
        Ok(plan)
    }
}

fn first_repeat(trials: &[TrialSpec]) -> Option<usize> {
    trials
        .windows(2)
        .position(|w| w[0].trajectory == w[1].trajectory)
}

/// Rejection sampling: reshuffle until no two neighbours (including the
/// last trial of the previous block) share a trajectory.
fn shuffle_block(
    block: &mut [TrialSpec],
    previous: Option<Trajectory>,
    counterbalance: &Counterbalance,
    rng: &mut StdRng,
) -> Result<()> {
    if !counterbalance.no_immediate_trajectory_repeat {
        block.shuffle(rng);
        return Ok(());
    }
    for attempt in 1..=counterbalance.max_shuffle_attempts {
        block.shuffle(rng);
        let joins_cleanly = match (previous, block.first()) {
            (Some(prev), Some(first)) => prev != first.trajectory,
            _ => true,
        };
        if joins_cleanly && first_repeat(block).is_none() {
            if attempt > 1 {
                tracing::debug!(attempt, "accepted shuffle");
            }
            return Ok(());
        }
    }
    Err(ExperimentError::PlanGeneration {
        attempts: counterbalance.max_shuffle_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TrialCatalog {
        TrialCatalog {
            target_types: vec![TargetType::MovingCircle, TargetType::JumpingCircle],
            target_speeds: vec![5.0, 10.0],
            target_trajectories: vec![Trajectory::HorRight, Trajectory::VerUp, Trajectory::CirClock],
            repetitions: 2,
        }
    }

    fn sorted_keys(trials: &[TrialSpec]) -> Vec<(TargetType, u64, Trajectory, u32)> {
        let mut keys: Vec<_> = trials.iter().map(|t| t.key()).collect();
        keys.sort();
        keys
    }

    #[test]
    fn plan_is_a_permutation_of_the_catalog() {
        let plan = TrialPlan::generate(&catalog(), &Counterbalance::default(), Some(3)).unwrap();
        assert_eq!(plan.len(), 24);
        assert_eq!(sorted_keys(plan.trials()), sorted_keys(&catalog().cells()));
        assert!(first_repeat(plan.trials()).is_none());
        plan.verify(&catalog(), &Counterbalance::default()).unwrap();
    }

    #[test]
    fn same_seed_same_order() {
        let cb = Counterbalance::default();
        let a = TrialPlan::generate(&catalog(), &cb, Some(42)).unwrap();
        let b = TrialPlan::generate(&catalog(), &cb, Some(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn speed_blocks_stay_together() {
        let plan = TrialPlan::generate(&catalog(), &Counterbalance::default(), Some(9)).unwrap();
        // 2 repetitions x 2 speeds, 6 trials per block in configured speed order
        for (b, chunk) in plan.trials().chunks(6).enumerate() {
            let speed = if b % 2 == 0 { 5.0 } else { 10.0 };
            assert!(chunk.iter().all(|t| t.speed_deg_s == speed));
            assert!(chunk.iter().all(|t| t.repetition == (b / 2) as u32));
        }
    }

    #[test]
    fn impossible_constraint_fails_after_bounded_attempts() {
        let catalog = TrialCatalog {
            target_types: vec![TargetType::MovingCircle, TargetType::BackAndForthArray],
            target_speeds: vec![5.0],
            target_trajectories: vec![Trajectory::HorLeft],
            repetitions: 1,
        };
        let cb = Counterbalance {
            max_shuffle_attempts: 25,
            ..Counterbalance::default()
        };
        match TrialPlan::generate(&catalog, &cb, Some(1)) {
            Err(ExperimentError::PlanGeneration { attempts }) => assert_eq!(attempts, 25),
            other => panic!("expected plan generation failure, got {other:?}"),
        }
    }

    #[test]
    fn get_uses_one_based_indices() {
        let plan = TrialPlan::generate(&catalog(), &Counterbalance::default(), Some(5)).unwrap();
        assert!(plan.get(0).is_none());
        assert_eq!(plan.get(1), plan.trials().first());
        assert_eq!(plan.get(24), plan.trials().last());
        assert!(plan.get(25).is_none());
    }
}
