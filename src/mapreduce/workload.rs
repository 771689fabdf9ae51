//! Synthetic word-count workloads
//!
//! Writes input partitions made of words from a small fixed vocabulary,
//! picks the keys each reduce partition is responsible for, and remembers the
//! true count of every word so a finished job can be checked.

use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::mapreduce::error::{MrError, Result};
use crate::mapreduce::payload::{load_answers, output_file};

const BASE_LETTERS: [char; 7] = ['a', 'b', 'c', 'd', 'e', 'f', 'z'];
const MAX_REPEAT: usize = 4;

/// `a`, `aa`, ..., `zzzz`
pub fn vocabulary() -> Vec<String> {
    BASE_LETTERS
        .iter()
        .flat_map(|&c| (1..=MAX_REPEAT).map(move |n| c.to_string().repeat(n)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub files: usize,
    pub reduce_partitions: usize,
    pub words_per_file: RangeInclusive<usize>,
    pub seed: Option<u64>,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            files: 10,
            reduce_partitions: 4,
            words_per_file: 100..=1000,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducePartition {
    pub id: String,
    pub keys: Vec<String>,
}

/// Everything the coordinator needs to start a job, plus the ground truth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub partitions: Vec<String>,
    pub reduce_partitions: Vec<ReducePartition>,
    pub expected: BTreeMap<String, u64>,
}

impl Workload {
    pub fn reduce_assignments(&self) -> Vec<(String, Vec<String>)> {
        self.reduce_partitions
            .iter()
            .map(|p| (p.id.clone(), p.keys.clone()))
            .collect()
    }

    /// Expected `key -> count` lines of one reduce partition
    pub fn expected_for(&self, partition: &str) -> Option<BTreeMap<String, String>> {
        let part = self.reduce_partitions.iter().find(|p| p.id == partition)?;
        Some(
            part.keys
                .iter()
                .map(|k| {
                    let count = self.expected.get(k).copied().unwrap_or(0);
                    (k.clone(), count.to_string())
                })
                .collect(),
        )
    }

    /// Compare every reduce output in `output_dir` with the ground truth.
    /// Returns one line per disagreement; empty means the job was correct.
    pub fn verify(&self, output_dir: &Path) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        for part in &self.reduce_partitions {
            let path = output_file(output_dir, &part.id);
            let actual = match load_answers(&path) {
                Ok(actual) => actual,
                Err(e) => {
                    problems.push(format!("{}: {}", part.id, e));
                    continue;
                }
            };
            let expected = self.expected_for(&part.id).unwrap_or_default();
            for (key, want) in &expected {
                match actual.get(key) {
                    Some(got) if got == want => {}
                    Some(got) => problems.push(format!("{}: {key} = {got}, expected {want}", part.id)),
                    None => problems.push(format!("{}: {key} missing", part.id)),
                }
            }
        }
        Ok(problems)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            MrError::Workload(format!("cannot read manifest '{}': {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write the input partitions of `spec` into `dir`
pub fn generate(dir: &Path, spec: &WorkloadSpec) -> Result<Workload> {
    if spec.words_per_file.is_empty() {
        return Err(MrError::Workload(format!(
            "empty words-per-file range {:?}",
            spec.words_per_file
        )));
    }
    fs::create_dir_all(dir)?;

    let mut rng = match spec.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let vocab = vocabulary();
    let mut expected: BTreeMap<String, u64> = BTreeMap::new();

    let mut partitions = Vec::with_capacity(spec.files);
    for i in 0..spec.files {
        let path: PathBuf = dir.join(format!("file_{i}.txt"));
        let count = rng.gen_range(spec.words_per_file.clone());
        let mut contents = String::with_capacity(count * 3);
        for _ in 0..count {
            if let Some(word) = vocab.choose(&mut rng) {
                *expected.entry(word.clone()).or_insert(0) += 1;
                contents.push_str(word);
                contents.push(' ');
            }
        }
        fs::write(&path, contents)?;
        partitions.push(path.to_string_lossy().into_owned());
    }

    let reduce_partitions = (0..spec.reduce_partitions)
        .map(|i| {
            let amount = rng.gen_range(1..=vocab.len());
            let keys = vocab
                .choose_multiple(&mut rng, amount)
                .cloned()
                .collect();
            ReducePartition {
                id: format!("Slave{i}"),
                keys,
            }
        })
        .collect();

    info!(
        files = spec.files,
        reduce_partitions = spec.reduce_partitions,
        dir = %dir.display(),
        "workload generated"
    );

    Ok(Workload {
        partitions,
        reduce_partitions,
        expected,
    })
}
