//! Map and reduce execution on a worker
//!
//! Intermediate results are JSON files holding the grouped values of one
//! partition, stored next to the input as `<partition>.json`. The reference is
//! the whole partition id plus a suffix, so distinct partitions never share
//! one and a task that runs twice produces the same reference. Files are
//! written next to their final name and renamed into place.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::mapreduce::apps::{get_app, MapFn, ReduceFn};
use crate::mapreduce::error::PayloadError;
use crate::mapreduce::util::{group_by_key, Grouped};

#[derive(Clone)]
pub struct Payload {
    map_fn: MapFn,
    reduce_fn: ReduceFn,
    output_dir: PathBuf,
}

impl Payload {
    pub fn new(app: &str, output_dir: impl Into<PathBuf>) -> Result<Self, PayloadError> {
        let (map_fn, reduce_fn) =
            get_app(app).ok_or_else(|| PayloadError::UnknownApp(app.to_string()))?;
        Ok(Self {
            map_fn,
            reduce_fn,
            output_dir: output_dir.into(),
        })
    }

    /// Reference a map of `partition` will report
    pub fn result_ref(&self, partition: &str) -> PathBuf {
        PathBuf::from(format!("{partition}.json"))
    }

    /// Final output of reduce partition `partition`
    pub fn output_path(&self, partition: &str) -> PathBuf {
        output_file(&self.output_dir, partition)
    }

    /// Map one input partition; returns the intermediate result reference.
    /// `writer` keeps concurrent executions of the same task apart until rename.
    pub fn run_map(&self, partition: &str, writer: &str) -> Result<String, PayloadError> {
        let contents = fs::read_to_string(partition).map_err(|source| PayloadError::ReadInput {
            path: PathBuf::from(partition),
            source,
        })?;
        let grouped = group_by_key((self.map_fn)(partition, &contents));

        let path = self.result_ref(partition);
        let json = serde_json::to_vec(&grouped).map_err(|e| PayloadError::Write {
            path: path.clone(),
            source: e.into(),
        })?;
        write_atomic(&path, &json, writer)?;
        debug!(partition, keys = grouped.len(), result = %path.display(), "map output written");
        Ok(path.to_string_lossy().into_owned())
    }

    /// Reduce `keys` over every intermediate result; returns the output path
    pub fn run_reduce(
        &self,
        partition: &str,
        results: &[String],
        keys: &[String],
        writer: &str,
    ) -> Result<PathBuf, PayloadError> {
        let mut values: HashMap<&str, Vec<String>> =
            keys.iter().map(|k| (k.as_str(), Vec::new())).collect();

        for result in results {
            let path = Path::new(result);
            let bytes = fs::read(path).map_err(|e| PayloadError::ReadIntermediate {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let grouped: Grouped =
                serde_json::from_slice(&bytes).map_err(|e| PayloadError::ReadIntermediate {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            for (key, found) in grouped {
                if let Some(slot) = values.get_mut(key.as_str()) {
                    slot.extend(found);
                }
            }
        }

        let mut out = String::new();
        for key in keys {
            let vals: Vec<&str> = values
                .get(key.as_str())
                .map(|v| v.iter().map(String::as_str).collect())
                .unwrap_or_default();
            out.push_str(&format!("{} {}\n", key, (self.reduce_fn)(key, vals)));
        }

        let path = self.output_path(partition);
        write_atomic(&path, out.as_bytes(), writer)?;
        debug!(partition, keys = keys.len(), output = %path.display(), "reduce output written");
        Ok(path)
    }
}

fn write_atomic(path: &Path, contents: &[u8], writer: &str) -> Result<(), PayloadError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{writer}.tmp"));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(|source| PayloadError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| PayloadError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn output_file(dir: &Path, partition: &str) -> PathBuf {
    dir.join(format!("Ans-{partition}.txt"))
}

/// Parse a reduce output back into `key -> value`
pub fn load_answers(path: &Path) -> Result<BTreeMap<String, String>, PayloadError> {
    let text = fs::read_to_string(path).map_err(|e| PayloadError::ReadIntermediate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}
