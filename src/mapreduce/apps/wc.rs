//! Word count

use crate::mapreduce::util::KeyValue;

pub fn map(_partition: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| KeyValue::new(word.to_string(), "1".to_string()))
        .collect()
}

/// Number of occurrences; a key nobody emitted counts as zero
pub fn reduce(_key: &str, values: Vec<&str>) -> String {
    values.len().to_string()
}
