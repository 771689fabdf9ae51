use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: String, value: String) -> Self {
        KeyValue { key, value }
    }
}

/// Values of each key, keys sorted, values in emission order
pub type Grouped = BTreeMap<String, Vec<String>>;

pub fn group_by_key<I>(pairs: I) -> Grouped
where
    I: IntoIterator<Item = KeyValue>,
{
    pairs.into_iter().fold(BTreeMap::new(), |mut grouped, kv| {
        grouped.entry(kv.key).or_insert_with(Vec::new).push(kv.value);
        grouped
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_keeps_every_value() {
        let grouped = group_by_key(vec![
            KeyValue::new("b".into(), "1".into()),
            KeyValue::new("a".into(), "1".into()),
            KeyValue::new("b".into(), "2".into()),
        ]);
        let keys: Vec<_> = grouped.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(grouped["b"], vec!["1", "2"]);
    }
}
