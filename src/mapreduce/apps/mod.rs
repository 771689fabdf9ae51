use crate::mapreduce::util::KeyValue;

pub mod wc;

/// `(partition name, partition contents) -> emitted pairs`
pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;
/// `(key, every value emitted for it) -> aggregate`
pub type ReduceFn = fn(&str, Vec<&str>) -> String;

pub const APPS: &[&str] = &["wc"];

pub fn get_app(name: &str) -> Option<(MapFn, ReduceFn)> {
    match name {
        "wc" => Some((wc::map, wc::reduce)),
        _ => None,
    }
}
