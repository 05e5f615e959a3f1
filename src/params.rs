//! Parameter bags.
//!
//! A node's parameters are an untyped JSON object, owned by the editor. Units
//! read what they need through [`ParamsExt`] and fall back to defaults for
//! anything missing or mistyped.

use serde_json::{Map, Value};

/// A node's parameter bag.
pub type Params = Map<String, Value>;

/// Typed accessors over a [`Params`] bag.
pub trait ParamsExt {
    /// A number, or `default` when absent or not numeric.
    fn number(&self, key: &str, default: f64) -> f64;

    /// A non-negative integer, or `default`.
    fn count(&self, key: &str, default: usize) -> usize;

    /// A boolean, or `default`.
    fn flag(&self, key: &str, default: bool) -> bool;

    /// A string slice, or `default`.
    fn text<'a>(&'a self, key: &str, default: &'a str) -> &'a str;

    /// A list of numbers. Non-numeric entries are skipped.
    fn numbers(&self, key: &str) -> Vec<f64>;

    /// Set a numeric parameter. Non-finite values are stored as `null`.
    fn set_number(&mut self, key: &str, value: f64);
}

impl ParamsExt for Params {
    fn number(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    fn count(&self, key: &str, default: usize) -> usize {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|n| n as usize)
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize))
                .unwrap_or(default),
            _ => default,
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            _ => default,
        }
    }

    fn text<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    fn numbers(&self, key: &str) -> Vec<f64> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }

    fn set_number(&mut self, key: &str, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.insert(key.to_owned(), value);
    }
}

/// Build a [`Params`] bag from a JSON object literal.
///
/// Anything that is not an object yields an empty bag.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

/// True if `key` differs between two bags.
pub(crate) fn changed(old: &Params, new: &Params, key: &str) -> bool {
    old.get(key) != new.get(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_fall_back_on_missing_or_mistyped() {
        let p = params(json!({ "frequency": 440, "name": "a", "on": true, "taps": [1, "x", 2.5] }));
        assert_eq!(p.number("frequency", 0.0), 440.0);
        assert_eq!(p.number("name", 3.0), 3.0);
        assert_eq!(p.number("missing", 1.5), 1.5);
        assert_eq!(p.count("frequency", 0), 440);
        assert!(p.flag("on", false));
        assert_eq!(p.text("name", "z"), "a");
        assert_eq!(p.numbers("taps"), vec![1.0, 2.5]);
    }

    #[test]
    fn non_finite_numbers_become_null() {
        let mut p = Params::new();
        p.set_number("x", f64::NAN);
        assert_eq!(p.get("x"), Some(&Value::Null));
        p.set_number("x", 2.0);
        assert_eq!(p.number("x", 0.0), 2.0);
    }
}
