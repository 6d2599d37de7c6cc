//! Dotted paths such as `user.address.city` or `items.0.name`.
//!
//! A path is valid when it only contains alphanumerics (unicode letters
//! included), `_`, `$` and `.`. Anything else (brackets, spaces, operators)
//! is rejected rather than guessed at.

use super::state::Value;

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse `path`, returning `None` if it contains unsupported characters.
    pub fn parse(path: &str) -> Option<Self> {
        let valid = path
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'));
        valid.then(|| Self {
            segments: path.split('.').map(str::to_owned).collect(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the path from `root`, reading each step through the observable
    /// tree so every step is recorded as a dependency.
    ///
    /// A step through anything other than an object or list reads as
    /// [`Value::Null`].
    pub fn read(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(state) => state.get(segment),
                Value::List(list) => match segment.parse::<usize>() {
                    Ok(index) => list.get(index),
                    Err(_) => return Value::Null,
                },
                _ => return Value::Null,
            };
        }
        current
    }
}
