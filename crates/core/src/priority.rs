use serde::{Deserialize, Serialize};

/// Dispatch priority of a projection.
///
/// When several projections are due for the same message, higher priorities are
/// handled first; ties keep registration order.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl Priority {
    /// Signed weight, `Normal` being zero.
    pub fn weight(self) -> i8 {
        match self {
            Priority::Lowest => -2,
            Priority::Low => -1,
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Highest => 2,
        }
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Priority::Lowest => "lowest",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Highest => "highest",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Lowest),
            Just(Priority::Low),
            Just(Priority::Normal),
            Just(Priority::High),
            Just(Priority::Highest),
        ]
    }

    #[test]
    fn default_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::default().weight(), 0);
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&Priority::Highest).unwrap();
        assert_eq!(json, "\"highest\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }

    proptest! {
        /// Property: ordering agrees with the signed weight.
        #[test]
        fn ordering_follows_weight(a in any_priority(), b in any_priority()) {
            prop_assert_eq!(a.cmp(&b), a.weight().cmp(&b.weight()));
        }
    }
}
