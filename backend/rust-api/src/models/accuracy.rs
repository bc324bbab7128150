use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// Percentage with two fixed decimal digits, stored as hundredths of a percent.
///
/// Storage, mastery comparison and display all go through this type so that
/// `79.995` can never round one way on disk and another way at the threshold.
/// Serialized as a plain number (`50.0`, `66.67`) for API and BSON compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Accuracy(u32);

impl Accuracy {
    pub const ZERO: Accuracy = Accuracy(0);
    pub const FULL: Accuracy = Accuracy(10_000);

    pub const fn from_hundredths(hundredths: u32) -> Self {
        Accuracy(hundredths)
    }

    /// `correct / total * 100`, rounded half-up to two decimals. Zero when `total` is zero.
    pub fn from_ratio(correct: u32, total: u32) -> Self {
        if total == 0 {
            return Accuracy::ZERO;
        }
        let correct = u64::from(correct.min(total));
        let total = u64::from(total);
        let hundredths = (correct * 10_000 * 2 + total) / (2 * total);
        Accuracy(hundredths as u32)
    }

    /// Rounds an arbitrary percentage to the nearest hundredth, clamped to `0..=100`.
    pub fn from_percent(percent: f64) -> Self {
        if !percent.is_finite() || percent <= 0.0 {
            return Accuracy::ZERO;
        }
        let hundredths = (percent * 100.0).round().min(10_000.0);
        Accuracy(hundredths as u32)
    }

    pub const fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn meets(self, threshold: Accuracy) -> bool {
        self >= threshold
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Accuracy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_percent())
    }
}

impl<'de> Deserialize<'de> for Accuracy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let percent = f64::deserialize(deserializer)?;
        if percent.is_nan() || percent < 0.0 {
            return Err(D::Error::custom(format!("invalid accuracy: {}", percent)));
        }
        Ok(Accuracy::from_percent(percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_rounds_half_up_to_two_decimals() {
        assert_eq!(Accuracy::from_ratio(2, 4), Accuracy::from_hundredths(5_000));
        assert_eq!(Accuracy::from_ratio(1, 3), Accuracy::from_hundredths(3_333));
        assert_eq!(Accuracy::from_ratio(2, 3), Accuracy::from_hundredths(6_667));
        assert_eq!(Accuracy::from_ratio(4, 5), Accuracy::from_hundredths(8_000));
        assert_eq!(Accuracy::from_ratio(5, 5), Accuracy::FULL);
    }

    #[test]
    fn empty_ratio_is_zero() {
        assert_eq!(Accuracy::from_ratio(0, 0), Accuracy::ZERO);
    }

    #[test]
    fn threshold_boundary() {
        let threshold = Accuracy::from_percent(80.0);
        assert!(Accuracy::from_hundredths(8_000).meets(threshold));
        assert!(!Accuracy::from_hundredths(7_999).meets(threshold));
    }

    #[test]
    fn display_keeps_two_decimals() {
        assert_eq!(Accuracy::from_ratio(2, 4).to_string(), "50.00");
        assert_eq!(Accuracy::from_ratio(1, 3).to_string(), "33.33");
        assert_eq!(Accuracy::from_hundredths(5).to_string(), "0.05");
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_value(Accuracy::from_ratio(2, 3)).unwrap();
        assert_eq!(json, serde_json::json!(66.67));

        let parsed: Accuracy = serde_json::from_value(serde_json::json!(80)).unwrap();
        assert_eq!(parsed, Accuracy::from_hundredths(8_000));
    }

    #[test]
    fn rejects_negative_values() {
        assert!(serde_json::from_value::<Accuracy>(serde_json::json!(-1.0)).is_err());
    }
}
