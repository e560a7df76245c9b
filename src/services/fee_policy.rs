use crate::config::FeeSettings;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Fee computation. A pure function of `(amount, method)`: the per-method
/// percent from configuration, falling back to the default percent. Fees
/// are floored to whole minor units and clamped so the fee never consumes
/// the full amount.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    default_percent: Decimal,
    per_method: HashMap<String, Decimal>,
}

impl FeePolicy {
    pub fn new(default_percent: Decimal, per_method: HashMap<String, Decimal>) -> Self {
        Self {
            default_percent,
            per_method,
        }
    }

    pub fn from_settings(settings: &FeeSettings) -> Self {
        Self::new(settings.default_fee_percent, settings.policy.clone())
    }

    /// No fees at all; the default for peer-to-peer transfers.
    pub fn free() -> Self {
        Self::new(Decimal::ZERO, HashMap::new())
    }

    pub fn percent_for(&self, method: Option<&str>) -> Decimal {
        method
            .and_then(|m| self.per_method.get(m).copied())
            .unwrap_or(self.default_percent)
    }

    /// Fee in minor units for a gross amount.
    pub fn compute(&self, amount: i64, method: Option<&str>) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let percent = self.percent_for(method);
        if percent <= Decimal::ZERO {
            return 0;
        }

        let fee = (Decimal::from(amount) * percent / Decimal::from(100)).floor();
        let fee = fee.to_i64().unwrap_or(0);
        // A fee consuming the whole amount would make the net leg unpostable.
        fee.clamp(0, amount - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> FeePolicy {
        let mut per_method = HashMap::new();
        per_method.insert("card".to_string(), dec!(2.9));
        per_method.insert("internal".to_string(), Decimal::ZERO);
        FeePolicy::new(dec!(1.0), per_method)
    }

    #[test]
    fn test_method_percent_applies() {
        // 2.9% of 100000 minor units.
        assert_eq!(policy().compute(100_000, Some("card")), 2_900);
    }

    #[test]
    fn test_default_percent_for_unknown_method() {
        assert_eq!(policy().compute(100_000, Some("wire")), 1_000);
        assert_eq!(policy().compute(100_000, None), 1_000);
    }

    #[test]
    fn test_zero_percent_method() {
        assert_eq!(policy().compute(100_000, Some("internal")), 0);
    }

    #[test]
    fn test_fee_is_floored() {
        // 2.9% of 99 = 2.871 -> 2.
        assert_eq!(policy().compute(99, Some("card")), 2);
    }

    #[test]
    fn test_fee_never_consumes_full_amount() {
        let greedy = FeePolicy::new(dec!(100), HashMap::new());
        assert_eq!(greedy.compute(10, None), 9);
    }

    #[test]
    fn test_free_policy() {
        assert_eq!(FeePolicy::free().compute(1_000_000, Some("card")), 0);
    }

    #[test]
    fn test_non_positive_amounts() {
        assert_eq!(policy().compute(0, Some("card")), 0);
        assert_eq!(policy().compute(-5, Some("card")), 0);
    }
}
