//! Pass-local capital budget.

use rust_decimal::Decimal;

/// Running budget seeded from the broker's available funds at the start of
/// a pass. Deductions are local and optimistic; the guard is dropped with
/// the pass.
#[derive(Debug, Clone)]
pub struct FundsGuard {
    opening: Decimal,
    remaining: Decimal,
}

impl FundsGuard {
    pub fn new(available: Decimal) -> Self {
        let opening = available.max(Decimal::ZERO);
        Self { opening, remaining: opening }
    }

    pub fn can_afford(&self, estimated_cost: Decimal) -> bool {
        estimated_cost <= self.remaining
    }

    /// Reserve `estimated_cost`. Returns false, leaving the budget untouched,
    /// when it does not fit.
    pub fn deduct(&mut self, estimated_cost: Decimal) -> bool {
        if !self.can_afford(estimated_cost) {
            return false;
        }
        self.remaining -= estimated_cost;
        true
    }

    pub fn opening(&self) -> Decimal {
        self.opening
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_second_order_skipped_after_deduction() {
        let mut guard = FundsGuard::new(dec!(500));

        assert!(guard.can_afford(dec!(300)));
        assert!(guard.deduct(dec!(300)));
        assert_eq!(guard.remaining(), dec!(200));

        assert!(!guard.can_afford(dec!(300)));
        assert!(!guard.deduct(dec!(300)));
        assert_eq!(guard.remaining(), dec!(200));
        assert_eq!(guard.opening() - guard.remaining(), dec!(300));
    }

    #[test]
    fn test_exact_fit_is_affordable() {
        let mut guard = FundsGuard::new(dec!(250.50));
        assert!(guard.deduct(dec!(250.50)));
        assert_eq!(guard.remaining(), Decimal::ZERO);
    }

    #[test]
    fn test_negative_balance_clamped() {
        let guard = FundsGuard::new(dec!(-20));
        assert_eq!(guard.opening(), Decimal::ZERO);
        assert!(!guard.can_afford(dec!(1)));
    }
}
