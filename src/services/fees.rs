use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};

/// Deterministic driver-earnings calculator. Both rates are basis points
/// of the gross fare; amounts are rounded half-up to whole XAF since the
/// currency has no minor units.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    pub transaction_fee_bps: u32,
    pub commission_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeBreakdown {
    pub gross: BigDecimal,
    pub transaction_fee: BigDecimal,
    pub commission: BigDecimal,
    pub net: BigDecimal,
}

impl FeeCalculator {
    pub fn new(transaction_fee_bps: u32, commission_bps: u32) -> Self {
        Self {
            transaction_fee_bps,
            commission_bps,
        }
    }

    pub fn from_env() -> Self {
        Self {
            transaction_fee_bps: std::env::var("PAYOUT_TRANSACTION_FEE_BPS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(200),
            commission_bps: std::env::var("PAYOUT_COMMISSION_BPS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(800),
        }
    }

    pub fn calculate(&self, gross: &BigDecimal) -> FeeBreakdown {
        let transaction_fee = bps_of(gross, self.transaction_fee_bps);
        let commission = bps_of(gross, self.commission_bps);
        let net = gross - &transaction_fee - &commission;
        FeeBreakdown {
            gross: gross.clone(),
            transaction_fee,
            commission,
            net,
        }
    }
}

fn bps_of(amount: &BigDecimal, bps: u32) -> BigDecimal {
    let raw = amount * BigDecimal::from(bps) / BigDecimal::from(10_000);
    raw.with_scale_round(0, RoundingMode::HalfUp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earnings_are_gross_minus_fee_and_commission() {
        let calculator = FeeCalculator::new(200, 800);
        let breakdown = calculator.calculate(&BigDecimal::from(3000));

        assert_eq!(breakdown.transaction_fee, BigDecimal::from(60));
        assert_eq!(breakdown.commission, BigDecimal::from(240));
        assert_eq!(breakdown.net, BigDecimal::from(2700));
    }

    #[test]
    fn calculation_is_deterministic() {
        let calculator = FeeCalculator::new(150, 500);
        let gross = BigDecimal::from(12_345);
        assert_eq!(calculator.calculate(&gross), calculator.calculate(&gross));
    }

    #[test]
    fn rounding_goes_to_whole_currency_units() {
        // 1.5% of 333 = 4.995 -> 5
        let calculator = FeeCalculator::new(150, 0);
        let breakdown = calculator.calculate(&BigDecimal::from(333));
        assert_eq!(breakdown.transaction_fee, BigDecimal::from(5));
        assert_eq!(breakdown.net, BigDecimal::from(328));
    }

    #[test]
    fn zero_rates_pass_gross_through() {
        let calculator = FeeCalculator::new(0, 0);
        let breakdown = calculator.calculate(&BigDecimal::from(1000));
        assert_eq!(breakdown.net, BigDecimal::from(1000));
    }
}
