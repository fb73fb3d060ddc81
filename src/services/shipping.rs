use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{config::AppConfig, entities::order::PaymentMethod};

/// Computed delivery charge for a destination. Pure output; only the charge
/// is persisted, frozen onto the order.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ShippingQuote {
    pub postal_code: String,
    pub weight_grams: i32,
    pub payment_method: PaymentMethod,
    pub charge: Decimal,
    pub free_shipping: bool,
}

/// Shipping calculation settings, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ShippingSettings {
    pub free_shipping_threshold: Decimal,
    pub base_charge: Decimal,
    pub per_kg_charge: Decimal,
    pub cod_surcharge: Decimal,
}

impl From<&AppConfig> for ShippingSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            free_shipping_threshold: cfg.free_shipping_threshold,
            base_charge: cfg.shipping_base_charge,
            per_kg_charge: cfg.shipping_per_kg_charge,
            cod_surcharge: cfg.cod_surcharge,
        }
    }
}

/// Computes the delivery charge from destination, weight, payment method and
/// discounted order value. Never raises a business error: serviceability is a
/// softer concern than price correctness, so an unrecognized postal code
/// falls back to the default charge instead of blocking checkout.
#[derive(Clone)]
pub struct ShippingCalculator {
    settings: ShippingSettings,
}

impl ShippingCalculator {
    pub fn new(settings: ShippingSettings) -> Self {
        Self { settings }
    }

    #[instrument(skip(self))]
    pub fn quote(
        &self,
        postal_code: &str,
        weight_grams: i32,
        payment_method: PaymentMethod,
        discounted_subtotal: Decimal,
    ) -> ShippingQuote {
        if !is_plausible_postal_code(postal_code) {
            warn!(postal_code, "unrecognized postal code; using default shipping charge");
        }

        // Free shipping only for prepaid orders above the threshold.
        if payment_method == PaymentMethod::Prepaid
            && discounted_subtotal >= self.settings.free_shipping_threshold
        {
            return ShippingQuote {
                postal_code: postal_code.to_string(),
                weight_grams,
                payment_method,
                charge: Decimal::ZERO,
                free_shipping: true,
            };
        }

        // First kilogram is covered by the base charge; every further
        // started kilogram adds the per-kg rate.
        let extra_kgs = (weight_grams.max(0).saturating_sub(1) / 1000) as i64;
        let mut charge =
            self.settings.base_charge + self.settings.per_kg_charge * Decimal::from(extra_kgs);

        if payment_method == PaymentMethod::Cod {
            charge += self.settings.cod_surcharge;
        }

        ShippingQuote {
            postal_code: postal_code.to_string(),
            weight_grams,
            payment_method,
            charge: charge.max(Decimal::ZERO),
            free_shipping: false,
        }
    }
}

fn is_plausible_postal_code(code: &str) -> bool {
    let trimmed = code.trim();
    (4..=10).contains(&trimmed.len()) && trimmed.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calculator() -> ShippingCalculator {
        ShippingCalculator::new(ShippingSettings {
            free_shipping_threshold: dec!(10000),
            base_charge: dec!(99),
            per_kg_charge: dec!(40),
            cod_surcharge: dec!(49),
        })
    }

    #[test]
    fn prepaid_above_threshold_ships_free() {
        let q = calculator().quote("560001", 2500, PaymentMethod::Prepaid, dec!(45000));
        assert_eq!(q.charge, Decimal::ZERO);
        assert!(q.free_shipping);
    }

    #[test]
    fn cod_never_ships_free() {
        let q = calculator().quote("560001", 500, PaymentMethod::Cod, dec!(45000));
        assert_eq!(q.charge, dec!(99) + dec!(49));
        assert!(!q.free_shipping);
    }

    #[test]
    fn weight_tiers_charge_per_started_kg() {
        let calc = calculator();
        assert_eq!(calc.quote("560001", 900, PaymentMethod::Prepaid, dec!(500)).charge, dec!(99));
        assert_eq!(calc.quote("560001", 1000, PaymentMethod::Prepaid, dec!(500)).charge, dec!(99));
        assert_eq!(
            calc.quote("560001", 1001, PaymentMethod::Prepaid, dec!(500)).charge,
            dec!(139)
        );
        assert_eq!(
            calc.quote("560001", 3500, PaymentMethod::Prepaid, dec!(500)).charge,
            dec!(99) + dec!(40) * dec!(3)
        );
    }

    #[test]
    fn bad_postal_code_still_returns_a_charge() {
        let q = calculator().quote("???", 500, PaymentMethod::Prepaid, dec!(500));
        assert_eq!(q.charge, dec!(99));
    }
}
