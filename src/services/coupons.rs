use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::{coupon, coupon_redemption},
    errors::{CouponRejection, ServiceError},
    services::pricing::PricedCart,
};

/// Outcome of coupon evaluation. `coupon` is `None` when no code was given.
#[derive(Debug, Clone)]
pub struct CouponDecision {
    pub coupon: Option<coupon::Model>,
    pub discount: Decimal,
}

impl CouponDecision {
    pub fn none() -> Self {
        Self {
            coupon: None,
            discount: Decimal::ZERO,
        }
    }

    pub fn code(&self) -> Option<String> {
        self.coupon.as_ref().map(|c| c.code.clone())
    }
}

/// Validates a coupon code against its eligibility rules and computes a
/// bounded discount. Pure evaluation: usage counters are incremented by the
/// order assembler's transaction, never here, so an abandoned checkout does
/// not consume a redemption.
#[derive(Clone)]
pub struct CouponEngine {
    db: Arc<DatabaseConnection>,
}

impl CouponEngine {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Evaluate `code` for this customer and cart. Checks short-circuit on
    /// the first failure, each returning its typed rejection reason.
    #[instrument(skip(self, cart), fields(subtotal = %cart.subtotal))]
    pub async fn apply(
        &self,
        code: Option<&str>,
        customer_id: Uuid,
        cart: &PricedCart,
    ) -> Result<CouponDecision, ServiceError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(CouponDecision::none());
        };

        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .filter(|c| c.is_active)
            .ok_or(ServiceError::CouponInvalid(CouponRejection::NotFound))?;

        let now = Utc::now();
        if let Some(starts_at) = coupon.starts_at {
            if now < starts_at {
                return Err(ServiceError::CouponInvalid(CouponRejection::NotStarted));
            }
        }
        if let Some(ends_at) = coupon.ends_at {
            if now > ends_at {
                return Err(ServiceError::CouponInvalid(CouponRejection::Expired));
            }
        }

        if let Some(minimum) = coupon.min_order_amount {
            if cart.subtotal < minimum {
                return Err(ServiceError::CouponInvalid(CouponRejection::BelowMinimum {
                    minimum,
                }));
            }
        }

        if let Some(limit) = coupon.usage_limit {
            if coupon.usage_count >= limit {
                return Err(ServiceError::CouponInvalid(
                    CouponRejection::UsageLimitReached,
                ));
            }
        }

        if let Some(per_user_limit) = coupon.per_user_limit {
            let redeemed = coupon_redemption::Entity::find()
                .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
                .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
                .one(&*self.db)
                .await?
                .map(|r| r.redemption_count)
                .unwrap_or(0);
            if redeemed >= per_user_limit {
                return Err(ServiceError::CouponInvalid(
                    CouponRejection::PerUserLimitReached,
                ));
            }
        }

        let eligible_subtotal = eligible_subtotal(&coupon, cart);
        if eligible_subtotal <= Decimal::ZERO {
            return Err(ServiceError::CouponInvalid(CouponRejection::NotApplicable));
        }

        let discount = compute_discount(&coupon, eligible_subtotal);
        debug!(code = %coupon.code, %discount, %eligible_subtotal, "coupon accepted");

        Ok(CouponDecision {
            coupon: Some(coupon),
            discount,
        })
    }
}

/// The portion of the subtotal the coupon may discount. Restricted-scope
/// coupons discount only the lines in their item set, not the whole cart.
fn eligible_subtotal(coupon: &coupon::Model, cart: &PricedCart) -> Decimal {
    if coupon.applies_to_all {
        return cart.subtotal;
    }
    let restricted = coupon.restricted_product_ids();
    cart.lines
        .iter()
        .filter(|l| restricted.contains(&l.product_id))
        .map(|l| l.line_total)
        .sum()
}

/// Discount over the eligible subtotal, capped at `max_discount` and never
/// exceeding the eligible amount itself.
fn compute_discount(coupon: &coupon::Model, eligible_subtotal: Decimal) -> Decimal {
    let raw = match coupon.discount_kind {
        coupon::DiscountKind::Percentage => {
            (eligible_subtotal * coupon.discount_value / Decimal::from(100)).round_dp(2)
        }
        coupon::DiscountKind::Fixed => coupon.discount_value.min(eligible_subtotal),
    };
    let capped = match coupon.max_discount {
        Some(cap) => raw.min(cap),
        None => raw,
    };
    capped.min(eligible_subtotal).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::PricedLine;
    use rust_decimal_macros::dec;

    fn test_coupon(kind: coupon::DiscountKind, value: Decimal) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            discount_kind: kind,
            discount_value: value,
            min_order_amount: None,
            max_discount: None,
            usage_limit: None,
            usage_count: 0,
            per_user_limit: None,
            is_active: true,
            applies_to_all: true,
            product_ids: None,
            starts_at: None,
            ends_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cart_with_lines(lines: Vec<(Uuid, Decimal)>) -> PricedCart {
        let priced: Vec<PricedLine> = lines
            .into_iter()
            .map(|(id, total)| PricedLine {
                product_id: id,
                variant_id: None,
                sku: "SKU".into(),
                name: "Item".into(),
                unit_price: total,
                quantity: 1,
                line_total: total,
                weight_grams: 100,
            })
            .collect();
        let subtotal = priced.iter().map(|l| l.line_total).sum();
        PricedCart {
            lines: priced,
            subtotal,
            total_weight_grams: 100,
        }
    }

    #[test]
    fn percentage_discount_is_capped() {
        // 20% of 50,000 = 10,000, capped at 5,000
        let mut c = test_coupon(coupon::DiscountKind::Percentage, dec!(20));
        c.max_discount = Some(dec!(5000));
        assert_eq!(compute_discount(&c, dec!(50000)), dec!(5000));
    }

    #[test]
    fn fixed_discount_never_exceeds_eligible_subtotal() {
        let c = test_coupon(coupon::DiscountKind::Fixed, dec!(500));
        assert_eq!(compute_discount(&c, dec!(300)), dec!(300));
        assert_eq!(compute_discount(&c, dec!(800)), dec!(500));
    }

    #[test]
    fn restricted_scope_discounts_eligible_subset_only() {
        let in_scope = Uuid::new_v4();
        let out_of_scope = Uuid::new_v4();
        let cart = cart_with_lines(vec![(in_scope, dec!(1000)), (out_of_scope, dec!(9000))]);

        let mut c = test_coupon(coupon::DiscountKind::Percentage, dec!(10));
        c.applies_to_all = false;
        c.product_ids = Some(serde_json::json!([in_scope]));

        let eligible = eligible_subtotal(&c, &cart);
        assert_eq!(eligible, dec!(1000));
        assert_eq!(compute_discount(&c, eligible), dec!(100));
    }

    #[test]
    fn restricted_scope_with_no_matching_line_is_empty() {
        let cart = cart_with_lines(vec![(Uuid::new_v4(), dec!(1000))]);
        let mut c = test_coupon(coupon::DiscountKind::Percentage, dec!(10));
        c.applies_to_all = false;
        c.product_ids = Some(serde_json::json!([Uuid::new_v4()]));
        assert_eq!(eligible_subtotal(&c, &cart), Decimal::ZERO);
    }

    #[test]
    fn discount_never_negative() {
        let c = test_coupon(coupon::DiscountKind::Fixed, dec!(-50));
        assert_eq!(compute_discount(&c, dec!(100)), Decimal::ZERO);
    }
}
