use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product, product_variant},
    errors::ServiceError,
};

/// One requested cart line. Carries identifiers and a quantity only; prices
/// always come from the catalog, never from the client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

/// A cart line re-priced from authoritative catalog data.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub weight_grams: i32,
}

/// Output of the price resolver: the re-priced lines and their subtotal.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub total_weight_grams: i32,
}

impl PricedCart {
    pub fn product_ids(&self) -> HashSet<Uuid> {
        self.lines.iter().map(|l| l.product_id).collect()
    }
}

/// Re-prices cart lines from the catalog at checkout time. Read-only: the
/// stock it sees here is only advisory, the order assembler re-checks under
/// its transaction.
#[derive(Clone)]
pub struct PriceResolver {
    db: Arc<DatabaseConnection>,
    /// Flat weight estimate for items without a recorded weight.
    default_weight_grams: i32,
}

impl PriceResolver {
    pub fn new(db: Arc<DatabaseConnection>, default_weight_grams: i32) -> Self {
        Self {
            db,
            default_weight_grams,
        }
    }

    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn resolve(&self, lines: &[CartLine]) -> Result<PricedCart, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        let mut total_weight = 0i32;

        for line in lines {
            line.validate()?;
            let priced_line = self.resolve_line(line).await?;
            subtotal += priced_line.line_total;
            total_weight += priced_line.weight_grams * priced_line.quantity;
            priced.push(priced_line);
        }

        Ok(PricedCart {
            lines: priced,
            subtotal,
            total_weight_grams: total_weight,
        })
    }

    async fn resolve_line(&self, line: &CartLine) -> Result<PricedLine, ServiceError> {
        let product = product::Entity::find_by_id(line.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::ItemUnavailable {
                name: line.product_id.to_string(),
                reason: "item no longer exists".to_string(),
            })?;

        if !product.is_published {
            return Err(ServiceError::ItemUnavailable {
                name: product.name.clone(),
                reason: "item is no longer available".to_string(),
            });
        }

        let (sku, name, unit_price, available, weight) = match line.variant_id {
            Some(variant_id) => {
                let variant = product_variant::Entity::find_by_id(variant_id)
                    .one(&*self.db)
                    .await?
                    .filter(|v| v.product_id == product.id)
                    .ok_or_else(|| ServiceError::ItemUnavailable {
                        name: product.name.clone(),
                        reason: "selected variant no longer exists".to_string(),
                    })?;
                (
                    variant.sku.clone(),
                    format!("{} ({})", product.name, variant.name),
                    variant.price_override.unwrap_or(product.price),
                    variant.stock_quantity,
                    variant.weight_grams.unwrap_or(product.weight_grams),
                )
            }
            None => (
                product.sku.clone(),
                product.name.clone(),
                product.price,
                product.stock_quantity,
                product.weight_grams,
            ),
        };

        if available < line.quantity {
            return Err(ServiceError::ItemUnavailable {
                name,
                reason: format!(
                    "insufficient stock: {} requested, {} available",
                    line.quantity, available
                ),
            });
        }

        let weight = if weight > 0 {
            weight
        } else {
            self.default_weight_grams
        };

        Ok(PricedLine {
            product_id: product.id,
            variant_id: line.variant_id,
            sku,
            name,
            unit_price,
            quantity: line.quantity,
            line_total: unit_price * Decimal::from(line.quantity),
            weight_grams: weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn priced_cart_collects_product_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cart = PricedCart {
            lines: vec![
                PricedLine {
                    product_id: a,
                    variant_id: None,
                    sku: "A".into(),
                    name: "A".into(),
                    unit_price: dec!(10),
                    quantity: 2,
                    line_total: dec!(20),
                    weight_grams: 100,
                },
                PricedLine {
                    product_id: b,
                    variant_id: None,
                    sku: "B".into(),
                    name: "B".into(),
                    unit_price: dec!(5),
                    quantity: 1,
                    line_total: dec!(5),
                    weight_grams: 100,
                },
            ],
            subtotal: dec!(25),
            total_weight_grams: 300,
        };
        let ids = cart.product_ids();
        assert!(ids.contains(&a) && ids.contains(&b));
    }

    #[test]
    fn zero_quantity_line_fails_validation() {
        let line = CartLine {
            product_id: Uuid::new_v4(),
            variant_id: None,
            quantity: 0,
        };
        assert!(line.validate().is_err());
    }
}
