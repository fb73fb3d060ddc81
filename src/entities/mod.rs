pub mod coupon;
pub mod coupon_redemption;
pub mod order;
pub mod order_item;
pub mod order_status_event;
pub mod payment;
pub mod product;
pub mod product_variant;

pub use coupon::Entity as Coupon;
pub use coupon_redemption::Entity as CouponRedemption;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use order_status_event::Entity as OrderStatusEvent;
pub use payment::Entity as Payment;
pub use product::Entity as Product;
pub use product_variant::Entity as ProductVariant;
