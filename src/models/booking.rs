use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking request captured after stock and payment checks have passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[garde(length(min = 1, max = 100), dive)]
    pub cart: Vec<CartItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub shipping: Option<ShippingAddress>,
}

impl BookingRequest {
    /// Sum of the line prices already calculated at checkout.
    pub fn total(&self) -> f64 {
        self.cart.iter().map(|item| item.calculated_price).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[garde(length(min = 1, max = 64))]
    pub pid: String,

    #[garde(range(min = 1))]
    pub quantity: u32,

    /// Line total (unit price times quantity).
    #[garde(range(min = 0.0))]
    pub calculated_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(length(min = 1, max = 300))]
    pub street: String,

    #[garde(length(min = 1, max = 100))]
    pub city: String,

    #[garde(length(min = 1, max = 20))]
    pub postal_code: String,

    #[garde(length(min = 2, max = 2))]
    pub country: String,
}

/// Persisted booking written by the booking worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub items: Vec<CartItem>,
    pub shipping: Option<ShippingAddress>,
    pub total: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pid: &str, quantity: u32, price: f64) -> CartItem {
        CartItem {
            pid: pid.to_string(),
            quantity,
            calculated_price: price,
        }
    }

    #[test]
    fn test_total_sums_line_prices() {
        let request = BookingRequest {
            cart: vec![item("P1", 2, 19.98), item("P2", 1, 5.02)],
            shipping: None,
        };
        assert!((request.total() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_cart_is_invalid() {
        let request = BookingRequest {
            cart: vec![],
            shipping: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_zero_quantity_is_invalid() {
        let request = BookingRequest {
            cart: vec![item("P1", 0, 0.0)],
            shipping: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_cart_only_request_is_valid() {
        let request = BookingRequest {
            cart: vec![item("P1", 2, 19.98)],
            shipping: None,
        };
        assert!(request.validate().is_ok());
    }
}
