use chrono::Utc;
use uuid::Uuid;

use super::{HandlerError, HandlerOutcome};
use crate::db::OrderStore;
use crate::models::booking::{BookingRequest, Order};

const BOOKING_NAMESPACE: Uuid = Uuid::from_u128(0x4b1d_93c0_6f2e_4a57_9d0b_52e1_7c3a_8f16);

/// Booking id for a task. Stable across redeliveries of the same message.
pub fn booking_id_for(task_id: Uuid) -> Uuid {
    Uuid::new_v5(&BOOKING_NAMESPACE, task_id.as_bytes())
}

/// Persist the order for a booking. Stock and payment were settled before
/// the job was enqueued, so this only writes.
pub async fn handle(
    user_id: &str,
    task_id: Uuid,
    request: &BookingRequest,
    orders: &dyn OrderStore,
) -> Result<HandlerOutcome, HandlerError> {
    let order = Order {
        id: booking_id_for(task_id),
        task_id,
        user_id: user_id.to_string(),
        items: request.cart.clone(),
        shipping: request.shipping.clone(),
        total: request.total(),
        created_at: Utc::now(),
    };

    orders.insert_order(&order).await?;

    tracing::info!(
        booking_id = %order.id,
        task_id = %task_id,
        items = order.items.len(),
        total = order.total,
        "Booking persisted"
    );

    Ok(HandlerOutcome::success(serde_json::json!({
        "bookingId": order.id,
        "total": order.total,
        "itemCount": order.items.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::booking::CartItem;

    fn request() -> BookingRequest {
        BookingRequest {
            cart: vec![CartItem {
                pid: "P1".to_string(),
                quantity: 2,
                calculated_price: 19.98,
            }],
            shipping: None,
        }
    }

    #[test]
    fn test_booking_id_is_stable_per_task() {
        let task_id = Uuid::new_v4();
        assert_eq!(booking_id_for(task_id), booking_id_for(task_id));
        assert_ne!(booking_id_for(task_id), booking_id_for(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_inserts_order_and_reports_booking_id() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();

        let outcome = handle("U1", task_id, &request(), &store).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.data["bookingId"], serde_json::json!(booking_id_for(task_id)));
        let orders = store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].user_id, "U1");
        assert_eq!(orders[0].items[0].pid, "P1");
    }

    #[tokio::test]
    async fn test_replay_does_not_duplicate_order() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();

        let first = handle("U1", task_id, &request(), &store).await.unwrap();
        let second = handle("U1", task_id, &request(), &store).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.orders().len(), 1);
    }
}
