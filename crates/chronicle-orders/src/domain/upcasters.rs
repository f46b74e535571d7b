//! Schema upcasters for Orders events.

use chronicle_core::error::DomainError;
use chronicle_core::upcast::UpcasterRegistry;
use serde_json::Value;

use super::events::{ORDER_CREATED_EVENT_TYPE, ORDER_CREATED_SCHEMA_VERSION};

/// Email given to orders created before `order.created` carried one.
///
/// A fixed value rather than a customer lookup, so replay stays a pure
/// function of the stored events.
pub const LEGACY_CUSTOMER_EMAIL: &str = "legacy-customer@unknown.invalid";

/// `order.created` v1 -> v2: adds `customer_email`.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if the payload is not a JSON object.
pub fn order_created_v1_to_v2(mut payload: Value) -> Result<Value, DomainError> {
    let fields = payload.as_object_mut().ok_or_else(|| {
        DomainError::Serialization("order.created v1 payload is not an object".into())
    })?;
    fields
        .entry("customer_email")
        .or_insert_with(|| Value::String(LEGACY_CUSTOMER_EMAIL.to_owned()));
    Ok(payload)
}

/// Registers every Orders upcaster and declares the current schemas.
///
/// # Errors
///
/// Returns `DomainError::Validation` if a step is already registered.
pub fn register_order_upcasters(registry: &mut UpcasterRegistry) -> Result<(), DomainError> {
    registry.register(ORDER_CREATED_EVENT_TYPE, 1, 2, order_created_v1_to_v2)?;
    registry.declare_current(ORDER_CREATED_EVENT_TYPE, ORDER_CREATED_SCHEMA_VERSION);
    Ok(())
}

/// A registry holding only the Orders upcasters.
///
/// # Errors
///
/// Never fails in practice; see [`register_order_upcasters`].
pub fn order_upcasters() -> Result<UpcasterRegistry, DomainError> {
    let mut registry = UpcasterRegistry::new();
    register_order_upcasters(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use chronicle_core::event::{StoredEvent, StreamId};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn stored_created(schema_version: i32, payload: Value) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            stream_id: StreamId::from("order-1"),
            event_type: ORDER_CREATED_EVENT_TYPE.to_owned(),
            schema_version,
            version: 1,
            global_sequence: 1,
            payload,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_v1_created_gets_legacy_email() {
        let registry = order_upcasters().unwrap();
        let v1 = stored_created(1, json!({ "order_id": Uuid::nil(), "customer_id": Uuid::nil() }));

        let upcast = registry.upcast(v1).unwrap();

        assert_eq!(upcast.schema_version, 2);
        assert_eq!(upcast.payload["customer_email"], LEGACY_CUSTOMER_EMAIL);
    }

    #[test]
    fn test_existing_email_is_kept() {
        let payload = order_created_v1_to_v2(json!({ "customer_email": "ada@example.com" })).unwrap();

        assert_eq!(payload["customer_email"], "ada@example.com");
    }

    #[test]
    fn test_v2_created_passes_through() {
        let registry = order_upcasters().unwrap();
        let payload = json!({
            "order_id": Uuid::nil(),
            "customer_id": Uuid::nil(),
            "customer_email": "ada@example.com"
        });

        let upcast = registry.upcast(stored_created(2, payload.clone())).unwrap();

        assert_eq!(upcast.payload, payload);
    }

    #[test]
    fn test_created_from_the_future_is_rejected() {
        let registry = order_upcasters().unwrap();

        let result = registry.upcast(stored_created(3, json!({})));

        assert!(matches!(result, Err(DomainError::Serialization(_))));
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(order_created_v1_to_v2(json!("order")).is_err());
    }

    #[test]
    fn test_registering_twice_is_rejected() {
        let mut registry = order_upcasters().unwrap();

        assert!(register_order_upcasters(&mut registry).is_err());
    }
}
