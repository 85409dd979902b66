use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use order_dispatch::config::{Config, GatewayCredentials};
use order_dispatch::engine::orders::{NewOrder, NewOrderItem, TrackingUpdate};
use order_dispatch::engine::payment::{VerifyPayment, WebhookOutcome};
use order_dispatch::engine::registry::{CourierProfile, LocationUpdate};
use order_dispatch::engine::{assignment, invoice, orders, payment, registry};
use order_dispatch::error::AppError;
use order_dispatch::fanout::{EmitError, Emitter, Envelope, Subscriber};
use order_dispatch::gateway::{
    self, GatewayError, GatewayOrder, GatewayOrderRequest, PaymentGateway,
};
use order_dispatch::models::actor::{Actor, Role};
use order_dispatch::models::courier::{Courier, CourierStatus, GeoPoint, VehicleType};
use order_dispatch::models::dish::Dish;
use order_dispatch::models::order::{
    CancelledBy, Order, OrderStatus, PaymentMethod, PaymentSource, PaymentStatus,
};
use order_dispatch::state::AppState;
use order_dispatch::store::{DishCatalog, InvoiceStore, Repository};
use serde_json::json;
use uuid::Uuid;

const KEY_SECRET: &str = "test_key_secret";
const WEBHOOK_SECRET: &str = "test_webhook_secret";

const RESTAURANT: GeoPoint = GeoPoint {
    lat: 18.5204,
    lng: 73.8567,
};

struct FakeGateway {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, GatewayError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            id: format!("order_test_{n}"),
            amount: request.amount,
            currency: request.currency,
            receipt: Some(request.receipt),
            status: Some("created".to_string()),
        })
    }
}

fn test_config() -> Config {
    Config {
        gateway: Some(GatewayCredentials {
            key_id: "key_test".to_string(),
            key_secret: KEY_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
        }),
        gateway_timeout: Duration::from_millis(100),
        store_conflict_retries: 256,
        ..Config::default()
    }
}

fn state_with_gateway(delay: Option<Duration>) -> Arc<AppState> {
    let gateway = Arc::new(FakeGateway {
        calls: AtomicUsize::new(0),
        delay,
    });
    Arc::new(AppState::with_gateway(test_config(), Some(gateway)))
}

fn setup() -> Arc<AppState> {
    state_with_gateway(None)
}

struct World {
    state: Arc<AppState>,
    admin: Actor,
    customer: Actor,
    dish: Dish,
}

async fn world() -> World {
    let state = setup();
    let dish = state
        .catalog
        .upsert_dish(Dish {
            id: Uuid::new_v4(),
            name: "Paneer Tikka".to_string(),
            price: 150.0,
            available: true,
            restaurant_location: Some(RESTAURANT),
        })
        .await
        .unwrap();

    World {
        state,
        admin: Actor::admin(Uuid::new_v4()),
        customer: Actor::customer(Uuid::new_v4()),
        dish,
    }
}

impl World {
    async fn place(&self, payment_method: PaymentMethod) -> Order {
        orders::create_order(
            &self.state,
            &self.customer,
            NewOrder {
                items: vec![NewOrderItem {
                    dish_id: self.dish.id,
                    quantity: 2,
                }],
                address: "12 MG Road".to_string(),
                city: "Pune".to_string(),
                payment_method,
            },
        )
        .await
        .unwrap()
    }

    async fn courier(&self, name: &str, location: GeoPoint) -> (Actor, Courier) {
        let actor = Actor::courier(Uuid::new_v4());
        let courier = registry::upsert_courier(
            &self.state,
            &actor,
            CourierProfile {
                name: name.to_string(),
                phone: Some("+91-98000-00000".to_string()),
                vehicle_type: VehicleType::Scooter,
                location: Some(location),
            },
        )
        .await
        .unwrap();
        (actor, courier)
    }

    async fn order(&self, id: Uuid) -> Order {
        self.state.orders.find_by_id(id).await.unwrap().unwrap()
    }

    async fn courier_doc(&self, id: Uuid) -> Courier {
        self.state.couriers.find_by_id(id).await.unwrap().unwrap()
    }
}

fn near(offset: f64) -> GeoPoint {
    GeoPoint {
        lat: RESTAURANT.lat + offset,
        lng: RESTAURANT.lng,
    }
}

fn captured_webhook(order_id: Uuid, gateway_order_id: &str, payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": gateway_order_id,
                    "status": "captured",
                    "notes": { "receipt": order_id.to_string() }
                }
            }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn cod_order_delivers_without_payment() {
    let w = world().await;
    let (courier_actor, courier) = w.courier("Ravi", near(0.01)).await;
    let order = w.place(PaymentMethod::Cod).await;
    assert_eq!(order.total_price, 300.0);
    assert_eq!(order.payment_status, PaymentStatus::Pending);

    let assigned = assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap();
    assert_eq!(assigned.status, OrderStatus::Assigned);
    assert_eq!(assigned.courier_ref, Some(courier.id));
    assert!(w.courier_doc(courier.id).await.available);

    let accepted = assignment::accept_job(&w.state, &courier_actor, courier.id, order.id)
        .await
        .unwrap();
    assert_eq!(accepted.status, OrderStatus::Accepted);
    let busy = w.courier_doc(courier.id).await;
    assert!(!busy.available);
    assert_eq!(busy.active_order, Some(order.id));

    let delivered = orders::transition(&w.state, &courier_actor, order.id, OrderStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert!(w.state.invoices.find_by_order(order.id).await.unwrap().is_some());

    let released = w.courier_doc(courier.id).await;
    assert!(released.available);
    assert!(released.active_order.is_none());
}

#[tokio::test]
async fn unpaid_prepaid_order_cannot_enter_delivery() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;

    let err = orders::transition(&w.state, &w.admin, order.id, OrderStatus::Preparing)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::PaymentRequired {
            payment_status: PaymentStatus::Pending
        }
    ));

    let err = orders::update_tracking(
        &w.state,
        &w.admin,
        order.id,
        TrackingUpdate {
            location: Some(near(0.001)),
            ..TrackingUpdate::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::PaymentRequired { .. }));

    w.courier("Asha", near(0.01)).await;
    let err = assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PaymentRequired { .. }));

    let unchanged = w.order(order.id).await;
    assert_eq!(unchanged.status, OrderStatus::Pending);
    assert!(unchanged.current_location.is_none());
    assert!(unchanged.courier_ref.is_none());
}

#[tokio::test]
async fn bad_signature_fails_and_cancels_the_order() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap();
    assert_eq!(intent.amount, 30_000);

    let err = payment::verify_payment(
        &w.state,
        &w.customer,
        VerifyPayment {
            order_id: order.id,
            gateway_order_id: intent.gateway_order_id.clone(),
            gateway_payment_id: "pay_1".to_string(),
            signature: gateway::sign("wrong-secret", b"anything").unwrap(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::SignatureMismatch));

    let failed = w.order(order.id).await;
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(failed.status, OrderStatus::Cancelled);
    assert_eq!(failed.cancelled_by, Some(CancelledBy::System));
    assert!(failed.payment_info.unwrap().failed_at.is_some());
}

#[tokio::test]
async fn verify_without_an_intent_changes_nothing() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;

    // A genuine signature, but for a checkout that belongs to another order.
    let message = gateway::checkout_message("order_for_a_cheaper_cart", "pay_9");
    let err = payment::verify_payment(
        &w.state,
        &w.customer,
        VerifyPayment {
            order_id: order.id,
            gateway_order_id: "order_for_a_cheaper_cart".to_string(),
            gateway_payment_id: "pay_9".to_string(),
            signature: gateway::sign(KEY_SECRET, message.as_bytes()).unwrap(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(w.order(order.id).await, order);
    assert_eq!(w.state.invoices.count().await.unwrap(), 0);
}

#[tokio::test]
async fn cod_order_in_delivery_cannot_switch_to_prepaid() {
    let w = world().await;
    let order = w.place(PaymentMethod::Cod).await;
    let preparing = orders::transition(&w.state, &w.admin, order.id, OrderStatus::Preparing)
        .await
        .unwrap();

    let err = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(_)));

    let unchanged = w.order(order.id).await;
    assert_eq!(unchanged, preparing);
    assert_eq!(unchanged.payment_method, PaymentMethod::Cod);
}

#[tokio::test]
async fn valid_signature_marks_paid_and_issues_invoice() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap();

    let message = gateway::checkout_message(&intent.gateway_order_id, "pay_1");
    let paid = payment::verify_payment(
        &w.state,
        &w.customer,
        VerifyPayment {
            order_id: order.id,
            gateway_order_id: intent.gateway_order_id.clone(),
            gateway_payment_id: "pay_1".to_string(),
            signature: gateway::sign(KEY_SECRET, message.as_bytes()).unwrap(),
        },
    )
    .await
    .unwrap();

    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.status, OrderStatus::Accepted);
    let info = paid.payment_info.unwrap();
    assert_eq!(info.confirmed_by, Some(PaymentSource::ClientVerify));
    assert!(info.paid_at.is_some());

    let invoice = invoice::get_invoice_for_order(&w.state, &w.customer, order.id)
        .await
        .unwrap();
    assert_eq!(invoice.subtotal, 300.0);
    assert_eq!(invoice.total, 315.0);

    let preparing = orders::transition(&w.state, &w.admin, order.id, OrderStatus::Preparing)
        .await
        .unwrap();
    assert_eq!(preparing.status, OrderStatus::Preparing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_accepts_leave_the_courier_on_one_order() {
    let w = world().await;
    let (courier_actor, courier) = w.courier("Ravi", near(0.01)).await;
    let first = w.place(PaymentMethod::Cod).await;
    let second = w.place(PaymentMethod::Cod).await;

    for order in [&first, &second] {
        let assigned = assignment::assign_nearest(&w.state, &w.admin, order.id, None)
            .await
            .unwrap();
        assert_eq!(assigned.courier_ref, Some(courier.id));
    }

    let courier_id = courier.id;
    let tasks: Vec<_> = [first.id, second.id]
        .into_iter()
        .map(|order_id| {
            let state = w.state.clone();
            tokio::spawn(async move {
                assignment::accept_job(&state, &courier_actor, courier_id, order_id).await
            })
        })
        .collect();

    let mut accepted = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(order) => accepted.push(order.id),
            Err(err) => assert!(matches!(err, AppError::InvalidStatus(_)), "{err}"),
        }
    }
    assert_eq!(accepted.len(), 1);

    let holder = w.courier_doc(courier.id).await;
    assert!(!holder.available);
    assert_eq!(holder.active_order, Some(accepted[0]));

    let mut live_accepted = 0;
    for id in [first.id, second.id] {
        let order = w.order(id).await;
        if order.status == OrderStatus::Accepted && order.courier_ref == Some(courier.id) {
            live_accepted += 1;
        }
    }
    assert_eq!(live_accepted, 1);
}

#[tokio::test]
async fn delivered_orders_cannot_be_cancelled() {
    let w = world().await;
    let order = w.place(PaymentMethod::Cod).await;
    orders::transition(&w.state, &w.admin, order.id, OrderStatus::Delivered)
        .await
        .unwrap();
    let before = w.order(order.id).await;

    let err = orders::cancel(&w.state, &w.customer, order.id, Some("too late".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(_)));
    assert_eq!(w.order(order.id).await, before);
}

#[tokio::test]
async fn delivering_twice_issues_one_invoice() {
    let w = world().await;
    let order = w.place(PaymentMethod::Cod).await;

    let first = orders::transition(&w.state, &w.admin, order.id, OrderStatus::Delivered)
        .await
        .unwrap();
    let second = orders::transition(&w.state, &w.admin, order.id, OrderStatus::Delivered)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.delivery_tracking.len(), 1);
    assert_eq!(w.state.invoices.count().await.unwrap(), 1);
}

#[tokio::test]
async fn replayed_webhook_is_applied_once() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap();

    let body = captured_webhook(order.id, &intent.gateway_order_id, "pay_1");
    let signature = gateway::sign(WEBHOOK_SECRET, &body).unwrap();

    let first = payment::handle_webhook(&w.state, &body, Some(signature.as_str()))
        .await
        .unwrap();
    let after_first = w.order(order.id).await;
    let second = payment::handle_webhook(&w.state, &body, Some(signature.as_str()))
        .await
        .unwrap();

    assert_eq!(first, WebhookOutcome::Applied);
    assert_eq!(second, WebhookOutcome::AlreadyApplied);

    let paid = w.order(order.id).await;
    assert_eq!(paid, after_first);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.delivery_tracking.len(), 1);
    assert!(paid.payment_info.unwrap().webhook_confirmed_at.is_some());
    assert_eq!(w.state.invoices.count().await.unwrap(), 1);
}

#[tokio::test]
async fn webhook_correlates_by_gateway_order_id() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap();

    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_2",
            "order_id": intent.gateway_order_id,
        } } }
    }))
    .unwrap();
    let signature = gateway::sign(WEBHOOK_SECRET, &body).unwrap();

    let outcome = payment::handle_webhook(&w.state, &body, Some(signature.as_str()))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(w.order(order.id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn webhook_receipt_must_match_the_gateway_order() {
    let w = world().await;
    let paying = w.place(PaymentMethod::Gateway).await;
    let other = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, paying.id)
        .await
        .unwrap();

    let body = captured_webhook(other.id, &intent.gateway_order_id, "pay_3");
    let signature = gateway::sign(WEBHOOK_SECRET, &body).unwrap();
    let outcome = payment::handle_webhook(&w.state, &body, Some(signature.as_str()))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(w.order(other.id).await, other);
    assert_eq!(w.order(paying.id).await.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn webhook_for_an_unknown_gateway_order_is_ignored() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;

    let body = captured_webhook(order.id, "order_never_issued", "pay_4");
    let signature = gateway::sign(WEBHOOK_SECRET, &body).unwrap();
    let outcome = payment::handle_webhook(&w.state, &body, Some(signature.as_str()))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(w.order(order.id).await, order);
}

#[tokio::test]
async fn forged_webhook_changes_nothing() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let body = captured_webhook(order.id, "order_x", "pay_1");

    let err = payment::handle_webhook(&w.state, &body, Some(gateway::sign("guess", &body).unwrap().as_str()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SignatureMismatch));

    let err = payment::handle_webhook(&w.state, &body, None).await.unwrap_err();
    assert!(matches!(err, AppError::SignatureMismatch));

    assert_eq!(w.order(order.id).await, order);
}

#[tokio::test]
async fn other_webhook_events_are_ignored() {
    let w = world().await;
    let body = br#"{"event":"payment.authorized","payload":{}}"#;
    let signature = gateway::sign(WEBHOOK_SECRET, body).unwrap();

    let outcome = payment::handle_webhook(&w.state, body, Some(signature.as_str()))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn verify_and_webhook_race_to_one_payment() {
    let w = world().await;
    let order = w.place(PaymentMethod::Gateway).await;
    let intent = payment::create_payment_intent(&w.state, &w.customer, order.id)
        .await
        .unwrap();

    let message = gateway::checkout_message(&intent.gateway_order_id, "pay_1");
    let verify = VerifyPayment {
        order_id: order.id,
        gateway_order_id: intent.gateway_order_id.clone(),
        gateway_payment_id: "pay_1".to_string(),
        signature: gateway::sign(KEY_SECRET, message.as_bytes()).unwrap(),
    };
    let body = captured_webhook(order.id, &intent.gateway_order_id, "pay_1");
    let signature = gateway::sign(WEBHOOK_SECRET, &body).unwrap();

    let client = {
        let state = w.state.clone();
        let customer = w.customer;
        tokio::spawn(async move { payment::verify_payment(&state, &customer, verify).await })
    };
    let server = {
        let state = w.state.clone();
        tokio::spawn(async move { payment::handle_webhook(&state, &body, Some(signature.as_str())).await })
    };

    client.await.unwrap().unwrap();
    server.await.unwrap().unwrap();

    let paid = w.order(order.id).await;
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.status, OrderStatus::Accepted);
    assert_eq!(paid.delivery_tracking.len(), 1);
    assert_eq!(w.state.invoices.count().await.unwrap(), 1);
}

#[tokio::test]
async fn assign_then_reject_restores_both_sides() {
    let w = world().await;
    let (courier_actor, courier) = w.courier("Ravi", near(0.01)).await;
    let order = w.place(PaymentMethod::Cod).await;

    assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap();
    let rejected = assignment::reject_job(&w.state, &courier_actor, courier.id, order.id)
        .await
        .unwrap();

    assert_eq!(rejected.status, OrderStatus::Pending);
    assert!(rejected.courier_ref.is_none());
    assert!(rejected.courier.is_none());
    assert!(!rejected.delivery_assigned);

    let restored = w.courier_doc(courier.id).await;
    assert!(restored.available);
    assert!(restored.active_order.is_none());
}

#[tokio::test]
async fn accepted_order_cannot_be_reassigned() {
    let w = world().await;
    let (first_actor, first) = w.courier("Ravi", near(0.01)).await;
    let order = w.place(PaymentMethod::Cod).await;

    assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap();
    assignment::accept_job(&w.state, &first_actor, first.id, order.id)
        .await
        .unwrap();

    let (_, second) = w.courier("Asha", near(0.002)).await;
    let err = assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(_)));

    let kept = w.order(order.id).await;
    assert_eq!(kept.status, OrderStatus::Accepted);
    assert_eq!(kept.courier_ref, Some(first.id));
    assert!(w.courier_doc(second.id).await.available);

    orders::cancel(&w.state, &w.customer, order.id, None)
        .await
        .unwrap();
    let released = w.courier_doc(first.id).await;
    assert!(released.available);
    assert!(released.active_order.is_none());
}

#[tokio::test]
async fn nearest_available_courier_wins() {
    let w = world().await;
    let (_, far) = w.courier("Far", near(0.05)).await;
    let (_, close) = w.courier("Close", near(0.005)).await;
    let (off_actor, off_duty) = w.courier("Closest but off duty", near(0.001)).await;
    registry::update_location(
        &w.state,
        &off_actor,
        off_duty.id,
        LocationUpdate {
            lat: near(0.001).lat,
            lng: near(0.001).lng,
            available: Some(false),
            status: None,
        },
    )
    .await
    .unwrap();

    let order = w.place(PaymentMethod::Cod).await;
    let assigned = assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap();
    assert_eq!(assigned.courier_ref, Some(close.id));
    assert_ne!(assigned.courier_ref, Some(far.id));

    let nearby = registry::find_nearby(&w.state, RESTAURANT, None).await.unwrap();
    let ids: Vec<Uuid> = nearby.iter().map(|n| n.courier.id).collect();
    assert_eq!(ids, vec![close.id]);
}

#[tokio::test]
async fn couriers_cannot_claim_job_statuses_by_hand() {
    let w = world().await;
    let (actor, courier) = w.courier("Ravi", near(0.01)).await;
    let ping = |available: Option<bool>, status: Option<CourierStatus>| LocationUpdate {
        lat: near(0.01).lat,
        lng: near(0.01).lng,
        available,
        status,
    };

    let err = registry::update_location(
        &w.state,
        &actor,
        courier.id,
        ping(None, Some(CourierStatus::Delivering)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(w.courier_doc(courier.id).await, courier);

    let off = registry::update_location(
        &w.state,
        &actor,
        courier.id,
        ping(None, Some(CourierStatus::OffDuty)),
    )
    .await
    .unwrap();
    assert!(!off.available);
    assert_eq!(off.status, CourierStatus::OffDuty);

    let back = registry::update_location(
        &w.state,
        &actor,
        courier.id,
        ping(None, Some(CourierStatus::Idle)),
    )
    .await
    .unwrap();
    assert!(back.available);
    assert_eq!(back.status, CourierStatus::Idle);
    assert!(back.active_order.is_none());
}

#[tokio::test]
async fn no_courier_in_radius() {
    let w = world().await;
    w.courier("Mumbai", GeoPoint { lat: 19.076, lng: 72.8777 }).await;
    let order = w.place(PaymentMethod::Cod).await;

    let err = assignment::assign_nearest(&w.state, &w.admin, order.id, Some(5_000.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoCourierAvailable));
    assert_eq!(w.order(order.id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn strangers_cannot_drive_an_order() {
    let w = world().await;
    let (courier_actor, courier) = w.courier("Ravi", near(0.01)).await;
    let (other_actor, _) = w.courier("Other", near(0.02)).await;
    let order = w.place(PaymentMethod::Cod).await;

    let err = orders::transition(&w.state, &w.customer, order.id, OrderStatus::Preparing)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));

    assignment::assign_nearest(&w.state, &w.admin, order.id, None)
        .await
        .unwrap();
    let err = assignment::accept_job(&w.state, &other_actor, courier.id, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));

    let stranger = Actor::customer(Uuid::new_v4());
    let err = orders::cancel(&w.state, &stranger, order.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));
    let err = orders::get_order(&w.state, &stranger, order.id).await.unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));

    let visible = orders::get_order(&w.state, &courier_actor, order.id).await.unwrap();
    assert_eq!(visible.id, order.id);
}

#[tokio::test]
async fn tracking_log_only_grows() {
    let w = world().await;
    let (courier_actor, courier) = w.courier("Ravi", near(0.01)).await;
    let order = w.place(PaymentMethod::Cod).await;

    let mut history = w.order(order.id).await.delivery_tracking;
    let mut check = |next: &Order| {
        assert!(next.delivery_tracking.len() >= history.len());
        assert_eq!(next.delivery_tracking[..history.len()], history[..]);
        history = next.delivery_tracking.clone();
    };

    check(&assignment::assign_nearest(&w.state, &w.admin, order.id, None).await.unwrap());
    check(&assignment::accept_job(&w.state, &courier_actor, courier.id, order.id).await.unwrap());
    check(
        &orders::update_tracking(
            &w.state,
            &courier_actor,
            order.id,
            TrackingUpdate {
                location: Some(near(0.008)),
                ..TrackingUpdate::default()
            },
        )
        .await
        .unwrap(),
    );
    check(
        &orders::update_tracking(
            &w.state,
            &courier_actor,
            order.id,
            TrackingUpdate {
                location: Some(near(0.004)),
                status: Some(OrderStatus::OutForDelivery),
                note: Some("picked up".to_string()),
                ..TrackingUpdate::default()
            },
        )
        .await
        .unwrap(),
    );
    check(&orders::transition(&w.state, &w.admin, order.id, OrderStatus::Delivered).await.unwrap());

    let statuses: Vec<OrderStatus> = history.iter().map(|entry| entry.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Assigned,
            OrderStatus::Accepted,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ]
    );
    assert_eq!(history[2].location, Some(near(0.004)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_lose_no_tracking_entries() {
    let w = world().await;
    let order = w.place(PaymentMethod::Cod).await;

    let mut tasks = Vec::new();
    for target in [
        OrderStatus::Accepted,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
    ] {
        let state = w.state.clone();
        let admin = w.admin;
        tasks.push(tokio::spawn(async move {
            orders::transition(&state, &admin, order.id, target).await
        }));
    }
    for step in 0..8 {
        let state = w.state.clone();
        let admin = w.admin;
        tasks.push(tokio::spawn(async move {
            orders::update_tracking(
                &state,
                &admin,
                order.id,
                TrackingUpdate {
                    location: Some(near(0.001 * f64::from(step))),
                    ..TrackingUpdate::default()
                },
            )
            .await
        }));
    }

    let mut status_changes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            status_changes += 1;
        }
    }

    let finished = w.order(order.id).await;
    // Eight location pings always succeed; each other success appended one entry.
    assert_eq!(finished.delivery_tracking.len(), status_changes - 8);
    assert_eq!(finished.version as usize, status_changes);
}

#[tokio::test]
async fn slow_gateway_times_out_as_retryable() {
    let state = state_with_gateway(Some(Duration::from_millis(500)));
    let dish = state
        .catalog
        .upsert_dish(Dish {
            id: Uuid::new_v4(),
            name: "Thali".to_string(),
            price: 220.0,
            available: true,
            restaurant_location: Some(RESTAURANT),
        })
        .await
        .unwrap();
    let customer = Actor::customer(Uuid::new_v4());
    let order = orders::create_order(
        &state,
        &customer,
        NewOrder {
            items: vec![NewOrderItem {
                dish_id: dish.id,
                quantity: 1,
            }],
            address: "1 FC Road".to_string(),
            city: "Pune".to_string(),
            payment_method: PaymentMethod::Gateway,
        },
    )
    .await
    .unwrap();

    let err = payment::create_payment_intent(&state, &customer, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GatewayTimeout));
    assert!(err.is_retryable());

    let untouched = state.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert!(untouched.payment_info.is_none());
}

#[tokio::test]
async fn payments_need_gateway_credentials() {
    let state = AppState::with_gateway(Config::default(), None);
    let customer = Actor::customer(Uuid::new_v4());

    let err = payment::create_payment_intent(&state, &customer, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));

    let err = payment::handle_webhook(&state, b"{}", Some("00")).await.unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn checkout_validates_items() {
    let w = world().await;

    let empty = NewOrder {
        items: Vec::new(),
        address: "12 MG Road".to_string(),
        city: "Pune".to_string(),
        payment_method: PaymentMethod::Cod,
    };
    assert!(matches!(
        orders::create_order(&w.state, &w.customer, empty).await,
        Err(AppError::BadRequest(_))
    ));

    let unknown = NewOrder {
        items: vec![NewOrderItem {
            dish_id: Uuid::new_v4(),
            quantity: 1,
        }],
        address: "12 MG Road".to_string(),
        city: "Pune".to_string(),
        payment_method: PaymentMethod::Cod,
    };
    assert!(matches!(
        orders::create_order(&w.state, &w.customer, unknown).await,
        Err(AppError::NotFound(_))
    ));

    let courier = Actor {
        id: Uuid::new_v4(),
        role: Role::Courier,
    };
    let by_courier = NewOrder {
        items: vec![NewOrderItem {
            dish_id: w.dish.id,
            quantity: 1,
        }],
        address: "12 MG Road".to_string(),
        city: "Pune".to_string(),
        payment_method: PaymentMethod::Cod,
    };
    assert!(matches!(
        orders::create_order(&w.state, &courier, by_courier).await,
        Err(AppError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn live_observers_see_committed_changes() {
    let w = world().await;
    let received: Arc<Mutex<Vec<(Uuid, String)>>> = Arc::new(Mutex::new(Vec::new()));

    for subscriber in [
        Subscriber {
            user_id: w.customer.id,
            role: Role::Customer,
        },
        Subscriber {
            user_id: w.admin.id,
            role: Role::Admin,
        },
        Subscriber {
            user_id: Uuid::new_v4(),
            role: Role::Customer,
        },
    ] {
        let sink = received.clone();
        let emitter: Emitter = Arc::new(move |envelope: &Envelope| -> Result<(), EmitError> {
            sink.lock()
                .unwrap()
                .push((subscriber.user_id, envelope.event.clone()));
            Ok(())
        });
        w.state
            .bus
            .register_client(Uuid::new_v4().to_string(), subscriber, emitter);
    }

    let order = w.place(PaymentMethod::Cod).await;
    orders::cancel(&w.state, &w.customer, order.id, None).await.unwrap();

    let received = received.lock().unwrap().clone();
    let for_customer: Vec<&str> = received
        .iter()
        .filter(|(user, _)| *user == w.customer.id)
        .map(|(_, event)| event.as_str())
        .collect();
    let for_admin: Vec<&str> = received
        .iter()
        .filter(|(user, _)| *user == w.admin.id)
        .map(|(_, event)| event.as_str())
        .collect();

    assert_eq!(for_customer, vec!["order:created", "order:cancelled"]);
    assert_eq!(for_admin, vec!["order:created", "order:cancelled"]);
    assert_eq!(received.len(), 4);
}
