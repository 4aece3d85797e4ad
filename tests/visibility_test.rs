//! Which orders an agent may see and claim, relative to their registration time.

mod common;

use axum::http::Method;
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use grocery_orders_api::auth::Role;
use grocery_orders_api::entities::{
    delivery_agent,
    order::{self, DeliveryStatus, PaymentMethod},
};
use grocery_orders_api::services::visibility::is_visible_to;
use sea_orm::EntityTrait;
use uuid::Uuid;

async fn visible_ids(app: &TestApp, agent_id: Uuid) -> Vec<Uuid> {
    app.state
        .services
        .visibility
        .visible_orders(agent_id)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect()
}

#[tokio::test]
async fn agent_sees_orders_from_registration_onwards() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(1);
    let agent_id = app.seed_agent(registered, "9300000001").await;

    let before = app
        .seed_order(
            registered - Duration::seconds(1),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;
    let after = app
        .seed_order(
            registered + Duration::seconds(1),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;

    let visible = visible_ids(&app, agent_id).await;
    assert!(visible.contains(&after));
    assert!(!visible.contains(&before));
}

#[tokio::test]
async fn assigned_orders_are_always_visible_and_others_are_hidden() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(1);
    let agent_id = app.seed_agent(registered, "9300000002").await;
    let rival_id = app.seed_agent(registered, "9300000003").await;
    let later = registered + Duration::minutes(5);

    // Assigned before the agent existed still shows up
    let mine = app
        .seed_order(
            registered - Duration::days(1),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Picked,
            Some(agent_id),
        )
        .await;
    let rivals = app
        .seed_order(
            later,
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Picked,
            Some(rival_id),
        )
        .await;
    let unpaid_online = app
        .seed_order(later, PaymentMethod::Online, false, DeliveryStatus::Placed, None)
        .await;
    let paid_online = app
        .seed_order(later, PaymentMethod::Online, true, DeliveryStatus::Placed, None)
        .await;
    let cancelled = app
        .seed_order(
            later,
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Cancelled,
            None,
        )
        .await;

    let visible = visible_ids(&app, agent_id).await;
    assert!(visible.contains(&mine));
    assert!(visible.contains(&paid_online));
    assert!(!visible.contains(&rivals));
    assert!(!visible.contains(&unpaid_online));
    assert!(!visible.contains(&cancelled));
}

#[tokio::test]
async fn visible_orders_query_agrees_with_the_visibility_rule() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(3);
    let agent_id = app.seed_agent(registered, "9300000005").await;
    let rival_id = app.seed_agent(registered, "9300000006").await;

    let offsets = [-Duration::minutes(10), Duration::zero(), Duration::minutes(10)];
    let methods = [
        (PaymentMethod::CashOnDelivery, false),
        (PaymentMethod::Online, false),
        (PaymentMethod::Online, true),
    ];
    let statuses = [
        DeliveryStatus::Placed,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ];
    let holders = [None, Some(agent_id), Some(rival_id)];

    for offset in offsets {
        for (method, is_paid) in methods {
            for status in statuses {
                for holder in holders {
                    app.seed_order(registered + offset, method, is_paid, status, holder)
                        .await;
                }
            }
        }
    }

    let agent = delivery_agent::Entity::find_by_id(agent_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("agent row");
    let visible = visible_ids(&app, agent_id).await;
    let all = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(all.len(), 81);

    for order in &all {
        assert_eq!(
            visible.contains(&order.id),
            is_visible_to(order, &agent),
            "query and rule disagree for {:?}",
            order
        );
    }
}

#[tokio::test]
async fn orders_outside_the_view_cannot_be_claimed() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(1);
    let agent_id = app.seed_agent(registered, "9300000007").await;
    let token = app.token_for(agent_id, Role::Agent);

    let before_registration = app
        .seed_order(
            registered - Duration::days(3),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;
    let unpaid_online = app
        .seed_order(
            registered + Duration::minutes(1),
            PaymentMethod::Online,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;

    for order_id in [before_registration, unpaid_online] {
        let claim = app
            .request(
                Method::POST,
                &format!("/api/v1/agents/orders/{order_id}/claim"),
                None,
                Some(&token),
            )
            .await;
        assert_eq!(claim.status(), 403);

        let stored = app.state.services.orders.find(order_id).await.unwrap();
        assert!(stored.assigned_agent_id.is_none());
    }
}

#[tokio::test]
async fn paid_online_orders_in_view_can_be_claimed() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(1);
    let agent_id = app.seed_agent(registered, "9300000008").await;
    let order_id = app
        .seed_order(
            registered + Duration::minutes(1),
            PaymentMethod::Online,
            true,
            DeliveryStatus::Placed,
            None,
        )
        .await;

    let claim = app
        .request(
            Method::POST,
            &format!("/api/v1/agents/orders/{order_id}/claim"),
            None,
            Some(&app.token_for(agent_id, Role::Agent)),
        )
        .await;
    assert_eq!(claim.status(), 200);
    let body = response_json(claim).await;
    assert_eq!(body["data"]["assigned_agent_id"], agent_id.to_string());
}

#[tokio::test]
async fn visible_orders_endpoint_lists_newest_first() {
    let app = TestApp::new().await;
    let registered = Utc::now() - Duration::hours(2);
    let agent_id = app.seed_agent(registered, "9300000004").await;

    let older = app
        .seed_order(
            registered + Duration::minutes(1),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;
    let newer = app
        .seed_order(
            registered + Duration::minutes(30),
            PaymentMethod::CashOnDelivery,
            false,
            DeliveryStatus::Placed,
            None,
        )
        .await;

    let token = app.token_for(agent_id, Role::Agent);
    let response = app
        .request(Method::GET, "/api/v1/agents/me/orders", None, Some(&token))
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("order list")
        .iter()
        .filter_map(|o| o["id"].as_str())
        .collect();
    assert_eq!(ids, vec![newer.to_string(), older.to_string()]);
}

#[tokio::test]
async fn unpaid_online_orders_stay_out_of_customer_history() {
    let app = TestApp::new().await;
    let now = Utc::now();

    let cod = app
        .seed_order(now, PaymentMethod::CashOnDelivery, false, DeliveryStatus::Placed, None)
        .await;
    let unpaid = app
        .seed_order(now, PaymentMethod::Online, false, DeliveryStatus::Placed, None)
        .await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/mine",
            None,
            Some(&app.customer_token()),
        )
        .await;
    let body = response_json(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("order list")
        .iter()
        .filter_map(|o| o["id"].as_str())
        .collect();

    assert!(ids.contains(&cod.to_string().as_str()));
    assert!(!ids.contains(&unpaid.to_string().as_str()));
}
