// Stripe webhook events → users, subscriptions and payments
//
// Signature checks happen in the HTTP layer; everything here assumes the
// event is authentic. Re-delivered events are harmless.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::db::{now_timestamp, record_event};
use crate::entities::accounts::{
    find_user_by_customer, record_payment, set_stripe_customer, upsert_subscription, Payment,
    SubscriptionUpdate,
};

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(String),
    Duplicate,
    Ignored(String),
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn unix_to_rfc3339(value: Option<&Value>) -> Option<String> {
    let secs = value?.as_i64()?;
    Utc.timestamp_opt(secs, 0).single().map(|dt| dt.to_rfc3339())
}

/// Email for a Stripe object: linked customer first, then what Stripe collected.
fn resolve_email(conn: &Connection, object: &Value) -> Result<Option<String>> {
    if let Some(customer) = str_at(object, "/customer") {
        if let Some(user) = find_user_by_customer(conn, customer)? {
            return Ok(Some(user.email));
        }
    }
    Ok(str_at(object, "/metadata/user_email")
        .or_else(|| str_at(object, "/customer_email"))
        .or_else(|| str_at(object, "/customer_details/email"))
        .or_else(|| str_at(object, "/client_reference_id"))
        .map(|e| e.trim().to_lowercase()))
}

pub fn apply_stripe_event(conn: &Connection, event: &Value) -> Result<WebhookOutcome> {
    let event_type = str_at(event, "/type").unwrap_or_default();
    let event_id = str_at(event, "/id").unwrap_or("unknown");
    let Some(object) = event.pointer("/data/object") else {
        return Ok(WebhookOutcome::Ignored("event without data.object".to_string()));
    };

    let outcome = match event_type {
        "checkout.session.completed" => checkout_completed(conn, object)?,
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            subscription_changed(conn, object, event_type == "customer.subscription.deleted")?
        }
        "invoice.payment_succeeded" => invoice_paid(conn, object, true)?,
        "invoice.payment_failed" => invoice_paid(conn, object, false)?,
        other => WebhookOutcome::Ignored(format!("unhandled event type {other}")),
    };

    match &outcome {
        WebhookOutcome::Applied(summary) => {
            info!(event_id, event_type, %summary, "stripe event applied");
            record_event(
                conn,
                event_type,
                "stripe_event",
                event_id,
                json!({ "summary": summary }),
                "stripe",
            );
        }
        WebhookOutcome::Duplicate => info!(event_id, event_type, "stripe event already applied"),
        WebhookOutcome::Ignored(reason) => info!(event_id, event_type, %reason, "stripe event ignored"),
    }
    Ok(outcome)
}

fn checkout_completed(conn: &Connection, session: &Value) -> Result<WebhookOutcome> {
    let Some(email) = resolve_email(conn, session)? else {
        warn!("checkout session without a customer email");
        return Ok(WebhookOutcome::Ignored("no customer email".to_string()));
    };

    if let Some(customer) = str_at(session, "/customer") {
        set_stripe_customer(conn, &email, customer)?;
    }

    if let Some(subscription_id) = str_at(session, "/subscription") {
        upsert_subscription(
            conn,
            &SubscriptionUpdate {
                stripe_subscription_id: subscription_id.to_string(),
                user_email: email.clone(),
                status: "active".to_string(),
                ..Default::default()
            },
        )?;
    }
    Ok(WebhookOutcome::Applied(format!("checkout completed for {email}")))
}

fn subscription_changed(conn: &Connection, sub: &Value, deleted: bool) -> Result<WebhookOutcome> {
    let Some(subscription_id) = str_at(sub, "/id") else {
        return Ok(WebhookOutcome::Ignored("subscription without id".to_string()));
    };
    let Some(email) = resolve_email(conn, sub)? else {
        warn!(subscription_id, "subscription for an unknown customer");
        return Ok(WebhookOutcome::Ignored("unknown customer".to_string()));
    };

    if let Some(customer) = str_at(sub, "/customer") {
        set_stripe_customer(conn, &email, customer)?;
    }

    let status = if deleted {
        "canceled".to_string()
    } else {
        str_at(sub, "/status").unwrap_or("incomplete").to_string()
    };
    let price = sub.pointer("/items/data/0/price");

    let saved = upsert_subscription(
        conn,
        &SubscriptionUpdate {
            stripe_subscription_id: subscription_id.to_string(),
            user_email: email.clone(),
            status,
            plan: price
                .and_then(|p| str_at(p, "/nickname").or_else(|| str_at(p, "/lookup_key")))
                .map(str::to_string),
            price_id: price.and_then(|p| str_at(p, "/id")).map(str::to_string),
            current_period_end: unix_to_rfc3339(
                sub.get("current_period_end")
                    .or_else(|| sub.pointer("/items/data/0/current_period_end")),
            ),
            cancel_at_period_end: sub
                .get("cancel_at_period_end")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
    )?;
    Ok(WebhookOutcome::Applied(format!(
        "subscription {} for {email} is {}",
        saved.stripe_subscription_id, saved.status
    )))
}

fn invoice_paid(conn: &Connection, invoice: &Value, succeeded: bool) -> Result<WebhookOutcome> {
    let Some(payment_id) = str_at(invoice, "/payment_intent").or_else(|| str_at(invoice, "/id")) else {
        return Ok(WebhookOutcome::Ignored("invoice without id".to_string()));
    };
    let Some(email) = resolve_email(conn, invoice)? else {
        return Ok(WebhookOutcome::Ignored("no customer email".to_string()));
    };

    let amount_field = if succeeded { "amount_paid" } else { "amount_due" };
    let payment = Payment {
        stripe_payment_id: payment_id.to_string(),
        user_email: email.clone(),
        amount_cents: invoice.get(amount_field).and_then(Value::as_i64).unwrap_or(0),
        currency: str_at(invoice, "/currency").unwrap_or("usd").to_string(),
        status: if succeeded { "succeeded" } else { "failed" }.to_string(),
        created_at: unix_to_rfc3339(invoice.get("created")).unwrap_or_else(now_timestamp),
    };

    if record_payment(conn, &payment)? {
        Ok(WebhookOutcome::Applied(format!(
            "payment {payment_id} {} for {email}",
            payment.status
        )))
    } else {
        Ok(WebhookOutcome::Duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::accounts::{find_user, latest_subscription, payments_for, resolve_access};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn event(event_type: &str, object: Value) -> Value {
        json!({ "id": "evt_1", "type": event_type, "data": { "object": object } })
    }

    #[test]
    fn test_checkout_then_subscription_lifecycle() {
        let conn = test_db();

        apply_stripe_event(
            &conn,
            &event(
                "checkout.session.completed",
                json!({ "customer": "cus_1", "customer_email": "Ana@Example.com", "subscription": "sub_1" }),
            ),
        )
        .unwrap();
        let user = find_user(&conn, "ana@example.com").unwrap().unwrap();
        assert_eq!(user.stripe_customer_id.as_deref(), Some("cus_1"));
        assert!(resolve_access(&conn, "ana@example.com").unwrap().has_access());

        let outcome = apply_stripe_event(
            &conn,
            &event(
                "customer.subscription.updated",
                json!({
                    "id": "sub_1",
                    "customer": "cus_1",
                    "status": "past_due",
                    "current_period_end": 1_735_689_600,
                    "cancel_at_period_end": true,
                    "items": { "data": [{ "price": { "id": "price_9", "nickname": "Pro" } }] }
                }),
            ),
        )
        .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied(_)));

        let sub = latest_subscription(&conn, "ana@example.com").unwrap().unwrap();
        assert_eq!(sub.status, "past_due");
        assert_eq!(sub.price_id.as_deref(), Some("price_9"));
        assert_eq!(sub.plan.as_deref(), Some("Pro"));
        assert!(sub.cancel_at_period_end);
        assert!(sub.current_period_end.unwrap().starts_with("2025-01-01"));
        assert!(!resolve_access(&conn, "ana@example.com").unwrap().has_access());

        apply_stripe_event(
            &conn,
            &event("customer.subscription.deleted", json!({ "id": "sub_1", "customer": "cus_1", "status": "active" })),
        )
        .unwrap();
        let sub = latest_subscription(&conn, "ana@example.com").unwrap().unwrap();
        assert_eq!(sub.status, "canceled");
    }

    #[test]
    fn test_invoices_are_recorded_once() {
        let conn = test_db();
        let invoice = json!({
            "id": "in_1",
            "payment_intent": "pi_1",
            "customer_email": "bo@example.com",
            "amount_paid": 4900,
            "currency": "usd"
        });

        let first = apply_stripe_event(&conn, &event("invoice.payment_succeeded", invoice.clone())).unwrap();
        assert!(matches!(first, WebhookOutcome::Applied(_)));
        let again = apply_stripe_event(&conn, &event("invoice.payment_succeeded", invoice)).unwrap();
        assert_eq!(again, WebhookOutcome::Duplicate);

        let payments = payments_for(&conn, "bo@example.com").unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount_cents, 4900);
        assert_eq!(payments[0].status, "succeeded");
    }

    #[test]
    fn test_retried_payment_moves_to_succeeded() {
        let conn = test_db();
        let invoice = json!({
            "id": "in_2",
            "payment_intent": "pi_1",
            "customer_email": "bo@example.com",
            "amount_due": 4900,
            "amount_paid": 4900,
            "currency": "usd"
        });

        let failed = apply_stripe_event(&conn, &event("invoice.payment_failed", invoice.clone())).unwrap();
        assert!(matches!(failed, WebhookOutcome::Applied(_)));
        let succeeded = apply_stripe_event(&conn, &event("invoice.payment_succeeded", invoice)).unwrap();
        assert!(matches!(succeeded, WebhookOutcome::Applied(_)));

        let payments = payments_for(&conn, "bo@example.com").unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, "succeeded");
    }

    #[test]
    fn test_unhandled_and_unknown_customers() {
        let conn = test_db();
        let outcome = apply_stripe_event(&conn, &event("charge.refunded", json!({}))).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

        let outcome = apply_stripe_event(
            &conn,
            &event("customer.subscription.created", json!({ "id": "sub_9", "customer": "cus_unknown" })),
        )
        .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored("unknown customer".to_string()));
    }
}
