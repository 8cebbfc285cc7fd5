//! Postgres-backed tests. These start a container, so they are ignored by
//! default.
//!
//! Run with: cargo test -p newsletter-server --test postgres_tests -- --ignored

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use server_core::domains::newsletter::jobs::ParseEmailJob;
use server_core::domains::newsletter::models::{DeliveryRecord, NewDelivery, ParsedFields};
use server_core::domains::newsletter::ParseStatus;
use server_core::domains::subscriptions::SubscriptionSeed;
use server_core::domains::users::register_user;
use server_core::kernel::jobs::{
    enqueue_command, ErrorKind, JobQueue, JobStatus, PostgresJobQueue, RetryPolicy,
};
use tower::ServiceExt;
use uuid::Uuid;

use crate::common::*;

fn unique_user() -> String {
    Uuid::new_v4().to_string()
}

fn delivery(user_id: &str, message_id: &str, sender: &str) -> NewDelivery {
    NewDelivery {
        user_id: user_id.to_string(),
        message_id: message_id.to_string(),
        from_email: sender.to_string(),
        from_name: None,
        subject: "Issue".to_string(),
        html_content: "<p>Hello</p>".to_string(),
        text_content: None,
        received_at: Utc::now(),
        subscription: SubscriptionSeed {
            user_id: user_id.to_string(),
            sender_email: sender.to_string(),
            sender_domain: sender.split_once('@').map(|(_, d)| d.to_string()),
            newsletter_name: "News".to_string(),
        },
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn delivery_is_deduplicated_and_counted() {
    let harness = PostgresHarness::new().await.unwrap();
    let deps = &harness.deps;
    let user_id = unique_user();
    register_user(&user_id, deps).await.unwrap();

    let sender = format!("news-{}@daily.example", &user_id[..8]);
    for n in 0..3 {
        let message_id = format!("<{}-{}@pg>", user_id, n);
        let record = deps
            .newsletters
            .record_delivery(&delivery(&user_id, &message_id, &sender))
            .await
            .unwrap();
        match record {
            DeliveryRecord::Created { subscription, .. } => {
                assert_eq!(subscription.email_count, n + 1);
            }
            DeliveryRecord::Duplicate => panic!("unexpected duplicate"),
        }
    }

    let duplicate = deps
        .newsletters
        .record_delivery(&delivery(&user_id, &format!("<{}-0@pg>", user_id), &sender))
        .await
        .unwrap();
    assert!(matches!(duplicate, DeliveryRecord::Duplicate));

    let subscription = deps
        .subscriptions
        .find_subscription(&user_id, &sender)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.email_count, 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn parse_results_are_persisted() {
    let harness = PostgresHarness::new().await.unwrap();
    let deps = &harness.deps;
    let user_id = unique_user();
    register_user(&user_id, deps).await.unwrap();

    let record = deps
        .newsletters
        .record_delivery(&delivery(&user_id, &format!("<{}@parse>", user_id), "a@b.example"))
        .await
        .unwrap();
    let DeliveryRecord::Created { newsletter, .. } = record else {
        panic!("expected a new newsletter");
    };

    let fields = ParsedFields {
        title: "Hello".to_string(),
        author: Some("Ann".to_string()),
        publication: Some("B".to_string()),
        clean_content: "<p>Hello</p>".to_string(),
        text_content: "Hello".to_string(),
        excerpt: Some("Hello".to_string()),
        estimated_read_time: 1,
    };
    let parsed = deps
        .newsletters
        .mark_parsed(newsletter.id, &fields)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(parsed.parse_status, ParseStatus::Success);
    assert_eq!(parsed.title.as_deref(), Some("Hello"));
    assert!(parsed.parsed_at.is_some());

    assert!(deps
        .newsletters
        .mark_parsed(Uuid::now_v7(), &fields)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn replay_ledger_claims_once() {
    let harness = PostgresHarness::new().await.unwrap();
    let ledger = &harness.deps.replay_ledger;
    let key = format!("mailgun:{}", Uuid::new_v4());

    assert!(ledger.claim(&key, Duration::from_secs(600)).await.unwrap());
    assert!(!ledger.claim(&key, Duration::from_secs(600)).await.unwrap());
    assert!(ledger.exists(&key).await.unwrap());

    let expired = format!("mailgun:{}", Uuid::new_v4());
    ledger.set_with_ttl(&expired, Duration::ZERO).await.unwrap();
    assert!(ledger.claim(&expired, Duration::from_secs(600)).await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn job_queue_retries_then_dead_letters() {
    let harness = PostgresHarness::new().await.unwrap();
    let queue = PostgresJobQueue::new(harness.db_pool.clone())
        .with_retry_policy(RetryPolicy::with_base_delay(Duration::ZERO));

    let job = ParseEmailJob {
        newsletter_id: Uuid::now_v7(),
        html: "<p>x</p>".to_string(),
        from_email: "a@b.example".to_string(),
        subject: "S".to_string(),
    };
    let first = enqueue_command(&queue, &job).await.unwrap();
    let second = enqueue_command(&queue, &job).await.unwrap();
    assert!(first.is_created());
    assert_eq!(first.job_id(), second.job_id());

    let worker = format!("pg-test-{}", Uuid::new_v4());
    for _ in 0..3 {
        // Other tests share the queue; claim until ours comes up.
        let claimed = loop {
            let jobs = queue.claim(&worker, 10).await.unwrap();
            let mut ours = None;
            for claimed in jobs {
                if claimed.id == first.job_id() {
                    ours = Some(claimed);
                } else {
                    queue.release(claimed.id).await.unwrap();
                }
            }
            if let Some(ours) = ours {
                break ours;
            }
        };
        queue
            .mark_failed(claimed.id, "boom", ErrorKind::Retryable)
            .await
            .unwrap();
    }

    let stored = queue.find_job(first.job_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::DeadLetter);
    assert_eq!(stored.attempt, 3);
    assert_eq!(stored.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn health_checks_database() {
    let harness = PostgresHarness::new().await.unwrap();

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
