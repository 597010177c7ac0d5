//! Outbound subscription requests against a mock hub.

use std::collections::HashMap;

use tokio::net::TcpListener;
use tokio::sync::broadcast::error::TryRecvError;
use websub::signature::derive_topic_secret;
use websub::{DenialReason, Error, Mode, Subscriber, SubscriberConfig, SubscriberEvent};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOPIC: &str = "https://api.twitch.tv/helix/streams?user_id=5678";

fn subscriber(hub_url: &str) -> Subscriber {
    let config = SubscriberConfig::new("https://cb.example.com", "client-123", "master")
        .with_hub_url(hub_url)
        .with_lease_seconds(3600);
    Subscriber::new(config).unwrap()
}

fn form_fields(body: &[u8]) -> HashMap<String, String> {
    std::str::from_utf8(body)
        .unwrap()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            (
                urlencoding::decode(key).unwrap().into_owned(),
                urlencoding::decode(value).unwrap().into_owned(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_subscribe_posts_form_to_hub() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub"))
        .and(header("Client-ID", "client-123"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&hub)
        .await;

    let subscriber = subscriber(&format!("{}/hub", hub.uri()));
    let mut events = subscriber.events();
    subscriber.subscribe(TOPIC).await.unwrap();

    let requests = hub.received_requests().await.unwrap();
    let fields = form_fields(&requests[0].body);
    assert_eq!(fields["hub.mode"], "subscribe");
    assert_eq!(fields["hub.topic"], TOPIC);
    assert_eq!(fields["hub.lease_seconds"], "3600");
    assert_eq!(fields["hub.secret"], derive_topic_secret("master", TOPIC).unwrap());

    let callback = &fields["hub.callback"];
    assert!(callback.starts_with("https://cb.example.com/?topic="));
    assert!(callback.contains(&urlencoding::encode(TOPIC).into_owned()));

    // The secret is on record before the hub starts signing with it
    assert_eq!(
        subscriber.secrets().get(TOPIC),
        Some(derive_topic_secret("master", TOPIC).unwrap())
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_no_content_counts_as_accepted() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&hub)
        .await;

    let subscriber = subscriber(&hub.uri());
    assert!(subscriber.subscribe(TOPIC).await.is_ok());
}

#[tokio::test]
async fn test_rejection_returns_error_and_denied_event() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid topic"))
        .mount(&hub)
        .await;

    let subscriber = subscriber(&hub.uri());
    let mut events = subscriber.events();

    match subscriber.subscribe(TOPIC).await {
        Err(Error::HubRejected { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body, "invalid topic");
        }
        other => panic!("unexpected result {:?}", other),
    }

    match events.try_recv().unwrap() {
        SubscriberEvent::Denied(event) => {
            assert_eq!(event.topic, TOPIC);
            assert_eq!(event.hub.as_deref(), Some(hub.uri().as_str()));
            assert_eq!(
                event.reason,
                DenialReason::UnexpectedStatus {
                    status: 400,
                    body: "invalid topic".to_string()
                }
            );
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_hub_reports_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let subscriber = subscriber(&format!("http://{}/hub", addr));
    let mut events = subscriber.events();

    let result = subscriber.subscribe(TOPIC).await;
    assert!(matches!(result, Err(Error::Transport(_))));
    assert!(matches!(
        events.try_recv().unwrap(),
        SubscriberEvent::Denied(event) if matches!(event.reason, DenialReason::Transport { .. })
    ));
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe_reach_hub() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("hub.mode=subscribe"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&hub)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("hub.mode=unsubscribe"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&hub)
        .await;

    let subscriber = subscriber(&hub.uri());
    subscriber.subscribe(TOPIC).await.unwrap();
    subscriber.unsubscribe(TOPIC).await.unwrap();

    let requests = hub.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let modes: Vec<String> = requests
        .iter()
        .map(|request| form_fields(&request.body)["hub.mode"].clone())
        .collect();
    assert_eq!(modes, ["subscribe", "unsubscribe"]);

    // Notifications stay verifiable until the hub confirms the unsubscription
    assert!(subscriber.secrets().get(TOPIC).is_some());
    assert_eq!(subscriber.pending(TOPIC), Some(Mode::Unsubscribe));
}

#[tokio::test]
async fn test_topics_get_distinct_secrets() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&hub)
        .await;

    let subscriber = subscriber(&hub.uri());
    subscriber.subscribe("topic-a").await.unwrap();
    subscriber.subscribe("topic-b").await.unwrap();

    let requests = hub.received_requests().await.unwrap();
    let secrets: Vec<String> = requests
        .iter()
        .map(|request| form_fields(&request.body)["hub.secret"].clone())
        .collect();
    assert_ne!(secrets[0], secrets[1]);
    assert_eq!(subscriber.secrets().len(), 2);
}
