//! Webhook ingress always acknowledges the provider

mod common;

use common::Harness;
use powerdial::interface::webhook::{FormFields, ACK_BODY};
use powerdial::interface::WebhookIngress;

const A: &str = "+15555550001";

fn form(pairs: &[(&str, &str)]) -> FormFields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_undecodable_token_is_acknowledged() {
    let h = Harness::new();
    let ingress = WebhookIngress::new(h.engine.dispatcher.clone());
    let join = form(&[("StatusCallbackEvent", "participant-join"), ("CallSid", "CA1")]);

    assert_eq!(ingress.bridge_event("%%not-a-token%%", &join).await, ACK_BODY);
    assert_eq!(
        ingress
            .leg_status("", &form(&[("CallSid", "CA1"), ("CallStatus", "completed")]))
            .await,
        ACK_BODY
    );
    assert_eq!(
        ingress
            .recording("garbage", &form(&[("RecordingUrl", "https://rec.example.com/1")]))
            .await,
        ACK_BODY
    );
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_dispatcher_failure_is_acknowledged() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let ingress = WebhookIngress::new(h.engine.dispatcher.clone());

    // A join from a leg the campaign never placed fails inside the dispatcher
    let token = h.token(&campaign, &first).encode();
    let join = form(&[
        ("StatusCallbackEvent", "participant-join"),
        ("FriendlyName", first.bridge_name.as_str()),
        ("ConferenceSid", "CF1"),
        ("SequenceNumber", "2"),
        ("CallSid", "CA-unknown"),
    ]);

    assert_eq!(ingress.bridge_event(&token, &join).await, ACK_BODY);
    assert_eq!(h.provider.terminated(), vec![first.bridge_name.clone()]);
}
