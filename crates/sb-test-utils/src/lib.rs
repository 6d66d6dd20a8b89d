// sb-test-utils: Shared test utilities for the bridge.
//
// Provides scripted Slack and homeserver mocks for integration testing of
// the bridge service, plus builders for common stream events.

pub mod builders;
pub mod mock_homeserver;
pub mod mock_slack;

pub use mock_homeserver::MockHomeserver;
pub use mock_slack::MockSlack;

#[cfg(test)]
mod tests {
    use super::*;
    use sb_matrix::Homeserver;
    use sb_slack::client::{HistoryRequest, PostMessageRequest, SlackClient};

    // -----------------------------------------------------------------------
    // MockSlack tests
    // -----------------------------------------------------------------------

    /// Test: posted messages get monotonically increasing timestamps.
    #[tokio::test]
    async fn mock_slack_allocates_increasing_timestamps() {
        let slack = MockSlack::new("T1");
        let a = slack
            .post_message(&PostMessageRequest {
                channel: "C1".to_owned(),
                text: "one".to_owned(),
                ..PostMessageRequest::default()
            })
            .await
            .unwrap();
        let b = slack
            .post_message(&PostMessageRequest {
                channel: "C1".to_owned(),
                text: "two".to_owned(),
                ..PostMessageRequest::default()
            })
            .await
            .unwrap();
        assert!(a.ts < b.ts, "timestamps must increase: {} vs {}", a.ts, b.ts);
        assert_eq!(slack.posted.lock().unwrap().len(), 2);
    }

    /// Test: history windows honor latest/oldest bounds and the limit, and
    /// report has_more correctly.
    #[tokio::test]
    async fn mock_slack_history_windows() {
        let slack = MockSlack::new("T1");
        slack.seed_history(
            "C1",
            (1..=5)
                .map(|i| builders::history_item("U1", &format!("170000000{}.000000", i), "m"))
                .collect(),
        );
        let page = slack
            .conversation_history(&HistoryRequest {
                channel: "C1".to_owned(),
                latest: Some("1700000004.000000".to_owned()),
                limit: 2,
                ..HistoryRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        // Newest-first within the window.
        assert_eq!(page.messages[0].ts, "1700000003.000000");
        assert_eq!(page.messages[1].ts, "1700000002.000000");
    }

    /// Test: emitted events arrive on the connected stream.
    #[tokio::test]
    async fn mock_slack_stream_delivers_events() {
        let slack = MockSlack::new("T1");
        let mut rx = slack.connect_stream().await.unwrap();
        slack.emit(builders::message("C1", "U1", "1.0", "hi")).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel_id(), Some("C1"));
        slack.close_stream();
        assert!(rx.recv().await.is_none());
    }

    /// Test: a scripted failure surfaces as the configured API error.
    #[tokio::test]
    async fn mock_slack_scripted_failure() {
        let slack = MockSlack::new("T1");
        *slack.fail_with.lock().unwrap() = Some("invalid_auth".to_owned());
        let err = slack.team_info().await.unwrap_err();
        assert!(err.is_auth_invalidated());
    }

    // -----------------------------------------------------------------------
    // MockHomeserver tests
    // -----------------------------------------------------------------------

    /// Test: sends are recorded with fresh event IDs.
    #[tokio::test]
    async fn mock_homeserver_records_sends() {
        let hs = MockHomeserver::new("example.org");
        let content = sb_matrix::MessageContent::text("hello");
        let a = hs
            .send_message(&"!r:example.org".to_owned(), &"@g:example.org".to_owned(), &content, None)
            .await
            .unwrap();
        let b = hs
            .send_message(&"!r:example.org".to_owned(), &"@g:example.org".to_owned(), &content, None)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(hs.messages_in("!r:example.org").len(), 2);
    }

    /// Test: batch send is rejected unless the capability is enabled.
    #[tokio::test]
    async fn mock_homeserver_batch_capability_gate() {
        let without = MockHomeserver::new("example.org");
        assert!(
            without
                .batch_send(&"!r:example.org".to_owned(), &[])
                .await
                .is_err()
        );
        let with = MockHomeserver::with_capabilities("example.org", true, false);
        assert!(
            with.batch_send(&"!r:example.org".to_owned(), &[])
                .await
                .unwrap()
                .is_empty()
        );
    }
}
