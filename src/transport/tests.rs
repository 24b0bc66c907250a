use bytes::Bytes;
use futures_util::StreamExt;

use super::parse::{EventParser, EventStream, Frame, RawEvent};
use super::wire;
use crate::broker::{Message, ReplayGap};
use crate::utils::error::ParseError;

fn message(id: u64, event_type: &str, payload: &str) -> Message {
    Message {
        id,
        event_type: event_type.to_string(),
        targets: vec!["x".to_string()],
        payload: Bytes::from(payload.to_string()),
    }
}

fn frames(input: &[&[u8]]) -> Vec<Frame> {
    let mut parser = EventParser::new();
    let mut out = Vec::new();
    for chunk in input {
        parser.feed(chunk);
        while let Some(frame) = parser.next_frame().unwrap() {
            out.push(frame);
        }
    }
    parser.finish();
    while let Some(frame) = parser.next_frame().unwrap() {
        out.push(frame);
    }
    out
}

fn event(id: Option<&str>, event: &str, data: &str) -> Frame {
    Frame::Event(RawEvent {
        id: id.map(str::to_string),
        event: event.to_string(),
        data: Bytes::from(data.to_string()),
    })
}

#[test]
fn test_encode_untyped_record_omits_event_field() {
    let encoded = wire::encode(&message(7, "", "hello"));
    assert_eq!(&encoded[..], b"id: 7\ndata: hello\n\n");
}

#[test]
fn test_encode_typed_multiline_record() {
    let encoded = wire::encode(&message(8, "price", "a\nb\n"));
    assert_eq!(&encoded[..], b"id: 8\nevent: price\ndata: a\ndata: b\ndata: \n\n");
}

#[test]
fn test_encode_normalises_carriage_returns() {
    let encoded = wire::encode(&message(9, "", "a\r\nb\rc"));
    assert_eq!(&encoded[..], b"id: 9\ndata: a\ndata: b\ndata: c\n\n");
}

#[test]
fn test_encoded_record_parses_back() {
    let original = message(42, "update", "line one\n  indented\n\nlast");
    let parsed = frames(&[&wire::encode(&original)]);
    assert_eq!(
        parsed,
        vec![event(Some("42"), "update", "line one\n  indented\n\nlast")]
    );
}

#[test]
fn test_gap_event_has_no_id() {
    let gap = ReplayGap {
        requested: 2,
        oldest: Some(10),
        latest: 12,
    };
    let parsed = frames(&[&wire::encode_gap(&gap)]);
    let [Frame::Event(raw)] = parsed.as_slice() else {
        panic!("expected one event, got {parsed:?}");
    };
    assert_eq!(raw.id, None);
    assert_eq!(raw.event, wire::GAP_EVENT);
    let decoded: ReplayGap = serde_json::from_slice(&raw.data).unwrap();
    assert_eq!(decoded, gap);
}

#[test]
fn test_parser_handles_split_chunks() {
    let parsed = frames(&[b"id: 1\nda", b"ta: hel", b"lo\n", b"\n"]);
    assert_eq!(parsed, vec![event(Some("1"), "", "hello")]);
}

#[test]
fn test_parser_accepts_crlf_and_cr_line_endings() {
    let parsed = frames(&[b"id: 1\r\ndata: a\r\n\r\nid: 2\rdata: b\r\r"]);
    assert_eq!(
        parsed,
        vec![event(Some("1"), "", "a"), event(Some("2"), "", "b")]
    );
}

#[test]
fn test_parser_waits_on_cr_at_chunk_edge() {
    let mut parser = EventParser::new();
    parser.feed(b"data: x\r");
    assert_eq!(parser.next_frame().unwrap(), None);
    parser.feed(b"\n\r\n");
    assert_eq!(parser.next_frame().unwrap(), Some(event(None, "", "x")));
}

#[test]
fn test_parser_strips_bom_and_reports_comments() {
    let parsed = frames(&[b"\xEF\xBB", b"\xBF: keep-alive\n\ndata: x\n\n"]);
    assert_eq!(parsed, vec![Frame::Comment, event(None, "", "x")]);
}

#[test]
fn test_parser_ignores_unknown_fields_and_dataless_events() {
    let parsed = frames(&[b"retry: 1000\nfoo: bar\nevent: lonely\n\ndata\n\n"]);
    assert_eq!(parsed, vec![event(None, "", "")]);
}

#[test]
fn test_parser_ignores_id_with_nul() {
    let parsed = frames(&[b"id: 1\0\ndata: x\n\n"]);
    assert_eq!(parsed, vec![event(None, "", "x")]);
}

#[test]
fn test_parser_discards_unterminated_event() {
    let parsed = frames(&[b"id: 1\ndata: complete\n\nid: 2\ndata: partial\n"]);
    assert_eq!(parsed, vec![event(Some("1"), "", "complete")]);
}

#[test]
fn test_parser_rejects_invalid_utf8_event_name() {
    let mut parser = EventParser::new();
    parser.feed(b"event: \xFF\n");
    assert_eq!(
        parser.next_frame().unwrap_err(),
        ParseError::InvalidUtf8("event")
    );
}

#[tokio::test]
async fn test_event_stream_over_chunks() {
    let chunks = vec![
        Ok::<_, ParseError>(Bytes::from_static(b"id: 1\ndata: a\n\n:\n\nid: 2\n")),
        Ok(Bytes::from_static(b"data: b\n\n")),
    ];
    let parsed: Vec<Frame> = EventStream::new(futures_util::stream::iter(chunks))
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(
        parsed,
        vec![
            event(Some("1"), "", "a"),
            Frame::Comment,
            event(Some("2"), "", "b")
        ]
    );
}

#[tokio::test]
async fn test_event_stream_passes_transport_errors() {
    let chunks = vec![
        Ok(Bytes::from_static(b"data: a\n\n")),
        Err(ParseError::InvalidUtf8("test")),
    ];
    let items: Vec<Result<Frame, ParseError>> =
        EventStream::new(futures_util::stream::iter(chunks)).collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(items[1].is_err());
}

mod http {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::net::TcpListener;

    use crate::broker::{Hub, HubConfig, QueryChannelResolver, ReplayGap};
    use crate::transport::parse::{EventStream, Frame};
    use crate::transport::sse::{PublishRequest, PublishResponse, StreamSettings, serve_listener};
    use crate::utils::error::ClientError;

    async fn start(hub: Arc<Hub>, settings: StreamSettings) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_listener(listener, hub, settings));
        format!("http://{addr}")
    }

    fn resolving_hub(history_size: usize) -> Arc<Hub> {
        Arc::new(Hub::with_resolver(
            HubConfig {
                client_buffer: 16,
                history_size,
                max_subscribers: 0,
            },
            QueryChannelResolver::new(),
        ))
    }

    async fn wait_for_subscribers(hub: &Hub, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.subscriber_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber count never reached");
    }

    #[tokio::test]
    async fn test_events_without_channels_is_forbidden() {
        let base = start(resolving_hub(8), StreamSettings::default()).await;
        let resp = reqwest::get(format!("{base}/events")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 403);
    }

    #[tokio::test]
    async fn test_publish_endpoint_assigns_ids() {
        let hub = resolving_hub(8);
        let base = start(hub.clone(), StreamSettings::default()).await;
        let client = reqwest::Client::new();

        for expected in 1..=2u64 {
            let resp: PublishResponse = client
                .post(format!("{base}/publish"))
                .json(&PublishRequest {
                    channels: vec!["x".to_string()],
                    event_type: "note".to_string(),
                    payload: "hi".to_string(),
                })
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(resp.id, expected);
        }
        assert_eq!(hub.history_ids(), vec![1, 2]);

        let resp = client
            .post(format!("{base}/publish"))
            .json(&serde_json::json!({ "channels": ["x"], "type": "a\nb", "payload": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_stream_replays_then_goes_live() {
        let hub = resolving_hub(8);
        let base = start(hub.clone(), StreamSettings::default()).await;
        for i in 1..=3 {
            hub.publish(format!("p{i}"), ["x"]).unwrap();
        }

        let resp = reqwest::Client::new()
            .get(format!("{base}/events?channels=x"))
            .header("Last-Event-ID", "1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let mut frames = EventStream::new(Box::pin(
            resp.bytes_stream().map(|r| r.map_err(ClientError::from)),
        ));
        wait_for_subscribers(&hub, 1).await;
        hub.publish("other", ["y"]).unwrap();
        hub.publish("p5", ["x"]).unwrap();

        let mut ids = Vec::new();
        while ids.len() < 3 {
            match frames.next().await.unwrap().unwrap() {
                Frame::Event(raw) => ids.push(raw.id.unwrap()),
                Frame::Comment => {}
            }
        }
        assert_eq!(ids, vec!["2", "3", "5"]);

        drop(frames);
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.subscriber_count() != 0 {
                hub.publish("tick", ["x"]).unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("stream was never unregistered");
    }

    #[tokio::test]
    async fn test_stream_announces_gap_and_heartbeats() {
        let hub = resolving_hub(2);
        let base = start(
            hub.clone(),
            StreamSettings {
                heartbeat: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .await;
        for i in 1..=5 {
            hub.publish(format!("p{i}"), ["x"]).unwrap();
        }

        let resp = reqwest::get(format!("{base}/events?channels=x&lastEventId=1"))
            .await
            .unwrap();
        let mut frames = EventStream::new(Box::pin(
            resp.bytes_stream().map(|r| r.map_err(ClientError::from)),
        ));

        let Frame::Event(first) = frames.next().await.unwrap().unwrap() else {
            panic!("expected the gap event first");
        };
        assert_eq!(first.event, crate::transport::wire::GAP_EVENT);
        assert_eq!(first.id, None);

        let next = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next, Frame::Comment);
    }

    #[tokio::test]
    async fn test_stream_resumed_ahead_of_hub_reports_gap_and_goes_live() {
        let hub = resolving_hub(8);
        let base = start(hub.clone(), StreamSettings::default()).await;

        let resp = reqwest::Client::new()
            .get(format!("{base}/events?channels=x"))
            .header("Last-Event-ID", "50")
            .send()
            .await
            .unwrap();
        let mut frames = EventStream::new(Box::pin(
            resp.bytes_stream().map(|r| r.map_err(ClientError::from)),
        ));

        let Frame::Event(first) = frames.next().await.unwrap().unwrap() else {
            panic!("expected the gap event first");
        };
        assert_eq!(first.event, crate::transport::wire::GAP_EVENT);
        let gap: ReplayGap = serde_json::from_slice(&first.data).unwrap();
        assert_eq!(gap.requested, 50);
        assert_eq!(gap.latest, 0);
        assert!(gap.is_stale());

        wait_for_subscribers(&hub, 1).await;
        for i in 1..=3 {
            hub.publish(format!("p{i}"), ["x"]).unwrap();
        }
        let mut ids = Vec::new();
        while ids.len() < 3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .expect("live records were held back")
                .unwrap()
                .unwrap();
            if let Frame::Event(raw) = frame {
                ids.push(raw.id.unwrap());
            }
        }
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_cors_preflight_honours_allowed_origins() {
        let base = start(
            resolving_hub(8),
            StreamSettings {
                allowed_origins: vec!["https://app.example".to_string()],
                ..Default::default()
            },
        )
        .await;
        let client = reqwest::Client::new();

        let resp = client
            .request(reqwest::Method::OPTIONS, format!("{base}/events"))
            .header("Origin", "https://app.example")
            .header("Access-Control-Request-Method", "GET")
            .header("Access-Control-Request-Headers", "last-event-id")
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers()["access-control-allow-origin"].to_str().unwrap(),
            "https://app.example"
        );
        let allowed_headers = resp.headers()["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed_headers.contains("last-event-id"), "{allowed_headers}");

        let resp = client
            .get(format!("{base}/stats"))
            .header("Origin", "https://elsewhere.example")
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_no_cors_headers_without_allowed_origins() {
        let base = start(resolving_hub(8), StreamSettings::default()).await;
        let resp = reqwest::Client::new()
            .get(format!("{base}/stats"))
            .header("Origin", "https://app.example")
            .send()
            .await
            .unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let hub = resolving_hub(8);
        let base = start(hub.clone(), StreamSettings::default()).await;
        hub.publish("p", ["x"]).unwrap();

        let stats: crate::broker::HubStats = reqwest::get(format!("{base}/stats"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats.last_id, 1);
        assert_eq!(stats.history_len, 1);
    }
}

