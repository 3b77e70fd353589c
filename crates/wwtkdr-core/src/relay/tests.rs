use super::Relay;
use crate::{
    Error,
    common::types::{PollPolicy, ProducerId},
    directory::{MemoryDirectory, MemoryProducer},
    proto::{ReplyFragment, RequestMessage, ResourceRequest},
};
use axum::http::{StatusCode, header};
use core::time::Duration;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

fn policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(100), 30)
}

fn request(key: &str, entry: &str) -> ResourceRequest {
    ResourceRequest {
        method: "GET".to_string(),
        url: format!("/wwtkdr/{key}/{entry}"),
        authenticated: true,
        key: key.to_string(),
        entry: entry.to_string(),
        context: serde_json::Map::new(),
    }
}

async fn relay_with_producer(key: &str) -> (MemoryDirectory, Relay, MemoryProducer) {
    let directory = MemoryDirectory::new();
    let relay = Relay::new(Arc::new(directory.clone()), policy());
    let producer = directory.spawn("producer-1");
    producer.claim_key(key);

    while relay.registry().lookup(key).is_err() {
        tokio::task::yield_now().await;
    }

    (directory, relay, producer)
}

/// Serves every session opened on `producer` with `respond`.
fn serve<F>(mut producer: MemoryProducer, respond: F) -> JoinHandle<()>
where
    F: Fn(&RequestMessage) -> Vec<ReplyFragment> + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    tokio::spawn(async move {
        while let Some(mut session) = producer.accept().await {
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                while let Some(req) = session.next_request().await {
                    for fragment in respond(&req) {
                        if session.reply(fragment).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    })
}

#[tokio::test(start_paused = true)]
async fn unknown_key_is_reported() {
    let directory = MemoryDirectory::new();
    let relay = Relay::new(Arc::new(directory), policy());

    let err = relay.fetch(request("nope", "a.txt")).await.err().unwrap();
    assert_eq!(
        err,
        Error::UnknownKey {
            key: "nope".to_string()
        }
    );
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    assert!(err.to_string().contains("nope"));
}

#[tokio::test(start_paused = true)]
async fn reassembles_two_fragment_reply() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        // Deliberately out of order on the wire.
        vec![
            ReplyFragment::ok(id, 1).with_chunk(&b"lo"[..]),
            ReplyFragment::ok(id, 0)
                .with_http(200, [("Content-Type", "text/plain")])
                .with_more(true)
                .with_chunk(&b"hel"[..]),
        ]
    });

    let response = relay.fetch(request("tiles", "a.txt")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.collect().await.unwrap().as_ref(), b"hello");
}

#[tokio::test(start_paused = true)]
async fn forwards_producer_request_fields() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let body = format!(
            "{} {} {} {}",
            req.msg_type, req.content.method, req.content.key, req.content.entry
        );
        vec![
            ReplyFragment::ok(req.msg_id, 0)
                .with_http(203, Vec::<(String, String)>::new())
                .with_chunk(body.into_bytes()),
        ]
    });

    let response = relay
        .fetch(request("tiles", "dir/with//slashes.png"))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
    assert_eq!(
        response.collect().await.unwrap().as_ref(),
        b"resource_request GET tiles dir/with//slashes.png"
    );
}

#[tokio::test(start_paused = true)]
async fn backend_error_on_first_fragment() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| vec![ReplyFragment::error(req.msg_id, 0, "boom")]);

    let err = relay.fetch(request("tiles", "a.txt")).await.err().unwrap();
    assert_eq!(
        err,
        Error::BackendError {
            message: "boom".to_string()
        }
    );
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn backend_error_mid_stream_ends_body() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        vec![
            ReplyFragment::ok(id, 0)
                .with_http(200, [("Content-Type", "text/plain")])
                .with_more(true)
                .with_chunk(&b"partial"[..]),
            ReplyFragment::error(id, 1, "disk on fire"),
        ]
    });

    let response = relay.fetch(request("tiles", "a.txt")).await.unwrap();
    let mut body = response.body;
    assert_eq!(body.next().await.unwrap().unwrap().as_ref(), b"partial");
    assert!(matches!(
        body.next().await.unwrap(),
        Err(Error::BackendError { .. })
    ));
    assert!(body.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn silent_producer_times_out_within_budget() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |_| Vec::new());
    let start = tokio::time::Instant::now();

    let err = relay.fetch(request("tiles", "a.txt")).await.err().unwrap();
    assert_eq!(err, Error::ReplyTimeout { attempts: 30 });
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(start.elapsed() >= policy().budget());
    assert!(start.elapsed() < policy().budget() + Duration::from_secs(1));

    let handle = relay
        .directory()
        .get_handle(&ProducerId::new("producer-1"))
        .unwrap();
    assert_eq!(handle.dispatcher().buffered_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn dead_producer_is_unavailable() {
    let (directory, relay, producer) = relay_with_producer("tiles").await;
    directory.kill(producer.id());

    let err = relay.fetch(request("tiles", "a.txt")).await.err().unwrap();
    assert!(matches!(
        &err,
        Error::ProducerUnavailable { key: Some(key), .. } if key == "tiles"
    ));
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    assert!(err.to_string().contains("\"tiles\""));
}

#[tokio::test(start_paused = true)]
async fn first_fragment_without_status_is_malformed() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        vec![
            ReplyFragment::ok(id, 0)
                .with_more(true)
                .with_chunk(&b"headless"[..]),
            ReplyFragment::ok(id, 1).with_chunk(&b"tail"[..]),
        ]
    });
    let handle = relay
        .directory()
        .get_handle(&ProducerId::new("producer-1"))
        .unwrap();

    let err = relay.fetch(request("tiles", "a.txt")).await.err().unwrap();
    assert!(matches!(err, Error::MalformedReply { .. }));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(handle.dispatcher().buffered_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn stops_at_fragment_without_chunks() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        vec![
            ReplyFragment::ok(id, 0)
                .with_http(200, [("Content-Type", "text/plain")])
                .with_more(true)
                .with_chunk(&b"abc"[..]),
            // Claims more but carries nothing, which ends the stream.
            ReplyFragment::ok(id, 1).with_more(true),
            ReplyFragment::ok(id, 2).with_chunk(&b"never"[..]),
        ]
    });

    let response = relay.fetch(request("tiles", "a.txt")).await.unwrap();
    assert_eq!(response.collect().await.unwrap().as_ref(), b"abc");
}

#[tokio::test(start_paused = true)]
async fn releases_buffers_on_every_exit() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        match req.content.entry.as_str() {
            "err" => vec![ReplyFragment::error(id, 0, "nope")],
            _ => vec![
                ReplyFragment::ok(id, 0)
                    .with_http(200, [("Content-Type", "text/plain")])
                    .with_more(true)
                    .with_chunk(&b"a"[..]),
                ReplyFragment::ok(id, 1).with_chunk(&b"b"[..]),
            ],
        }
    });
    let handle = relay
        .directory()
        .get_handle(&ProducerId::new("producer-1"))
        .unwrap();

    let body = relay
        .fetch(request("tiles", "ok"))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"ab");
    assert_eq!(handle.dispatcher().buffered_requests(), 0);

    assert!(relay.fetch(request("tiles", "err")).await.is_err());
    assert_eq!(handle.dispatcher().buffered_requests(), 0);

    // Client goes away after the headers.
    let response = relay.fetch(request("tiles", "ok")).await.unwrap();
    assert_eq!(handle.dispatcher().buffered_requests(), 1);
    drop(response);
    assert_eq!(handle.dispatcher().buffered_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_channel() {
    let (_dir, relay, producer) = relay_with_producer("tiles").await;
    let _server = serve(producer, |req| {
        let id = req.msg_id;
        let name = req.content.entry.clone();
        vec![
            ReplyFragment::ok(id, 2).with_chunk(format!("{name}-2")),
            ReplyFragment::ok(id, 0)
                .with_http(200, [("Content-Type", "text/plain")])
                .with_more(true)
                .with_chunk(format!("{name}-0|")),
            ReplyFragment::ok(id, 1)
                .with_more(true)
                .with_chunk(format!("{name}-1|")),
        ]
    });

    let fetch = |entry: &'static str| {
        let relay = &relay;
        async move {
            relay
                .fetch(request("tiles", entry))
                .await
                .unwrap()
                .collect()
                .await
                .unwrap()
        }
    };

    let (a, b) = tokio::join!(fetch("a"), fetch("b"));
    assert_eq!(a.as_ref(), b"a-0|a-1|a-2");
    assert_eq!(b.as_ref(), b"b-0|b-1|b-2");
}
