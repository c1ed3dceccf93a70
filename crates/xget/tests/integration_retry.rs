//! Failure injection: segment resumption, retry exhaustion, probe retries.

mod common;

use common::{test_body, Fault, FixtureServer, ServerConfig, StatusFault};
use futures::StreamExt;
use xget::{Lifecycle, Options, Xget, XgetError, XgetEvent};

async fn collect(fetch: &mut Xget) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(item) = fetch.next().await {
        out.extend_from_slice(&item.expect("fetch errored"));
    }
    out
}

/// A mid-body drop on segment 2 resumes exactly where it failed and the
/// retry event carries the bookkeeping.
#[tokio::test]
async fn segment_fault_resumes_without_corruption() {
    let body = test_body(1024);
    // Segment 2 of [0..255][256..511][512..767][768..1023] dies 100 bytes in.
    let server = FixtureServer::spawn(ServerConfig::ranged(body.clone()).with_fault(Fault {
        match_range: "bytes=512-767".into(),
        after_bytes: 100,
        times: 1,
    }))
    .await;

    let fetch = Xget::new(
        &server.data_url(),
        Options::default().with_chunks(4).with_auto(false),
    )
    .unwrap();
    let mut events = fetch.events();
    fetch.start();

    let mut fetch = fetch;
    let out = collect(&mut fetch).await;
    assert_eq!(out, body, "resumed output must be byte-identical");

    let retry = loop {
        match events.recv().await.unwrap() {
            XgetEvent::Retry(r) => break r,
            XgetEvent::End => panic!("ended without a retry event"),
            _ => {}
        }
    };
    assert_eq!(retry.index, Some(2));
    assert!(!retry.meta);
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.bytes_read, 100);
    assert_eq!(retry.total_bytes, Some(256));

    // The reissued request starts at min + bytes_delivered.
    assert!(
        server.requests().iter().any(|r| r == "bytes=612-767"),
        "expected resumption request, saw {:?}",
        server.requests()
    );
}

/// Multiple faults across different segments still produce identical bytes.
#[tokio::test]
async fn repeated_faults_within_budget_are_invisible() {
    let body = test_body(4096);
    let server = FixtureServer::spawn(
        ServerConfig::ranged(body.clone())
            .with_fault(Fault {
                match_range: "bytes=0-1023".into(),
                after_bytes: 10,
                times: 2,
            })
            .with_fault(Fault {
                match_range: "bytes=3072-4095".into(),
                after_bytes: 1000,
                times: 1,
            }),
    )
    .await;

    let mut fetch = Xget::new(
        &server.data_url(),
        Options::default().with_chunks(4).with_retries(5),
    )
    .unwrap();
    let out = collect(&mut fetch).await;
    assert_eq!(out, body);
}

/// Only faults beyond the retry budget surface, and they name the segment.
#[tokio::test]
async fn exhausted_segment_reports_its_index() {
    let body = test_body(1024);
    let server = FixtureServer::spawn(ServerConfig::ranged(body.clone()).with_fault(Fault {
        match_range: "bytes=256-511".into(),
        after_bytes: 0,
        times: 10,
    }))
    .await;

    let fetch = Xget::new(
        &server.data_url(),
        Options::default().with_chunks(4).with_retries(2),
    )
    .unwrap();
    let mut events = fetch.events();

    let mut fetch = fetch;
    let mut got_chunks = 0usize;
    let err = loop {
        match fetch.next().await {
            Some(Ok(c)) => got_chunks += c.len(),
            Some(Err(e)) => break e,
            None => panic!("stream ended without surfacing the failure"),
        }
    };

    match err {
        XgetError::SegmentExhausted { index, .. } => assert_eq!(index, 1),
        other => panic!("expected SegmentExhausted, got {other}"),
    }
    assert_eq!(fetch.state(), Lifecycle::Errored);
    // Segment 0 may have delivered before the failure; never more than that.
    assert!(got_chunks <= 256);

    let error_event = loop {
        match events.recv().await.unwrap() {
            XgetEvent::Error { error } => break error,
            _ => {}
        }
    };
    assert!(error_event.contains("segment 1"));
}

/// Retry events for the failing segment count up to the cap.
#[tokio::test]
async fn retry_events_count_to_the_cap() {
    let body = test_body(1024);
    let server = FixtureServer::spawn(ServerConfig::ranged(body.clone()).with_fault(Fault {
        match_range: "bytes=0-1023".into(),
        after_bytes: 0,
        times: 3,
    }))
    .await;

    let fetch = Xget::new(
        &server.data_url(),
        Options::default()
            .with_chunks(1)
            .with_retries(3)
            .with_auto(false),
    )
    .unwrap();
    let mut events = fetch.events();
    fetch.start();

    let mut fetch = fetch;
    let out = collect(&mut fetch).await;
    assert_eq!(out, body);

    let mut counts = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            XgetEvent::Retry(r) => counts.push(r.retry_count),
            XgetEvent::End => break,
            _ => {}
        }
    }
    assert_eq!(counts, vec![1, 2, 3]);
}

/// Probe failures are retried with the meta flag; the fetch then succeeds.
#[tokio::test]
async fn probe_retries_are_flagged_meta() {
    let body = test_body(512);
    let server = FixtureServer::spawn(
        ServerConfig::ranged(body.clone()).with_status_fault(StatusFault {
            match_range: "bytes=0-".into(),
            status: 503,
            times: 2,
        }),
    )
    .await;

    let fetch = Xget::new(
        &server.data_url(),
        Options::default().with_chunks(2).with_auto(false),
    )
    .unwrap();
    let mut events = fetch.events();
    fetch.start();

    let mut fetch = fetch;
    let out = collect(&mut fetch).await;
    assert_eq!(out, body);

    let mut meta_retries = 0;
    loop {
        match events.recv().await.unwrap() {
            XgetEvent::Retry(r) => {
                assert!(r.meta);
                assert_eq!(r.index, None);
                meta_retries += 1;
            }
            XgetEvent::Loaded { .. } => break,
            other => panic!("expected retries then Loaded, got {other:?}"),
        }
    }
    assert_eq!(meta_retries, 2);
}

/// 403 is authoritative: no retry, immediate MetaExhausted.
#[tokio::test]
async fn forbidden_probe_fails_without_retrying() {
    let server = FixtureServer::spawn(
        ServerConfig::ranged(test_body(16)).with_status_fault(StatusFault {
            match_range: "bytes=0-".into(),
            status: 403,
            times: 100,
        }),
    )
    .await;

    let fetch = Xget::new(
        &server.data_url(),
        Options::default().with_retries(5).with_auto(false),
    )
    .unwrap();
    let mut events = fetch.events();
    fetch.start();

    let mut fetch = fetch;
    let err = fetch.next().await.unwrap().unwrap_err();
    match err {
        XgetError::MetaExhausted { source } => {
            assert!(matches!(
                source,
                xget::NetError::HttpStatus { status: 403, .. }
            ));
        }
        other => panic!("expected MetaExhausted, got {other}"),
    }
    assert!(fetch.next().await.is_none());

    // One probe request, no retry events.
    assert_eq!(server.requests().len(), 1);
    let event = events.recv().await.unwrap();
    assert!(matches!(event, XgetEvent::Error { .. }));
}

/// Probe retries run out: MetaExhausted with the last transport error.
#[tokio::test]
async fn exhausted_probe_is_meta_exhausted() {
    let body = test_body(64);
    let server = FixtureServer::spawn(
        ServerConfig::ranged(body).with_status_fault(StatusFault {
            match_range: "bytes=0-".into(),
            status: 500,
            times: 100,
        }),
    )
    .await;

    let mut fetch = Xget::new(
        &server.data_url(),
        Options::default().with_retries(1),
    )
    .unwrap();
    let err = fetch.next().await.unwrap().unwrap_err();
    assert!(matches!(err, XgetError::MetaExhausted { .. }));
    // Initial attempt plus one retry.
    assert_eq!(server.requests().len(), 2);
}

/// A status no replay can change exhausts the segment without burning
/// retries.
#[tokio::test]
async fn non_retryable_segment_status_fails_fast() {
    let body = test_body(1024);
    let server = FixtureServer::spawn(
        ServerConfig::ranged(body).with_status_fault(StatusFault {
            match_range: "bytes=256-511".into(),
            status: 404,
            times: 100,
        }),
    )
    .await;

    let mut fetch = Xget::new(
        &server.data_url(),
        Options::default().with_chunks(4).with_retries(5),
    )
    .unwrap();

    let err = loop {
        match fetch.next().await {
            Some(Ok(_)) => {}
            Some(Err(e)) => break e,
            None => panic!("stream ended without surfacing the failure"),
        }
    };
    match err {
        XgetError::SegmentExhausted { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(
                source,
                xget::NetError::HttpStatus { status: 404, .. }
            ));
        }
        other => panic!("expected SegmentExhausted, got {other}"),
    }

    // Exactly one attempt on the doomed range.
    let attempts = server
        .requests()
        .iter()
        .filter(|r| *r == "bytes=256-511")
        .count();
    assert_eq!(attempts, 1);
}

/// A retryable non-2xx on a segment request feeds the same retry path as a
/// transport error.
#[tokio::test]
async fn segment_status_error_is_retried() {
    let body = test_body(1024);
    let server = FixtureServer::spawn(
        ServerConfig::ranged(body.clone()).with_status_fault(StatusFault {
            match_range: "bytes=512-767".into(),
            status: 503,
            times: 1,
        }),
    )
    .await;

    let mut fetch = Xget::new(&server.data_url(), Options::default().with_chunks(4)).unwrap();
    let out = collect(&mut fetch).await;
    assert_eq!(out, body);
}
