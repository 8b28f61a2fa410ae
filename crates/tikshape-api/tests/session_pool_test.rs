#![allow(clippy::unwrap_used)]
// Integration tests for `SessionPool` against a scripted loopback peer.
//
// The peer reads real framed sentences and answers from a fixed script, so
// these tests pin down the exact words sent on the wire.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use tikshape_api::protocol::{Sentence, SentenceCodec};
use tikshape_api::{
    CachePolicy, Command, DeviceConnection, Error, QueueTreeSpec, Rate, RouterClient, SessionPool,
    TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

type Exchange = (Vec<&'static str>, Vec<Vec<&'static str>>);

/// Serve one connection: for each scripted exchange, assert the received
/// sentence and send the replies. Returns every sentence it received.
async fn scripted_peer(script: Vec<Exchange>) -> (DeviceConnection, JoinHandle<Vec<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, SentenceCodec);
        let mut seen = Vec::new();
        for (expected, replies) in script {
            let Some(Ok(sentence)) = framed.next().await else {
                break;
            };
            assert_eq!(sentence.words(), expected.as_slice());
            seen.push(sentence.into_words());
            for reply in replies {
                framed.send(reply.into_iter().collect::<Sentence>()).await.unwrap();
            }
        }
        seen
    });
    let conn = DeviceConnection::new(
        addr.ip().to_string(),
        "billing",
        SecretString::from("pw".to_owned()),
    )
    .with_port(addr.port());
    (conn, handle)
}

fn login() -> Exchange {
    (
        vec!["/login", "=name=billing", "=password=pw"],
        vec![vec!["!done"]],
    )
}

fn pool(timeout: Duration) -> SessionPool {
    SessionPool::new(TransportConfig::default().with_timeout(timeout))
}

// ── Session establishment ───────────────────────────────────────────

#[tokio::test]
async fn test_login_then_print() {
    let (conn, peer) = scripted_peer(vec![
        login(),
        (
            vec!["/queue/tree/print", "?name=PAKET-10"],
            vec![
                vec!["!re", "=.id=*1", "=name=PAKET-10", "=max-limit=10M"],
                vec!["!done"],
            ],
        ),
    ])
    .await;

    let pool = pool(Duration::from_secs(5));
    let reply = pool
        .execute(
            &conn,
            &Command::print("/queue/tree").query("name", "PAKET-10"),
            CachePolicy::Bypass,
        )
        .await
        .unwrap();
    assert_eq!(reply.len(), 1);
    assert_eq!(reply.first().and_then(|r| r.get("max-limit")), Some("10M"));
    assert_eq!(peer.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_login() {
    let (conn, _peer) = scripted_peer(vec![(
        vec!["/login", "=name=billing", "=password=pw"],
        vec![
            vec!["!trap", "=message=invalid user name or password (6)"],
            vec!["!done"],
        ],
    )])
    .await;

    let err = pool(Duration::from_secs(5))
        .execute(&conn, &Command::print("/queue/tree"), CachePolicy::Bypass)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Authentication { .. }),
        "expected Authentication error, got: {err:?}"
    );
}

#[tokio::test]
async fn test_silent_router_times_out() {
    // Accepts the login but never answers the print. The retry on a fresh
    // session stalls at login because the peer only serves one connection.
    let (conn, _peer) = scripted_peer(vec![
        login(),
        (vec!["/system/identity/print"], vec![]),
    ])
    .await;

    let err = pool(Duration::from_millis(200))
        .execute(
            &conn,
            &Command::print("/system/identity"),
            CachePolicy::Bypass,
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Timeout { .. }),
        "expected Timeout, got: {err:?}"
    );
}

// ── Facade wire format ──────────────────────────────────────────────

#[tokio::test]
async fn test_create_queue_words() {
    let (conn, peer) = scripted_peer(vec![
        login(),
        (
            vec![
                "/queue/tree/add",
                "=name=Budi",
                "=parent=PAKET-10",
                "=packet-mark=192.168.5.2",
                "=max-limit=10M",
                "=limit-at=2M",
                "=comment=Budi download",
            ],
            vec![vec!["!done", "=ret=*2B"]],
        ),
    ])
    .await;

    let client = RouterClient::new(std::sync::Arc::new(pool(Duration::from_secs(5))), conn);
    let mut spec = QueueTreeSpec::new("Budi", "PAKET-10");
    spec.packet_mark = Some("192.168.5.2".into());
    spec.max_limit = Some(Rate::mega(10));
    spec.limit_at = Some(Rate::mega(2));
    spec.comment = Some("Budi download".into());

    assert_eq!(client.create_queue(&spec).await.unwrap(), "*2B");
    peer.await.unwrap();
}

#[tokio::test]
async fn test_invalid_spec_never_reaches_router() {
    let (conn, peer) = scripted_peer(vec![]).await;
    let client = RouterClient::new(std::sync::Arc::new(pool(Duration::from_secs(5))), conn);

    let mut spec = QueueTreeSpec::new("Budi", "PAKET-10");
    spec.priority = Some(0);
    let err = client.create_queue(&spec).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    peer.abort();
}
