mod common;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use xrtc_client::{ErrorKind, GetRequest, Item, Mode, Portal, Schedule, Session};

use common::*;

#[tokio::test]
async fn login_rejection_reports_server_message() -> Result<()> {
    init_tracing();
    let base = spawn_server(|_, request, stream| {
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/v1/auth/login");
        assert_eq!(
            request.json(),
            serde_json::json!({"accountid": "acc", "apikey": "key"})
        );
        write_json(
            stream,
            401,
            r#"{"error":{"errorgroup":1,"errorcode":4,"errormessage":"bad key"}}"#,
        );
    });

    let err = Session::open(&credentials(), config(&base)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.message().contains("bad key"));
    assert_eq!(err.url(), Some(format!("{}/v1/auth/login", base).as_str()));
    Ok(())
}

#[tokio::test]
async fn login_with_unexpected_status_reports_code() -> Result<()> {
    let base = spawn_server(|_, _, stream| write_json(stream, 503, ""));

    let err = Session::open(&credentials(), config(&base)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.message(), "Login failed. Code: 503");
    Ok(())
}

#[tokio::test]
async fn probe_yields_the_single_item() -> Result<()> {
    init_tracing();
    let base = spawn_server(|idx, request, stream| match idx {
        0 => write_login(stream),
        _ => {
            assert_eq!(request.path, "/v1/item/get");
            assert_eq!(request.json(), serde_json::json!({"portals": [{"portalid": "p"}]}));
            write_json(
                stream,
                200,
                r#"{"items":[{"portalid":"p","payload":"x","servertimestamp":5}]}"#,
            );
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    assert_eq!(session.login_time(), 1_700_000_000_000);

    let items: Vec<_> = session
        .get(&GetRequest::new([Portal::new("p")]))
        .await?
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    let item = items.into_iter().next().unwrap()?;
    assert_eq!(item.portal_id, "p");
    assert_eq!(item.payload, "x");
    assert_eq!(item.server_timestamp, 5);
    Ok(())
}

#[tokio::test]
async fn probe_with_no_items_yields_nothing() -> Result<()> {
    let base = spawn_server(|idx, _, stream| match idx {
        0 => write_login(stream),
        _ => write_json(stream, 200, r#"{}"#),
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let mut items = session.get(&GetRequest::new([Portal::new("p")])).await?;
    assert!(items.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn empty_response_is_a_protocol_violation() -> Result<()> {
    let base = spawn_server(|idx, _, stream| match idx {
        0 => write_login(stream),
        _ => write_json(stream, 200, ""),
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let mut items = session.get(&GetRequest::new([Portal::new("p")])).await?;
    let err = items.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "Get item failed. Empty response.");
    assert!(items.next().await.is_none());
    assert!(!session.is_closed());
    Ok(())
}

#[tokio::test]
async fn stream_delivers_items_as_chunks_arrive() -> Result<()> {
    init_tracing();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let base = spawn_server(move |idx, request, stream| match idx {
        0 => write_login(stream),
        _ => {
            assert_eq!(
                request.json(),
                serde_json::json!({
                    "portals": [{"portalid": "p", "servertimestamp": 10}],
                    "mode": "stream",
                    "schedule": "FIFO",
                    "cutoff": 5000
                })
            );
            start_chunked(stream);
            write_chunk(stream, &item_line("p", "one", 11)).unwrap();
            write_chunk(stream, &item_line("p", "two", 12)).unwrap();
            let released = release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            if released.is_ok() {
                let _ = write_chunk(stream, &item_line("p", "three", 13));
                let _ = end_chunked(stream);
            }
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let request = GetRequest::new([Portal::new("p").since(10)])
        .mode(Mode::Stream)
        .schedule(Schedule::Fifo)
        .cutoff(5000);
    let mut items = session.get(&request).await?;
    assert_eq!(session.available_permits(), 1);

    let first = tokio::time::timeout(Duration::from_secs(2), items.next()).await?;
    assert_eq!(first.unwrap()?.payload, "one");
    let second = tokio::time::timeout(Duration::from_secs(2), items.next()).await?;
    assert_eq!(second.unwrap()?.payload, "two");

    release_tx.send(())?;
    let third = tokio::time::timeout(Duration::from_secs(2), items.next()).await?;
    assert_eq!(third.unwrap()?.payload, "three");
    assert!(items.next().await.is_none());
    assert_eq!(session.available_permits(), 2);
    Ok(())
}

#[tokio::test]
async fn watch_reads_the_whole_body_as_one_batch() -> Result<()> {
    let base = spawn_server(|idx, request, stream| match idx {
        0 => write_login(stream),
        _ => {
            assert_eq!(
                request.json(),
                serde_json::json!({"portals": [{"portalid": "p"}], "mode": "watch"})
            );
            start_chunked(stream);
            write_chunk(stream, "{\"items\":[\n{\"portalid\":\"p\",\"payload\":\"a\"},\n").unwrap();
            thread::sleep(Duration::from_millis(50));
            write_chunk(stream, "{\"portalid\":\"p\",\"payload\":\"b\"}]}\n").unwrap();
            end_chunked(stream).unwrap();
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let request = GetRequest::new([Portal::new("p")]).mode(Mode::Watch);
    let items = session.get(&request).await?;
    assert_eq!(session.available_permits(), 2);

    let payloads = items
        .map(|item| item.map(|item| item.payload))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<xrtc_client::Result<Vec<_>>>()?;
    assert_eq!(payloads, ["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn stream_outlives_total_timeout() -> Result<()> {
    let base = spawn_server(|idx, _, stream| match idx {
        0 => write_login(stream),
        _ => {
            start_chunked(stream);
            for (n, payload) in ["one", "two", "three"].into_iter().enumerate() {
                thread::sleep(Duration::from_millis(250));
                if write_chunk(stream, &item_line("p", payload, n as i64)).is_err() {
                    return;
                }
            }
            let _ = end_chunked(stream);
        }
    });

    let mut config = config(&base);
    config.timeouts.total = Some(Duration::from_millis(300));
    config.timeouts.read = Duration::from_secs(2);
    let session = Session::open(&credentials(), config).await?;

    let request = GetRequest::new([Portal::new("p")]).mode(Mode::Stream);
    let payloads = session
        .get(&request)
        .await?
        .map(|item| item.map(|item| item.payload))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<xrtc_client::Result<Vec<_>>>()?;
    assert_eq!(payloads, ["one", "two", "three"]);
    assert!(!session.is_closed());
    Ok(())
}

#[tokio::test]
async fn set_posts_one_batch() -> Result<()> {
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&requests);
    let base = spawn_server(move |idx, request, stream| {
        seen.fetch_add(1, Ordering::SeqCst);
        match idx {
            0 => write_login(stream),
            _ => {
                assert_eq!(request.path, "/v1/item/set");
                assert_eq!(
                    request.json(),
                    serde_json::json!({"items": [
                        {"portalid": "a", "payload": "1"},
                        {"portalid": "b", "payload": "2"}
                    ]})
                );
                write_json(stream, 200, "{}");
            }
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    session
        .set_items([Item::new("a", "1"), Item::new("b", "2")])
        .await?;
    assert_eq!(requests.load(Ordering::SeqCst), 2);

    let oversized = Item::new("a", "x".repeat(xrtc_client::MAX_SERIALIZED_JSON_SIZE));
    let err = session.set_items([oversized]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.message(),
        "Set item failed. Serialized json request size exceeds API limit"
    );
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn application_errors_keep_session_open() -> Result<()> {
    let base = spawn_server(|idx, _, stream| match idx {
        0 => write_login(stream),
        1 => write_json(stream, 400, r#"{"error":{"errormessage":"payload too old"}}"#),
        2 => write_json(stream, 500, "internal"),
        _ => write_json(stream, 200, "{}"),
    });

    let session = Session::open(&credentials(), config(&base)).await?;

    let err = session.set_items([Item::new("p", "x")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
    assert_eq!(err.message(), "Set item failed. payload too old");
    assert!(!err.is_session_fatal());

    let err = session.set_items([Item::new("p", "x")]).await.unwrap_err();
    assert_eq!(err.message(), "Set item failed. Code: 500");

    session.set_items([Item::new("p", "x")]).await?;
    assert!(!session.is_closed());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let base = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let err = Session::open(&credentials(), config(&base)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.message().starts_with("Login failed."));
    assert!(err.is_session_fatal());
    Ok(())
}

#[tokio::test]
async fn dropped_connection_closes_session() -> Result<()> {
    let base = spawn_server(|idx, _, stream| {
        if idx == 0 {
            write_login(stream);
        } else {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let err = session.set_items([Item::new("p", "x")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(session.is_closed());

    let err = session
        .get(&GetRequest::new([Portal::new("p")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    Ok(())
}

#[tokio::test]
async fn close_terminates_active_stream() -> Result<()> {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let done_rx = Mutex::new(done_rx);
    let base = spawn_server(move |idx, _, stream| match idx {
        0 => write_login(stream),
        _ => {
            start_chunked(stream);
            write_chunk(stream, &item_line("p", "first", 1)).unwrap();
            let _ = done_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
    });

    let session = Session::open(&credentials(), config(&base)).await?;
    let request = GetRequest::new([Portal::new("p")]).mode(Mode::Stream);
    let mut items = session.get(&request).await?;
    assert_eq!(items.next().await.unwrap()?.payload, "first");

    let pending = tokio::spawn(async move { items.next().await.is_none() });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close();

    let ended = tokio::time::timeout(Duration::from_secs(2), pending).await??;
    assert!(ended);
    assert!(session.is_closed());
    let _ = done_tx.send(());
    Ok(())
}
