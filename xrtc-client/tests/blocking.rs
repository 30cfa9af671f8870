mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use xrtc_client::blocking::Session;
use xrtc_client::{ErrorKind, GetRequest, Item, Mode, Portal};

use common::*;

#[test]
fn blocking_login_set_and_probe() -> Result<()> {
    init_tracing();
    let base = spawn_server(|idx, request, stream| match idx {
        0 => write_login(stream),
        1 => {
            assert_eq!(request.path, "/v1/item/set");
            write_json(stream, 200, "{}");
        }
        _ => write_json(
            stream,
            200,
            r#"{"items":[{"portalid":"p","payload":"a","servertimestamp":1},{"portalid":"p","payload":"b","servertimestamp":2}]}"#,
        ),
    });

    let session = Session::open(&credentials(), config(&base))?;
    assert_eq!(session.login_time(), 1_700_000_000_000);
    session.set_items([Item::new("p", "a"), Item::new("p", "b")])?;

    let payloads = session
        .get(&GetRequest::new([Portal::new("p")]))?
        .map(|item| item.map(|item| item.payload))
        .collect::<xrtc_client::Result<Vec<_>>>()?;
    assert_eq!(payloads, ["a", "b"]);
    Ok(())
}

#[test]
fn blocking_login_failure() -> Result<()> {
    let base = spawn_server(|_, _, stream| {
        write_json(stream, 401, r#"{"error":{"errormessage":"bad key"}}"#)
    });

    let err = Session::open(&credentials(), config(&base)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("bad key"));
    Ok(())
}

#[test]
fn close_from_another_thread_ends_iteration() -> Result<()> {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let done_rx = Mutex::new(done_rx);
    let base = spawn_server(move |idx, _, stream| match idx {
        0 => write_login(stream),
        _ => {
            start_chunked(stream);
            write_chunk(stream, &item_line("p", "only", 1)).unwrap();
            let _ = done_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
    });

    let session = Arc::new(Session::open(&credentials(), config(&base))?);
    let closer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            session.close();
        })
    };

    let request = GetRequest::new([Portal::new("p")]).mode(Mode::Stream);
    let items: Vec<_> = session.get(&request)?.collect();
    closer.join().expect("closer thread");
    let _ = done_tx.send(());

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().map(|item| item.payload.as_str()).ok(), Some("only"));
    assert!(session.is_closed());
    let err = session.set_items([Item::new("p", "x")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    Ok(())
}
