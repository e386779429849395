//! End-to-end coverage of the HTTP request loop against the
//! in-memory `FakeDriver`, exercising the framework the way the
//! teacher exercises its own reactor in `tests/tcp_stream.rs`: plain
//! `#[test]` functions, no async test harness.

use std::cell::RefCell;
use std::rc::Rc;

use loomio::testing::FakeDriver;
use loomio::{Dispatcher, LoopCallbacks, Router};

#[test]
fn missing_route_responds_404() {
    let driver = Rc::new(FakeDriver::new());
    let mut dispatcher = Dispatcher::new(driver.clone());
    dispatcher.set_router(Router::new());

    dispatcher.on_data(7, b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n");

    let response = String::from_utf8(driver.written_bytes(7)).unwrap();
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    assert!(response.contains("/nope was not found on this server"));
}

#[test]
fn keep_alive_connection_stays_open_across_requests() {
    let driver = Rc::new(FakeDriver::new());
    let mut dispatcher = Dispatcher::new(driver.clone());
    let mut router = Router::new();
    router
        .register("GET", "/ping", |socket, _q, _h, _b| {
            socket.http_response("200 OK", "Content-type: text/plain\r\n", b"pong");
        })
        .unwrap();
    dispatcher.set_router(router);

    dispatcher.on_data(9, b"GET /ping HTTP/1.1\r\n\r\n");
    assert!(driver.closed_fds().is_empty());

    dispatcher.on_data(9, b"GET /ping HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(driver.closed_fds(), vec![9]);
}

#[test]
fn post_with_content_length_reads_exact_body() {
    let driver = Rc::new(FakeDriver::new());
    let mut dispatcher = Dispatcher::new(driver.clone());

    let seen_body: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
    let seen_body2 = seen_body.clone();

    let mut router = Router::new();
    router
        .register("POST", "/echo", move |_socket, _q, _h, body| {
            *seen_body2.borrow_mut() = Some(body.to_vec());
        })
        .unwrap();
    dispatcher.set_router(router);

    let request = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
    dispatcher.on_data(3, request);

    assert_eq!(seen_body.borrow().as_deref(), Some(&b"hello"[..]));
}

#[test]
fn partial_write_is_buffered_then_drained_on_writable() {
    let driver = Rc::new(FakeDriver::new());
    driver.script_write(4, true, 2); // only 2 of the response's bytes go out immediately

    let mut dispatcher = Dispatcher::new(driver.clone());
    let mut router = Router::new();
    router
        .register("GET", "/big", |socket, _q, _h, _b| {
            socket.http_response("200 OK", "", b"0123456789");
        })
        .unwrap();
    dispatcher.set_router(router);

    dispatcher.on_data(4, b"GET /big HTTP/1.1\r\nConnection: close\r\n\r\n");
    // The remainder should still be queued, not yet reported closed.
    assert!(driver.closed_fds().is_empty());

    dispatcher.on_write(4);
    assert_eq!(driver.closed_fds(), vec![4]);
}

#[test]
fn early_close_before_full_header_drops_connection_silently() {
    let driver = Rc::new(FakeDriver::new());
    let mut dispatcher = Dispatcher::new(driver.clone());
    dispatcher.set_router(Router::new());

    dispatcher.on_data(11, b"GET /partial-heade");
    dispatcher.on_close(11);

    assert!(driver.written_bytes(11).is_empty());
}

#[test]
fn gather_two_promises_resolves_in_input_order() {
    let (r0, p0) = loomio::prepare_promise::<i32>();
    let (r1, p1) = loomio::prepare_promise::<i32>();

    let combined = loomio::gather(vec![p0, p1]);
    let result = Rc::new(RefCell::new(None));
    let result2 = result.clone();
    combined.subscribe(move |values| *result2.borrow_mut() = Some(values));

    r1.resolve(2);
    r0.resolve(1);

    assert_eq!(*result.borrow(), Some(vec![1, 2]));
}
