//! End-to-end gateway tests over real sockets.
#![cfg(unix)]

use std::time::{Duration, Instant};

use axum::http::StatusCode;

mod common;

#[tokio::test]
async fn calculator_adds_query_parameters() {
    let gateway = common::start_gateway(|_| {}).await;

    let res = common::client()
        .get(gateway.url("/calc.cgi?x=2&y=3"))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "5");
}

#[tokio::test]
async fn post_body_is_echoed() {
    let gateway = common::start_gateway(|_| {}).await;

    let res = common::client()
        .post(gateway.url("/echo.cgi"))
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn large_body_streams_both_ways() {
    let gateway = common::start_gateway(|_| {}).await;
    // Larger than a pipe buffer in both directions.
    let payload: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();

    let res = common::client()
        .post(gateway.url("/echo.cgi"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test]
async fn missing_script_is_server_error() {
    let gateway = common::start_gateway(|_| {}).await;

    let res = common::client()
        .get(gateway.url("/missing.cgi"))
        .send()
        .await
        .unwrap();

    assert!(res.status().is_server_error());
    let body: serde_json::Value = serde_json::from_slice(&res.bytes().await.unwrap()).unwrap();
    assert_eq!(body["error"], "spawn_failed");
}

#[tokio::test]
async fn traversal_never_leaves_root() {
    let gateway = common::start_gateway(|_| {}).await;

    let response = common::raw_request(
        gateway.addr,
        "GET /../../etc/passwd HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 403"), "got: {}", response);
    assert!(!response.contains("root:"));
}

#[tokio::test]
async fn post_to_static_file_is_not_found() {
    let gateway = common::start_gateway(|_| {}).await;

    let res = common::client()
        .post(gateway.url("/hello.html"))
        .body("ignored")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "Not found.");
}

#[tokio::test]
async fn static_files_are_served() {
    let gateway = common::start_gateway(|_| {}).await;
    let client = common::client();

    let res = client.get(gateway.url("/hello.html")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/html");
    assert_eq!(res.text().await.unwrap(), "<h1>hello</h1>");

    let res = client.get(gateway.url("/nope.html")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn script_sees_cgi_environment() {
    let gateway = common::start_gateway(|_| {}).await;
    common::write_script(
        gateway.site.path(),
        "env.cgi",
        r#"printf '%s|%s|%s|%s|%s|%s' "$GATEWAY_INTERFACE" "$REQUEST_METHOD" "$SCRIPT_NAME" "$QUERY_STRING" "$SERVER_PROTOCOL" "$HTTP_X_CUSTOM""#,
    );

    let res = common::client()
        .get(gateway.url("/env.cgi?a=1"))
        .header("X-Custom", "yes")
        .send()
        .await
        .unwrap();

    assert_eq!(
        res.text().await.unwrap(),
        "CGI/1.1|GET|/env.cgi|a=1|HTTP/1.1|yes"
    );
}

#[tokio::test]
async fn basic_credentials_reach_script() {
    let gateway = common::start_gateway(|_| {}).await;
    common::write_script(
        gateway.site.path(),
        "who.cgi",
        r#"printf '%s:%s' "$AUTH_TYPE" "$REMOTE_USER""#,
    );

    let res = common::client()
        .get(gateway.url("/who.cgi"))
        .header("Authorization", "Basic YWxpY2U6c2VjcmV0")
        .send()
        .await
        .unwrap();

    assert_eq!(res.text().await.unwrap(), "Basic:alice");
}

#[tokio::test]
async fn hung_script_is_killed_at_deadline() {
    let gateway = common::start_gateway(|config| config.cgi.timeout_secs = 1).await;
    common::write_script(gateway.site.path(), "hang.cgi", "printf start\nexec sleep 30");

    let start = Instant::now();
    let res = common::client()
        .get(gateway.url("/hang.cgi"))
        .send()
        .await
        .unwrap();

    // Status was committed before the deadline; the body is cut short.
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.is_err());
    assert!(start.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn client_disconnect_kills_script() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let gateway = common::start_gateway(|_| {}).await;
    common::write_script(
        gateway.site.path(),
        "ticker.cgi",
        "echo $$ > ticker.pid\nwhile true; do echo tick; sleep 0.1; done",
    );

    let mut stream = tokio::net::TcpStream::connect(gateway.addr).await.unwrap();
    stream
        .write_all(b"GET /ticker.cgi HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    while !String::from_utf8_lossy(&seen).contains("tick") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed early");
        seen.extend_from_slice(&buf[..n]);
    }
    drop(stream);

    let pid = std::fs::read_to_string(gateway.site.path().join("ticker.pid")).unwrap();
    let pid = pid.trim().to_string();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid])
            .status()
            .unwrap()
            .success();
        if !alive {
            break;
        }
        assert!(Instant::now() < deadline, "script {} still running", pid);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn head_runs_script_to_completion() {
    let gateway = common::start_gateway(|_| {}).await;
    common::write_script(
        gateway.site.path(),
        "side.cgi",
        "sleep 0.5\necho done > side.out\nprintf ok",
    );

    let res = common::client()
        .head(gateway.url("/side.cgi"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.unwrap().is_empty());

    let marker = gateway.site.path().join("side.out");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "script was cut short");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(std::fs::read_to_string(marker).unwrap(), "done\n");
}

#[tokio::test]
async fn request_id_is_propagated() {
    let gateway = common::start_gateway(|_| {}).await;
    let client = common::client();

    let res = client
        .get(gateway.url("/calc.cgi?x=1&y=1"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me");

    let res = client.get(gateway.url("/hello.html")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn concurrent_requests_get_their_own_process() {
    let gateway = common::start_gateway(|_| {}).await;
    let client = common::client();

    let requests = (0..16).map(|i| {
        let client = client.clone();
        let url = gateway.url(&format!("/calc.cgi?x={}&y=100", i));
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    });
    let bodies = futures_util::future::join_all(requests).await;

    for (i, body) in bodies.iter().enumerate() {
        assert_eq!(body, &(i + 100).to_string());
    }
}
