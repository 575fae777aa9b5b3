//! Control client against an in-process fake kernel speaking raw HTTP/1.1.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use boxpilot_control::{
    ControlClient, ControlError, LogLevel, Readiness, Session, TrafficSample,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// Fake kernel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Request {
    method: String,
    target: String,
    headers: String,
    body: String,
}

enum Reply {
    Json(u16, &'static str),
    /// Body written chunk by chunk, then the connection closes.
    Chunks(Vec<&'static str>),
    /// Same line repeated until the client hangs up.
    Endless(&'static str),
}

type Log = Arc<Mutex<Vec<Request>>>;

async fn fake_kernel<H>(handler: H) -> (String, Log)
where
    H: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let log: Log = Arc::default();
    let handler = Arc::new(handler);
    let seen = log.clone();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let (socket, request) = match read_request(socket).await {
                    Some(parts) => parts,
                    None => return,
                };
                let reply = handler(&request);
                seen.lock().expect("log").push(request);
                respond(socket, reply).await;
            });
        }
    });

    (addr, log)
}

async fn read_request(mut socket: TcpStream) -> Option<(TcpStream, Request)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = head.to_ascii_lowercase();
    let length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    Some((
        socket,
        Request {
            method,
            target,
            headers,
            body,
        },
    ))
}

async fn respond(mut socket: TcpStream, reply: Reply) {
    match reply {
        Reply::Json(status, body) => {
            let head = format!(
                "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
        }
        Reply::Chunks(chunks) => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            for chunk in chunks {
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Reply::Endless(line) => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            loop {
                if socket.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    let _ = socket.shutdown().await;
}

fn closed_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

// ---------------------------------------------------------------------------
// 1. Unary calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn version_reports_kernel_version() {
    let (addr, _) = fake_kernel(|req| match req.target.as_str() {
        "/version" => Reply::Json(200, r#"{"version":"sing-box 1.9.3","meta":true}"#),
        _ => Reply::Json(404, r#"{"message":"Resource not found"}"#),
    })
    .await;

    let client = ControlClient::new(&addr, None).expect("client");
    assert_eq!(client.version().await.expect("version"), "sing-box 1.9.3");
}

#[tokio::test]
async fn secret_is_sent_as_bearer_token() {
    let (addr, log) = fake_kernel(|req| {
        if req.headers.contains("authorization: bearer hunter2") {
            Reply::Json(200, r#"{"version":"1.9.3"}"#)
        } else {
            Reply::Json(401, r#"{"message":"Unauthorized"}"#)
        }
    })
    .await;

    let client = ControlClient::new(&addr, Some("hunter2".into())).expect("client");
    assert_eq!(client.version().await.expect("version"), "1.9.3");

    let anonymous = ControlClient::new(&addr, None).expect("client");
    match anonymous.version().await {
        Err(ControlError::Rejected { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert_eq!(log.lock().expect("log").len(), 2);
}

#[tokio::test]
async fn closed_controller_is_reported_as_not_running() {
    let client = ControlClient::new(&closed_addr(), None).expect("client");
    let err = client.version().await.unwrap_err();
    assert!(err.is_unreachable(), "got: {err:?}");
    assert!(err.to_string().contains("kernel is not running"));
}

#[tokio::test]
async fn proxies_lists_groups_with_selection() {
    let (addr, _) = fake_kernel(|_| {
        Reply::Json(
            200,
            r#"{"proxies":{
                "select":{"type":"Selector","name":"select","now":"hk","all":["auto","hk","jp"]},
                "auto":{"type":"URLTest","name":"auto","now":"jp","all":["hk","jp"]},
                "hk":{"type":"Shadowsocks","name":"hk","history":[{"time":"t","delay":120}]}
            }}"#,
        )
    })
    .await;

    let listing = ControlClient::new(&addr, None)
        .expect("client")
        .proxies()
        .await
        .expect("proxies");

    let groups: Vec<(&str, Option<&str>)> = listing
        .groups()
        .map(|(name, entry)| (name, entry.now.as_deref()))
        .collect();
    assert_eq!(groups, vec![("auto", Some("jp")), ("select", Some("hk"))]);
    assert_eq!(listing.get("hk").and_then(|e| e.last_delay()), Some(120));
}

// ---------------------------------------------------------------------------
// 2. Proxy selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn switch_proxy_puts_member_name() {
    let (addr, log) = fake_kernel(|_| Reply::Json(204, "")).await;

    ControlClient::new(&addr, None)
        .expect("client")
        .switch_proxy("select", "hk")
        .await
        .expect("switch");

    let requests = log.lock().expect("log");
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].target, "/proxies/select");
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).expect("json body");
    assert_eq!(body, serde_json::json!({"name": "hk"}));
}

#[tokio::test]
async fn switch_in_missing_group_carries_kernel_message() {
    let (addr, _) = fake_kernel(|_| Reply::Json(404, r#"{"message":"Resource not found"}"#)).await;

    let err = ControlClient::new(&addr, None)
        .expect("client")
        .switch_proxy("nope", "hk")
        .await
        .unwrap_err();
    match err {
        ControlError::UnknownGroup { group, message } => {
            assert_eq!(group, "nope");
            assert_eq!(message, "Resource not found");
        }
        other => panic!("expected UnknownGroup, got {other:?}"),
    }
}

#[tokio::test]
async fn switch_to_missing_member_is_rejected() {
    let (addr, _) =
        fake_kernel(|_| Reply::Json(400, r#"{"message":"Selector update error: not found"}"#)).await;

    let err = ControlClient::new(&addr, None)
        .expect("client")
        .switch_proxy("select", "mars")
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ControlError::UnknownMember { name, message, .. }
            if name == "mars" && message == "Selector update error: not found"),
        "got: {err:?}"
    );
}

// ---------------------------------------------------------------------------
// 3. Streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn traffic_samples_survive_chunk_boundaries() {
    let (addr, _) = fake_kernel(|_| {
        Reply::Chunks(vec![r#"{"up":1,"do"#, "wn\":2}\n{\"up\":3,", "\"down\":4}\n"])
    })
    .await;

    let mut stream = ControlClient::new(&addr, None)
        .expect("client")
        .traffic()
        .await
        .expect("stream");

    let first = stream.next().await.expect("first").expect("decoded");
    let second = stream.next().await.expect("second").expect("decoded");
    assert_eq!(first, TrafficSample { up: 1, down: 2 });
    assert_eq!(second, TrafficSample { up: 3, down: 4 });
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn malformed_line_is_reported_and_stream_continues() {
    let (addr, _) = fake_kernel(|_| Reply::Chunks(vec!["garbage\n", "{\"inuse\":10,\"oslimit\":0}\n"])).await;

    let mut stream = ControlClient::new(&addr, None)
        .expect("client")
        .memory()
        .await
        .expect("stream");

    assert!(matches!(stream.next().await, Some(Err(ControlError::Decode(_)))));
    let sample = stream.next().await.expect("sample").expect("decoded");
    assert_eq!(sample.inuse, 10);
}

#[tokio::test]
async fn log_stream_requests_minimum_level() {
    let (addr, log) =
        fake_kernel(|_| Reply::Chunks(vec!["{\"type\":\"warning\",\"payload\":\"dial tcp: timeout\"}\n"])).await;

    let mut stream = ControlClient::new(&addr, None)
        .expect("client")
        .logs(LogLevel::Warning)
        .await
        .expect("stream");
    let event = stream.next().await.expect("event").expect("decoded");

    assert_eq!(event.level, "warning");
    assert_eq!(event.payload, "dial tcp: timeout");
    assert_eq!(log.lock().expect("log")[0].target, "/logs?level=warning");
}

// ---------------------------------------------------------------------------
// 4. Session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn readiness_gives_up_when_kernel_never_listens() {
    let client = ControlClient::new(&closed_addr(), None).expect("client");
    let readiness = Readiness {
        attempts: 3,
        interval: Duration::from_millis(10),
    };
    assert!(!readiness.wait(&client).await);
}

#[tokio::test]
async fn session_fans_out_traffic_and_closes_on_drop() {
    let (addr, _) = fake_kernel(|req| match req.target.split('?').next() {
        Some("/version") => Reply::Json(200, r#"{"version":"1.9.3"}"#),
        Some("/traffic") => Reply::Endless("{\"up\":7,\"down\":9}\n"),
        Some("/memory") => Reply::Endless("{\"inuse\":1,\"oslimit\":0}\n"),
        _ => Reply::Endless("{\"type\":\"info\",\"payload\":\"tick\"}\n"),
    })
    .await;

    let client = ControlClient::new(&addr, None).expect("client");
    let readiness = Readiness {
        attempts: 20,
        interval: Duration::from_millis(20),
    };
    let session = Session::open(client, readiness, LogLevel::Info);
    let telemetry = session.telemetry();
    let mut traffic = telemetry.subscribe_traffic();
    let mut also_traffic = telemetry.subscribe_traffic();

    let sample = tokio::time::timeout(Duration::from_secs(5), traffic.recv())
        .await
        .expect("sample in time")
        .expect("sample");
    assert_eq!(sample, TrafficSample { up: 7, down: 9 });
    let mirrored = tokio::time::timeout(Duration::from_secs(5), also_traffic.recv())
        .await
        .expect("sample in time")
        .expect("sample");
    assert_eq!(mirrored, sample);

    drop(session);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match traffic.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "channel stayed open after session drop");
}
