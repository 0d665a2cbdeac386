//! [`DashboardServer`] – HTTP/1.1 front end for the dashboard.
//!
//! Listens on `0.0.0.0:80` by default (see [`DashboardServer::with_port`]).
//!
//! * `GET /events` → `200 text/event-stream`; the socket's write half is handed
//!   to the [`EventBroadcaster`] and the read half is watched for hang-up.
//! * Any other request → one response from the [`PageRouter`], then close.
//!
//! A background task drives [`EventBroadcaster::tick`] every heartbeat
//! interval for as long as the server runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rtkdash_middleware::EventBroadcaster;
use rtkdash_types::DashError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::router::{PageRouter, Reply};

/// Default TCP port for the dashboard.
pub const DEFAULT_PORT: u16 = 80;

/// Largest accepted request head (request line plus headers).
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// How long a client may take to send its request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_STREAM_HEAD: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Cache-Control: no-cache\r\n\
    Connection: keep-alive\r\n\
    Access-Control-Allow-Origin: *\r\n\
    \r\n";

// ---------------------------------------------------------------------------
// DashboardServer
// ---------------------------------------------------------------------------

/// Serves the dashboard pages and the live event stream.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rtkdash_middleware::EventBroadcaster;
/// use rtkdash_store::{SatelliteTable, TelemetryStore};
/// use rtkdash_types::DeviceProfile;
/// use rtkdash_web::{DashboardServer, PageRouter};
///
/// #[tokio::main]
/// async fn main() {
///     let broadcaster = Arc::new(EventBroadcaster::default());
///     let store = Arc::new(
///         TelemetryStore::new(DeviceProfile::default()).with_sink(broadcaster.clone()),
///     );
///     let router = Arc::new(PageRouter::new(store, Arc::new(SatelliteTable::new())));
///     DashboardServer::new(router, broadcaster)
///         .with_port(8080)
///         .run()
///         .await
///         .expect("dashboard server failed");
/// }
/// ```
pub struct DashboardServer {
    router: Arc<PageRouter>,
    broadcaster: Arc<EventBroadcaster>,
    port: u16,
}

impl DashboardServer {
    pub fn new(router: Arc<PageRouter>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            router,
            broadcaster,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve until the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Transport`] if the listener cannot bind. Nothing
    /// after a successful bind is fatal.
    pub async fn run(self) -> Result<(), DashError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DashError::Transport(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), DashError> {
        let local = listener
            .local_addr()
            .map_err(|e| DashError::Transport(format!("listener address: {e}")))?;
        info!(addr = %local, profile = ?self.router.profile(), "dashboard listening");

        let _heartbeat = AbortOnDrop(spawn_heartbeat(Arc::clone(&self.broadcaster)));

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let router = Arc::clone(&self.router);
                    let broadcaster = Arc::clone(&self.broadcaster);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, router, broadcaster).await {
                            debug!(peer = %peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_heartbeat(broadcaster: Arc<EventBroadcaster>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(broadcaster.config().heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = broadcaster.tick();
            if !report.evicted.is_empty() {
                debug!(live = report.live, evicted = report.evicted.len(), "heartbeat");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// Method and target from a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestLine {
    method: String,
    target: String,
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: Arc<PageRouter>,
    broadcaster: Arc<EventBroadcaster>,
) -> Result<(), DashError> {
    let request = match time::timeout(HEAD_TIMEOUT, read_head(&mut stream)).await {
        Ok(Ok(head)) => parse_request_line(&head),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DashError::BadRequest("request head timed out".into())),
    };

    let outcome = request.and_then(|req| {
        debug!(peer = %peer, method = %req.method, target = %req.target, "request");
        router.handle(&req.method, &req.target)
    });

    match outcome {
        Ok(Reply::EventStream) => stream_events(stream, peer, &broadcaster).await,
        Ok(reply) => write_reply(&mut stream, &reply).await,
        Err(DashError::Transport(reason)) => Err(DashError::Transport(reason)),
        Err(e) => {
            write_error(&mut stream, &e).await?;
            Err(e)
        }
    }
}

/// Read until the blank line ending the request head.
async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String, DashError> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| DashError::Transport(format!("read error: {e}")))?;
        if n == 0 {
            return Err(DashError::Transport("connection closed before request head".into()));
        }
        head.extend_from_slice(&chunk[..n]);

        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            head.truncate(end);
            return String::from_utf8(head)
                .map_err(|_| DashError::BadRequest("request head is not UTF-8".into()));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(DashError::BadRequest(format!(
                "request head exceeds {MAX_HEAD_BYTES} bytes"
            )));
        }
    }
}

fn parse_request_line(head: &str) -> Result<RequestLine, DashError> {
    let line = head.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None)
            if version.starts_with("HTTP/") && target.starts_with('/') =>
        {
            Ok(RequestLine {
                method: method.to_string(),
                target: target.to_string(),
            })
        }
        _ => Err(DashError::BadRequest(format!("malformed request line {line:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn status_for(err: &DashError) -> (u16, &'static str) {
    match err {
        DashError::NotFound(_) => (404, "Not Found"),
        DashError::MethodNotAllowed(_) => (405, "Method Not Allowed"),
        DashError::BadRequest(_) => (400, "Bad Request"),
        _ => (500, "Internal Server Error"),
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(stream: &mut W, reply: &Reply) -> Result<(), DashError> {
    let body = match reply {
        Reply::Html(body) | Reply::Text(body) | Reply::Json(body) => body.as_str(),
        Reply::EventStream => "",
    };
    write_response(stream, (200, "OK"), reply.content_type(), &[], body).await
}

async fn write_error<W: AsyncWrite + Unpin>(stream: &mut W, err: &DashError) -> Result<(), DashError> {
    let status = status_for(err);
    let extra: &[(&str, &str)] = if status.0 == 405 { &[("Allow", "GET")] } else { &[] };
    let body = format!("{} {}\n", status.0, status.1);
    write_response(stream, status, "text/plain; charset=utf-8", extra, &body).await
}

async fn write_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    (code, reason): (u16, &str),
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &str,
) -> Result<(), DashError> {
    let mut head = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n",
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let write = async {
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body.as_bytes()).await?;
        stream.flush().await
    };
    write
        .await
        .map_err(|e| DashError::Transport(format!("HTTP write error: {e}")))
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

async fn stream_events(
    mut stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &EventBroadcaster,
) -> Result<(), DashError> {
    stream
        .write_all(EVENT_STREAM_HEAD.as_bytes())
        .await
        .map_err(|e| DashError::Transport(format!("event stream head: {e}")))?;

    let (mut read_half, write_half) = stream.into_split();
    let client = broadcaster.subscribe(write_half);
    info!(peer = %peer, client = %client.id(), "event stream opened");

    // Browsers send nothing after the request head; EOF or an error means
    // the peer is gone.
    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            _ = client.stopped() => break,
            read = read_half.read(&mut scratch) => match read {
                Ok(0) | Err(_) => {
                    client.close();
                    break;
                }
                Ok(_) => {}
            },
        }
    }

    info!(peer = %peer, client = %client.id(), state = %client.state(), "event stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkdash_middleware::BroadcasterConfig;
    use rtkdash_store::{SatelliteTable, TelemetryStore};
    use rtkdash_types::{ChangeSink, DeviceProfile, Role};

    struct Harness {
        addr: SocketAddr,
        store: Arc<TelemetryStore>,
        broadcaster: Arc<EventBroadcaster>,
        server: JoinHandle<Result<(), DashError>>,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.server.abort();
        }
    }

    async fn start(role: Role) -> Harness {
        let broadcaster = Arc::new(EventBroadcaster::new(BroadcasterConfig {
            write_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(50),
            ..BroadcasterConfig::default()
        }));
        let store = Arc::new(
            TelemetryStore::new(DeviceProfile::new(role, true))
                .with_sink(Arc::clone(&broadcaster) as Arc<dyn ChangeSink>),
        );
        let router = Arc::new(PageRouter::new(Arc::clone(&store), Arc::new(SatelliteTable::new())));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(
            DashboardServer::new(router, Arc::clone(&broadcaster)).serve(listener),
        );
        Harness {
            addr,
            store,
            broadcaster,
            server,
        }
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut response = String::new();
        time::timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
            .await
            .expect("response timed out")
            .unwrap();
        response
    }

    async fn read_until(stream: &mut TcpStream, seen: &mut String, needle: &str) {
        let mut chunk = [0u8; 512];
        while !seen.contains(needle) {
            let n = time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
                .await
                .expect("timed out")
                .unwrap();
            assert!(n > 0, "stream closed before {needle:?}");
            seen.push_str(std::str::from_utf8(&chunk[..n]).unwrap());
        }
    }

    #[test]
    fn default_port_is_80() {
        let store = Arc::new(TelemetryStore::new(DeviceProfile::default()));
        let router = Arc::new(PageRouter::new(store, Arc::new(SatelliteTable::new())));
        let server = DashboardServer::new(router, Arc::new(EventBroadcaster::default()));
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(8080).port(), 8080);
    }

    #[test]
    fn request_line_parsing() {
        assert_eq!(
            parse_request_line("GET /loc?x=1 HTTP/1.1\r\nHost: a").unwrap(),
            RequestLine {
                method: "GET".into(),
                target: "/loc?x=1".into(),
            }
        );
        assert!(parse_request_line("GET /").is_err());
        assert!(parse_request_line("hello world foo bar").is_err());
        assert!(parse_request_line("").is_err());
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client.write_all(&vec![b'a'; MAX_HEAD_BYTES + 10]).await.unwrap();
        assert!(matches!(read_head(&mut server).await, Err(DashError::BadRequest(_))));
    }

    #[tokio::test]
    async fn serves_location_over_tcp() {
        let h = start(Role::Rover).await;
        h.store.set("lattitude", 39.281507);
        h.store.set("longitude", -74.558350);

        let response = exchange(h.addr, b"GET /loc HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain"));
        assert!(response.ends_with("\r\n\r\n39.281507,-74.558350"));
    }

    #[tokio::test]
    async fn error_statuses() {
        let h = start(Role::BaseStation).await;

        let r = exchange(h.addr, b"GET /map HTTP/1.1\r\n\r\n").await;
        assert!(r.starts_with("HTTP/1.1 404 Not Found"), "{r}");

        let r = exchange(h.addr, b"DELETE /rtk HTTP/1.1\r\n\r\n").await;
        assert!(r.starts_with("HTTP/1.1 405 Method Not Allowed"), "{r}");
        assert!(r.contains("Allow: GET\r\n"));

        let r = exchange(h.addr, b"nonsense\r\n\r\n").await;
        assert!(r.starts_with("HTTP/1.1 400 Bad Request"), "{r}");
    }

    #[tokio::test]
    async fn event_stream_delivers_store_writes_and_cleans_up() {
        let h = start(Role::Rover).await;
        h.store.set("rtk_age", 0);

        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        stream.write_all(b"GET /events HTTP/1.1\r\n\r\n").await.unwrap();

        let mut seen = String::new();
        read_until(&mut stream, &mut seen, "retry: 10000\n\n").await;
        assert!(seen.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(seen.contains("Content-Type: text/event-stream\r\n"));
        assert!(seen.contains("Cache-Control: no-cache\r\n"));
        assert!(!seen.contains("event: rtk_age"), "no backlog expected");

        for age in 1..=5 {
            h.store.set("rtk_age", age);
        }
        read_until(&mut stream, &mut seen, "data: 5\n\n").await;
        let ages: Vec<_> = seen
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(ages, ["1", "2", "3", "4", "5"]);
        assert_eq!(h.broadcaster.client_count(), 1);

        drop(stream);
        let deadline = time::Instant::now() + Duration::from_secs(2);
        while h.broadcaster.client_count() > 0 {
            assert!(time::Instant::now() < deadline, "client was never evicted");
            time::sleep(Duration::from_millis(20)).await;
        }
    }
}
