//! Lifecycle tests for the worker coordinator.
//!
//! These start real listeners on loopback ports; the handler and monitoring
//! collaborators are replaced with instrumented doubles.

use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use worker_net::http::{ListenerRole, PortWindow};
use worker_net::{
    Handler, HandlerError, Monitor, MonitorError, StandbyHandler, Worker, WorkerConfig,
    WorkerError,
};

const HOST: &str = "127.0.0.1";

fn free_port() -> u16 {
    let ephemeral = TcpListener::bind((HOST, 0)).unwrap();
    ephemeral.local_addr().unwrap().port()
}

fn config(extra: &str, port: u16) -> WorkerConfig {
    config_with_pair(
        extra,
        port,
        Path::new("/nonexistent/worker/chain.pem"),
        Path::new("/nonexistent/worker/key.pem"),
    )
}

fn config_with_pair(extra: &str, port: u16, chain: &Path, key: &Path) -> WorkerConfig {
    WorkerConfig::parse(&format!(
        r#"
        {extra}
        [server]
        host = "{HOST}"
        port = {port}
        https_port = {https_port}
        https_chain = "{chain}"
        https_key = "{key}"

        [monitoring]
        enabled = false
        "#,
        https_port = free_port(),
        chain = chain.display(),
        key = key.display(),
    ))
    .unwrap()
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

/// Handler whose `prepare` blocks until the gate is opened.
struct GatedHandler {
    gate: watch::Sender<bool>,
    closed: AtomicBool,
}

impl GatedHandler {
    fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate,
            closed: AtomicBool::new(false),
        }
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl Handler for GatedHandler {
    async fn prepare(&self) -> Result<(), HandlerError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        Ok(())
    }

    async fn run(&self) {}

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FailingHandler {
    closed: AtomicBool,
}

#[async_trait]
impl Handler for FailingHandler {
    async fn prepare(&self) -> Result<(), HandlerError> {
        Err(HandlerError::Prepare("emulator core missing".to_string()))
    }

    async fn run(&self) {}

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Monitor counting calls; `run` blocks until `shutdown`.
struct RecordingMonitor {
    runs: AtomicUsize,
    shutdowns: AtomicUsize,
    stopped: watch::Sender<bool>,
    fail_shutdown: bool,
}

impl RecordingMonitor {
    fn new(fail_shutdown: bool) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            runs: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            stopped,
            fail_shutdown,
        }
    }

    async fn wait_running(&self) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.runs.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("monitor started");
    }
}

#[async_trait]
impl Monitor for RecordingMonitor {
    async fn run(&self) -> Result<(), MonitorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), MonitorError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stopped.send_replace(true);
        if self.fail_shutdown {
            return Err(MonitorError::ShutdownTimeout(deadline));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_opens_only_after_prepare() {
    let port = free_port();
    let handler = Arc::new(GatedHandler::new());
    let monitor = Arc::new(RecordingMonitor::new(false));
    let worker = Arc::new(
        Worker::new(config("", port), handler.clone()).with_monitor(monitor.clone()),
    );

    let run = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    // Monitoring starts while the handler is still preparing
    monitor.wait_running().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!run.is_finished());
    assert!(worker.listener(ListenerRole::Http).is_none());
    assert!(TcpStream::connect((HOST, port)).await.is_err());

    handler.open();
    run.await.unwrap().unwrap();

    let addr = worker
        .listening(ListenerRole::Http)
        .await
        .expect("http listener bound");
    assert!(PortWindow::new(port).contains(addr.port()));

    let response = get(addr, "/echo").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("access-control-allow-origin: *"), "{response}");

    // Plain mode has no HTTPS listener
    assert!(worker.listener(ListenerRole::Https).is_none());
}

#[tokio::test]
async fn test_prepare_failure_opens_no_listener() {
    let handler = Arc::new(FailingHandler {
        closed: AtomicBool::new(false),
    });
    let worker = Worker::new(config("", free_port()), handler.clone())
        .with_monitor(Arc::new(RecordingMonitor::new(false)));

    let err = worker.run().await.unwrap_err();
    assert!(matches!(err, WorkerError::Handler(HandlerError::Prepare(_))));
    assert!(worker.listener(ListenerRole::Http).is_none());
    assert!(handler.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_stops_monitoring() {
    let monitor = Arc::new(RecordingMonitor::new(false));
    let worker = Worker::new(config("", free_port()), Arc::new(StandbyHandler::new()))
        .with_monitor(monitor.clone());

    worker.run().await.unwrap();
    monitor.wait_running().await;
    assert!(worker.listening(ListenerRole::Http).await.is_some());

    worker.shutdown(Duration::from_secs(1)).await;
    assert_eq!(monitor.shutdowns.load(Ordering::SeqCst), 1);

    // The HTTP listener and the handler are outside the current shutdown scope;
    // their state after shutdown is deliberately not asserted here.
}

#[tokio::test]
async fn test_monitoring_shutdown_failure_is_not_escalated() {
    let monitor = Arc::new(RecordingMonitor::new(true));
    let worker = Worker::new(config("", free_port()), Arc::new(StandbyHandler::new()))
        .with_monitor(monitor.clone());

    worker.run().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), worker.shutdown(Duration::from_millis(50)))
        .await
        .expect("shutdown returns despite monitor failure");
    assert_eq!(monitor.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tls_mode_redirects_http_even_without_https() {
    let port = free_port();
    let config = config(r#"environment = "production""#, port);
    let https_port = config.server.https_port;
    let worker = Worker::new(config, Arc::new(StandbyHandler::new()))
        .with_monitor(Arc::new(RecordingMonitor::new(false)));

    worker.run().await.unwrap();

    // The static pair does not exist: HTTPS gives up, HTTP still redirects
    assert_eq!(worker.listening(ListenerRole::Https).await, None);

    let addr = worker
        .listening(ListenerRole::Http)
        .await
        .expect("redirect listener bound");
    let response = get(addr, "/p?q=1").await;
    assert!(response.starts_with("HTTP/1.1 302"), "{response}");
    assert!(
        response.contains(&format!("location: https://localhost:{https_port}/p?q=1")),
        "{response}"
    );
}

#[tokio::test]
async fn test_tls_mode_serves_https_with_static_pair() {
    let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();

    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let chain = dir.path().join("chain.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&chain, cert.pem()).unwrap();
    std::fs::write(&key, signing_key.serialize_pem()).unwrap();

    let port = free_port();
    let config = config_with_pair(r#"environment = "production""#, port, &chain, &key);
    let https_port = config.server.https_port;
    let worker = Worker::new(config, Arc::new(StandbyHandler::new()))
        .with_monitor(Arc::new(RecordingMonitor::new(false)));

    worker.run().await.unwrap();

    let https = worker
        .listening(ListenerRole::Https)
        .await
        .expect("https listener bound");
    assert!(PortWindow::new(https_port).contains(https.port()));
    let http = worker
        .listening(ListenerRole::Http)
        .await
        .expect("redirect listener bound");
    assert!(PortWindow::new(port).contains(http.port()));

    // Echo over TLS, trusting only the generated certificate
    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let tcp = TcpStream::connect(https).await.unwrap();
    let mut tls = TlsConnector::from(Arc::new(client))
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    tls.write_all(b"GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    while !response.ends_with(b"echo") {
        let n = tls.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before the body");
        response.extend_from_slice(&buf[..n]);
    }
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    // HTTP points at the HTTPS port
    let redirect = get(http, "/").await;
    assert!(redirect.starts_with("HTTP/1.1 302"), "{redirect}");
}

#[tokio::test]
async fn test_worker_tasks_are_tracked() {
    let worker = Worker::new(config("", free_port()), Arc::new(StandbyHandler::new()))
        .with_monitor(Arc::new(RecordingMonitor::new(false)));

    worker.run().await.unwrap();
    assert!(worker.listening(ListenerRole::Http).await.is_some());
    // monitoring, handler, http listener
    assert_eq!(worker.active_tasks(), 3);
}
