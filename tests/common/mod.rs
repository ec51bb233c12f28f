//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use request_guard::audit::{AuditLog, MemoryAuditSink};
use request_guard::config::{DatabaseConfig, GuardConfig};
use request_guard::lifecycle::{build_state, Shutdown};
use request_guard::{AppState, GuardServer};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse battery";

pub const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("x-content-type-options", "nosniff"),
    ("content-security-policy", "default-src 'self'"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
];

/// A configured guard with its scratch directory and captured audit trail.
pub struct Fixture {
    pub dir: TempDir,
    pub config: GuardConfig,
    pub state: AppState,
    pub audit: Arc<MemoryAuditSink>,
}

impl Fixture {
    pub fn includes(&self) -> PathBuf {
        self.config.include.dir.clone()
    }

    pub fn uploads(&self) -> PathBuf {
        self.config.upload.upload_dir.clone()
    }

    pub fn audit_contains(&self, needle: &str) -> bool {
        self.audit.messages().iter().any(|m| m.contains(needle))
    }
}

/// Build state over a scratch directory, with one seeded user.
pub fn fixture_with(customize: impl FnOnce(&mut GuardConfig)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let includes = dir.path().join("includes");
    std::fs::create_dir_all(&includes).unwrap();
    std::fs::write(includes.join("header.php"), "<header>Site & Co</header>").unwrap();
    std::fs::write(includes.join("footer.php"), "<footer>bye</footer>").unwrap();
    std::fs::write(includes.join("config.php"), "debug=false").unwrap();

    let mut config = GuardConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.include.dir = includes;
    config.upload.upload_dir = dir.path().join("uploads");
    config.upload.staging_dir = Some(dir.path().join("staging"));
    config.audit.path = dir.path().join("security.log");
    config.database = DatabaseConfig {
        path: dir.path().join("guard.db").to_string_lossy().into_owned(),
    };
    customize(&mut config);

    let (audit, sink) = AuditLog::in_memory();
    let state = build_state(&config, audit).unwrap();
    state
        .db
        .with_conn(|conn| state.auth.create_user(conn, USERNAME, PASSWORD))
        .unwrap();

    Fixture {
        dir,
        config,
        state,
        audit: sink,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

/// A guard server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub fixture: Fixture,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_server_with(customize: impl FnOnce(&mut GuardConfig)) -> TestServer {
    let fixture = fixture_with(customize);
    let server = GuardServer::new(&fixture.config, fixture.state.clone()).unwrap();
    let listener = TcpListener::bind(&fixture.config.listener.bind_address)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestServer {
        addr,
        fixture,
        shutdown,
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// The `name=value` pair of the session cookie a response sets, if any.
pub fn session_cookie(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("guard_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn assert_security_headers(headers: &reqwest::header::HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        assert_eq!(
            headers.get(name).and_then(|v| v.to_str().ok()),
            Some(value),
            "header {}",
            name
        );
    }
}

/// Minimal valid PNG signature followed by some payload.
pub fn png_bytes() -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
    data.extend(std::iter::repeat(0u8).take(64));
    data
}
