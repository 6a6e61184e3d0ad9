//! Shared utilities for gateway integration tests.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use cgi_gateway::config::GatewayConfig;
use cgi_gateway::http::HttpServer;
use cgi_gateway::lifecycle::Shutdown;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A running gateway serving a throwaway document root.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub site: TempDir,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Build the standard test site: a calculator, an echo script and one page.
pub fn populate_site(dir: &Path) {
    write_script(
        dir,
        "calc.cgi",
        r#"IFS='&'
for pair in $QUERY_STRING; do
  case "$pair" in
    x=*) x=${pair#x=} ;;
    y=*) y=${pair#y=} ;;
  esac
done
printf '%s' $((x + y))"#,
    );
    write_script(dir, "echo.cgi", "cat");
    std::fs::write(dir.join("hello.html"), "<h1>hello</h1>").unwrap();
}

/// Start a gateway on an ephemeral port. `tweak` adjusts the config first.
pub async fn start_gateway(tweak: impl FnOnce(&mut GatewayConfig)) -> TestGateway {
    let site = tempfile::tempdir().unwrap();
    populate_site(site.path());

    let mut config = GatewayConfig::default();
    config.site.root = site.path().to_path_buf();
    config.listener.bind_address = "127.0.0.1:0".into();
    tweak(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let server = HttpServer::new(config);

    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    TestGateway {
        addr,
        site,
        shutdown,
    }
}

/// Client that never pools or proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Send raw bytes and read until the server closes the connection.
#[allow(dead_code)]
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}
