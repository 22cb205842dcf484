// Server loop module
// Explicit bind -> serve -> shutdown lifecycle around the accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::connection::{accept_connection, ConnectionTracker};
use super::listener::create_listener;
use super::signal::ShutdownHandle;
use crate::config::AppState;
use crate::logger;

/// A bound, not yet serving, HTTP server
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
    connections: Arc<ConnectionTracker>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind `addr`. Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<Self> {
        Ok(Self {
            listener: create_listener(addr)?,
            state,
            connections: Arc::new(ConnectionTracker::default()),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops this server; may be used before or during `serve`
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is requested, then drain.
    ///
    /// Returns once every connection has closed or the configured
    /// shutdown timeout has elapsed.
    pub async fn serve(self) {
        let Self {
            listener,
            state,
            connections,
            shutdown,
        } = self;
        let mut stop = shutdown.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => accept_connection(
                            stream,
                            peer_addr,
                            &state,
                            &connections,
                            shutdown.subscribe(),
                        ),
                        Err(e) => logger::log_error(&format!("Failed to accept connection: {e}")),
                    }
                }
                () = stop.wait() => break,
            }
        }

        // Stop accepting before waiting on in-flight connections
        drop(listener);
        logger::log_info(&format!("Draining {} connection(s)", connections.active()));

        let remaining =
            match tokio::time::timeout(state.config.shutdown_timeout(), connections.wait_idle())
                .await
            {
                Ok(()) => 0,
                Err(_) => connections.active(),
            };
        logger::log_shutdown_complete(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::logger::writer;
    use crate::params::{BootDuration, ParamRegistry, ParamSource, ParamValue, ResolveError};
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Resolves after a delay, to keep a request in flight
    struct Slow(Duration);

    #[async_trait]
    impl ParamSource for Slow {
        async fn value(&self) -> Result<ParamValue, ResolveError> {
            tokio::time::sleep(self.0).await;
            Ok(ParamValue::Text("done".to_string()))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::load_from("no-such-dir/no-such-config").unwrap();
        config.logging.access_log = false;
        config
    }

    fn start(config: Config) -> (SocketAddr, ShutdownHandle, tokio::task::JoinHandle<()>) {
        let mut params = ParamRegistry::with_defaults();
        params.register("slow", Slow(Duration::from_millis(300)));
        start_with(config, params)
    }

    fn start_with(
        config: Config,
        params: ParamRegistry,
    ) -> (SocketAddr, ShutdownHandle, tokio::task::JoinHandle<()>) {
        let state = Arc::new(AppState::new(config, params));

        let server = Server::bind("127.0.0.1:0".parse().unwrap(), state).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        (addr, handle, tokio::spawn(server.serve()))
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        raw_request(
            addr,
            &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
        )
        .await
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let (addr, handle, task) = start(test_config());

        let resp = get(addr, "/version").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(resp.ends_with("\r\n\r\n1.0.0\n"));

        let resp = get(addr, "/nope.json").await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(resp.contains("content-type: application/json\r\n"));
        assert!(resp.ends_with("{\"ok\":false,\"error\":\"no such parameter\"}\n"));

        let resp = get(addr, "/").await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_any_method_accepted() {
        let (addr, handle, task) = start(test_config());

        let resp = raw_request(
            addr,
            "DELETE /version.json HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with(
            "{\"ok\":true,\"param\":{\"name\":\"version\",\"value\":\"1.0.0\"}}\n"
        ));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_finishes_in_flight_request() {
        let (addr, handle, task) = start(test_config());

        let in_flight = tokio::spawn(get(addr, "/slow"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();

        let resp = tokio::time::timeout(Duration::from_secs(5), in_flight)
            .await
            .unwrap()
            .unwrap();
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with("done\n"));

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_before_serve() {
        let state = Arc::new(AppState::with_default_params(test_config()));
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), state).unwrap();
        server.shutdown_handle().shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.serve())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_max_connections_rejects() {
        let mut config = test_config();
        config.performance.max_connections = Some(0);
        let (addr, handle, task) = start(config);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = stream
            .write_all(b"GET /version HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await;
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        assert!(!String::from_utf8_lossy(&buf).contains("200 OK"));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_request_outlasts_connection_timeout() {
        let mut config = test_config();
        config.performance.connection_timeout = 1;
        let mut params = ParamRegistry::with_defaults();
        params.register("slow", Slow(Duration::from_millis(1500)));
        let (addr, handle, task) = start_with(config, params);

        let resp = tokio::time::timeout(Duration::from_secs(5), get(addr, "/slow"))
            .await
            .unwrap();
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with("done\n"));

        handle.shutdown();
        task.await.unwrap();
    }

    async fn wait_for_log(path: &Path, needle: &str) {
        for _ in 0..250 {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            if content.contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{needle:?} never appeared in {}", path.display());
    }

    // Only test in this binary that initializes the global log writer
    #[tokio::test]
    async fn test_failures_reach_error_log_only() {
        let dir = std::env::temp_dir().join(format!("sysinfo-errlog-{}", std::process::id()));
        let error_log = dir.join("error.log");
        writer::init(None, error_log.to_str()).unwrap();

        let mut params = ParamRegistry::with_defaults();
        params.register(
            "duration",
            BootDuration::with_command("sysinfo-server-errlog-missing", ["time"]),
        );
        let (addr, handle, task) = start_with(test_config(), params);

        let resp = get(addr, "/duration").await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(resp.ends_with("\r\n\r\ncould not measure boot duration\n"));
        assert!(!resp.contains("errlog-missing"));

        // Client gives up halfway through the request head
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /version HTTP/1.1\r\nHost: loc").await.unwrap();
        drop(stream);

        wait_for_log(&error_log, "[ERROR] could not execute sysinfo-server-errlog-missing").await;
        wait_for_log(&error_log, "[ERROR] Failed to serve connection from 127.0.0.1:").await;

        handle.shutdown();
        task.await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
