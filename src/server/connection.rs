// Connection handling module
// Admission control, per-connection serving and access logging

use http_body_util::Full;
use hyper::body::{Body, Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

use super::signal::ShutdownSignal;
use crate::config::AppState;
use crate::handler;
use crate::logger::{self, AccessLogEntry};

/// Counts live connections and wakes waiters when the count drops to zero
#[derive(Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ConnectionTracker {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Reserve a slot, or `None` when `limit` is already reached
    pub fn try_acquire(self: &Arc<Self>, limit: Option<u64>) -> Option<ConnectionGuard> {
        // Increment first, then check, so concurrent accepts cannot overshoot
        let prev = self.active.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = limit {
            if prev >= usize::try_from(max).unwrap_or(usize::MAX) {
                self.release();
                return None;
            }
        }
        Some(ConnectionGuard(Arc::clone(self)))
    }

    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once no connection is active
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases its connection slot on drop
pub struct ConnectionGuard(Arc<ConnectionTracker>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Admit a freshly accepted connection and serve it on its own task.
pub fn accept_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    tracker: &Arc<ConnectionTracker>,
    shutdown: ShutdownSignal,
) {
    let limit = state.config.performance.max_connections;
    let Some(guard) = tracker.try_acquire(limit) else {
        logger::log_warning(&format!(
            "Max connections reached: {}/{}. Connection from {peer_addr} rejected.",
            tracker.active(),
            limit.unwrap_or_default()
        ));
        drop(stream);
        return;
    };

    tokio::spawn(serve_connection(stream, peer_addr, Arc::clone(state), shutdown, guard));
}

/// Serve HTTP/1.1 on one connection until the client closes it, a request
/// head is not received in time, or shutdown drains it.
///
/// The timeout only covers reading request heads (including the idle wait
/// between keep-alive requests). A request that is already being handled
/// runs to completion.
async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: ShutdownSignal,
    _guard: ConnectionGuard,
) {
    let io = TokioIo::new(stream);

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(state.config.connection_timeout())
        .keep_alive(state.config.performance.keep_alive);

    let service_state = Arc::clone(&state);
    let conn = builder.serve_connection(
        io,
        service_fn(move |req| handle_logged(req, Arc::clone(&service_state), peer_addr)),
    );
    let mut conn = std::pin::pin!(conn);

    let mut draining = false;
    let served = loop {
        tokio::select! {
            res = conn.as_mut() => break res,
            () = shutdown.wait(), if !draining => {
                // Finish the in-flight request, then close
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(err) = served {
        if err.is_timeout() {
            logger::log_warning(&format!(
                "Connection from {peer_addr} sent no request within {} seconds",
                state.config.performance.connection_timeout
            ));
        } else {
            logger::log_connection_error(&peer_addr, &err);
        }
    }
}

/// Run the handler and, when enabled, write one access log line
async fn handle_logged(
    req: Request<Incoming>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if !state.config.logging.access_log {
        return handler::handle_request(req, state).await;
    }

    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let mut entry = AccessLogEntry::from_request(peer_addr, &parts);

    let resp = handler::handle_request(Request::from_parts(parts, body), Arc::clone(&state)).await?;

    entry.status = resp.status().as_u16();
    entry.body_bytes = resp
        .body()
        .size_hint()
        .exact()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or_default();
    entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    logger::log_access(&entry, &state.config.logging.access_log_format);

    Ok(resp)
}
