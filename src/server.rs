use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::{Arc, Weak},
    time::Duration,
};

use hyper::{body, server::conn::http1, service::service_fn, Request, Uri};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, select, sync::watch, time::Instant};
use tracing::{debug, error};

use crate::{
    dispatch::Dispatcher, BoxError, Error, MockRequest, MockResponse, Parameters, Route, WriteFn,
};

/// The interface a server binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Host {
    /// `127.0.0.1` only.
    #[default]
    Loopback,
    /// All interfaces, written as `*` or `+`.
    Wildcard(char),
}

impl Host {
    fn ip(self) -> IpAddr {
        match self {
            Host::Loopback => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Host::Wildcard(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localhost" | "127.0.0.1" => Ok(Host::Loopback),
            "*" => Ok(Host::Wildcard('*')),
            "+" => Ok(Host::Wildcard('+')),
            _ => Err(Error::InvalidHost(s.to_string())),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Loopback => f.write_str("localhost"),
            Host::Wildcard(c) => write!(f, "{c}"),
        }
    }
}

/// Where a server listens. A port of 0 asks the OS for an ephemeral port; the
/// assigned port is available from [MockServer::port].
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: Host,
}

/// Builds a [MockServer]. The host string is validated by
/// [start](ServerBuilder::start).
pub struct ServerBuilder {
    port: u16,
    host: String,
    routes: Vec<Route>,
    pre_handler: Option<Arc<WriteFn>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            port: 0,
            host: Host::Loopback.to_string(),
            routes: Vec::new(),
            pre_handler: None,
        }
    }
}

impl ServerBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host: `"localhost"`, `"127.0.0.1"`, or the wildcards `"*"`
    /// and `"+"` to listen on all interfaces.
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Sets a hook run before the handler of every matched route. Unlike
    /// handlers, its errors and panics are not turned into a 500: the
    /// connection is dropped without a response.
    pub fn pre_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MockRequest, &mut MockResponse, &Parameters) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.pre_handler = Some(Arc::new(f));
        self
    }

    pub async fn start(self) -> Result<MockServer, Error> {
        let config = ServerConfig {
            port: self.port,
            host: self.host.parse()?,
        };
        MockServer::start(config, self.routes, self.pre_handler).await
    }
}

/// A mock HTTP server dispatching requests to a table of [Route]s.
///
/// The server can be safely cloned and used from multiple threads. Requests
/// are matched against the routes in registration order and the first match
/// wins; unmatched requests get a 404 with the body
/// `No handler provided for URL: {path}`. When the final reference to the
/// server is dropped, the server is closed.
#[derive(Clone)]
pub struct MockServer {
    close_tx: Arc<watch::Sender<bool>>,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl MockServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Starts a loopback server on `port` (0 for an ephemeral port).
    pub async fn new(port: u16, routes: Vec<Route>) -> Result<Self, Error> {
        Self::builder().port(port).routes(routes).start().await
    }

    /// Starts a loopback server on `port` serving a single route.
    pub async fn single(port: u16, route: Route) -> Result<Self, Error> {
        Self::builder().port(port).route(route).start().await
    }

    pub async fn with_config(config: ServerConfig, routes: Vec<Route>) -> Result<Self, Error> {
        Self::start(config, routes, None).await
    }

    async fn start(
        config: ServerConfig,
        routes: Vec<Route>,
        pre_handler: Option<Arc<WriteFn>>,
    ) -> Result<Self, Error> {
        let addr = SocketAddr::new(config.host.ip(), config.port);
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(Error::BindTCPListener)?;
        let addr = tcp_listener
            .local_addr()
            .map_err(Error::GetTCPListenerAddress)?;
        debug!(%addr, host = %config.host, "mock server listening");

        let (close_tx, close_rx) = watch::channel(false);
        let close_tx = Arc::new(close_tx);
        let dispatcher = Arc::new(Dispatcher::new(routes, pre_handler));

        {
            let dispatcher = dispatcher.clone();
            // Weak so the accept loop does not count as a handle in Drop.
            let close_tx = Arc::downgrade(&close_tx);

            tokio::spawn(async move {
                let mut close_rx = close_rx.clone();

                loop {
                    let (tcp_stream, _) = select! {
                        _ = close_rx.changed() => {
                            debug!(%addr, "mock server closed");
                            return;
                        }
                        res = tcp_listener.accept() => {
                            match res {
                                Ok(res) => res,
                                Err(err) => {
                                    listener_failed(addr, &err, &close_tx);
                                    return;
                                }
                            }
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    let mut close_rx = close_rx.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<body::Incoming>| {
                            dispatcher.clone().dispatch(req)
                        });

                        let conn = http1::Builder::new()
                            .keep_alive(true)
                            .serve_connection(TokioIo::new(tcp_stream), service);
                        tokio::pin!(conn);

                        // On close, let an in-flight request finish but stop
                        // reading new ones.
                        let res = select! {
                            res = conn.as_mut() => res,
                            _ = close_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };

                        if let Err(http_err) = res {
                            debug!(error = %http_err, "error while serving HTTP connection");
                        }
                    });
                }
            });
        };

        Ok(Self {
            close_tx,
            addr,
            dispatcher,
        })
    }

    /// Returns the socket address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the port the server is listening on. Stable for the server's
    /// lifetime, including when the OS picked it.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns a valid request URL for the given path and query string. A
    /// missing leading slash is added.
    pub fn url(&self, path_and_query: &str) -> Uri {
        let path_and_query = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };
        let authority = match self.addr.ip() {
            ip if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), self.port()),
            _ => self.addr,
        };

        Uri::builder()
            .scheme("http")
            .authority(authority.to_string().as_str())
            .path_and_query(path_and_query)
            .build()
            .expect("should be a valid URL")
    }

    /// Returns a snapshot of the registered routes in match order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.dispatcher.routes.snapshot()
    }

    /// Appends a route. It takes effect for the next request matched.
    pub fn add_route(&self, route: Route) {
        self.dispatcher.routes.push(route);
    }

    /// Replaces every route.
    pub fn set_routes(&self, routes: impl IntoIterator<Item = Route>) {
        self.dispatcher.routes.replace(routes.into_iter().collect());
    }

    /// Removes every route; all requests get a 404 until routes are added.
    pub fn clear_routes(&self) {
        self.dispatcher.routes.clear();
    }

    /// Returns the number of requests dispatched, including unmatched ones.
    /// The counter is incremented after the handler has finished, but before
    /// the response has been sent.
    pub fn req_count(&self) -> u64 {
        self.dispatcher.req_count()
    }

    /// Await req_count reaching a certain number. This polls every 10ms and
    /// times out after the given duration.
    pub async fn await_req_count(&self, target_count: u64, timeout: Duration) -> Result<(), Error> {
        let start = Instant::now();
        loop {
            let current_count = self.req_count();
            if current_count == target_count {
                return Ok(());
            }

            if start.elapsed() > timeout {
                return Err(Error::AwaitReqCountTimeout {
                    current_count,
                    target_count,
                    timeout,
                });
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stops accepting connections. In-flight requests are allowed to finish.
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Marks the server closed after the accept loop died, so `is_closed` does
/// not report a server that no longer accepts connections as open.
fn listener_failed(addr: SocketAddr, err: &std::io::Error, close_tx: &Weak<watch::Sender<bool>>) {
    error!(%addr, error = %err, "error while accepting TCP connection");
    if let Some(close_tx) = close_tx.upgrade() {
        close_tx.send_replace(true);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if Arc::strong_count(&self.close_tx) == 1 {
            self.close();
        }
    }
}
