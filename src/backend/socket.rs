use super::{
    policy::{Backoff, Policy},
    Backend, Cancel, Stream,
};
use crate::{
    error::{Error, Result},
    helper::io_error,
    render::{Emission, Renderer},
};
use crossbeam_channel::{self, select, Receiver, Sender, TryRecvError};
use log::{debug, error, warn};
use std::{
    fmt,
    io::{self, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    panic,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

/// Transport used by a [`SocketBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "udp" => Ok(Network::Udp),
            other => Err(Error::config(format!("unsupported network '{}'", other))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// Configuration for a [`SocketBackend`].
#[derive(Clone, Debug)]
pub struct SocketConfig {
    network: Network,
    address: String,
    dial_workers: usize,
    idle_connections: usize,
    dial_timeout: Duration,
    dial_backoff: (Duration, Duration),
    dial_policy: Policy,
    message_workers: usize,
    message_retries: usize,
    message_backoff: (Duration, Duration),
    message_policy: Policy,
    renderer: Renderer,
}

impl SocketConfig {
    /// Creates a configuration for `address` over `network`, which is `"tcp"` or `"udp"`.
    pub fn new(network: &str, address: &str) -> Result<SocketConfig> {
        Ok(SocketConfig {
            network: network.parse()?,
            address: address.to_owned(),
            dial_workers: 1,
            idle_connections: 1,
            dial_timeout: Duration::from_secs(5),
            dial_backoff: (Duration::from_millis(100), Duration::from_secs(10)),
            dial_policy: Policy::Continue,
            message_workers: 1,
            message_retries: 3,
            message_backoff: (Duration::from_millis(10), Duration::from_secs(1)),
            message_policy: Policy::Continue,
            renderer: Renderer::default(),
        })
    }

    /// Sets the number of threads establishing connections.
    ///
    /// Defaults to `1`.
    pub fn dial_workers(mut self, workers: usize) -> Self {
        self.dial_workers = workers;
        self
    }

    /// Sets how many established connections may wait in the pool.
    ///
    /// Defaults to `1`.
    pub fn idle_connections(mut self, idle: usize) -> Self {
        self.idle_connections = idle;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the delay bounds between failed dials.
    pub fn dial_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.dial_backoff = (min, max);
        self
    }

    pub fn dial_policy(mut self, policy: Policy) -> Self {
        self.dial_policy = policy;
        self
    }

    /// Sets the number of threads sending messages.
    ///
    /// Defaults to `1`.
    pub fn message_workers(mut self, workers: usize) -> Self {
        self.message_workers = workers;
        self
    }

    /// Sets how many times a failed send is retried on a fresh connection.
    ///
    /// Defaults to `3`.
    pub fn message_retries(mut self, retries: usize) -> Self {
        self.message_retries = retries;
        self
    }

    /// Sets the delay bounds between send retries.
    pub fn message_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.message_backoff = (min, max);
        self
    }

    pub fn message_policy(mut self, policy: Policy) -> Self {
        self.message_policy = policy;
        self
    }

    pub fn renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn build(self) -> Result<SocketBackend> {
        if self.address.is_empty() {
            return Err(Error::config("socket backend needs an address"));
        }
        if self.dial_workers == 0 {
            return Err(Error::config("socket backend needs at least one dial worker"));
        }
        if self.idle_connections == 0 {
            return Err(Error::config("socket backend needs at least one idle connection"));
        }
        if self.message_workers == 0 {
            return Err(Error::config("socket backend needs at least one message worker"));
        }
        if self.dial_timeout == Duration::ZERO {
            return Err(Error::config("socket dial timeout must be positive"));
        }
        if self.dial_backoff.0 > self.dial_backoff.1 {
            return Err(Error::config("minimum dial retry delay exceeds the maximum"));
        }
        if self.message_backoff.0 > self.message_backoff.1 {
            return Err(Error::config("minimum message retry delay exceeds the maximum"));
        }

        Ok(SocketBackend {
            name: format!("socket:{}://{}", self.network, self.address),
            config: self,
        })
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.write_all(buf),
            Connection::Udp(socket) => socket.send(buf).map(|_| ()),
        }
    }
}

/// Delivers rendered emissions over a pool of TCP or UDP connections.
///
/// Dial workers keep the pool filled and message workers take a connection for each message,
/// returning it once the send succeeds.  A connection that fails a send is discarded and the
/// message retried on another one.  Dial and send failures are handled by their own [`Policy`];
/// once a policy aborts, the backend stops sending but keeps draining its stream.
pub struct SocketBackend {
    name: String,
    config: SocketConfig,
}

/// State shared by the scoped workers of one running backend.
struct Workers<'a> {
    name: &'a str,
    config: &'a SocketConfig,
    cancel: &'a Cancel,
    pool_tx: Sender<Connection>,
    pool_rx: Receiver<Connection>,
    halt: Mutex<Option<Sender<()>>>,
    halted: Receiver<()>,
    // Cleared by a failed dial, set again by a successful one.
    reachable: AtomicBool,
    errors: Mutex<Vec<Error>>,
}

impl<'a> Workers<'a> {
    fn is_halted(&self) -> bool { matches!(self.halted.try_recv(), Err(TryRecvError::Disconnected)) }

    fn fail(&self, policy: Policy, err: Error) {
        if self.is_halted() {
            return;
        }

        match policy {
            Policy::Abort => {
                let halt = self.halt.lock().unwrap_or_else(PoisonError::into_inner).take();
                if halt.is_some() {
                    error!("[{}] aborting: {}", self.name, err);
                    self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(Error::Aborted {
                        backend: self.name.to_owned(),
                        source: Box::new(err),
                    });
                }
            },
            Policy::Continue => warn!("[{}] {}", self.name, err),
            Policy::Collect => {
                warn!("[{}] {}", self.name, err);
                self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
            },
            Policy::Panic => panic!("[{}] {}", self.name, err),
        }
    }

    fn dial(&self) -> io::Result<Connection> {
        let timeout = self.config.dial_timeout;
        let mut last = None;

        for addr in self.config.address.to_socket_addrs()? {
            let attempt = match self.config.network {
                Network::Tcp => TcpStream::connect_timeout(&addr, timeout).and_then(|stream| {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout))?;
                    Ok(Connection::Tcp(stream))
                }),
                Network::Udp => {
                    let local: SocketAddr = if addr.is_ipv4() {
                        (Ipv4Addr::UNSPECIFIED, 0).into()
                    } else {
                        (Ipv6Addr::UNSPECIFIED, 0).into()
                    };
                    UdpSocket::bind(local).and_then(|socket| {
                        socket.connect(addr)?;
                        Ok(Connection::Udp(socket))
                    })
                },
            };

            match attempt {
                Ok(conn) => return Ok(conn),
                Err(e) => last = Some(e),
            }
        }

        Err(last.unwrap_or_else(|| io_error("address resolved to nothing")))
    }

    fn dial_loop(&self, _alive: Sender<()>, finished: &Receiver<()>, draining: &Receiver<()>) {
        let (min, max) = self.config.dial_backoff;
        let mut backoff = Backoff::new(min, max);

        loop {
            match self.dial() {
                Ok(conn) => {
                    self.reachable.store(true, Ordering::Release);
                    backoff.reset();
                    select! {
                        send(self.pool_tx, conn) -> res => {
                            if res.is_err() {
                                return;
                            }
                        },
                        recv(finished) -> _ => return,
                        recv(self.halted) -> _ => return,
                    }
                },
                Err(e) => {
                    self.reachable.store(false, Ordering::Release);
                    self.fail(
                        self.config.dial_policy,
                        Error::Dial {
                            address: self.config.address.clone(),
                            source: e,
                        },
                    );

                    // Without anyone left to feed, give up instead of retrying forever.
                    let closing = self.cancel.is_cancelled()
                        || matches!(draining.try_recv(), Err(TryRecvError::Disconnected));
                    if closing || self.is_halted() {
                        return;
                    }

                    select! {
                        recv(finished) -> _ => return,
                        recv(self.halted) -> _ => return,
                        recv(draining) -> _ => {},
                        recv(self.cancel.receiver()) -> _ => {},
                        default(backoff.next()) => {},
                    }
                },
            }
        }
    }

    /// Takes a pooled connection.
    ///
    /// Waits at most one dial timeout for a connection, and not at all while the last dial
    /// failed or once every dial worker has exited.
    fn checkout(&self, alive: &Receiver<()>) -> Option<Connection> {
        if let Ok(conn) = self.pool_rx.try_recv() {
            return Some(conn);
        }
        if !self.reachable.load(Ordering::Acquire) {
            return None;
        }

        select! {
            recv(self.pool_rx) -> conn => conn.ok(),
            recv(alive) -> _ => self.pool_rx.try_recv().ok(),
            recv(self.halted) -> _ => None,
            default(self.config.dial_timeout) => None,
        }
    }

    fn deliver(&self, buf: &[u8], alive: &Receiver<()>, backoff: &mut Backoff) -> Result<()> {
        backoff.reset();
        let mut attempts = 0;
        let mut last = None;

        while attempts <= self.config.message_retries {
            if attempts > 0 {
                if self.cancel.is_cancelled() {
                    break;
                }
                select! {
                    recv(self.halted) -> _ => break,
                    default(backoff.next()) => {},
                }
            }

            attempts += 1;
            let mut conn = match self.checkout(alive) {
                Some(conn) => conn,
                None if self.is_halted() => break,
                None => {
                    debug!("[{}] no connection for send attempt {}", self.name, attempts);
                    last = Some(io_error("no connection available"));
                    continue;
                },
            };

            match conn.send(buf) {
                Ok(()) => {
                    // A full pool means enough idle connections already; drop this one.
                    let _ = self.pool_tx.try_send(conn);
                    return Ok(());
                },
                Err(e) => {
                    debug!("[{}] send attempt {} failed: {}", self.name, attempts, e);
                    last = Some(e);
                },
            }
        }

        Err(Error::Send {
            attempts,
            source: last.unwrap_or_else(|| io_error("send abandoned")),
        })
    }

    fn message_loop(&self, work: Receiver<Arc<Emission>>, alive: &Receiver<()>) {
        let (min, max) = self.config.message_backoff;
        let mut backoff = Backoff::new(min, max);
        let mut buf = Vec::with_capacity(256);

        for emission in work.iter() {
            if self.is_halted() {
                continue;
            }

            buf.clear();
            let result = emission
                .render(&self.config.renderer, &mut buf)
                .map_err(Error::from)
                .and_then(|_| self.deliver(&buf, alive, &mut backoff));
            if let Err(e) = result {
                self.fail(self.config.message_policy, e);
            }
        }
    }

    fn forward(&self, stream: &Stream, work: &Sender<Arc<Emission>>) {
        loop {
            select! {
                recv(stream.receiver()) -> emission => match emission {
                    Ok(emission) => {
                        if work.send(emission).is_err() {
                            break;
                        }
                    },
                    Err(_) => return,
                },
                recv(self.halted) -> _ => break,
            }
        }

        // Keep consuming so publishers never block on a backend that stopped sending.
        let dropped = stream.iter().count();
        if dropped > 0 {
            debug!("[{}] discarded {} emissions after stopping", self.name, dropped);
        }
    }
}

fn join_all<T>(handles: Vec<thread::ScopedJoinHandle<'_, T>>, panicked: &mut Option<Box<dyn std::any::Any + Send>>) {
    for handle in handles {
        if let Err(payload) = handle.join() {
            panicked.get_or_insert(payload);
        }
    }
}

impl Backend for SocketBackend {
    fn name(&self) -> &str { &self.name }

    fn consume(self: Box<Self>, stream: Stream) -> Result<()> {
        let config = &self.config;
        let (pool_tx, pool_rx) = crossbeam_channel::bounded(config.idle_connections);
        let (halt_tx, halted) = crossbeam_channel::bounded(0);
        let workers = Workers {
            name: &self.name,
            config,
            cancel: stream.cancel(),
            pool_tx,
            pool_rx,
            halt: Mutex::new(Some(halt_tx)),
            halted,
            reachable: AtomicBool::new(true),
            errors: Mutex::new(Vec::new()),
        };

        let panicked = thread::scope(|scope| {
            let workers = &workers;
            let (alive_tx, alive_rx) = crossbeam_channel::bounded::<()>(0);
            let (finished_tx, finished_rx) = crossbeam_channel::bounded::<()>(0);
            let (draining_tx, draining_rx) = crossbeam_channel::bounded::<()>(0);
            let (work_tx, work_rx) = crossbeam_channel::bounded(config.message_workers);

            let dialers: Vec<_> = (0..config.dial_workers)
                .map(|_| {
                    let alive = alive_tx.clone();
                    let finished = finished_rx.clone();
                    let draining = draining_rx.clone();
                    scope.spawn(move || workers.dial_loop(alive, &finished, &draining))
                })
                .collect();
            drop(alive_tx);

            let senders: Vec<_> = (0..config.message_workers)
                .map(|_| {
                    let work = work_rx.clone();
                    let alive = alive_rx.clone();
                    scope.spawn(move || workers.message_loop(work, &alive))
                })
                .collect();
            drop(work_rx);

            workers.forward(&stream, &work_tx);
            drop(work_tx);
            drop(draining_tx);

            let mut panicked = None;
            join_all(senders, &mut panicked);
            drop(finished_tx);
            join_all(dialers, &mut panicked);
            panicked
        });

        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }

        let errors = workers.errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        Error::join(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::{Network, SocketConfig};
    use crate::{
        backend::{
            testing::{emission, stream},
            Backend, Policy,
        },
        collector::Collector,
        data::metric::Metric,
        error::Error,
        render::Renderer,
    };
    use std::{
        io::{BufRead, BufReader},
        net::{TcpListener, UdpSocket},
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    fn run(config: SocketConfig, count: i64) -> Result<(), Error> {
        let backend = Box::new(config.build().unwrap());
        let (tx, stream, _canceller) = stream();
        let handle = thread::spawn(move || backend.consume(stream));
        for i in 0..count {
            tx.send(emission("net.metric", i, 1_000)).unwrap();
        }
        drop(tx);
        handle.join().unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(SocketConfig::new("unix", "/tmp/sock").unwrap_err().is_config());
        assert_eq!("udp".parse::<Network>().unwrap(), Network::Udp);

        let config = SocketConfig::new("tcp", "127.0.0.1:2003").unwrap();
        assert!(config.clone().dial_workers(0).build().is_err());
        assert!(config.clone().idle_connections(0).build().is_err());
        assert!(config.clone().message_workers(0).build().is_err());
        assert!(config.clone().dial_timeout(Duration::ZERO).build().is_err());
        assert!(config
            .clone()
            .dial_backoff(Duration::from_secs(2), Duration::from_secs(1))
            .build()
            .is_err());
        assert!(SocketConfig::new("tcp", "").unwrap().build().is_err());
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_tcp_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        thread::spawn(move || {
            for conn in listener.incoming() {
                let conn = conn.unwrap();
                let sink = sink.clone();
                thread::spawn(move || {
                    for line in BufReader::new(conn).lines() {
                        sink.lock().unwrap().push(line.unwrap());
                    }
                });
            }
        });

        let config = SocketConfig::new("tcp", &addr)
            .unwrap()
            .message_workers(2)
            .idle_connections(2)
            .renderer(Renderer::statsd());
        run(config, 5).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while received.lock().unwrap().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let mut lines = received.lock().unwrap().clone();
        lines.sort();
        let expected: Vec<String> = (0..5).map(|i| format!("net.metric:{}|g", i)).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_udp_delivery() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = socket.local_addr().unwrap().to_string();

        let config = SocketConfig::new("udp", &addr).unwrap().renderer(Renderer::graphite());
        run(config, 2).unwrap();

        let mut buf = [0u8; 512];
        let mut datagrams = Vec::new();
        for _ in 0..2 {
            let n = socket.recv(&mut buf).unwrap();
            datagrams.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        assert_eq!(datagrams, vec!["net.metric 0 1\n", "net.metric 1 1\n"]);
    }

    #[test]
    fn test_abort_dial_policy_stops_and_reports() {
        let config = SocketConfig::new("tcp", &closed_port())
            .unwrap()
            .dial_timeout(Duration::from_secs(1))
            .dial_policy(Policy::Abort);

        match run(config, 10) {
            Err(Error::Aborted { source, .. }) => assert!(matches!(*source, Error::Dial { .. })),
            other => panic!("expected an aborted backend, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_policies_gather_every_failure() {
        let config = SocketConfig::new("tcp", &closed_port())
            .unwrap()
            .dial_timeout(Duration::from_secs(1))
            .dial_backoff(Duration::from_millis(5), Duration::from_millis(20))
            .dial_policy(Policy::Collect)
            .message_retries(0)
            .message_policy(Policy::Collect);

        let errors = match run(config, 2) {
            Err(Error::Aggregate(errors)) => errors,
            other => panic!("expected collected errors, got {:?}", other),
        };

        let dials = errors.iter().filter(|e| matches!(e, Error::Dial { .. })).count();
        let sends = errors.iter().filter(|e| matches!(e, Error::Send { .. })).count();
        assert!(dials >= 1);
        assert_eq!(sends, 2);
    }

    #[test]
    fn test_unreachable_endpoint_does_not_block_publishers() {
        let config = SocketConfig::new("tcp", &closed_port())
            .unwrap()
            .dial_timeout(Duration::from_millis(200))
            .message_retries(1);
        let mut collector = Collector::builder()
            .capacity(2)
            .backend(config.build().unwrap())
            .build()
            .unwrap();

        let started = Instant::now();
        let counter = Metric::counter("x");
        for _ in 0..20 {
            collector.push(counter.inc());
        }
        assert!(started.elapsed() < Duration::from_secs(5), "pushes took {:?}", started.elapsed());

        // Both policies drop, so nothing is reported.
        collector.close().unwrap();
    }

    #[test]
    fn test_abort_message_policy_stops_sending_and_drains() {
        let config = SocketConfig::new("tcp", &closed_port())
            .unwrap()
            .dial_timeout(Duration::from_millis(200))
            .message_retries(0)
            .message_policy(Policy::Abort);
        let mut collector = Collector::builder()
            .capacity(1)
            .backend(config.build().unwrap())
            .build()
            .unwrap();

        let started = Instant::now();
        let counter = Metric::counter("x");
        for _ in 0..50 {
            collector.push(counter.inc());
        }
        assert!(started.elapsed() < Duration::from_secs(5), "pushes took {:?}", started.elapsed());

        match collector.close() {
            Err(Error::Aborted { source, .. }) => assert!(matches!(*source, Error::Send { attempts: 1, .. })),
            other => panic!("expected an aborted backend, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_policy_surfaces_on_close() {
        let addr = closed_port();
        let config = SocketConfig::new("tcp", &addr)
            .unwrap()
            .dial_timeout(Duration::from_millis(200))
            .dial_policy(Policy::Panic);
        let mut collector = Collector::builder()
            .capacity(4)
            .backend(config.build().unwrap())
            .build()
            .unwrap();

        for i in 0..3 {
            collector.push(Metric::gauge("g").set(i));
        }
        match collector.close() {
            Err(Error::BackendPanicked(name)) => assert_eq!(name, format!("socket:tcp://{}", addr)),
            other => panic!("expected a panicked backend, got {:?}", other),
        }
    }

    #[test]
    fn test_retries_exhausted_after_the_peer_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (first_tx, first_rx) = crossbeam_channel::bounded(1);

        // Reads one line, then closes the connection and stops listening.
        thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(conn).read_line(&mut line).unwrap();
            first_tx.send(line).unwrap();
        });

        let config = SocketConfig::new("tcp", &addr)
            .unwrap()
            .dial_backoff(Duration::from_millis(5), Duration::from_millis(20))
            .message_retries(2)
            .message_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .message_policy(Policy::Collect)
            .renderer(Renderer::statsd());
        let backend = Box::new(config.build().unwrap());
        let (tx, stream, _canceller) = stream();
        let handle = thread::spawn(move || backend.consume(stream));

        tx.send(emission("net.metric", 0, 1_000)).unwrap();
        let first = first_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, "net.metric:0|g\n");

        thread::sleep(Duration::from_millis(50));
        for i in 1..20 {
            tx.send(emission("net.metric", i, 1_000)).unwrap();
        }
        drop(tx);

        let errors = match handle.join().unwrap() {
            Err(Error::Aggregate(errors)) => errors,
            Err(e) => vec![e],
            Ok(()) => panic!("every send succeeded after the peer closed"),
        };
        assert!(
            errors.iter().all(|e| matches!(e, Error::Send { attempts: 3, .. })),
            "unexpected errors: {:?}",
            errors
        );
    }
}
