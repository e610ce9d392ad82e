use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::accumulator::Accumulator;
use crate::listener::{self, Announcement, Listener, ListenerFactory, StopFuture};

use super::aggregator::Aggregator;
use super::parser::parse_line;

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

enum State {
    Idle,
    Running {
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// A statsd server on one UDP port.
pub struct StatsdListener {
    address: SocketAddr,
    aggregator: Arc<Mutex<Aggregator>>,
    state: Mutex<State>,
}

impl StatsdListener {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            aggregator: Arc::default(),
            state: Mutex::new(State::Idle),
        }
    }
}

impl Listener for StatsdListener {
    fn start(&self) -> listener::Result<Announcement> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Idle => {}
            State::Running { .. } => return Err(listener::Error::AlreadyStarted),
            State::Stopped => return Err(listener::Error::Stopped),
        }

        let (announce_tx, announce_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(
            self.address,
            Arc::clone(&self.aggregator),
            announce_tx,
            shutdown_rx,
        ));
        *state = State::Running {
            shutdown: shutdown_tx,
            task,
        };

        Ok(announce_rx)
    }

    fn collect(&self, acc: &dyn Accumulator) -> listener::Result<()> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|err| listener::Error::Collect(err.to_string()))?
            .as_secs();
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush(acc, timestamp);

        Ok(())
    }

    fn stop(&self) -> StopFuture<'_> {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Stopped,
        );
        Box::pin(async move {
            if let State::Running { shutdown, task } = previous {
                // the task may already have exited after a failed bind
                let _ = shutdown.send(());
                if let Err(err) = task.await {
                    log::error!("statsd server on {} panicked: {}", self.address, err);
                }
            }
        })
    }
}

async fn serve(
    address: SocketAddr,
    aggregator: Arc<Mutex<Aggregator>>,
    announce: oneshot::Sender<io::Result<SocketAddr>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let socket = match UdpSocket::bind(address).await {
        Ok(socket) => socket,
        Err(err) => {
            log::error!("statsd server could not bind {}: {}", address, err);
            let _ = announce.send(Err(err));
            return;
        }
    };
    let local_addr = match socket.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            let _ = announce.send(Err(err));
            return;
        }
    };
    log::info!("statsd server listening on {}", local_addr);
    let _ = announce.send(Ok(local_addr));

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _)) => handle_packet(&buf[..n], &aggregator),
                Err(err) => log::warn!("statsd server on {} failed to receive: {}", local_addr, err),
            },
        }
    }
    log::info!("statsd server on {} stopped", local_addr);
}

fn handle_packet(packet: &[u8], aggregator: &Mutex<Aggregator>) {
    let packet = String::from_utf8_lossy(packet);
    let mut aggregator = aggregator.lock().unwrap_or_else(PoisonError::into_inner);
    for line in packet.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_line(line) {
            Ok(samples) => samples.into_iter().for_each(|s| aggregator.ingest(s)),
            Err(err) => log::debug!("dropping statsd line: {}", err),
        }
    }
}

/// Creates [`StatsdListener`]s bound to a fixed interface.
#[derive(Debug, Clone, Copy)]
pub struct StatsdListenerFactory {
    bind_ip: IpAddr,
}

impl StatsdListenerFactory {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }
}

impl Default for StatsdListenerFactory {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl ListenerFactory for StatsdListenerFactory {
    fn create(&self, port: u16) -> Box<dyn Listener> {
        Box::new(StatsdListener::new(SocketAddr::new(self.bind_ip, port)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::accumulator::BufferedAccumulator;

    async fn started() -> (StatsdListener, SocketAddr) {
        let listener = StatsdListener::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));
        let addr = listener.start().unwrap().await.unwrap().unwrap();
        (listener, addr)
    }

    async fn collect_until(listener: &StatsdListener, n: usize) -> BufferedAccumulator {
        let acc = BufferedAccumulator::default();
        for _ in 0..100 {
            listener.collect(&acc).unwrap();
            if acc.len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        acc
    }

    #[tokio::test]
    async fn test_receives_and_collects() {
        let (listener, addr) = started().await;
        assert_ne!(addr.port(), 0);

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        client
            .send_to(b"hits:1|c\nhits:2|c\ntemp:3|g|#env:test\nbroken", addr)
            .await
            .unwrap();

        let acc = collect_until(&listener, 2).await;
        let mut metrics = acc.drain();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "hits");
        assert_eq!(metrics[0].fields["value"], 3.0);
        assert_eq!(metrics[1].name, "temp");
        assert_eq!(metrics[1].tags["env"], "test");

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let (listener, addr) = started().await;
        listener.stop().await;

        let rebound = std::net::UdpSocket::bind(addr);
        assert!(rebound.is_ok(), "port {} still bound after stop", addr.port());
        // stopping twice is harmless
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_error_is_announced() {
        let occupied = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = occupied.local_addr().unwrap();

        let listener = StatsdListener::new(addr);
        let announced = listener.start().unwrap().await.unwrap();
        assert!(announced.is_err());
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (listener, _) = started().await;
        assert!(matches!(listener.start(), Err(listener::Error::AlreadyStarted)));
        listener.stop().await;
        assert!(matches!(listener.start(), Err(listener::Error::Stopped)));
    }

    #[tokio::test]
    async fn test_factory_binds_requested_port() {
        let factory = StatsdListenerFactory::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let listener = factory.create(0);
        let addr = listener.start().unwrap().await.unwrap().unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        listener.stop().await;
    }
}
