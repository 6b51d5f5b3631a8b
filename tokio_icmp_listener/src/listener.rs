use crate::address;
use crate::address::SocketAddress;
use crate::config::ListenerConfig;
use crate::error::{ConfigError, SocketError};
use crate::event::{classify, IcmpEvent, IcmpEventKind};
use crate::hexdump::hex_dump;
use crate::packet;
use crate::socket::{IcmpSocket, RawSocketHandle};
use std::io::{self, Write};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HEX_DUMP_WIDTH: usize = 16;
const TERMINAL_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Bound,
    Listening,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub received: u64,
    pub emitted: u64,
    pub malformed: u64,
    pub ignored: u64,
    /// Events lost because a bounded channel was full.
    pub dropped: u64,
    pub unsupported_family: u64,
}

#[derive(Debug)]
pub enum EventSender {
    Unbounded(mpsc::UnboundedSender<IcmpEvent>),
    Bounded(mpsc::Sender<IcmpEvent>),
}

#[derive(Debug)]
pub enum EventReceiver {
    Unbounded(mpsc::UnboundedReceiver<IcmpEvent>),
    Bounded(mpsc::Receiver<IcmpEvent>),
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<IcmpEvent> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    /// Must not be called from within an async context.
    pub fn blocking_recv(&mut self) -> Option<IcmpEvent> {
        match self {
            Self::Unbounded(rx) => rx.blocking_recv(),
            Self::Bounded(rx) => rx.blocking_recv(),
        }
    }
}

pub fn event_channel(backlog: Option<usize>) -> (EventSender, EventReceiver) {
    match backlog {
        Some(size) => {
            let (tx, rx) = mpsc::channel(size);
            (EventSender::Bounded(tx), EventReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
        }
    }
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

impl EventSender {
    fn send(&self, event: IcmpEvent) -> Delivery {
        match self {
            Self::Unbounded(tx) => match tx.send(event) {
                Ok(_) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            },
            Self::Bounded(tx) => match tx.try_send(event) {
                Ok(_) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }

    /// On a full bounded channel the terminal event waits for the consumer
    /// to make room, until `cancel` fires.
    fn send_terminal(&self, event: IcmpEvent, cancel: &CancellationToken) -> Delivery {
        let tx = match self {
            Self::Unbounded(_) => return self.send(event),
            Self::Bounded(tx) => tx,
        };
        let mut event = event;
        loop {
            match tx.try_send(event) {
                Ok(_) => return Delivery::Sent,
                Err(mpsc::error::TrySendError::Closed(_)) => return Delivery::Closed,
                Err(mpsc::error::TrySendError::Full(e)) => {
                    if cancel.is_cancelled() {
                        return Delivery::Dropped;
                    }
                    event = e;
                    std::thread::sleep(TERMINAL_RETRY_DELAY);
                }
            }
        }
    }
}

/// Receives raw ICMP datagrams and turns them into [`IcmpEvent`]s.
pub struct IcmpListener<S> {
    socket: S,
    config: ListenerConfig,
    dump: Option<Box<dyn Write + Send>>,
    state: ListenerState,
    stats: ListenerStats,
}

impl IcmpListener<RawSocketHandle> {
    pub fn new(config: ListenerConfig) -> Result<Self, ConfigError> {
        Self::with_socket(RawSocketHandle::new(), config)
    }
}

impl<S: IcmpSocket> IcmpListener<S> {
    pub fn with_socket(socket: S, config: ListenerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            socket,
            config,
            dump: None,
            state: ListenerState::Idle,
            stats: ListenerStats::default(),
        })
    }

    /// Every received datagram is hex dumped to `sink` before decoding.
    pub fn with_dump_sink<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.dump = Some(Box::new(sink));
        self
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats
    }

    /// Starts the listener on its own thread.
    pub fn spawn(self) -> io::Result<(ListenerHandle, EventReceiver)>
    where
        S: 'static,
    {
        self.spawn_with_cancel(CancellationToken::new())
    }

    /// Same as [`spawn`](Self::spawn), stopping when `cancel` is cancelled.
    /// The token can be shared with the thread sending the probes.
    pub fn spawn_with_cancel(
        self,
        cancel: CancellationToken,
    ) -> io::Result<(ListenerHandle, EventReceiver)>
    where
        S: 'static,
    {
        let (tx, rx) = event_channel(self.config.backlog);
        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("icmp-listener".to_string())
            .spawn(move || {
                let mut listener = self;
                listener.run(tx, &token)
            })?;
        Ok((
            ListenerHandle {
                cancel,
                thread: Some(thread),
            },
            rx,
        ))
    }

    /// Runs the listener on the current thread until it is cancelled, the
    /// socket fails or the event consumer goes away.
    ///
    /// `Closed` and `Error` are terminal: a listener only runs once.
    pub fn run(&mut self, events: EventSender, cancel: &CancellationToken) -> ListenerStats {
        if self.state != ListenerState::Idle {
            warn!(state = ?self.state, "ICMP listener already ran");
            return self.stats;
        }
        if let Err(e) = self.start() {
            self.fail(&events, cancel, e);
            return self.stats;
        }
        self.state = ListenerState::Listening;
        info!("listening for ICMP datagrams");

        let mut buf = vec![0u8; self.config.buffer_size];
        while !cancel.is_cancelled() {
            match self.socket.wait_readable(self.config.poll_interval) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    self.fail(&events, cancel, e);
                    return self.stats;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let (len, from) = match self.socket.receive(&mut buf) {
                Ok(received) => received,
                Err(e) => {
                    self.fail(&events, cancel, e);
                    return self.stats;
                }
            };
            self.stats.received += 1;
            let data = &buf[..len.min(buf.len())];
            self.dump(data);

            let event = match self.handle_datagram(data, &from) {
                Some(event) => event,
                None => continue,
            };
            if cancel.is_cancelled() {
                break;
            }
            match events.send(event) {
                Delivery::Sent => self.stats.emitted += 1,
                Delivery::Dropped => {
                    self.stats.dropped += 1;
                    warn!(dropped = self.stats.dropped, "event backlog full, dropping event");
                }
                Delivery::Closed => {
                    info!("event consumer went away");
                    break;
                }
            }
        }

        self.socket.close();
        self.state = ListenerState::Closed;
        info!(
            received = self.stats.received,
            emitted = self.stats.emitted,
            "ICMP listener stopped"
        );
        self.stats
    }

    fn start(&mut self) -> Result<(), SocketError> {
        self.socket.open()?;
        self.socket.bind()?;
        self.state = ListenerState::Bound;
        Ok(())
    }

    fn fail(&mut self, events: &EventSender, cancel: &CancellationToken, e: SocketError) {
        error!("ICMP listener failed: {}", e);
        self.state = ListenerState::Error;
        match events.send_terminal(IcmpEvent::terminal(e.into()), cancel) {
            Delivery::Sent => self.stats.emitted += 1,
            Delivery::Dropped => {
                self.stats.dropped += 1;
                warn!("shut down before the error event could be delivered");
            }
            Delivery::Closed => {}
        }
        self.socket.close();
    }

    fn dump(&mut self, data: &[u8]) {
        if let Some(sink) = self.dump.as_mut() {
            let written = hex_dump(data, &mut *sink, HEX_DUMP_WIDTH);
            if let Err(e) = written.and_then(|_| sink.flush()) {
                warn!("failed to write hex dump: {}", e);
            }
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: &SocketAddress) -> Option<IcmpEvent> {
        let (ip, icmp) = match packet::decode(data) {
            Ok(headers) => headers,
            Err(e) => {
                self.stats.malformed += 1;
                debug!(%from, "skipping datagram: {}", e);
                return None;
            }
        };

        let kind = classify(&icmp);
        debug!(
            %from,
            ty = icmp.ty,
            code = icmp.code,
            ttl = ip.time_to_live,
            %kind,
            "ICMP datagram"
        );
        if kind == IcmpEventKind::None && !self.config.report_ignored {
            self.stats.ignored += 1;
            return None;
        }

        let mut event = IcmpEvent {
            kind,
            timestamp: SystemTime::now(),
            local_addr: Some(ip.destination),
            local_port: 0,
            remote_addr: None,
            remote_port: 0,
            icmp_type: Some(icmp.icmp_type()),
            icmp_code: Some(icmp.icmp_code()),
            error: None,
        };
        match address::to_address_and_port(from) {
            Ok((addr, port)) => {
                event.remote_addr = Some(addr);
                event.remote_port = port;
            }
            Err(e) => {
                self.stats.unsupported_family += 1;
                warn!("cannot resolve sender {}: {}", from, e);
                event.error = Some(e.into());
            }
        }
        Some(event)
    }
}

/// Owner side of a spawned listener. Dropping it requests a shutdown
/// without waiting for the thread.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    thread: Option<JoinHandle<ListenerStats>>,
}

impl ListenerHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Requests a shutdown and waits for the listener thread, which exits
    /// within one poll interval.
    pub fn shutdown(mut self) -> ListenerStats {
        self.cancel.cancel();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(stats) => stats,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => ListenerStats::default(),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
