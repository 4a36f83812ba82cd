//! ingestor.rs
//! Receives telemetry datagrams from the bench board and publishes the newest
//! decoded frame into a [`FreshnessBuffer`].
//!
//! - dedicated receive thread, stopped by a cooperative flag plus a forced
//!   socket shutdown so a pending receive does not hold the thread
//! - datagrams of the wrong length are dropped and counted, never raised
//! - any other socket error ends the loop quietly (it is also how `stop` lands)

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use parking_lot::Mutex;
use std::{
    io::ErrorKind,
    net::{Shutdown, SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use log::{debug, info, warn};

use crate::telemetry::{
    frame::{FrameCodec, FrameSchema, TelemetryFrame},
    freshness::FreshnessBuffer,
};

/// Upper bound on how long `stop` can wait for a receive that shutdown did not wake.
const RECV_POLL: Duration = Duration::from_millis(200);
const RECV_BUFFER_BYTES: usize = 256 * 1024;

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    decoded: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub decoded: u64,
    pub dropped: u64,
}

pub struct TelemetryIngestor {
    socket: Arc<UdpSocket>,
    codec: FrameCodec,
    sink: Arc<FreshnessBuffer<TelemetryFrame>>,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryIngestor {
    /// Binds the receive socket. The loop does not run until [`start`](Self::start).
    pub fn bind(
        addr: SocketAddr,
        schema: FrameSchema,
        sink: Arc<FreshnessBuffer<TelemetryFrame>>,
    ) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
            debug!("[Telemetry] could not enlarge receive buffer: {}", e);
        }
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECV_POLL))?;
        info!("[Telemetry] listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            codec: FrameCodec::new(schema),
            sink,
            stop_flag: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            handle: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns the receive loop. Calling it again while running is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut slot = self.handle.lock();
        if slot.is_some() || self.stop_flag.load(Ordering::Acquire) {
            return Ok(());
        }

        let socket = self.socket.clone();
        let codec = self.codec;
        let sink = self.sink.clone();
        let stop_flag = self.stop_flag.clone();
        let counters = self.counters.clone();

        let handle = thread::Builder::new()
            .name("telemetry-rx".into())
            .spawn(move || receive_loop(&socket, codec, &sink, &stop_flag, &counters))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stops the loop and waits for it. Idempotent.
    pub fn stop(&self) {
        if self.stop_flag.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unconnected UDP may answer ENOTCONN here; the read timeout still bounds the exit.
        if let Err(e) = SockRef::from(&*self.socket).shutdown(Shutdown::Both) {
            debug!("[Telemetry] shutdown: {}", e);
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        debug!("[Telemetry] stopped.");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.counters.received.load(Ordering::Relaxed),
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TelemetryIngestor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: &UdpSocket,
    codec: FrameCodec,
    sink: &FreshnessBuffer<TelemetryFrame>,
    stop_flag: &AtomicBool,
    counters: &Counters,
) {
    // One spare byte so an oversized datagram shows up as a length mismatch
    // instead of being truncated into a valid-looking frame.
    let mut buf = vec![0u8; codec.expected_size() + 1];

    while !stop_flag.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _src)) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if !stop_flag.load(Ordering::Acquire) {
                    warn!("[Telemetry] socket error, receive loop exiting: {}", e);
                }
                break;
            }
        };
        counters.received.fetch_add(1, Ordering::Relaxed);

        match codec.decode(&buf[..len]) {
            Ok(frame) => {
                counters.decoded.fetch_add(1, Ordering::Relaxed);
                sink.publish(frame);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("[Telemetry] dropped datagram: {}", e);
            }
        }
    }

    debug!("[Telemetry] receive loop exited.");
}
