//! Socket loops.
//!
//! One thread receives SDK datagrams and hands them to a pool of workers
//! over a bounded channel. A full channel drops the datagram. Relay updates
//! arrive on their own socket and are answered inline.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use backend::Counter;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, trace, warn};
use wire::limits::{DEFAULT_MAX_PACKET_SIZE, MAX_RELAY_PACKET_SIZE};

use crate::state::{unix_now, State};

pub struct Datagram {
    pub data: Vec<u8>,
    pub from: SocketAddr,
}

/// Reads datagrams until the socket fails.
pub fn receive_loop(
    socket: &UdpSocket,
    queue: &Sender<Datagram>,
    state: &State,
) -> io::Result<()> {
    let mut buf = [0u8; DEFAULT_MAX_PACKET_SIZE];
    trace!("starting sdk receive loop");
    loop {
        let (len, from) = socket.recv_from(&mut buf)?;
        let datagram = Datagram {
            data: buf[..len].to_vec(),
            from,
        };
        match queue.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => state.metrics.increment(Counter::ReceiveQueueFull),
            Err(TrySendError::Disconnected(_)) => {
                warn!("worker pool has shut down");
                return Ok(());
            }
        }
    }
}

/// Starts `count` workers that answer datagrams from `queue` on `socket`.
pub fn spawn_workers(
    count: usize,
    queue: &Receiver<Datagram>,
    socket: &Arc<UdpSocket>,
    state: &Arc<State>,
) -> io::Result<Vec<JoinHandle<()>>> {
    (0..count.max(1))
        .map(|index| {
            let queue = queue.clone();
            let socket = Arc::clone(socket);
            let state = Arc::clone(state);
            thread::Builder::new()
                .name(format!("sdk-worker-{index}"))
                .spawn(move || worker(&queue, &socket, &state))
        })
        .collect()
}

fn worker(queue: &Receiver<Datagram>, socket: &UdpSocket, state: &State) {
    for datagram in queue {
        let Some(response) = state.handle_sdk_datagram(&datagram.data, datagram.from, unix_now())
        else {
            continue;
        };
        if let Err(err) = socket.send_to(&response, datagram.from) {
            debug!(from = %datagram.from, error = %err, "send failed");
        }
    }
}

/// Answers relay updates on `socket` until it fails.
pub fn spawn_relay_loop(socket: UdpSocket, state: Arc<State>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("relay-updates".into())
        .spawn(move || {
            if let Err(err) = relay_loop(&socket, &state) {
                error!(error = %err, "relay socket failed");
            }
        })
}

fn relay_loop(socket: &UdpSocket, state: &State) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_RELAY_PACKET_SIZE];
    trace!("starting relay receive loop");
    loop {
        let (len, from) = socket.recv_from(&mut buf)?;
        if let Some(response) = state.handle_relay_datagram(&buf[..len], unix_now()) {
            if let Err(err) = socket.send_to(&response, from) {
                debug!(%from, error = %err, "relay send failed");
            }
        }
    }
}
