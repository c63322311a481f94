//! Ownership of the serial link.
//!
//! A [`Transport`] owns both halves of the byte channel. Writes go through a
//! mutex so that frames from concurrent callers never interleave on the wire.
//! Reads belong to a background thread started by the constructor: it feeds
//! incoming bytes through a [`FrameReceiver`] and drops every validated frame
//! into the [`MailboxSet`]. The thread runs until the transport is dropped or
//! the link fails; a failure is reported once on the channel returned by
//! [`Transport::errors`].

use log::{debug, error, info};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::mailbox::{Mailbox, MailboxSet};
use crate::port::{self, PortConfig};
use crate::protocol::{encode, FrameReceiver, FunctionCode};
use crate::{Error, Result};

const READ_CHUNK: usize = 256;
const PAUSED_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),
    #[error("serial link closed by peer")]
    Closed,
    #[error("cannot start receive thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug)]
struct LinkState {
    running: AtomicBool,
    reception: AtomicBool,
    alive: AtomicBool,
}

pub struct Transport {
    writer: Mutex<Box<dyn Write + Send>>,
    mailboxes: Arc<MailboxSet>,
    state: Arc<LinkState>,
    errors: Mutex<Option<Receiver<TransportError>>>,
    worker: Option<JoinHandle<()>>,
}

impl Transport {
    /// Opens the serial device and starts the receive thread.
    pub fn open(config: &PortConfig) -> Result<Self> {
        let unavailable = |source: anyhow::Error| Error::TransportUnavailable {
            port_name: config.port_name.clone(),
            source,
        };

        let port = port::open_port(config).map_err(unavailable)?;
        let reader = port
            .try_clone()
            .map_err(|e| unavailable(anyhow::Error::new(e)))?;

        info!("serial link up on {}", config.port_name);
        Ok(Self::new(reader, port))
    }

    /// Builds a transport over an arbitrary duplex channel. The reader should
    /// time out periodically, otherwise dropping the transport blocks until
    /// the next byte or end of stream.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let mailboxes = Arc::new(MailboxSet::new());
        let state = Arc::new(LinkState {
            running: AtomicBool::new(true),
            reception: AtomicBool::new(true),
            alive: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::channel();

        let spawned = {
            let mailboxes = mailboxes.clone();
            let state = state.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name("rrc-recv".to_string())
                .spawn(move || receive_loop(reader, &mailboxes, &state, tx))
        };
        let worker = started_or_reported(spawned, &state, &tx);

        Self {
            writer: Mutex::new(Box::new(writer)),
            mailboxes,
            state,
            errors: Mutex::new(Some(rx)),
            worker,
        }
    }

    /// Writes one encoded frame. Concurrent writers are serialized.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("send {:02x?}", bytes);
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn send_frame(&self, function: FunctionCode, payload: &[u8]) -> Result<()> {
        self.write(&encode(function, payload)?)
    }

    pub fn mailbox(&self, function: FunctionCode) -> &Mailbox {
        self.mailboxes.get(function)
    }

    pub fn mailboxes(&self) -> &MailboxSet {
        &self.mailboxes
    }

    /// Hands out the receiver of link failures. Only the first call gets it.
    pub fn errors(&self) -> Option<Receiver<TransportError>> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Pauses or resumes reading from the device. While paused, incoming
    /// bytes stay in the driver buffer.
    pub fn set_reception(&self, enable: bool) {
        debug!("reception {}", if enable { "enabled" } else { "disabled" });
        self.state.reception.store(enable, Ordering::Release);
    }

    pub fn is_receiving(&self) -> bool {
        self.state.alive.load(Ordering::Acquire) && self.state.reception.load(Ordering::Acquire)
    }

    /// Whether the receive thread is still running.
    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("receive thread panicked");
            }
        }
    }
}

// A receive thread that never started is a dead link: report it like any
// other link failure.
fn started_or_reported(
    spawned: io::Result<JoinHandle<()>>,
    state: &LinkState,
    errors: &Sender<TransportError>,
) -> Option<JoinHandle<()>> {
    match spawned {
        Ok(worker) => Some(worker),
        Err(e) => {
            error!("cannot spawn receive thread: {}", e);
            state.alive.store(false, Ordering::Release);
            let _ = errors.send(TransportError::Spawn(e));
            None
        }
    }
}

fn receive_loop<R: Read>(
    mut reader: R,
    mailboxes: &MailboxSet,
    state: &LinkState,
    errors: Sender<TransportError>,
) {
    let mut receiver = FrameReceiver::new();
    let mut buffer = [0u8; READ_CHUNK];

    while state.running.load(Ordering::Acquire) {
        if !state.reception.load(Ordering::Acquire) {
            thread::sleep(PAUSED_POLL);
            continue;
        }

        match reader.read(&mut buffer) {
            Ok(0) => {
                error!("serial link closed");
                let _ = errors.send(TransportError::Closed);
                break;
            }
            Ok(n) => {
                debug!("recv {:02x?}", &buffer[..n]);
                for &byte in &buffer[..n] {
                    if let Some(frame) = receiver.push(byte) {
                        mailboxes.dispatch(frame);
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                error!("serial read failed: {}", e);
                let _ = errors.send(TransportError::Read(e));
                break;
            }
        }
    }

    state.alive.store(false, Ordering::Release);
    debug!("receive thread stopped");
}
