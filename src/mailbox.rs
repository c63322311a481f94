use log::trace;
use num_traits::FromPrimitive;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::protocol::{Frame, FunctionCode};

/// Single-slot cell holding the freshest unread payload for one function
/// code. A new payload replaces an unread one.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Vec<u8>>>,
    ready: Condvar,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        // The slot is a plain value, a panicking holder cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `payload`, returning the unread value it replaced.
    pub fn put(&self, payload: Vec<u8>) -> Option<Vec<u8>> {
        let replaced = self.lock().replace(payload);
        self.ready.notify_all();
        replaced
    }

    pub fn take(&self) -> Option<Vec<u8>> {
        self.lock().take()
    }

    /// Discards any unread value.
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// A `timeout` too large to express as an [`Instant`] waits forever.
    pub fn wait(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.wait_until(Instant::now().checked_add(timeout))
    }

    /// Blocks until a value arrives or `deadline` passes, taking the value.
    /// `None` waits without a deadline.
    pub fn wait_until(&self, deadline: impl Into<Option<Instant>>) -> Option<Vec<u8>> {
        let deadline = deadline.into();
        let mut slot = self.lock();
        loop {
            if let Some(payload) = slot.take() {
                return Some(payload);
            }

            slot = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.ready
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// One mailbox per known function code.
#[derive(Debug)]
pub struct MailboxSet {
    boxes: [Mailbox; FunctionCode::COUNT],
}

impl Default for MailboxSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxSet {
    pub fn new() -> Self {
        Self {
            boxes: std::array::from_fn(|_| Mailbox::default()),
        }
    }

    pub fn get(&self, code: FunctionCode) -> &Mailbox {
        &self.boxes[code as usize]
    }

    /// Routes a frame's payload to its mailbox. Frames with unknown function
    /// codes are dropped; returns whether the frame was delivered.
    pub fn dispatch(&self, frame: Frame) -> bool {
        match FunctionCode::from_u8(frame.function) {
            Some(code) => {
                if self.get(code).put(frame.payload).is_some() {
                    trace!("{} mailbox overwritten", code);
                }
                true
            }
            None => {
                trace!("ignoring frame with unknown function {}", frame.function);
                false
            }
        }
    }
}
