//! Request/response on top of the mailboxes.
//!
//! The wire protocol carries no request identifier: a reply is recognised
//! only by its function code. The controller therefore holds one lock per
//! function code for the whole of a [`CommandController::call`], drains the
//! mailbox before sending and then waits for the next payload. A reply that
//! arrives after its caller gave up stays in the mailbox and is drained by
//! the next call on that code.

use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::protocol::{encode, FunctionCode};
use crate::transport::Transport;
use crate::Result;

/// How long a call waits for its reply: `attempts` x `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(10),
        }
    }
}

impl CallPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Saturates at [`Duration::MAX`].
    pub fn deadline(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }
}

pub struct CommandController {
    transport: Arc<Transport>,
    policy: CallPolicy,
    call_locks: [Mutex<()>; FunctionCode::COUNT],
}

impl CommandController {
    pub fn new(transport: Arc<Transport>, policy: CallPolicy) -> Self {
        Self {
            transport,
            policy,
            call_locks: Default::default(),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    /// Sends a command that has no reply.
    pub fn send(&self, function: FunctionCode, payload: &[u8]) -> Result<()> {
        self.transport.send_frame(function, payload)
    }

    /// Sends a request and waits for the reply on the same function code.
    /// `Ok(None)` means the deadline passed without a reply.
    pub fn call(&self, function: FunctionCode, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        self.exchange(function, payload, self.policy, |_| true)
    }

    pub fn call_with_policy(
        &self,
        function: FunctionCode,
        payload: &[u8],
        policy: CallPolicy,
    ) -> Result<Option<Vec<u8>>> {
        self.exchange(function, payload, policy, |_| true)
    }

    /// Like [`call`](Self::call), but keeps waiting past replies rejected by
    /// `accept` until the deadline.
    pub fn call_matching<F>(
        &self,
        function: FunctionCode,
        payload: &[u8],
        accept: F,
    ) -> Result<Option<Vec<u8>>>
    where
        F: Fn(&[u8]) -> bool,
    {
        self.exchange(function, payload, self.policy, accept)
    }

    /// Takes the freshest unsolicited report for `function`, if any.
    pub fn latest(&self, function: FunctionCode) -> Option<Vec<u8>> {
        self.transport.mailbox(function).take()
    }

    /// Waits for the next unsolicited report for `function`.
    pub fn wait_report(&self, function: FunctionCode, timeout: Duration) -> Option<Vec<u8>> {
        self.transport.mailbox(function).wait(timeout)
    }

    fn exchange<F>(
        &self,
        function: FunctionCode,
        payload: &[u8],
        policy: CallPolicy,
        accept: F,
    ) -> Result<Option<Vec<u8>>>
    where
        F: Fn(&[u8]) -> bool,
    {
        let request = encode(function, payload)?;

        let _guard = self.call_locks[function as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mailbox = self.transport.mailbox(function);
        mailbox.clear();
        self.transport.write(&request)?;

        let deadline = Instant::now().checked_add(policy.deadline());
        while let Some(reply) = mailbox.wait_until(deadline) {
            if accept(&reply) {
                return Ok(Some(reply));
            }
            debug!("{}: discarding unmatched reply {:02x?}", function, reply);
        }

        debug!("{}: no reply within {:?}", function, policy.deadline());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, FrameReceiver, ProtocolError};
    use crate::Error;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    /// Runs `respond` as board firmware on the far end of a socket pair.
    fn fake_board<F>(mut respond: F) -> Arc<Transport>
    where
        F: FnMut(Frame) -> Vec<Frame> + Send + 'static,
    {
        let (local, remote) = UnixStream::pair().unwrap();
        local
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        thread::spawn(move || {
            let mut writer = remote.try_clone().unwrap();
            let bytes = remote.bytes().map_while(|b| b.ok());
            for request in FrameReceiver::new().frames(bytes) {
                for reply in respond(request) {
                    if writer.write_all(&reply.to_bytes().unwrap()).is_err() {
                        return;
                    }
                }
            }
        });

        Arc::new(Transport::new(local.try_clone().unwrap(), local))
    }

    fn servo_position_board() -> Arc<Transport> {
        fake_board(|request| match request.payload.as_slice() {
            [0x05, id] => {
                thread::sleep(Duration::from_millis(1));
                let position = (*id as u16 * 10).to_le_bytes();
                vec![Frame::new(
                    FunctionCode::BusServo,
                    vec![*id, 0x05, 0, position[0], position[1]],
                )]
            }
            _ => vec![],
        })
    }

    #[test]
    fn call_returns_reply() {
        let controller = CommandController::new(servo_position_board(), CallPolicy::default());

        let reply = controller.call(FunctionCode::BusServo, &[0x05, 3]).unwrap();
        assert_eq!(reply, Some(vec![3, 0x05, 0, 30, 0]));
    }

    #[test]
    fn call_times_out_after_deadline() {
        let policy = CallPolicy::new(5, Duration::from_millis(10));
        let controller = CommandController::new(fake_board(|_| vec![]), policy);

        let start = Instant::now();
        assert_eq!(controller.call(FunctionCode::Motor, &[0x01]).unwrap(), None);

        let elapsed = start.elapsed();
        assert!(elapsed >= policy.deadline());
        assert!(elapsed < policy.deadline() + Duration::from_millis(500));
    }

    #[test]
    fn huge_policy_saturates() {
        let policy = CallPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.deadline(), Duration::MAX);

        let controller = CommandController::new(servo_position_board(), policy);
        let reply = controller.call(FunctionCode::BusServo, &[0x05, 4]).unwrap();
        assert_eq!(reply, Some(vec![4, 0x05, 0, 40, 0]));
    }

    #[test]
    fn call_drains_stale_reply() {
        let policy = CallPolicy::new(3, Duration::from_millis(10));
        let controller = CommandController::new(fake_board(|_| vec![]), policy);

        controller
            .transport()
            .mailbox(FunctionCode::PwmServo)
            .put(vec![0x05, 1, 0xDC, 0x05]);

        assert_eq!(controller.call(FunctionCode::PwmServo, &[0x05, 1]).unwrap(), None);
    }

    #[test]
    fn call_matching_skips_foreign_replies() {
        let board = fake_board(|request| {
            vec![
                Frame::new(FunctionCode::BusServo, vec![9, 0x05, 0, 0, 0]),
                Frame::new(FunctionCode::BusServo, vec![request.payload[1], 0x05, 0, 7, 0]),
            ]
        });
        let controller = CommandController::new(board, CallPolicy::default());

        let reply = controller
            .call_matching(FunctionCode::BusServo, &[0x05, 2], |p| p[0] == 2)
            .unwrap();
        assert_eq!(reply, Some(vec![2, 0x05, 0, 7, 0]));
    }

    #[test]
    fn concurrent_calls_stay_paired() {
        let controller = Arc::new(CommandController::new(
            servo_position_board(),
            CallPolicy::default(),
        ));

        let callers: Vec<_> = (1..=6u8)
            .map(|id| {
                let controller = controller.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let reply = controller
                            .call(FunctionCode::BusServo, &[0x05, id])
                            .unwrap()
                            .expect("reply");
                        assert_eq!(reply[0], id);
                    }
                })
            })
            .collect();

        for caller in callers {
            caller.join().unwrap();
        }
    }

    #[test]
    fn send_writes_without_waiting() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        local
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let transport = Arc::new(Transport::new(local.try_clone().unwrap(), local));
        let controller = CommandController::new(transport, CallPolicy::default());

        controller
            .send(FunctionCode::Buzzer, &[0x6C, 0x07, 0x64, 0x00, 0x84, 0x03, 0x01, 0x00])
            .unwrap();

        let mut wire = [0u8; 13];
        remote.read_exact(&mut wire).unwrap();
        assert_eq!(
            FrameReceiver::new().frames(wire).collect::<Vec<_>>(),
            vec![Frame::new(
                FunctionCode::Buzzer,
                vec![0x6C, 0x07, 0x64, 0x00, 0x84, 0x03, 0x01, 0x00]
            )]
        );
    }

    #[test]
    fn oversized_request_is_rejected() {
        let controller = CommandController::new(fake_board(|_| vec![]), CallPolicy::default());
        assert!(matches!(
            controller.call(FunctionCode::Oled, &[0u8; 300]),
            Err(Error::Protocol(ProtocolError::PayloadTooLarge(300)))
        ));
    }

    #[test]
    fn latest_takes_report() {
        let controller = CommandController::new(fake_board(|_| vec![]), CallPolicy::default());
        let mailboxes = controller.transport().mailboxes();

        mailboxes.dispatch(Frame::new(FunctionCode::Imu, vec![1]));
        mailboxes.dispatch(Frame::new(FunctionCode::Imu, vec![2]));

        assert_eq!(controller.latest(FunctionCode::Imu), Some(vec![2]));
        assert_eq!(controller.latest(FunctionCode::Imu), None);
        assert_eq!(
            controller.wait_report(FunctionCode::Imu, Duration::from_millis(10)),
            None
        );
    }
}
