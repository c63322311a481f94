use super::codec::{checksum, HEADER};
use super::Frame;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekHeader1,
    SeekHeader2,
    ReadFunction,
    ReadLength,
    ReadData,
    ReadChecksum,
}

/// Incremental frame parser. Corrupted frames are dropped and parsing resumes
/// at the byte following the bad checksum; consumed bytes are never revisited.
#[derive(Debug)]
pub struct FrameReceiver {
    state: State,
    function: u8,
    length: usize,
    data: Vec<u8>,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self {
            state: State::SeekHeader1,
            function: 0,
            length: 0,
            data: Vec::with_capacity(u8::MAX as usize),
        }
    }

    /// Feeds one byte, returning a frame when this byte completes a valid one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::SeekHeader1 => {
                if byte == HEADER[0] {
                    self.state = State::SeekHeader2;
                }
            }
            State::SeekHeader2 => {
                if byte == HEADER[1] {
                    self.state = State::ReadFunction;
                } else {
                    // The byte may start a new header itself.
                    self.state = State::SeekHeader1;
                    return self.push(byte);
                }
            }
            State::ReadFunction => {
                self.function = byte;
                self.state = State::ReadLength;
            }
            State::ReadLength => {
                self.length = byte as usize;
                self.data.clear();
                self.state = if self.length == 0 {
                    State::ReadChecksum
                } else {
                    State::ReadData
                };
            }
            State::ReadData => {
                self.data.push(byte);
                if self.data.len() == self.length {
                    self.state = State::ReadChecksum;
                }
            }
            State::ReadChecksum => {
                self.state = State::SeekHeader1;

                let expected = checksum(self.function, &self.data);
                if expected != byte {
                    trace!(
                        "dropping frame fn={} len={}: checksum {:#04x} != {:#04x}",
                        self.function, self.length, byte, expected
                    );
                    return None;
                }

                let frame = Frame::new(self.function, std::mem::take(&mut self.data));
                trace!("recv frame fn={} {:02x?}", frame.function, frame.payload);
                return Some(frame);
            }
        }
        None
    }

    /// Feeds a chunk, appending completed frames to `out`.
    pub fn extend(&mut self, bytes: &[u8], out: &mut Vec<Frame>) {
        out.extend(bytes.iter().filter_map(|&b| self.push(b)));
    }

    /// Binds the receiver to a byte source, yielding frames lazily.
    pub fn frames<I>(self, bytes: I) -> Frames<I::IntoIter>
    where
        I: IntoIterator<Item = u8>,
    {
        Frames {
            receiver: self,
            bytes: bytes.into_iter(),
        }
    }
}

/// Lazy frame sequence over a byte source. Ends only when the source does.
pub struct Frames<I> {
    receiver: FrameReceiver,
    bytes: I,
}

impl<I> Iterator for Frames<I>
where
    I: Iterator<Item = u8>,
{
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        for byte in self.bytes.by_ref() {
            if let Some(frame) = self.receiver.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}
