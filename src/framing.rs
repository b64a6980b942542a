/// Byte-stream framing for the ANT+ serial protocol. The transport hands
/// back arbitrary chunks of bytes with no alignment guarantee; the deframer
/// recovers message boundaries one byte at a time and only emits frames
/// whose checksum validates. Garbage self-heals at the next sync byte.
use crate::message::{MESG_MAX_SIZE_VALUE, MESG_TX_SYNC};
use log::trace;

/// A complete, checksum-validated frame: message id plus payload. The sync,
/// length and checksum bytes are consumed during deframing.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    id: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Frame { id, payload }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[derive(Debug, PartialEq)]
enum State {
    WaitSync,
    Length,
    Id,
    Data,
    Validate,
}

/// The deframing state machine. Push bytes in, frames fall out. Malformed
/// input (zero or oversized length, checksum mismatch) resets the machine
/// to `WaitSync` without emitting anything.
pub struct Deframer {
    state: State,
    checksum: u8,
    length: usize,
    id: u8,
    payload: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Deframer {
            state: State::WaitSync,
            checksum: 0,
            length: 0,
            id: 0,
            payload: Vec::new(),
        }
    }

    /// Advance the machine by one byte, returning a completed frame when
    /// this byte was a matching checksum.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::WaitSync => {
                if byte == MESG_TX_SYNC {
                    self.checksum = byte;
                    self.state = State::Length;
                }
                None
            }
            State::Length => {
                let length = byte as usize;
                if length == 0 || length > MESG_MAX_SIZE_VALUE {
                    trace!("discarding frame with bad length {}", length);
                    self.state = State::WaitSync;
                    return None;
                }
                self.length = length;
                self.checksum ^= byte;
                self.state = State::Id;
                None
            }
            State::Id => {
                self.id = byte;
                self.checksum ^= byte;
                self.payload = Vec::with_capacity(self.length);
                self.state = State::Data;
                None
            }
            State::Data => {
                self.payload.push(byte);
                self.checksum ^= byte;
                if self.payload.len() == self.length {
                    self.state = State::Validate;
                }
                None
            }
            State::Validate => {
                self.state = State::WaitSync;
                if byte == self.checksum {
                    Some(Frame::new(self.id, std::mem::take(&mut self.payload)))
                } else {
                    trace!(
                        "checksum mismatch on message {:#x}: got {:#x}, want {:#x}",
                        self.id,
                        byte,
                        self.checksum
                    );
                    None
                }
            }
        }
    }

    /// Feed a block of bytes, collecting every frame completed along the
    /// way. Equivalent to calling `push` per byte.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Deframer::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{self, Message};

    #[test]
    fn empty_input_yields_nothing() {
        let mut d = Deframer::new();
        assert_eq!(d.extend(&[]), vec![]);
    }

    #[test]
    fn single_frame() {
        let m = Message::new(message::MESG_STARTUP_MESG_ID, &[0x00]);
        let mut d = Deframer::new();
        let frames = d.extend(&m.encode());
        assert_eq!(
            frames,
            vec![Frame::new(message::MESG_STARTUP_MESG_ID, vec![0x00])]
        );
        assert_eq!(d.state, State::WaitSync);
    }

    #[test]
    fn reset_frame_scenario() {
        // SYNC, LEN=1, ID=0x4A, payload 0x00, checksum. Exactly one frame,
        // machine back at rest.
        let bytes = [0xA4, 0x01, 0x4A, 0x00, 0xA4 ^ 0x01 ^ 0x4A ^ 0x00];
        let mut d = Deframer::new();
        let frames = d.extend(&bytes);
        assert_eq!(frames, vec![Frame::new(0x4A, vec![0x00])]);
        assert_eq!(d.state, State::WaitSync);
        assert!(d.payload.is_empty());
    }

    #[test]
    fn byte_at_a_time_matches_block() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x13, 0x37]); // leading garbage
        stream.extend_from_slice(&Message::new(message::MESG_STARTUP_MESG_ID, &[0x00]).encode());
        stream.extend_from_slice(&[0xA4, 0x00]); // sync with bad length
        stream.extend_from_slice(
            &Message::new(message::MESG_BROADCAST_DATA_ID, &[1, 2, 3, 4, 5, 6, 7, 8, 9]).encode(),
        );

        let mut block = Deframer::new();
        let block_frames = block.extend(&stream);

        let mut single = Deframer::new();
        let mut single_frames = Vec::new();
        for &b in &stream {
            if let Some(f) = single.push(b) {
                single_frames.push(f);
            }
        }
        assert_eq!(block_frames, single_frames);
        assert_eq!(block_frames.len(), 2);
    }

    #[test]
    fn resynchronizes_after_garbage() {
        let m = Message::new(message::MESG_STARTUP_MESG_ID, &[0x00]);
        let mut stream = vec![0, 1, 2, 3, 0xA4, 0xFF, 0xFF, 0xFF];
        stream.extend_from_slice(&m.encode());
        let mut d = Deframer::new();
        let frames = d.extend(&stream);
        assert_eq!(
            frames,
            vec![Frame::new(message::MESG_STARTUP_MESG_ID, vec![0x00])]
        );
    }

    #[test]
    fn zero_length_aborts() {
        let m = Message::new(message::MESG_STARTUP_MESG_ID, &[0x00]);
        let mut stream = vec![0xA4, 0x00];
        stream.extend_from_slice(&m.encode());
        let mut d = Deframer::new();
        assert_eq!(d.extend(&stream).len(), 1);
    }

    #[test]
    fn oversized_length_aborts() {
        let mut d = Deframer::new();
        assert_eq!(d.extend(&[0xA4, 0xFE]), vec![]);
        assert_eq!(d.state, State::WaitSync);
    }

    #[test]
    fn any_single_byte_corruption_discards_frame() {
        let m = Message::new(message::MESG_BROADCAST_DATA_ID, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let good = m.encode();
        for i in 0..good.len() {
            let mut bad = good.clone();
            bad[i] ^= 0x01;
            let mut d = Deframer::new();
            let frames = d.extend(&bad);
            assert_eq!(frames, vec![], "corrupting byte {} still decoded", i);
            // A following clean frame is still recovered.
            let tail = d.extend(&good);
            assert_eq!(tail.len(), 1, "no resync after corrupting byte {}", i);
        }
    }

    #[test]
    fn split_across_reads() {
        let m = Message::new(message::MESG_BROADCAST_DATA_ID, &[9, 8, 7, 6, 5, 4, 3, 2, 1]);
        let bytes = m.encode();
        let mut d = Deframer::new();
        let (a, b) = bytes.split_at(4);
        assert_eq!(d.extend(a), vec![]);
        let frames = d.extend(b);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[9, 8, 7, 6, 5, 4, 3, 2, 1]);
    }
}
