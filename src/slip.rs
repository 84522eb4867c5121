//! SLIP framing used on the modem serial link
//!
//! Every HCI message travels inside one SLIP frame: a leading END marker,
//! the escaped message bytes and a trailing END marker. END and ESC bytes
//! occurring in the payload are replaced by two-byte escape sequences so the
//! frame boundary stays unambiguous.
//!
//! The receive side is a four-state machine fed one byte stream at a time
//! via [`SlipDecoder::decode`]. Completed frames are handed to a
//! [`FrameSink`] which lends the decoder its next receive buffer - returning
//! `None` pauses decoding until a buffer is supplied again.
use heapless::Vec;

/// Frame delimiter
pub const SLIP_END: u8 = 0xC0;
/// Escape introducer
pub const SLIP_ESC: u8 = 0xDB;
/// Escaped substitute for a payload END byte
pub const SLIP_ESC_END: u8 = 0xDC;
/// Escaped substitute for a payload ESC byte
pub const SLIP_ESC_ESC: u8 = 0xDD;

#[derive(PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Error {
    /// Encoded frame does not fit into the destination buffer
    DestinationTooShort,
}

/// Encode `src` as one SLIP frame into `dst`.
///
/// On success returns the total encoded length including both END markers.
/// If the frame would exceed `dst`, returns [`Error::DestinationTooShort`];
/// bytes already written up to that point are unspecified.
pub fn encode(dst: &mut [u8], src: &[u8]) -> Result<usize, Error> {
    let mut writer = FrameWriter { dst, index: 0 };

    writer.put(SLIP_END);
    for &byte in src {
        match byte {
            SLIP_END => {
                writer.put(SLIP_ESC);
                writer.put(SLIP_ESC_END);
            }
            SLIP_ESC => {
                writer.put(SLIP_ESC);
                writer.put(SLIP_ESC_ESC);
            }
            _ => writer.put(byte),
        }
    }
    writer.put(SLIP_END);

    if writer.index <= writer.dst.len() {
        Ok(writer.index)
    } else {
        Err(Error::DestinationTooShort)
    }
}

/// Bounded writer which keeps counting past the end of the destination, so
/// an overlong encode is detected without writing out of bounds.
struct FrameWriter<'a> {
    dst: &'a mut [u8],
    index: usize,
}

impl FrameWriter<'_> {
    fn put(&mut self, byte: u8) {
        if self.index < self.dst.len() {
            self.dst[self.index] = byte;
        }
        self.index += 1;
    }
}

/// Receiver states
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum DecoderState {
    /// No receive buffer armed, incoming bytes are dropped
    Idle,
    /// Armed, waiting for an END marker opening the next frame
    AwaitingStart,
    /// Inside a frame, accumulating bytes
    InFrame,
    /// Previous byte was ESC, the next one resolves the escape sequence
    Escape,
}

/// Effect of feeding one byte to the receive state machine
#[derive(PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Step {
    /// Nothing to store
    Skip,
    /// Store this (possibly un-escaped) byte into the frame buffer
    Store(u8),
    /// Frame boundary reached, deliver the accumulated bytes
    EndOfFrame,
    /// Malformed escape sequence, discard the partial frame
    Abort,
}

/// Pure transition function of the receive state machine.
///
/// On [`Step::EndOfFrame`] the returned state covers the empty-frame case
/// (a run of END markers); after an actual delivery the driver picks the
/// successor state from the sink's answer instead.
pub fn step(state: DecoderState, byte: u8) -> (DecoderState, Step) {
    match state {
        DecoderState::Idle => (DecoderState::Idle, Step::Skip),
        DecoderState::AwaitingStart => match byte {
            SLIP_END => (DecoderState::InFrame, Step::Skip),
            _ => (DecoderState::AwaitingStart, Step::Skip),
        },
        DecoderState::InFrame => match byte {
            SLIP_END => (DecoderState::InFrame, Step::EndOfFrame),
            SLIP_ESC => (DecoderState::Escape, Step::Skip),
            _ => (DecoderState::InFrame, Step::Store(byte)),
        },
        DecoderState::Escape => match byte {
            SLIP_ESC_END => (DecoderState::InFrame, Step::Store(SLIP_END)),
            SLIP_ESC_ESC => (DecoderState::InFrame, Step::Store(SLIP_ESC)),
            _ => (DecoderState::AwaitingStart, Step::Abort),
        },
    }
}

/// Receiver of completed frames.
pub trait FrameSink<const N: usize> {
    /// Handle one completed frame.
    ///
    /// The returned buffer is armed for the next frame; returning `None`
    /// pauses the decoder until [`SlipDecoder::set_rx_buffer`] is called.
    fn frame_received(&mut self, frame: Vec<u8, N>) -> Option<Vec<u8, N>>;
}

/// Streaming SLIP decoder owning the armed receive buffer.
pub struct SlipDecoder<const N: usize> {
    state: DecoderState,
    buffer: Option<Vec<u8, N>>,
}

impl<const N: usize> SlipDecoder<N> {
    pub const fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            buffer: None,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Arm the decoder with a receive buffer. Only allowed while idle;
    /// returns whether the buffer was accepted.
    pub fn set_rx_buffer(&mut self, mut buffer: Vec<u8, N>) -> bool {
        if self.state != DecoderState::Idle {
            return false;
        }
        buffer.clear();
        self.buffer = Some(buffer);
        self.state = DecoderState::AwaitingStart;
        true
    }

    /// Run the received bytes through the state machine, delivering any
    /// completed frames to `sink`.
    ///
    /// A frame longer than the armed buffer is truncated silently: storing
    /// stops at capacity while parsing continues, so the frame boundary is
    /// still honoured.
    pub fn decode<S: FrameSink<N>>(&mut self, data: &[u8], sink: &mut S) {
        for &byte in data {
            let (next, effect) = step(self.state, byte);
            match effect {
                Step::Skip => self.state = next,
                Step::Store(out) => {
                    if let Some(buffer) = self.buffer.as_mut() {
                        let _ = buffer.push(out);
                    }
                    self.state = next;
                }
                Step::Abort => {
                    if let Some(buffer) = self.buffer.as_mut() {
                        buffer.clear();
                    }
                    self.state = next;
                }
                Step::EndOfFrame => match self.buffer.take() {
                    Some(frame) if !frame.is_empty() => match sink.frame_received(frame) {
                        Some(mut buffer) => {
                            buffer.clear();
                            self.buffer = Some(buffer);
                            self.state = DecoderState::AwaitingStart;
                        }
                        None => self.state = DecoderState::Idle,
                    },
                    other => {
                        // empty frame inside a run of END markers
                        self.buffer = other;
                        self.state = next;
                    }
                },
            }
        }
    }
}

impl<const N: usize> Default for SlipDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, Rng};

    const CAP: usize = 64;

    struct Capture {
        frames: std::vec::Vec<std::vec::Vec<u8>>,
        rearm: bool,
    }

    impl Capture {
        fn new() -> Self {
            Self {
                frames: std::vec::Vec::new(),
                rearm: true,
            }
        }
    }

    impl FrameSink<CAP> for Capture {
        fn frame_received(&mut self, frame: Vec<u8, CAP>) -> Option<Vec<u8, CAP>> {
            self.frames.push(frame.to_vec());
            if self.rearm {
                Some(frame)
            } else {
                None
            }
        }
    }

    fn armed_decoder() -> SlipDecoder<CAP> {
        let mut decoder = SlipDecoder::new();
        assert!(decoder.set_rx_buffer(Vec::new()));
        decoder
    }

    #[test]
    fn test_encode_plain_bytes() {
        let mut dst = [0u8; 16];
        let n = encode(&mut dst, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(&dst[..n], &[SLIP_END, 0x01, 0x02, 0x03, SLIP_END]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let mut dst = [0u8; 4];
        let n = encode(&mut dst, &[]).unwrap();
        assert_eq!(&dst[..n], &[SLIP_END, SLIP_END]);
    }

    #[test]
    fn test_escape_totality() {
        for byte in 0u8..=255 {
            let mut dst = [0u8; 8];
            let n = encode(&mut dst, &[byte]).unwrap();
            match byte {
                SLIP_END => {
                    assert_eq!(&dst[..n], &[SLIP_END, SLIP_ESC, SLIP_ESC_END, SLIP_END])
                }
                SLIP_ESC => {
                    assert_eq!(&dst[..n], &[SLIP_END, SLIP_ESC, SLIP_ESC_ESC, SLIP_END])
                }
                _ => assert_eq!(&dst[..n], &[SLIP_END, byte, SLIP_END]),
            }
        }
    }

    #[test]
    fn test_encode_destination_too_short() {
        let mut dst = [0u8; 4];
        assert_eq!(
            encode(&mut dst, &[0x01, 0x02, 0x03]),
            Err(Error::DestinationTooShort)
        );
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        decoder.decode(&[SLIP_END, 0x0a, 0x0b, 0x0c, SLIP_END], &mut capture);
        assert_eq!(capture.frames, vec![vec![0x0a, 0x0b, 0x0c]]);
        assert_eq!(decoder.state(), DecoderState::AwaitingStart);
    }

    #[test]
    fn test_decode_unescapes_payload() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        decoder.decode(
            &[
                SLIP_END, 0x01, SLIP_ESC, SLIP_ESC_END, SLIP_ESC, SLIP_ESC_ESC, 0x02, SLIP_END,
            ],
            &mut capture,
        );
        assert_eq!(capture.frames, vec![vec![0x01, SLIP_END, SLIP_ESC, 0x02]]);
    }

    #[test]
    fn test_decode_two_frames_in_one_chunk() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        decoder.decode(
            &[SLIP_END, 0x11, SLIP_END, SLIP_END, 0x22, 0x33, SLIP_END],
            &mut capture,
        );
        assert_eq!(capture.frames, vec![vec![0x11], vec![0x22, 0x33]]);
    }

    #[test]
    fn test_decode_consecutive_end_markers_are_not_frames() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        decoder.decode(&[SLIP_END, SLIP_END, SLIP_END, 0x42, SLIP_END], &mut capture);
        assert_eq!(capture.frames, vec![vec![0x42]]);
    }

    #[test]
    fn test_decode_bad_escape_aborts_frame() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        // 0x55 is not a valid escape code - the partial frame is dropped and
        // the decoder scans for the next frame start
        decoder.decode(
            &[
                SLIP_END, 0x01, SLIP_ESC, 0x55, 0x02, SLIP_END, 0x03, SLIP_END,
            ],
            &mut capture,
        );
        assert_eq!(capture.frames, vec![vec![0x03]]);
    }

    #[test]
    fn test_decode_idle_drops_bytes() {
        let mut decoder: SlipDecoder<CAP> = SlipDecoder::new();
        let mut capture = Capture::new();
        decoder.decode(&[SLIP_END, 0x01, 0x02, SLIP_END], &mut capture);
        assert!(capture.frames.is_empty());
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn test_decode_pause_until_rearmed() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        capture.rearm = false;

        decoder.decode(&[SLIP_END, 0x01, SLIP_END], &mut capture);
        assert_eq!(capture.frames.len(), 1);
        assert_eq!(decoder.state(), DecoderState::Idle);

        // second, perfectly valid frame is dropped while paused
        decoder.decode(&[SLIP_END, 0x02, SLIP_END], &mut capture);
        assert_eq!(capture.frames.len(), 1);

        capture.rearm = true;
        assert!(decoder.set_rx_buffer(Vec::new()));
        decoder.decode(&[SLIP_END, 0x03, SLIP_END], &mut capture);
        assert_eq!(capture.frames.len(), 2);
        assert_eq!(capture.frames[1], vec![0x03]);
    }

    #[test]
    fn test_set_rx_buffer_refused_while_armed() {
        let mut decoder = armed_decoder();
        assert!(!decoder.set_rx_buffer(Vec::new()));
    }

    #[test]
    fn test_decode_truncates_overlong_frame() {
        let mut decoder = armed_decoder();
        let mut capture = Capture::new();
        let mut stream = vec![SLIP_END];
        stream.extend(std::iter::repeat(0xaa).take(CAP + 10));
        stream.push(SLIP_END);
        stream.extend_from_slice(&[SLIP_END, 0x07, SLIP_END]);

        decoder.decode(&stream, &mut capture);

        // oversized frame is capped at capacity, boundary detection survives
        assert_eq!(capture.frames.len(), 2);
        assert_eq!(capture.frames[0].len(), CAP);
        assert_eq!(capture.frames[1], vec![0x07]);
    }

    #[test]
    fn test_round_trip_random_payloads() {
        let mut rng = thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(1, CAP + 1);
            let mut payload = vec![0u8; len];
            rng.try_fill(&mut payload[..]).unwrap();

            let mut encoded = [0u8; 2 * CAP + 2];
            let n = encode(&mut encoded, &payload).unwrap();

            let mut decoder = armed_decoder();
            let mut capture = Capture::new();
            decoder.decode(&encoded[..n], &mut capture);
            assert_eq!(capture.frames, vec![payload]);
        }
    }

    #[test]
    fn test_step_transitions() {
        use DecoderState::*;

        assert_eq!(step(Idle, SLIP_END), (Idle, Step::Skip));
        assert_eq!(step(AwaitingStart, 0x42), (AwaitingStart, Step::Skip));
        assert_eq!(step(AwaitingStart, SLIP_END), (InFrame, Step::Skip));
        assert_eq!(step(InFrame, 0x42), (InFrame, Step::Store(0x42)));
        assert_eq!(step(InFrame, SLIP_ESC), (Escape, Step::Skip));
        assert_eq!(step(InFrame, SLIP_END), (InFrame, Step::EndOfFrame));
        assert_eq!(
            step(Escape, SLIP_ESC_END),
            (InFrame, Step::Store(SLIP_END))
        );
        assert_eq!(
            step(Escape, SLIP_ESC_ESC),
            (InFrame, Step::Store(SLIP_ESC))
        );
        assert_eq!(step(Escape, 0x42), (AwaitingStart, Step::Abort));
    }
}
