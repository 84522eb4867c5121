//! HCI message transport
//!
//! Carries WiMOD HCI messages over a SLIP framed serial link. A message is
//! a service-access-point id, a message id and up to
//! [`MAX_PAYLOAD_LENGTH`] payload bytes; on the wire it is followed by a
//! two-byte frame check sequence (one's complement CRC-16, LSB first) and
//! wrapped into one SLIP frame. The payload length is never transmitted -
//! it is implied by the frame length.
//!
//! Reception follows the buffer lending protocol of the SLIP layer: the
//! registered [`MessageSink`] gets every CRC-valid message and answers with
//! the buffer for the next frame, or `None` to pause reception until
//! [`HciTransport::resume`].
use heapless::Vec;
use log::debug;

use crate::crc16;
use crate::slip::{self, FrameSink, SlipDecoder, SLIP_END};

/// SAP id + message id
pub const HEADER_SIZE: usize = 2;
/// Maximum payload carried by one message
pub const MAX_PAYLOAD_LENGTH: usize = 300;
/// Frame check sequence length
pub const FCS_SIZE: usize = 2;
/// Maximum un-escaped wire frame: header + payload + FCS
pub const MAX_FRAME_LENGTH: usize = HEADER_SIZE + MAX_PAYLOAD_LENGTH + FCS_SIZE;
/// Worst case SLIP expansion of a maximum frame: every byte escaped plus
/// both END markers
const MAX_ENCODED_FRAME_LENGTH: usize = 2 * MAX_FRAME_LENGTH + 2;
/// Number of idle END characters sent ahead of each frame to wake the
/// modem from sleep
pub const WAKEUP_CHARS: usize = 40;

pub type FrameVec = Vec<u8, MAX_FRAME_LENGTH>;
pub type PayloadVec = Vec<u8, MAX_PAYLOAD_LENGTH>;

#[derive(PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Error {
    /// Payload does not fit the fixed message capacity
    PayloadTooLong,
}

/// One HCI message. `payload.len()` plays the role of the wire length
/// field, which is implicit in the frame length.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct HciMessage {
    /// Service access point identifier
    pub sap_id: u8,
    /// Message identifier within the SAP
    pub msg_id: u8,
    pub payload: PayloadVec,
}

impl HciMessage {
    pub fn new(sap_id: u8, msg_id: u8) -> Self {
        Self {
            sap_id,
            msg_id,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(sap_id: u8, msg_id: u8, payload: &[u8]) -> Result<Self, Error> {
        let payload = Vec::from_slice(payload).map_err(|_| Error::PayloadTooLong)?;
        Ok(Self {
            sap_id,
            msg_id,
            payload,
        })
    }
}

/// Byte sink towards the modem - one blocking byte at a time, the way the
/// UART driver exposes it.
pub trait SerialPort {
    fn write_byte(&mut self, byte: u8);
}

/// Receiver of CRC-validated messages.
pub trait MessageSink {
    /// Handle one received message. Returning a message re-arms reception
    /// (its buffer is lent to the decoder), `None` pauses it until
    /// [`HciTransport::resume`].
    fn message_received(&mut self, message: HciMessage) -> Option<HciMessage>;
}

/// HCI message layer instance bound to one serial port.
pub struct HciTransport<P, R> {
    port: P,
    receiver: R,
    decoder: SlipDecoder<MAX_FRAME_LENGTH>,
    crc_errors: u32,
}

impl<P: SerialPort, R: MessageSink> HciTransport<P, R> {
    /// Create the transport and arm reception.
    pub fn new(port: P, receiver: R) -> Self {
        let mut decoder = SlipDecoder::new();
        decoder.set_rx_buffer(FrameVec::new());
        Self {
            port,
            receiver,
            decoder,
            crc_errors: 0,
        }
    }

    /// Cumulative count of frames dropped for a bad frame check sequence.
    pub fn crc_errors(&self) -> u32 {
        self.crc_errors
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }

    /// Send one message: append the FCS, SLIP encode, emit the wake-up
    /// characters and then the frame.
    ///
    /// Returns the encoded frame length. Nothing is written on error.
    pub fn send_message(&mut self, message: &HciMessage) -> Result<usize, Error> {
        // header + payload, then the complemented CRC-16 LSB first
        let mut raw = FrameVec::new();
        raw.push(message.sap_id).unwrap();
        raw.push(message.msg_id).unwrap();
        raw.extend_from_slice(&message.payload).unwrap();
        let fcs = !crc16::calc(&raw, crc16::CRC16_INIT_VALUE);
        raw.extend_from_slice(&fcs.to_le_bytes()).unwrap();

        let mut encoded = [0u8; MAX_ENCODED_FRAME_LENGTH];
        let encoded_length =
            slip::encode(&mut encoded, &raw).map_err(|_| Error::PayloadTooLong)?;

        for _ in 0..WAKEUP_CHARS {
            self.port.write_byte(SLIP_END);
        }
        for &byte in &encoded[..encoded_length] {
            self.port.write_byte(byte);
        }

        Ok(encoded_length)
    }

    /// Push received serial bytes into the decoder. Completed frames are
    /// CRC-checked and dispatched to the receiver from within this call.
    pub fn process_rx_data(&mut self, data: &[u8]) {
        let mut sink = TransportSink {
            receiver: &mut self.receiver,
            crc_errors: &mut self.crc_errors,
        };
        self.decoder.decode(data, &mut sink);
    }

    /// Re-arm reception after the receiver paused it. Returns whether the
    /// decoder accepted the buffer (it refuses while already armed).
    pub fn resume(&mut self) -> bool {
        self.decoder.set_rx_buffer(FrameVec::new())
    }
}

/// Frame-level glue between the SLIP decoder and the message receiver,
/// borrowing only the transport fields it needs.
struct TransportSink<'a, R> {
    receiver: &'a mut R,
    crc_errors: &'a mut u32,
}

impl<R: MessageSink> FrameSink<MAX_FRAME_LENGTH> for TransportSink<'_, R> {
    fn frame_received(&mut self, frame: FrameVec) -> Option<FrameVec> {
        // shorter than header + FCS: not even worth a CRC error
        if frame.len() < HEADER_SIZE + FCS_SIZE {
            return Some(frame);
        }

        if !crc16::check(&frame, crc16::CRC16_INIT_VALUE) {
            *self.crc_errors += 1;
            debug!("frame with bad FCS dropped ({} so far)", *self.crc_errors);
            return Some(frame);
        }

        let payload_length = frame.len() - HEADER_SIZE - FCS_SIZE;
        let message = HciMessage {
            sap_id: frame[0],
            msg_id: frame[1],
            payload: Vec::from_slice(&frame[HEADER_SIZE..HEADER_SIZE + payload_length]).unwrap(),
        };

        self.receiver
            .message_received(message)
            .map(|_| FrameVec::new())
    }
}
