use defmt::Formatter;

use crate::config::{Error as ConfigError, SavedConfig};
use crate::hci::{Error as HciError, HciMessage};
use crate::lorawan::{RadioStackConfig, RtcTime};
use crate::slip::{DecoderState, Error as SlipError};

impl defmt::Format for SlipError {
    fn format(&self, fmt: Formatter<'_>) {
        match self {
            SlipError::DestinationTooShort => defmt::write!(fmt, "DestinationTooShort"),
        }
    }
}

impl defmt::Format for DecoderState {
    fn format(&self, fmt: Formatter<'_>) {
        match self {
            DecoderState::Idle => defmt::write!(fmt, "Idle"),
            DecoderState::AwaitingStart => defmt::write!(fmt, "AwaitingStart"),
            DecoderState::InFrame => defmt::write!(fmt, "InFrame"),
            DecoderState::Escape => defmt::write!(fmt, "Escape"),
        }
    }
}

impl defmt::Format for HciError {
    fn format(&self, fmt: Formatter<'_>) {
        match self {
            HciError::PayloadTooLong => defmt::write!(fmt, "PayloadTooLong"),
        }
    }
}

impl defmt::Format for HciMessage {
    fn format(&self, fmt: Formatter<'_>) {
        defmt::write!(
            fmt,
            "HciMessage {{ sap_id: {=u8:x}, msg_id: {=u8:x}, payload: {=[u8]:x} }}",
            self.sap_id,
            self.msg_id,
            self.payload.as_slice()
        )
    }
}

impl defmt::Format for RtcTime {
    fn format(&self, fmt: Formatter<'_>) {
        defmt::write!(
            fmt,
            "{=u16}-{=u8}-{=u8} {=u8}:{=u8}:{=u8}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

impl defmt::Format for RadioStackConfig {
    fn format(&self, fmt: Formatter<'_>) {
        defmt::write!(
            fmt,
            "RadioStackConfig {{ data_rate: {=u8}, tx_power: {=u8}, options: {=u8:x}, \
             power_saving_mode: {=u8}, retransmissions: {=u8}, band_index: {=u8} }}",
            self.data_rate,
            self.tx_power,
            self.options,
            self.power_saving_mode,
            self.retransmissions,
            self.band_index
        )
    }
}

impl defmt::Format for ConfigError {
    fn format(&self, fmt: Formatter<'_>) {
        match self {
            ConfigError::SaveFailed => defmt::write!(fmt, "SaveFailed"),
        }
    }
}

impl defmt::Format for SavedConfig {
    fn format(&self, fmt: Formatter<'_>) {
        defmt::write!(
            fmt,
            "SavedConfig {{ version: {=u32}, boot_count: {=u32}, revision: {=u32} }}",
            self.version,
            self.boot_count,
            self.revision
        )
    }
}
