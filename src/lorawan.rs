//! LoRaWAN command, response and indication layer
//!
//! Builds the request vocabulary of the iM881A radio stack on top of the
//! [HCI transport](crate::hci) and decodes the responses and unsolicited
//! indications coming back. Requests are fire-and-return: each builder
//! writes one message and reports only local validation failures. Results
//! arrive asynchronously and are reported through the `log` facade; the
//! one exception is the network-join indication, which additionally fires
//! a caller-supplied callback exactly once.
use log::{info, warn};

use crate::hci::{
    Error, HciMessage, HciTransport, MessageSink, SerialPort, MAX_PAYLOAD_LENGTH,
};

/// Device management service access point
pub const DEVMGMT_SAP_ID: u8 = 0x01;
/// LoRaWAN service access point
pub const LORAWAN_SAP_ID: u8 = 0x10;

// Device management message identifiers
pub const DEVMGMT_MSG_PING_REQ: u8 = 0x01;
pub const DEVMGMT_MSG_PING_RSP: u8 = 0x02;
pub const DEVMGMT_MSG_GET_DEVICE_INFO_REQ: u8 = 0x03;
pub const DEVMGMT_MSG_GET_DEVICE_INFO_RSP: u8 = 0x04;
pub const DEVMGMT_MSG_GET_FW_VERSION_REQ: u8 = 0x05;
pub const DEVMGMT_MSG_GET_FW_VERSION_RSP: u8 = 0x06;
pub const DEVMGMT_MSG_RESET_REQ: u8 = 0x07;
pub const DEVMGMT_MSG_RESET_RSP: u8 = 0x08;
pub const DEVMGMT_MSG_SET_OPMODE_REQ: u8 = 0x09;
pub const DEVMGMT_MSG_SET_OPMODE_RSP: u8 = 0x0A;
pub const DEVMGMT_MSG_GET_OPMODE_REQ: u8 = 0x0B;
pub const DEVMGMT_MSG_GET_OPMODE_RSP: u8 = 0x0C;
pub const DEVMGMT_MSG_SET_RTC_REQ: u8 = 0x0D;
pub const DEVMGMT_MSG_SET_RTC_RSP: u8 = 0x0E;
pub const DEVMGMT_MSG_GET_RTC_REQ: u8 = 0x0F;
pub const DEVMGMT_MSG_GET_RTC_RSP: u8 = 0x10;
pub const DEVMGMT_MSG_SET_RTC_ALARM_REQ: u8 = 0x31;
pub const DEVMGMT_MSG_SET_RTC_ALARM_RSP: u8 = 0x32;
pub const DEVMGMT_MSG_CLEAR_RTC_ALARM_REQ: u8 = 0x33;
pub const DEVMGMT_MSG_CLEAR_RTC_ALARM_RSP: u8 = 0x34;
pub const DEVMGMT_MSG_GET_RTC_ALARM_REQ: u8 = 0x35;
pub const DEVMGMT_MSG_GET_RTC_ALARM_RSP: u8 = 0x36;
pub const DEVMGMT_MSG_RTC_ALARM_IND: u8 = 0x38;

// LoRaWAN message identifiers
pub const LORAWAN_MSG_SET_JOIN_PARAM_REQ: u8 = 0x05;
pub const LORAWAN_MSG_SET_JOIN_PARAM_RSP: u8 = 0x06;
pub const LORAWAN_MSG_JOIN_NETWORK_REQ: u8 = 0x09;
pub const LORAWAN_MSG_JOIN_NETWORK_RSP: u8 = 0x0A;
pub const LORAWAN_MSG_JOIN_TRANSMIT_IND: u8 = 0x0B;
pub const LORAWAN_MSG_JOIN_NETWORK_IND: u8 = 0x0C;
pub const LORAWAN_MSG_SEND_UDATA_REQ: u8 = 0x0D;
pub const LORAWAN_MSG_SEND_UDATA_RSP: u8 = 0x0E;
pub const LORAWAN_MSG_SEND_UDATA_IND: u8 = 0x0F;
pub const LORAWAN_MSG_RECV_UDATA_IND: u8 = 0x10;
pub const LORAWAN_MSG_SEND_CDATA_REQ: u8 = 0x11;
pub const LORAWAN_MSG_SEND_CDATA_RSP: u8 = 0x12;
pub const LORAWAN_MSG_SEND_CDATA_IND: u8 = 0x13;
pub const LORAWAN_MSG_RECV_CDATA_IND: u8 = 0x14;
pub const LORAWAN_MSG_RECV_ACK_IND: u8 = 0x15;
pub const LORAWAN_MSG_RECV_NODATA_IND: u8 = 0x16;
pub const LORAWAN_MSG_SET_RSTACK_CONFIG_REQ: u8 = 0x19;
pub const LORAWAN_MSG_SET_RSTACK_CONFIG_RSP: u8 = 0x1A;
pub const LORAWAN_MSG_GET_RSTACK_CONFIG_REQ: u8 = 0x1B;
pub const LORAWAN_MSG_GET_RSTACK_CONFIG_RSP: u8 = 0x1C;
pub const LORAWAN_MSG_FACTORY_RESET_REQ: u8 = 0x23;
pub const LORAWAN_MSG_FACTORY_RESET_RSP: u8 = 0x24;
pub const LORAWAN_MSG_GET_DEVICE_EUI_REQ: u8 = 0x27;
pub const LORAWAN_MSG_GET_DEVICE_EUI_RSP: u8 = 0x28;
pub const LORAWAN_MSG_GET_NWK_STATUS_REQ: u8 = 0x29;
pub const LORAWAN_MSG_GET_NWK_STATUS_RSP: u8 = 0x2A;

/// Application EUI length in join parameters
pub const APP_EUI_LENGTH: usize = 8;
/// Application key length in join parameters
pub const APP_KEY_LENGTH: usize = 16;
/// Channel metadata trailer of data indications: channel index, data rate,
/// RSSI, SNR, RX slot
const RX_CHANNEL_INFO_LENGTH: usize = 5;

/// Status codes of device management responses
const DEVMGMT_STATUS_STRINGS: &[(u8, &'static str)] = &[
    (0x00, "ok"),
    (0x01, "error"),
    (0x02, "command not supported"),
    (0x03, "wrong parameter"),
    (0x04, "wrong device mode"),
];

/// Status codes of LoRaWAN responses
const LORAWAN_STATUS_STRINGS: &[(u8, &'static str)] = &[
    (0x00, "ok"),
    (0x01, "error"),
    (0x02, "command not supported"),
    (0x03, "wrong parameter"),
    (0x04, "wrong device mode"),
    (0x05, "device not activated"),
    (0x06, "device busy - command rejected"),
    (0x07, "message queue full - command rejected"),
    (0x08, "HCI message length error"),
    (0x09, "no factory settings available"),
    (0x0A, "error: channel blocked due to duty cycle, please try later again"),
    (0x0B, "error: channel not available"),
];

/// Invoked once when the modem reports a successful network join.
///
/// Takes no arguments; the assigned device address is only reported through
/// the log output.
pub type JoinCallback = fn();

fn status_string(table: &'static [(u8, &'static str)], status: u8) -> Option<&'static str> {
    table
        .iter()
        .find(|(id, _)| *id == status)
        .map(|(_, string)| *string)
}

fn show_response(context: &str, table: &'static [(u8, &'static str)], status: u8) {
    match status_string(table, status) {
        Some(string) => info!("{} - status(0x{:02x}): {}", context, status, string),
        None => info!("{} - status(0x{:02x}): unknown", context, status),
    }
}

/// The uplink TX indications report their status shifted by one against
/// the regular convention: raw 1 means "ok". Compensated here, for these
/// two message ids only.
fn tx_indication_status(raw: u8) -> u8 {
    raw.saturating_sub(1)
}

fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// RTC timestamp of the device management SAP, packed into a u32 on the
/// wire: seconds, minutes, hours, day, month and years since 2000.
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RtcTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcTime {
    pub fn to_wire(&self) -> u32 {
        u32::from(self.second & 0x3f)
            | u32::from(self.minute & 0x3f) << 6
            | u32::from(self.hour & 0x1f) << 12
            | u32::from(self.day & 0x1f) << 17
            | u32::from(self.month & 0x0f) << 22
            | u32::from(self.year.saturating_sub(2000) & 0x3f) << 26
    }

    pub fn from_wire(raw: u32) -> Self {
        Self {
            year: 2000 + (raw >> 26) as u16,
            month: (raw >> 22 & 0x0f) as u8,
            day: (raw >> 17 & 0x1f) as u8,
            hour: (raw >> 12 & 0x1f) as u8,
            minute: (raw >> 6 & 0x3f) as u8,
            second: (raw & 0x3f) as u8,
        }
    }
}

/// Radio stack configuration record, six bytes on the wire.
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioStackConfig {
    pub data_rate: u8,
    pub tx_power: u8,
    /// Option bits: ADR, duty cycle control, class C, extended packet
    /// format, MAC forwarding
    pub options: u8,
    pub power_saving_mode: u8,
    pub retransmissions: u8,
    pub band_index: u8,
}

impl RadioStackConfig {
    fn to_wire(&self) -> [u8; 6] {
        [
            self.data_rate,
            self.tx_power,
            self.options,
            self.power_saving_mode,
            self.retransmissions,
            self.band_index,
        ]
    }
}

/// Inbound message dispatcher, the [`MessageSink`] of the HCI transport.
///
/// Keeps no per-message state apart from the pending join callback; every
/// indication must be consumed from within the callback chain because the
/// next frame overwrites the receive buffer.
pub struct LoRaWanDispatcher {
    join_callback: Option<JoinCallback>,
}

impl LoRaWanDispatcher {
    pub fn new() -> Self {
        Self {
            join_callback: None,
        }
    }

    fn process_devmgmt_message(&mut self, message: &HciMessage) {
        let payload = message.payload.as_slice();
        let status = payload.first().copied();
        match (message.msg_id, status) {
            (DEVMGMT_MSG_PING_RSP, Some(status)) => {
                show_response("ping response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_GET_DEVICE_INFO_RSP, Some(status)) => {
                show_response("device info response", DEVMGMT_STATUS_STRINGS, status);
                if status == 0x00 && payload.len() >= 10 {
                    info!("module type: 0x{:02x}", payload[1]);
                    info!("device address: 0x{:08x}", read_u32_le(&payload[2..]));
                    info!("device id: 0x{:08x}", read_u32_le(&payload[6..]));
                }
            }
            (DEVMGMT_MSG_GET_FW_VERSION_RSP, Some(status)) => {
                Self::firmware_version_rsp(status, payload);
            }
            (DEVMGMT_MSG_RESET_RSP, Some(status)) => {
                show_response("reset response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_SET_OPMODE_RSP, Some(status)) => {
                show_response("set opmode response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_GET_OPMODE_RSP, Some(status)) => {
                show_response("get opmode response", DEVMGMT_STATUS_STRINGS, status);
                if let Some(&mode) = payload.get(1) {
                    info!("operating mode: 0x{:02x}", mode);
                }
            }
            (DEVMGMT_MSG_SET_RTC_RSP, Some(status)) => {
                show_response("set RTC response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_GET_RTC_RSP, Some(status)) => {
                show_response("get RTC response", DEVMGMT_STATUS_STRINGS, status);
                if status == 0x00 && payload.len() >= 5 {
                    let time = RtcTime::from_wire(read_u32_le(&payload[1..]));
                    info!(
                        "RTC time: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        time.year, time.month, time.day, time.hour, time.minute, time.second
                    );
                }
            }
            (DEVMGMT_MSG_SET_RTC_ALARM_RSP, Some(status)) => {
                show_response("set RTC alarm response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_CLEAR_RTC_ALARM_RSP, Some(status)) => {
                show_response("clear RTC alarm response", DEVMGMT_STATUS_STRINGS, status);
            }
            (DEVMGMT_MSG_GET_RTC_ALARM_RSP, Some(status)) => {
                show_response("get RTC alarm response", DEVMGMT_STATUS_STRINGS, status);
                if status == 0x00 && payload.len() >= 5 {
                    info!("alarm type: 0x{:02x}", payload[1]);
                    info!(
                        "alarm time: {:02}:{:02}:{:02}",
                        payload[2], payload[3], payload[4]
                    );
                }
            }
            (DEVMGMT_MSG_RTC_ALARM_IND, _) => {
                info!("RTC alarm indication");
            }
            (msg_id, _) => {
                warn!("unhandled device management message - msg_id: 0x{:02x}", msg_id);
            }
        }
    }

    fn firmware_version_rsp(status: u8, payload: &[u8]) {
        show_response("firmware version response", DEVMGMT_STATUS_STRINGS, status);
        if status != 0x00 || payload.len() < 15 {
            return;
        }
        info!("version: V{}.{}", payload[2], payload[1]);
        info!("build-count: {}", read_u16_le(&payload[3..]));
        if let Ok(date) = core::str::from_utf8(&payload[5..15]) {
            info!("build-date: {}", date);
        }
        // more information attached ?
        if payload.len() > 15 {
            if let Ok(content) = core::str::from_utf8(&payload[15..]) {
                info!("firmware-content: {}", content);
            }
        }
    }

    fn process_lorawan_message(&mut self, message: &HciMessage) {
        let payload = message.payload.as_slice();
        let status = payload.first().copied();
        match (message.msg_id, status) {
            (LORAWAN_MSG_SET_JOIN_PARAM_RSP, Some(status)) => {
                show_response("set join param response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_JOIN_NETWORK_RSP, Some(status)) => {
                show_response("join network response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_SEND_UDATA_RSP, Some(status)) => {
                show_response("send U-Data response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_SEND_CDATA_RSP, Some(status)) => {
                show_response("send C-Data response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_JOIN_TRANSMIT_IND, Some(status)) => {
                Self::join_tx_indication(status, payload);
            }
            (LORAWAN_MSG_JOIN_NETWORK_IND, Some(status)) => {
                self.join_network_indication(status, payload);
            }
            (LORAWAN_MSG_SEND_UDATA_IND, Some(status)) => {
                show_response(
                    "U-Data tx indication",
                    LORAWAN_STATUS_STRINGS,
                    tx_indication_status(status),
                );
            }
            (LORAWAN_MSG_SEND_CDATA_IND, Some(status)) => {
                show_response(
                    "C-Data tx indication",
                    LORAWAN_STATUS_STRINGS,
                    tx_indication_status(status),
                );
            }
            (LORAWAN_MSG_RECV_UDATA_IND, Some(flags)) => {
                Self::data_rx_indication("U-Data", flags, payload);
            }
            (LORAWAN_MSG_RECV_CDATA_IND, Some(flags)) => {
                Self::data_rx_indication("C-Data", flags, payload);
            }
            (LORAWAN_MSG_RECV_ACK_IND, _) => {
                info!("ack received indication");
            }
            (LORAWAN_MSG_RECV_NODATA_IND, _) => {
                info!("no data received indication");
            }
            (LORAWAN_MSG_SET_RSTACK_CONFIG_RSP, Some(status)) => {
                show_response("set rstack config response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_GET_RSTACK_CONFIG_RSP, Some(status)) => {
                show_response("get rstack config response", LORAWAN_STATUS_STRINGS, status);
                if status == 0x00 && payload.len() >= 7 {
                    info!("default data rate index: {}", payload[1]);
                    info!("default TX power level: {}", payload[2]);
                    info!("options: 0x{:02x}", payload[3]);
                    info!("power saving mode: {}", payload[4]);
                    info!("retransmissions: {}", payload[5]);
                    info!("band index: {}", payload[6]);
                }
            }
            (LORAWAN_MSG_FACTORY_RESET_RSP, Some(status)) => {
                show_response("factory reset response", LORAWAN_STATUS_STRINGS, status);
            }
            (LORAWAN_MSG_GET_DEVICE_EUI_RSP, Some(status)) => {
                show_response("device EUI response", LORAWAN_STATUS_STRINGS, status);
                if status == 0x00 && payload.len() >= 9 {
                    info!("device EUI: {:02x?}", &payload[1..9]);
                }
            }
            (LORAWAN_MSG_GET_NWK_STATUS_RSP, Some(status)) => {
                show_response("network status response", LORAWAN_STATUS_STRINGS, status);
                if let Some(&state) = payload.get(1) {
                    info!("network status: 0x{:02x}", state);
                }
            }
            (msg_id, _) => {
                warn!("unhandled LoRaWAN SAP message - msg_id: 0x{:02x}", msg_id);
            }
        }
    }

    fn join_tx_indication(status: u8, payload: &[u8]) {
        match status {
            0 => info!("join tx event - status: ok"),
            // channel info attached ?
            1 if payload.len() >= 4 => info!(
                "join tx event: {}, ChnIdx: {}, DR: {} - status: ok",
                payload[3], payload[1], payload[2]
            ),
            _ => info!("join tx event - status: error"),
        }
    }

    fn join_network_indication(&mut self, status: u8, payload: &[u8]) {
        match status {
            0 if payload.len() >= 5 => {
                info!(
                    "join network accept event - device address: 0x{:08x}",
                    read_u32_le(&payload[1..])
                );
            }
            1 if payload.len() >= 10 => {
                info!(
                    "join network accept event - device address: 0x{:08x}, \
                     ChnIdx: {}, DR: {}, RSSI: {}, SNR: {}, RxSlot: {}",
                    read_u32_le(&payload[1..]),
                    payload[5],
                    payload[6],
                    payload[7] as i8,
                    payload[8] as i8,
                    payload[9]
                );
            }
            _ => {
                info!("join network timeout event");
                return;
            }
        }
        // fires exactly once per join request
        if let Some(callback) = self.join_callback.take() {
            callback();
        }
    }

    fn data_rx_indication(context: &str, flags: u8, payload: &[u8]) {
        let mut payload_size = payload.len() - 1;
        // rx channel info attached ?
        if flags & 0x01 != 0 {
            payload_size = payload_size.saturating_sub(RX_CHANNEL_INFO_LENGTH);
        }

        if payload_size >= 1 {
            info!("{} rx event - port: 0x{:02x}", context, payload[1]);
            info!("app-payload: {:02x?}", &payload[2..1 + payload_size]);
        }

        info!(
            "ack for uplink packet: {}",
            if flags & 0x02 != 0 { "yes" } else { "no" }
        );
        info!(
            "frame pending: {}",
            if flags & 0x04 != 0 { "yes" } else { "no" }
        );

        if flags & 0x01 != 0 && payload.len() >= 1 + payload_size + RX_CHANNEL_INFO_LENGTH {
            let rx_info = &payload[1 + payload_size..];
            info!(
                "ChnIdx: {}, DR: {}, RSSI: {}, SNR: {}, RxSlot: {}",
                rx_info[0], rx_info[1], rx_info[2] as i8, rx_info[3] as i8, rx_info[4]
            );
        }
    }
}

impl Default for LoRaWanDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for LoRaWanDispatcher {
    fn message_received(&mut self, message: HciMessage) -> Option<HciMessage> {
        match message.sap_id {
            DEVMGMT_SAP_ID => self.process_devmgmt_message(&message),
            LORAWAN_SAP_ID => self.process_lorawan_message(&message),
            sap_id => warn!("message for unknown SAP 0x{:02x} ignored", sap_id),
        }
        // single receive path: hand the buffer straight back
        Some(message)
    }
}

/// Host-side handle of one iM881A modem.
pub struct LoRaWanModem<P> {
    hci: HciTransport<P, LoRaWanDispatcher>,
}

impl<P: SerialPort> LoRaWanModem<P> {
    pub fn new(port: P) -> Self {
        Self {
            hci: HciTransport::new(port, LoRaWanDispatcher::new()),
        }
    }

    /// Push received serial bytes into the stack. Responses, indications
    /// and the join callback all run from within this call.
    pub fn process_rx_data(&mut self, data: &[u8]) {
        self.hci.process_rx_data(data);
    }

    /// Frames dropped so far for a bad frame check sequence.
    pub fn crc_errors(&self) -> u32 {
        self.hci.crc_errors()
    }

    fn send_request(&mut self, sap_id: u8, msg_id: u8, payload: &[u8]) -> Result<(), Error> {
        let message = HciMessage::with_payload(sap_id, msg_id, payload)?;
        self.hci.send_message(&message)?;
        Ok(())
    }

    pub fn send_ping(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_PING_REQ, &[])
    }

    pub fn get_device_info(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_GET_DEVICE_INFO_REQ, &[])
    }

    pub fn get_firmware_version(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_GET_FW_VERSION_REQ, &[])
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_RESET_REQ, &[])
    }

    pub fn set_op_mode(&mut self, mode: u8) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_SET_OPMODE_REQ, &[mode])
    }

    pub fn get_op_mode(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_GET_OPMODE_REQ, &[])
    }

    pub fn set_rtc(&mut self, time: &RtcTime) -> Result<(), Error> {
        self.send_request(
            DEVMGMT_SAP_ID,
            DEVMGMT_MSG_SET_RTC_REQ,
            &time.to_wire().to_le_bytes(),
        )
    }

    pub fn get_rtc(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_GET_RTC_REQ, &[])
    }

    /// Arm the RTC alarm. `alarm_type` selects single or daily wakeup.
    pub fn set_rtc_alarm(
        &mut self,
        alarm_type: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<(), Error> {
        self.send_request(
            DEVMGMT_SAP_ID,
            DEVMGMT_MSG_SET_RTC_ALARM_REQ,
            &[alarm_type, hour, minute, second],
        )
    }

    pub fn get_rtc_alarm(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_GET_RTC_ALARM_REQ, &[])
    }

    pub fn clear_rtc_alarm(&mut self) -> Result<(), Error> {
        self.send_request(DEVMGMT_SAP_ID, DEVMGMT_MSG_CLEAR_RTC_ALARM_REQ, &[])
    }

    pub fn factory_reset(&mut self) -> Result<(), Error> {
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_FACTORY_RESET_REQ, &[])
    }

    pub fn get_device_eui(&mut self) -> Result<(), Error> {
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_GET_DEVICE_EUI_REQ, &[])
    }

    /// Store the OTAA join parameters in the modem.
    pub fn set_join_parameters(
        &mut self,
        app_eui: &[u8; APP_EUI_LENGTH],
        app_key: &[u8; APP_KEY_LENGTH],
    ) -> Result<(), Error> {
        let mut payload = [0u8; APP_EUI_LENGTH + APP_KEY_LENGTH];
        payload[..APP_EUI_LENGTH].copy_from_slice(app_eui);
        payload[APP_EUI_LENGTH..].copy_from_slice(app_key);
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_SET_JOIN_PARAM_REQ, &payload)
    }

    /// Start the over-the-air activation. `callback` fires exactly once
    /// when the network accepts the join; a join timeout leaves it armed
    /// for the next indication.
    pub fn join_network(&mut self, callback: Option<JoinCallback>) -> Result<(), Error> {
        self.hci.receiver_mut().join_callback = callback;
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_JOIN_NETWORK_REQ, &[])
    }

    /// Send an unconfirmed uplink on the given port.
    pub fn send_unconfirmed_data(&mut self, port: u8, data: &[u8]) -> Result<(), Error> {
        self.send_radio_data(LORAWAN_MSG_SEND_UDATA_REQ, port, data)
    }

    /// Send a confirmed uplink on the given port.
    pub fn send_confirmed_data(&mut self, port: u8, data: &[u8]) -> Result<(), Error> {
        self.send_radio_data(LORAWAN_MSG_SEND_CDATA_REQ, port, data)
    }

    fn send_radio_data(&mut self, msg_id: u8, port: u8, data: &[u8]) -> Result<(), Error> {
        // one payload byte is reserved for the port
        if data.len() > MAX_PAYLOAD_LENGTH - 1 {
            return Err(Error::PayloadTooLong);
        }
        let mut message = HciMessage::new(LORAWAN_SAP_ID, msg_id);
        message.payload.push(port).unwrap();
        message.payload.extend_from_slice(data).unwrap();
        self.hci.send_message(&message)?;
        Ok(())
    }

    pub fn get_network_status(&mut self) -> Result<(), Error> {
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_GET_NWK_STATUS_REQ, &[])
    }

    pub fn set_radio_stack_config(&mut self, config: &RadioStackConfig) -> Result<(), Error> {
        self.send_request(
            LORAWAN_SAP_ID,
            LORAWAN_MSG_SET_RSTACK_CONFIG_REQ,
            &config.to_wire(),
        )
    }

    pub fn get_radio_stack_config(&mut self) -> Result<(), Error> {
        self.send_request(LORAWAN_SAP_ID, LORAWAN_MSG_GET_RSTACK_CONFIG_REQ, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::tests::{wire_frame, RecordingPort};
    use crate::hci::{FCS_SIZE, HEADER_SIZE, WAKEUP_CHARS};
    use crate::slip::SLIP_END;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn modem() -> LoRaWanModem<RecordingPort> {
        LoRaWanModem::new(RecordingPort::new())
    }

    fn port(modem: &LoRaWanModem<RecordingPort>) -> &RecordingPort {
        modem.hci.port()
    }

    #[test]
    fn test_send_unconfirmed_data_wire_bytes() {
        let mut modem = modem();
        modem.send_unconfirmed_data(1, &[0x11, 0x22, 0x33]).unwrap();

        let written = &port(&modem).written;
        // wake-up preamble first
        assert_eq!(&written[..WAKEUP_CHARS], &[SLIP_END; WAKEUP_CHARS][..]);

        let frame = port(&modem).frame_bytes();
        assert_eq!(frame.first(), Some(&SLIP_END));
        assert_eq!(frame.last(), Some(&SLIP_END));
        let body = &frame[1..frame.len() - 1];
        assert_eq!(&body[..6], &[0x10, 0x0d, 0x01, 0x11, 0x22, 0x33]);
        assert_eq!(body.len(), HEADER_SIZE + 4 + FCS_SIZE);
        assert!(crate::crc16::check(body, crate::crc16::CRC16_INIT_VALUE));
    }

    #[test]
    fn test_send_radio_data_length_limit() {
        let mut modem = modem();
        let max = [0u8; MAX_PAYLOAD_LENGTH - 1];
        assert!(modem.send_unconfirmed_data(1, &max).is_ok());

        let too_long = [0u8; MAX_PAYLOAD_LENGTH];
        assert_eq!(
            modem.send_confirmed_data(1, &too_long),
            Err(Error::PayloadTooLong)
        );
    }

    #[test]
    fn test_set_join_parameters_payload_layout() {
        let mut modem = modem();
        let app_eui = [0x70, 0xb3, 0xd5, 0x00, 0x00, 0x00, 0x00, 0x01];
        let app_key = [0x2b; APP_KEY_LENGTH];
        modem.set_join_parameters(&app_eui, &app_key).unwrap();

        let frame = port(&modem).frame_bytes();
        let body = &frame[1..frame.len() - 1];
        assert_eq!(&body[..2], &[LORAWAN_SAP_ID, LORAWAN_MSG_SET_JOIN_PARAM_REQ]);
        assert_eq!(&body[2..10], &app_eui);
        assert_eq!(&body[10..26], &app_key);
    }

    static JOIN_NOTIFICATIONS: AtomicUsize = AtomicUsize::new(0);

    fn count_join() {
        JOIN_NOTIFICATIONS.fetch_add(1, Ordering::SeqCst);
    }

    fn join_indication(status: u8) -> std::vec::Vec<u8> {
        let mut payload = vec![status];
        payload.extend_from_slice(&[0x78, 0x56, 0x34, 0x12]); // device address LE
        if status == 1 {
            payload.extend_from_slice(&[2, 5, 200, 7, 1]); // channel metadata
        }
        wire_frame(LORAWAN_SAP_ID, LORAWAN_MSG_JOIN_NETWORK_IND, &payload)
    }

    #[test]
    fn test_join_callback_fires_once_on_plain_success() {
        JOIN_NOTIFICATIONS.store(0, Ordering::SeqCst);
        let mut modem = modem();
        modem.join_network(Some(count_join)).unwrap();

        modem.process_rx_data(&join_indication(0));
        assert_eq!(JOIN_NOTIFICATIONS.load(Ordering::SeqCst), 1);

        // a duplicate indication must not fire the callback again
        modem.process_rx_data(&join_indication(0));
        assert_eq!(JOIN_NOTIFICATIONS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_callback_fires_once_with_channel_info() {
        JOIN_NOTIFICATIONS.store(0, Ordering::SeqCst);
        let mut modem = modem();
        modem.join_network(Some(count_join)).unwrap();

        modem.process_rx_data(&join_indication(1));
        assert_eq!(JOIN_NOTIFICATIONS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_timeout_does_not_fire_callback() {
        JOIN_NOTIFICATIONS.store(0, Ordering::SeqCst);
        let mut modem = modem();
        modem.join_network(Some(count_join)).unwrap();

        modem.process_rx_data(&join_indication(2));
        assert_eq!(JOIN_NOTIFICATIONS.load(Ordering::SeqCst), 0);

        // the callback stays armed and fires on a later accept
        modem.process_rx_data(&join_indication(0));
        assert_eq!(JOIN_NOTIFICATIONS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tx_indication_status_remap() {
        // raw 1 is the firmware's "ok" for uplink tx indications
        assert_eq!(
            status_string(LORAWAN_STATUS_STRINGS, tx_indication_status(1)),
            Some("ok")
        );
        // raw 0 lands on the id 0 table entry as well
        assert_eq!(
            status_string(LORAWAN_STATUS_STRINGS, tx_indication_status(0)),
            Some("ok")
        );
        assert_eq!(
            status_string(LORAWAN_STATUS_STRINGS, tx_indication_status(2)),
            Some("error")
        );
    }

    #[test]
    fn test_tx_indications_are_consumed() {
        let mut modem = modem();
        for msg_id in [LORAWAN_MSG_SEND_UDATA_IND, LORAWAN_MSG_SEND_CDATA_IND] {
            for status in [0u8, 1, 2] {
                modem.process_rx_data(&wire_frame(LORAWAN_SAP_ID, msg_id, &[status]));
            }
        }
        assert_eq!(modem.crc_errors(), 0);
    }

    #[test]
    fn test_data_rx_indication_with_channel_info() {
        let mut modem = modem();
        // flags: channel info + ack; port 0x02, payload 0xAA 0xBB, 5 info bytes
        let payload = [0x03, 0x02, 0xaa, 0xbb, 4, 5, 190, 8, 0];
        modem.process_rx_data(&wire_frame(
            LORAWAN_SAP_ID,
            LORAWAN_MSG_RECV_UDATA_IND,
            &payload,
        ));
        assert_eq!(modem.crc_errors(), 0);
    }

    #[test]
    fn test_unknown_sap_and_msg_ignored() {
        let mut modem = modem();
        modem.process_rx_data(&wire_frame(0x42, 0x01, &[0x00]));
        modem.process_rx_data(&wire_frame(LORAWAN_SAP_ID, 0x7f, &[0x00]));
        modem.process_rx_data(&wire_frame(DEVMGMT_SAP_ID, 0x7f, &[0x00]));
        // still operational afterwards
        modem.process_rx_data(&wire_frame(DEVMGMT_SAP_ID, DEVMGMT_MSG_PING_RSP, &[0x00]));
        assert_eq!(modem.crc_errors(), 0);
    }

    #[test]
    fn test_empty_payload_response_ignored() {
        let mut modem = modem();
        // status byte missing entirely - must not panic
        modem.process_rx_data(&wire_frame(LORAWAN_SAP_ID, LORAWAN_MSG_JOIN_NETWORK_RSP, &[]));
    }

    #[test]
    fn test_status_table_lookup() {
        assert_eq!(status_string(DEVMGMT_STATUS_STRINGS, 0x00), Some("ok"));
        assert_eq!(
            status_string(DEVMGMT_STATUS_STRINGS, 0x04),
            Some("wrong device mode")
        );
        assert_eq!(status_string(DEVMGMT_STATUS_STRINGS, 0x42), None);
        assert_eq!(
            status_string(LORAWAN_STATUS_STRINGS, 0x08),
            Some("HCI message length error")
        );
    }

    #[test]
    fn test_rtc_time_round_trip() {
        let time = RtcTime {
            year: 2026,
            month: 8,
            day: 6,
            hour: 13,
            minute: 37,
            second: 42,
        };
        let raw = time.to_wire();
        assert_eq!(raw & 0x3f, 42);
        assert_eq!(raw >> 6 & 0x3f, 37);
        assert_eq!(raw >> 12 & 0x1f, 13);
        assert_eq!(raw >> 17 & 0x1f, 6);
        assert_eq!(raw >> 22 & 0x0f, 8);
        assert_eq!(raw >> 26, 26);
        assert_eq!(RtcTime::from_wire(raw), time);
    }

    #[test]
    fn test_endian_helpers() {
        assert_eq!(read_u16_le(&[0x34, 0x12]), 0x1234);
        assert_eq!(read_u32_le(&[0x78, 0x56, 0x34, 0x12]), 0x12345678);
    }
}
