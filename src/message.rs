/// Message module provides a way for creating messages to send to the ANT+
/// radio along with decoding frames received from the radio into typed
/// responses the engine can dispatch on.
use crate::framing::Frame;
use std::convert::TryInto;
use std::fmt;

pub const MESG_TX_SYNC: u8 = 0xA4;
pub const MESG_SYNC_SIZE: usize = 1;
pub const MESG_SIZE_SIZE: usize = 1;
pub const MESG_ID_SIZE: usize = 1;
pub const MESG_CHANNEL_NUM_SIZE: usize = 1;
pub const MESG_EXT_MESG_BF_SIZE: usize = 1;
pub const MESG_CHECKSUM_SIZE: usize = 1;

pub const MESG_ANT_MAX_PAYLOAD_SIZE: usize = crate::defines::ANT_STANDARD_DATA_PAYLOAD_SIZE;
pub const MESG_MAX_EXT_DATA_SIZE: usize =
    crate::defines::ANT_EXT_MESG_DEVICE_ID_FIELD_SIZE + crate::defines::ANT_EXT_STRING_SIZE;
pub const MESG_MAX_DATA_SIZE: usize =
    MESG_ANT_MAX_PAYLOAD_SIZE + MESG_EXT_MESG_BF_SIZE + MESG_MAX_EXT_DATA_SIZE;
pub const MESG_MAX_SIZE_VALUE: usize = MESG_MAX_DATA_SIZE + MESG_CHANNEL_NUM_SIZE;
pub const MESG_HEADER_SIZE: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE + MESG_ID_SIZE;
pub const MESG_SIZE_OFFSET: usize = MESG_SYNC_SIZE;
pub const MESG_ID_OFFSET: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE;
pub const MESG_DATA_OFFSET: usize = MESG_HEADER_SIZE;

pub const RESPONSE_NO_ERROR: u8 = 0x00;
pub const MESG_EVENT_ID: u8 = 0x01;
pub const MESG_VERSION_ID: u8 = 0x3E;
pub const MESG_RESPONSE_EVENT_ID: u8 = 0x40;
pub const MESG_UNASSIGN_CHANNEL_ID: u8 = 0x41;
pub const MESG_ASSIGN_CHANNEL_ID: u8 = 0x42;
pub const MESG_CHANNEL_MESG_PERIOD_ID: u8 = 0x43;
pub const MESG_CHANNEL_SEARCH_TIMEOUT_ID: u8 = 0x44;
pub const MESG_CHANNEL_RADIO_FREQ_ID: u8 = 0x45;
pub const MESG_NETWORK_KEY_ID: u8 = 0x46;
pub const MESG_RESET: u8 = 0x4A;
pub const MESG_OPEN_CHANNEL_ID: u8 = 0x4B;
pub const MESG_CLOSE_CHANNEL_ID: u8 = 0x4C;
pub const MESG_REQUEST: u8 = 0x4D;
pub const MESG_BROADCAST_DATA_ID: u8 = 0x4E;
pub const MESG_ACKNOWLEDGE_DATA_ID: u8 = 0x4F;
pub const MESG_BURST_DATA_ID: u8 = 0x50;
pub const MESG_CHANNEL_ID_ID: u8 = 0x51;
pub const MESG_CHANNEL_STATUS_ID: u8 = 0x52;
pub const MESG_CAPABILITIES_ID: u8 = 0x54;
pub const MESG_SERIAL_NUMBER_ID: u8 = 0x61;
pub const MESG_STARTUP_MESG_ID: u8 = 0x6F;

pub const EVENT_RX_SEARCH_TIMEOUT: u8 = 0x01;
pub const EVENT_RX_FAIL: u8 = 0x02;
pub const EVENT_TX: u8 = 0x03;
pub const EVENT_TRANSFER_TX_COMPLETED: u8 = 0x05;
pub const EVENT_TRANSFER_TX_FAILED: u8 = 0x06;
pub const EVENT_CHANNEL_CLOSED: u8 = 0x07;
pub const EVENT_RX_FAIL_GO_TO_SEARCH: u8 = 0x08;
pub const EVENT_CHANNEL_COLLISION: u8 = 0x09;
pub const CHANNEL_IN_WRONG_STATE: u8 = 0x15;

/// Responses that can be received from the ANT+ radio.
/// Startup messages arrive after a reset. ChannelEvent messages carry both
/// command acknowledgements and asynchronous radio events. The data variants
/// carry sensor payloads. Anything the engine does not act on (version,
/// capabilities, serial number included) still decodes, worst case into
/// `Unknown` carrying the raw frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Startup(StartupMessage),
    ChannelEvent(ChannelEventMessage),
    BroadcastData(BroadcastDataMessage),
    AcknowledgedData(AcknowledgeDataMessage),
    BurstData(BurstDataMessage),
    ChannelStatus(ChannelStatusMessage),
    ChannelId(ChannelIdMessage),
    Capabilities(CapabilitiesMessage),
    Version(VersionMessage),
    SerialNumber(SerialNumberMessage),
    Unknown(Frame),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartupMessage(pub u8);

impl StartupMessage {
    pub fn reason(&self) -> StartupReason {
        match self.0 {
            0x00 => StartupReason::PowerOnReset,
            0x01 => StartupReason::HardwareResetLine,
            0x02 => StartupReason::WatchDogReset,
            0x20 => StartupReason::CommandReset,
            0x40 => StartupReason::SynchronousReset,
            0x80 => StartupReason::SuspendReset,
            _ => StartupReason::Error,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum StartupReason {
    PowerOnReset,
    HardwareResetLine,
    WatchDogReset,
    CommandReset,
    SynchronousReset,
    SuspendReset,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelResponseCode {
    ResponseNoError,
    EventRxSearchTimeout,
    EventRxFail,
    EventTx,
    EventTransferTxCompleted,
    EventTransferTxFailed,
    EventChannelClosed,
    EventRxFailGoToSearch,
    ChannelCollision,
    ChannelInWrongState,
    Unknown(u8),
}

/// Channel/response event: `channel, responding message id, code`. A
/// message id of MESG_EVENT_ID marks an unsolicited radio event rather
/// than a command acknowledgement.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEventMessage([u8; 3]);

impl ChannelEventMessage {
    pub fn new(channel: u8, message_id: u8, code: u8) -> Self {
        Self([channel, message_id, code])
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn message_id(&self) -> u8 {
        self.0[1]
    }

    pub fn is_event(&self) -> bool {
        self.0[1] == MESG_EVENT_ID
    }

    pub fn code(&self) -> ChannelResponseCode {
        match self.0[2] {
            0x00 => ChannelResponseCode::ResponseNoError,
            0x01 => ChannelResponseCode::EventRxSearchTimeout,
            0x02 => ChannelResponseCode::EventRxFail,
            0x03 => ChannelResponseCode::EventTx,
            0x05 => ChannelResponseCode::EventTransferTxCompleted,
            0x06 => ChannelResponseCode::EventTransferTxFailed,
            0x07 => ChannelResponseCode::EventChannelClosed,
            0x08 => ChannelResponseCode::EventRxFailGoToSearch,
            0x09 => ChannelResponseCode::ChannelCollision,
            0x15 => ChannelResponseCode::ChannelInWrongState,
            other => ChannelResponseCode::Unknown(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastDataMessage([u8; 9]);

impl BroadcastDataMessage {
    pub fn new(channel_number: u8, data: &[u8]) -> Self {
        let mut buf: [u8; 9] = [0; 9];
        buf[0] = channel_number;
        buf[1..].copy_from_slice(data);
        Self(buf)
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn data(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn to_message(&self) -> Message {
        Message::new(MESG_BROADCAST_DATA_ID, &self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcknowledgeDataMessage([u8; 9]);

impl AcknowledgeDataMessage {
    pub fn new(channel_number: u8, data: &[u8]) -> Self {
        let mut buf: [u8; 9] = [0; 9];
        buf[0] = channel_number;
        buf[1..].copy_from_slice(data);
        Self(buf)
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn data(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn to_message(&self) -> Message {
        Message::new(MESG_ACKNOWLEDGE_DATA_ID, &self.0)
    }
}

/// Burst packet. The channel number shares its byte with the sequence
/// counter in the upper three bits.
#[derive(Clone, Debug, PartialEq)]
pub struct BurstDataMessage([u8; 9]);

impl BurstDataMessage {
    pub fn new(channel_seq: u8, data: &[u8]) -> Self {
        let mut buf: [u8; 9] = [0; 9];
        buf[0] = channel_seq;
        buf[1..].copy_from_slice(data);
        Self(buf)
    }

    pub fn channel(&self) -> u8 {
        self.0[0] & 0x1F
    }

    pub fn sequence(&self) -> u8 {
        self.0[0] >> 5
    }

    pub fn data(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn to_message(&self) -> Message {
        Message::new(MESG_BURST_DATA_ID, &self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStatusMessage([u8; 2]);

impl ChannelStatusMessage {
    pub fn new(channel: u8, status: u8) -> Self {
        Self([channel, status])
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn status(&self) -> u8 {
        self.0[1]
    }
}

/// Channel id response: the learned `(device number, device type,
/// transmission type)` triple for a channel. This is how a wildcard search
/// discovers which physical sensor it locked onto.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelIdMessage([u8; 5]);

impl ChannelIdMessage {
    pub fn new(channel: u8, device_number: u16, device_type: u8, transmission_type: u8) -> Self {
        Self([
            channel,
            (device_number & 0xFF) as u8,
            ((device_number >> 8) & 0xFF) as u8,
            device_type,
            transmission_type,
        ])
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn device_number(&self) -> u16 {
        bytes_to_u16(&self.0[1..3])
    }

    pub fn device_type(&self) -> u8 {
        self.0[3]
    }

    pub fn transmission_type(&self) -> u8 {
        self.0[4]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CapabilitiesMessage(Vec<u8>);

impl CapabilitiesMessage {
    pub fn max_channels(&self) -> u8 {
        self.0[0]
    }

    pub fn max_networks(&self) -> u8 {
        self.0[1]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionMessage(Vec<u8>);

impl VersionMessage {
    /// Firmware version as a printable string, trailing NULs stripped.
    pub fn version(&self) -> String {
        self.0
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SerialNumberMessage([u8; 4]);

impl SerialNumberMessage {
    pub fn serial_number(&self) -> u32 {
        combine(&self.0)
    }
}

#[derive(Clone, PartialEq)]
pub struct Message {
    pub id: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: u8, data: &[u8]) -> Message {
        Message {
            id,
            data: data.to_vec(),
        }
    }

    /// Converts a message into a framed byte sequence ready for the
    /// transport: sync, length, id, payload, XOR checksum over all of it.
    pub fn encode(&self) -> Vec<u8> {
        let size = self.data.len();
        let total_size = MESG_HEADER_SIZE + size;
        let mut buf: Vec<u8> = vec![0; total_size + MESG_CHECKSUM_SIZE];
        buf[0] = MESG_TX_SYNC;
        buf[MESG_SIZE_OFFSET] = size as u8;
        buf[MESG_ID_OFFSET] = self.id;
        buf[MESG_DATA_OFFSET..total_size].copy_from_slice(&self.data);

        let mut checksum = 0;
        for i in 0..total_size {
            checksum ^= buf[i];
        }
        buf[total_size] = checksum;
        buf
    }

    fn id_as_str(&self) -> &'static str {
        match self.id {
            MESG_STARTUP_MESG_ID => "Startup (0x6F)",
            MESG_CAPABILITIES_ID => "Capabilities (0x54)",
            MESG_RESPONSE_EVENT_ID => "Response Event (0x40)",
            MESG_BROADCAST_DATA_ID => "Broadcast Data (0x4E)",
            MESG_ACKNOWLEDGE_DATA_ID => "Acknowledge Data (0x4F)",
            MESG_BURST_DATA_ID => "Burst Data (0x50)",
            MESG_CHANNEL_ID_ID => "Channel ID (0x51)",
            MESG_CHANNEL_STATUS_ID => "Channel Status (0x52)",
            MESG_VERSION_ID => "Version (0x3E)",
            MESG_SERIAL_NUMBER_ID => "Serial Number (0x61)",
            _ => "Unknown message",
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Message ID: {} DATA: {:x?}", self.id_as_str(), self.data)
    }
}

/// Decode a validated frame into the matching response variant. Wrong-sized
/// payloads for a known id fall through to `Unknown` rather than failing;
/// corrupted frames that slipped past the checksum must never panic here.
pub fn decode(frame: Frame) -> Response {
    let data = frame.payload();
    match frame.id() {
        MESG_STARTUP_MESG_ID if !data.is_empty() => Response::Startup(StartupMessage(data[0])),
        MESG_RESPONSE_EVENT_ID => match data.try_into() {
            Ok(buf) => Response::ChannelEvent(ChannelEventMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_BROADCAST_DATA_ID => match data.try_into() {
            Ok(buf) => Response::BroadcastData(BroadcastDataMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_ACKNOWLEDGE_DATA_ID => match data.try_into() {
            Ok(buf) => Response::AcknowledgedData(AcknowledgeDataMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_BURST_DATA_ID => match data.try_into() {
            Ok(buf) => Response::BurstData(BurstDataMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_CHANNEL_STATUS_ID => match data.try_into() {
            Ok(buf) => Response::ChannelStatus(ChannelStatusMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_CHANNEL_ID_ID => match data.try_into() {
            Ok(buf) => Response::ChannelId(ChannelIdMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        MESG_CAPABILITIES_ID if data.len() >= 2 => {
            Response::Capabilities(CapabilitiesMessage(data.to_vec()))
        }
        MESG_VERSION_ID => Response::Version(VersionMessage(data.to_vec())),
        MESG_SERIAL_NUMBER_ID => match data.try_into() {
            Ok(buf) => Response::SerialNumber(SerialNumberMessage(buf)),
            Err(_) => Response::Unknown(frame),
        },
        _ => Response::Unknown(frame),
    }
}

pub fn reset() -> Message {
    Message::new(MESG_RESET, &[0])
}

pub fn set_network_key(network_number: u8, key: &[u8]) -> Message {
    let mut data = vec![network_number];
    data.extend(key);
    Message::new(MESG_NETWORK_KEY_ID, &data)
}

pub fn get_capabilities() -> Message {
    Message::new(MESG_REQUEST, &[0, MESG_CAPABILITIES_ID])
}

pub fn get_channel_id(channel: u8) -> Message {
    Message::new(MESG_REQUEST, &[channel, MESG_CHANNEL_ID_ID])
}

pub fn get_channel_status(channel: u8) -> Message {
    Message::new(MESG_REQUEST, &[channel, MESG_CHANNEL_STATUS_ID])
}

pub fn assign_channel(channel: u8, channel_type: u8, network: u8) -> Message {
    Message::new(MESG_ASSIGN_CHANNEL_ID, &[channel, channel_type, network])
}

pub fn set_channel_id(
    channel: u8,
    device_number: u16,
    device_type: u8,
    transmission_type: u8,
) -> Message {
    Message::new(
        MESG_CHANNEL_ID_ID,
        &[
            channel,
            (device_number & 0xFF) as u8,
            ((device_number >> 8) & 0xFF) as u8,
            device_type,
            transmission_type,
        ],
    )
}

/// Search timeout is sent to the radio in 2.5s units, truncated.
pub fn set_search_timeout(channel: u8, seconds: f32) -> Message {
    Message::new(
        MESG_CHANNEL_SEARCH_TIMEOUT_ID,
        &[channel, (seconds / 2.5) as u8],
    )
}

/// Period is a 16-bit little-endian count of 1/32768s ticks.
pub fn set_channel_period(channel: u8, period: u16) -> Message {
    Message::new(
        MESG_CHANNEL_MESG_PERIOD_ID,
        &[channel, (period & 0xFF) as u8, ((period >> 8) & 0xFF) as u8],
    )
}

pub fn set_channel_frequency(channel: u8, frequency: u8) -> Message {
    Message::new(MESG_CHANNEL_RADIO_FREQ_ID, &[channel, frequency])
}

pub fn open_channel(channel: u8) -> Message {
    Message::new(MESG_OPEN_CHANNEL_ID, &[channel])
}

pub fn close_channel(channel: u8) -> Message {
    Message::new(MESG_CLOSE_CHANNEL_ID, &[channel])
}

pub fn unassign_channel(channel: u8) -> Message {
    Message::new(MESG_UNASSIGN_CHANNEL_ID, &[channel])
}

// bytes_to_u16 takes a byte slice formatted in [LSB, MSB] and combines the
// two fields together into a single u16.
pub(crate) fn bytes_to_u16(b: &[u8]) -> u16 {
    match b.len() {
        0 => 0,
        1 => b[0] as u16,
        _ => (b[0] as u16) + ((b[1] as u16) << 8),
    }
}

/// combine takes a little-endian byte slice of up to four bytes and returns
/// the combined u32 value.
pub fn combine(b: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for (i, byte) in b.iter().take(4).enumerate() {
        value += (*byte as u32) << (8 * i);
    }
    value
}
