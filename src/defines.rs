/// Protocol-wide constants shared by the codec, the channel manager and the
/// transports. Values come straight from the ANT+ documentation; the network
/// key is the public ANT+ key every consumer sensor uses.
pub const ANT_STANDARD_DATA_PAYLOAD_SIZE: usize = 8;
pub const ANT_EXT_MESG_DEVICE_ID_FIELD_SIZE: usize = 4;
pub const ANT_EXT_STRING_SIZE: usize = 27;

pub const ANT_NETWORK: u8 = 1;
pub const ANT_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

/// Receive-only slave channel.
pub const CHANNEL_TYPE_SLAVE: u8 = 0x00;

/// 2.4GHz carrier offset shared by the ANT+ sport profiles (2457 MHz).
pub const ANT_SPORT_FREQUENCY: u8 = 57;
/// Frequency used by the quarq control channel.
pub const ANT_QUARQ_FREQUENCY: u8 = 0x41;

/// Channel periods in 1/32768s ticks.
pub const ANT_SPORT_HR_PERIOD: u16 = 8070;
pub const ANT_SPORT_POWER_PERIOD: u16 = 8182;
pub const ANT_SPORT_SPEED_PERIOD: u16 = 8118;
pub const ANT_SPORT_CADENCE_PERIOD: u16 = 8102;
pub const ANT_SPORT_SPEED_CADENCE_PERIOD: u16 = 8086;
pub const ANT_QUARQ_PERIOD: u16 = 8192;

/// ANT+ device type codes carried in the channel id.
pub const ANT_DEVICE_TYPE_HR: u8 = 0x78;
pub const ANT_DEVICE_TYPE_POWER: u8 = 0x0B;
pub const ANT_DEVICE_TYPE_SPEED: u8 = 0x7B;
pub const ANT_DEVICE_TYPE_CADENCE: u8 = 0x7A;
pub const ANT_DEVICE_TYPE_SPEED_CADENCE: u8 = 0x79;
pub const ANT_DEVICE_TYPE_QUARQ_CONTROL: u8 = 0x60;

/// Search timeouts in seconds. A quick search is run first when pairing a
/// known device id; unresolved channels fall back to the slow rotation.
pub const ANT_QUICK_SEARCH_TIMEOUT: f32 = 5.0;
pub const ANT_DEFAULT_SEARCH_TIMEOUT: f32 = 15.0;

/// Dongle firmware drops back-to-back frames unless each write is followed
/// by a short run of zero bytes.
pub const TX_PAD_BYTES: usize = 2;
