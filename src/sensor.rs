/// Sensor-type registry and broadcast data-page decoding. One descriptor
/// per supported sensor family, immutable for the process lifetime, looked
/// up either by pairing short code or by the device-type code carried in a
/// channel id response.
use crate::defines;
use crate::error::AntError;
use crate::message::combine;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorKind {
    Unused,
    HeartRate,
    Power,
    /// Legacy cinqo/quarq power meter. Needs a companion control channel
    /// before it reports as paired.
    QuarqPower,
    /// The companion control channel for a legacy quarq power meter.
    QuarqControl,
    Speed,
    Cadence,
    SpeedCadence,
}

impl SensorKind {
    /// Whether this kind carries power data.
    pub fn is_power(self) -> bool {
        matches!(self, SensorKind::Power | SensorKind::QuarqPower)
    }
}

pub struct SensorTypeDescriptor {
    pub kind: SensorKind,
    pub channel_type: u8,
    pub period: u16,
    pub device_type: u8,
    pub frequency: u8,
    pub network: u8,
    pub display_name: &'static str,
    /// Single-character suffix used in pairing strings. Internal-only
    /// kinds (the quarq control channel) have none.
    pub short_code: Option<char>,
}

pub static SENSOR_TYPES: [SensorTypeDescriptor; 7] = [
    SensorTypeDescriptor {
        kind: SensorKind::HeartRate,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_HR_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_HR,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Heartrate",
        short_code: Some('h'),
    },
    SensorTypeDescriptor {
        kind: SensorKind::Power,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_POWER_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_POWER,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Power",
        short_code: Some('p'),
    },
    SensorTypeDescriptor {
        kind: SensorKind::QuarqPower,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_POWER_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_POWER,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Quarq Power",
        short_code: None,
    },
    SensorTypeDescriptor {
        kind: SensorKind::QuarqControl,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_QUARQ_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_QUARQ_CONTROL,
        frequency: defines::ANT_QUARQ_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Quarq Control",
        short_code: None,
    },
    SensorTypeDescriptor {
        kind: SensorKind::Speed,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_SPEED_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_SPEED,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Speed",
        short_code: Some('s'),
    },
    SensorTypeDescriptor {
        kind: SensorKind::Cadence,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_CADENCE_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_CADENCE,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Cadence",
        short_code: Some('c'),
    },
    SensorTypeDescriptor {
        kind: SensorKind::SpeedCadence,
        channel_type: defines::CHANNEL_TYPE_SLAVE,
        period: defines::ANT_SPORT_SPEED_CADENCE_PERIOD,
        device_type: defines::ANT_DEVICE_TYPE_SPEED_CADENCE,
        frequency: defines::ANT_SPORT_FREQUENCY,
        network: defines::ANT_NETWORK,
        display_name: "Speed + Cadence",
        short_code: Some('d'),
    },
];

pub fn descriptor(kind: SensorKind) -> Option<&'static SensorTypeDescriptor> {
    SENSOR_TYPES.iter().find(|d| d.kind == kind)
}

pub fn kind_from_short_code(code: char) -> Option<SensorKind> {
    SENSOR_TYPES
        .iter()
        .find(|d| d.short_code == Some(code))
        .map(|d| d.kind)
}

pub fn kind_from_device_type(device_type: u8) -> Option<SensorKind> {
    SENSOR_TYPES
        .iter()
        .find(|d| d.device_type == device_type)
        .map(|d| d.kind)
}

/// Parse a pairing string `<device_number><suffix>`, e.g. `12345h` or the
/// wildcard `0p`. Device number 0 pairs with any device of that type.
pub fn parse_pairing(s: &str) -> Result<(u16, SensorKind)> {
    let bad = || AntError::BadPairing(s.to_string());
    let suffix = s.chars().last().ok_or_else(bad)?;
    let kind = kind_from_short_code(suffix).ok_or_else(bad)?;
    let number = s[..s.len() - suffix.len_utf8()]
        .parse::<u16>()
        .map_err(|_| bad())?;
    Ok((number, kind))
}

/// The default configuration when the host supplies no pairing strings:
/// one wildcard channel per host-facing sensor type.
pub fn default_pairings() -> Vec<(u16, SensorKind)> {
    SENSOR_TYPES
        .iter()
        .filter(|d| d.short_code.is_some())
        .map(|d| (0, d.kind))
        .collect()
}

/// A decoded sensor reading from a broadcast data page.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorValue {
    HeartRate(u8),
    /// Instantaneous power in watts plus the crank cadence the meter
    /// reports alongside it.
    Power { watts: u16, cadence: u8 },
    /// Crank revolutions per minute.
    Cadence(f32),
    /// Wheel revolutions per minute. The host applies wheel circumference.
    WheelSpeed(f32),
}

const POWER_STANDARD_PAGE: u8 = 0x10;

/// Per-channel decoder state. Speed and cadence sensors report cumulative
/// event-time/revolution counters, so turning pages into rates needs the
/// previous sample; counters roll over at 16 bits.
#[derive(Debug, Default)]
pub struct PageDecoder {
    speed: RevCounter,
    cadence: RevCounter,
}

#[derive(Debug, Default)]
struct RevCounter {
    event_time: Option<u16>,
    rev_count: u16,
}

impl RevCounter {
    /// Returns revolutions per minute from a pair of cumulative counters,
    /// event time in 1/1024s units. None until a second distinct sample
    /// arrives.
    fn update(&mut self, event_time: u16, rev_count: u16) -> Option<f32> {
        let last_time = match self.event_time {
            Some(t) => t,
            None => {
                self.event_time = Some(event_time);
                self.rev_count = rev_count;
                return None;
            }
        };
        let dt = event_time.wrapping_sub(last_time);
        if dt == 0 {
            // Coasting or a repeated page.
            return None;
        }
        let revs = rev_count.wrapping_sub(self.rev_count);
        self.event_time = Some(event_time);
        self.rev_count = rev_count;
        Some(revs as f32 * 60.0 * 1024.0 / dt as f32)
    }
}

impl PageDecoder {
    pub fn new() -> Self {
        PageDecoder::default()
    }

    /// Decode one 8-byte broadcast payload for the given sensor kind.
    /// Unknown pages and short payloads yield nothing.
    pub fn decode(&mut self, kind: SensorKind, data: &[u8]) -> Vec<SensorValue> {
        if data.len() != 8 {
            return vec![];
        }
        match kind {
            SensorKind::HeartRate => {
                // Every heartrate data page carries the computed heart rate
                // in the final byte, legacy and current devices alike.
                vec![SensorValue::HeartRate(data[7])]
            }
            SensorKind::Power | SensorKind::QuarqPower => {
                if data[0] != POWER_STANDARD_PAGE {
                    return vec![];
                }
                vec![SensorValue::Power {
                    watts: combine(&data[6..8]) as u16,
                    cadence: data[3],
                }]
            }
            SensorKind::Speed => {
                let time = combine(&data[4..6]) as u16;
                let revs = combine(&data[6..8]) as u16;
                match self.speed.update(time, revs) {
                    Some(rpm) => vec![SensorValue::WheelSpeed(rpm)],
                    None => vec![],
                }
            }
            SensorKind::Cadence => {
                let time = combine(&data[4..6]) as u16;
                let revs = combine(&data[6..8]) as u16;
                match self.cadence.update(time, revs) {
                    Some(rpm) => vec![SensorValue::Cadence(rpm)],
                    None => vec![],
                }
            }
            SensorKind::SpeedCadence => {
                // Combined sensor: cadence counters in bytes 0..4, speed
                // counters in bytes 4..8.
                let mut values = Vec::new();
                let ctime = combine(&data[0..2]) as u16;
                let crevs = combine(&data[2..4]) as u16;
                if let Some(rpm) = self.cadence.update(ctime, crevs) {
                    values.push(SensorValue::Cadence(rpm));
                }
                let stime = combine(&data[4..6]) as u16;
                let srevs = combine(&data[6..8]) as u16;
                if let Some(rpm) = self.speed.update(stime, srevs) {
                    values.push(SensorValue::WheelSpeed(rpm));
                }
                values
            }
            SensorKind::QuarqControl | SensorKind::Unused => vec![],
        }
    }
}
