/// Channel slots and the channel manager. An ANT+ radio exposes a small
/// fixed number of concurrent channels; each slot maps to at most one
/// physical sensor. The manager owns the slot array, hands slots out to
/// pairing requests, and resolves the multi-channel power meter quirks
/// (quarq/cinqo control channel linkage, alternate power channels).
use crate::defines;
use crate::error::AntError;
use crate::message::{self, ChannelEventMessage, Message};
use crate::sensor::{self, PageDecoder, SensorKind};
use crate::Result;
use log::debug;
use std::collections::VecDeque;

/// The channel is running its initial, short search for a paired device.
pub const FLAG_QUICK_SEARCH: u8 = 0x01;
/// The channel gave up its quick search and is parked until the manager
/// rotates it back in via `start_waiting_search`.
pub const FLAG_WAITING_SEARCH: u8 = 0x02;

/// Cross-channel relationship for multi-channel power meters. Always an
/// index into the manager's own array, never a reference, so the array
/// stays the sole owner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlLink {
    None,
    SelfLinked,
    Index(usize),
}

/// Hardware bring-up sequence for a slot. Each state means the matching
/// command is in flight; the acknowledgement advances to the next one.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Sequence {
    Idle,
    Assign,
    SetDeviceId,
    SetTimeout,
    SetPeriod,
    SetFrequency,
    Open,
    Running,
}

/// One logical radio channel. Only the manager mutates identity, and only
/// through `open`/`close`.
#[derive(Debug)]
pub struct Channel {
    number: u8,
    kind: SensorKind,
    device_number: u16,
    transmission_type: u8,
    is_searching: bool,
    flags: u8,
    alternate_power: bool,
    paired: bool,
    control: ControlLink,
    sequence: Sequence,
    received: u32,
    dropped: u32,
    pub(crate) decoder: PageDecoder,
}

impl Channel {
    fn new(number: u8) -> Self {
        Channel {
            number,
            kind: SensorKind::Unused,
            device_number: 0,
            transmission_type: 0,
            is_searching: false,
            flags: 0,
            alternate_power: false,
            paired: false,
            control: ControlLink::None,
            sequence: Sequence::Idle,
            received: 0,
            dropped: 0,
            decoder: PageDecoder::new(),
        }
    }

    fn open(&mut self, device_number: u16, kind: SensorKind) {
        self.kind = kind;
        self.device_number = device_number;
        self.transmission_type = 0;
        self.is_searching = true;
        self.flags = FLAG_QUICK_SEARCH;
        self.alternate_power = false;
        self.paired = false;
        self.control = ControlLink::None;
        self.sequence = Sequence::Assign;
        self.received = 0;
        self.dropped = 0;
        self.decoder = PageDecoder::new();
    }

    fn close(&mut self) {
        let number = self.number;
        *self = Channel::new(number);
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn device_number(&self) -> u16 {
        self.device_number
    }

    pub fn in_use(&self) -> bool {
        self.kind != SensorKind::Unused
    }

    pub fn is_searching(&self) -> bool {
        self.is_searching
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_alternate_power(&self) -> bool {
        self.alternate_power
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    pub fn control(&self) -> ControlLink {
        self.control
    }

    /// The device was located: fix the learned identity on the channel and
    /// leave the searching state.
    pub(crate) fn found(&mut self, device_number: u16, transmission_type: u8) {
        self.device_number = device_number;
        self.transmission_type = transmission_type;
        self.is_searching = false;
        self.flags &= !FLAG_QUICK_SEARCH;
        self.paired = true;
    }

    /// Signal dropped out after pairing; the radio falls back to search
    /// while the channel keeps its learned identity.
    pub(crate) fn go_to_search(&mut self) {
        self.is_searching = true;
    }

    /// Any search timeout parks the channel in the waiting state for the
    /// background search rotation, whether this was the initial quick
    /// search or the fallback search after a paired device dropped out.
    /// The radio has closed the channel at this point; only the rotation
    /// brings it back up.
    pub(crate) fn search_timed_out(&mut self) {
        self.flags = (self.flags & !FLAG_QUICK_SEARCH) | FLAG_WAITING_SEARCH;
        self.is_searching = false;
        self.paired = false;
        self.sequence = Sequence::Idle;
    }

    pub(crate) fn record_rx(&mut self) {
        self.received = self.received.saturating_add(1);
    }

    pub(crate) fn record_drop(&mut self) {
        self.dropped = self.dropped.saturating_add(1);
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    /// Signal quality as `100 - 100 * drops / received`.
    pub fn reliability(&self) -> u8 {
        if self.received == 0 {
            return 100;
        }
        let drops = self.dropped.min(self.received);
        (100 - 100 * drops / self.received) as u8
    }

    /// Routes command acknowledgements for this channel while its hardware
    /// configuration sequence runs, returning the next command to send.
    pub(crate) fn route(&mut self, mesg: &ChannelEventMessage) -> Option<Message> {
        match self.sequence {
            Sequence::Assign => {
                if mesg.message_id() == message::MESG_ASSIGN_CHANNEL_ID {
                    debug!("channel {}: assigned, setting channel id", self.number);
                    self.sequence = Sequence::SetDeviceId;
                    return Some(self.set_channel_id());
                }
                None
            }
            Sequence::SetDeviceId => {
                if mesg.message_id() == message::MESG_CHANNEL_ID_ID {
                    debug!("channel {}: id set, setting search timeout", self.number);
                    self.sequence = Sequence::SetTimeout;
                    return Some(self.set_search_timeout());
                }
                None
            }
            Sequence::SetTimeout => {
                if mesg.message_id() == message::MESG_CHANNEL_SEARCH_TIMEOUT_ID {
                    debug!("channel {}: timeout set, setting period", self.number);
                    self.sequence = Sequence::SetPeriod;
                    return Some(self.set_period());
                }
                None
            }
            Sequence::SetPeriod => {
                if mesg.message_id() == message::MESG_CHANNEL_MESG_PERIOD_ID {
                    debug!("channel {}: period set, setting frequency", self.number);
                    self.sequence = Sequence::SetFrequency;
                    return Some(self.set_frequency());
                }
                None
            }
            Sequence::SetFrequency => {
                if mesg.message_id() == message::MESG_CHANNEL_RADIO_FREQ_ID {
                    debug!("channel {}: frequency set, opening", self.number);
                    self.sequence = Sequence::Open;
                    return Some(self.open_message());
                }
                None
            }
            Sequence::Open => {
                if mesg.message_id() == message::MESG_OPEN_CHANNEL_ID {
                    log::info!("channel {} is open", self.number);
                    self.sequence = Sequence::Running;
                }
                None
            }
            Sequence::Idle | Sequence::Running => None,
        }
    }

    fn descriptor(&self) -> &'static sensor::SensorTypeDescriptor {
        // Every in-use kind has a registry entry; Unused never reaches the
        // message builders.
        sensor::descriptor(self.kind).unwrap_or(&sensor::SENSOR_TYPES[0])
    }

    /// Assigns the channel to the network its sensor family uses.
    pub(crate) fn assign_message(&self) -> Message {
        let d = self.descriptor();
        message::assign_channel(self.number, d.channel_type, d.network)
    }

    fn set_channel_id(&self) -> Message {
        message::set_channel_id(
            self.number,
            self.device_number,
            self.descriptor().device_type,
            self.transmission_type,
        )
    }

    fn set_search_timeout(&self) -> Message {
        let seconds = if self.flags & FLAG_QUICK_SEARCH != 0 {
            defines::ANT_QUICK_SEARCH_TIMEOUT
        } else {
            defines::ANT_DEFAULT_SEARCH_TIMEOUT
        };
        message::set_search_timeout(self.number, seconds)
    }

    fn set_period(&self) -> Message {
        message::set_channel_period(self.number, self.descriptor().period)
    }

    fn set_frequency(&self) -> Message {
        message::set_channel_frequency(self.number, self.descriptor().frequency)
    }

    fn open_message(&self) -> Message {
        message::open_channel(self.number)
    }
}

/// A queued assign/unassign round trip. `device_number == -1` signals
/// unassign; anything else is an assign for that device. Exactly one entry
/// is applied per poll cycle so hardware commands never overlap in flight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingChannelOp {
    pub channel: u8,
    pub device_number: i32,
    pub kind: SensorKind,
}

/// Owner of the fixed-size slot array. Created once at engine init and
/// never resized.
pub struct ChannelManager {
    channels: Vec<Channel>,
    pending: VecDeque<PendingChannelOp>,
}

impl ChannelManager {
    pub fn new(count: usize) -> Self {
        ChannelManager {
            channels: (0..count).map(|i| Channel::new(i as u8)).collect(),
            pending: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub(crate) fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn channels_in_use(&self) -> usize {
        self.channels.iter().filter(|c| c.in_use()).count()
    }

    /// Map a sensor to a slot. A non-negative `channel_hint` force-assigns
    /// that slot. A non-zero device number already paired on a matching
    /// channel is a successful no-op. Fails only when every slot is taken.
    pub fn add_device(
        &mut self,
        device_number: u16,
        kind: SensorKind,
        channel_hint: i32,
    ) -> Result<u8> {
        if channel_hint >= 0 {
            let index = channel_hint as usize;
            if index >= self.channels.len() {
                return Err(AntError::NoFreeChannel);
            }
            self.open_slot(index, device_number, kind);
            return Ok(index as u8);
        }

        if device_number != 0 {
            if let Some(index) = self.find_device(device_number, kind) {
                debug!(
                    "device {} already paired on channel {}",
                    device_number, index
                );
                return Ok(index as u8);
            }
        }

        match self.channels.iter().position(|c| !c.in_use()) {
            Some(index) => {
                let other_power = self
                    .channels
                    .iter()
                    .any(|c| c.in_use() && c.kind().is_power());
                self.open_slot(index, device_number, kind);
                if kind.is_power() && other_power {
                    // The application prefers, and can fall back between,
                    // concurrent power channels.
                    self.channels[index].alternate_power = true;
                }
                Ok(index as u8)
            }
            None => Err(AntError::NoFreeChannel),
        }
    }

    fn open_slot(&mut self, index: usize, device_number: u16, kind: SensorKind) {
        self.channels[index].open(device_number, kind);
        self.pending.push_back(PendingChannelOp {
            channel: index as u8,
            device_number: device_number as i32,
            kind,
        });
    }

    /// Release the channel paired to `(device_number, kind)`. A linked,
    /// distinct control channel is removed first. Returns false when no
    /// channel matches.
    pub fn remove_device(&mut self, device_number: u16, kind: SensorKind) -> bool {
        let index = match self.find_device(device_number, kind) {
            Some(index) => index,
            None => return false,
        };
        if let ControlLink::Index(control) = self.channels[index].control {
            if control != index {
                let control_number = self.channels[control].device_number;
                let control_kind = self.channels[control].kind;
                self.remove_device(control_number, control_kind);
            }
        }
        debug!("closing channel {} for device {}", index, device_number);
        self.pending.push_back(PendingChannelOp {
            channel: index as u8,
            device_number: -1,
            kind,
        });
        self.channels[index].close();
        // A removed companion may have been some other channel's link.
        for c in &mut self.channels {
            if c.control == ControlLink::Index(index) {
                c.control = ControlLink::None;
            }
        }
        true
    }

    /// First channel matching the exact type and device number.
    pub fn find_device(&self, device_number: u16, kind: SensorKind) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.in_use() && c.kind == kind && c.device_number == device_number)
    }

    /// Re-derive every control-channel relationship after a topology
    /// change. New-style power meters self-link. A legacy quarq links to
    /// its companion control channel once that companion is open and done
    /// searching; a missing companion is opened here and linked on a later
    /// pass. Calling this repeatedly with no topology change is a no-op.
    pub fn associate_control_channels(&mut self) {
        for index in 0..self.channels.len() {
            if !self.channels[index].in_use() {
                continue;
            }
            match self.channels[index].kind {
                SensorKind::Power => {
                    self.channels[index].control = ControlLink::SelfLinked;
                }
                SensorKind::QuarqPower => {
                    let device_number = self.channels[index].device_number;
                    match self.find_device(device_number, SensorKind::QuarqControl) {
                        Some(control) => {
                            if !self.channels[control].is_searching {
                                self.channels[index].control = ControlLink::Index(control);
                                if !self.channels[index].paired {
                                    debug!(
                                        "channel {}: quarq control channel {} linked",
                                        index, control
                                    );
                                    self.channels[index].paired = true;
                                }
                            }
                        }
                        None => {
                            // Companion not open yet. Linkage happens on a
                            // later pass once its search settles. Wildcard
                            // quarqs wait until the device number is known.
                            if device_number != 0 {
                                let _ = self.add_device(device_number, SensorKind::QuarqControl, -1);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Promote at most one channel out of the waiting-search state. Never
    /// starts a background search while any quick search is running.
    pub fn start_waiting_search(&mut self) -> bool {
        if self
            .channels
            .iter()
            .any(|c| c.flags & FLAG_QUICK_SEARCH != 0)
        {
            return false;
        }
        let index = match self
            .channels
            .iter()
            .position(|c| c.flags & FLAG_WAITING_SEARCH != 0)
        {
            Some(index) => index,
            None => return false,
        };
        let channel = &mut self.channels[index];
        channel.flags = (channel.flags & !FLAG_WAITING_SEARCH) | FLAG_QUICK_SEARCH;
        channel.is_searching = true;
        channel.sequence = Sequence::Assign;
        let kind = channel.kind;
        let device_number = channel.device_number as i32;
        debug!("restarting search on channel {}", index);
        // Free the radio slot, then bring the channel back up.
        self.pending.push_back(PendingChannelOp {
            channel: index as u8,
            device_number: -1,
            kind,
        });
        self.pending.push_back(PendingChannelOp {
            channel: index as u8,
            device_number,
            kind,
        });
        true
    }

    /// Next queued assign/unassign, one per poll cycle.
    pub(crate) fn pop_pending(&mut self) -> Option<PendingChannelOp> {
        self.pending.pop_front()
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
