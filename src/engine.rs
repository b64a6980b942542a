/// Protocol engine: owns the transport, the deframer and the channel
/// manager, and drives the periodic read cycle. Host requests arrive on a
/// crossbeam channel and typed events go back the same way, so the host's
/// threading model never leaks in here; everything below runs on the
/// polling worker.
use crossbeam_channel::{tick, Receiver, Sender, TryRecvError};

use crate::channel::ChannelManager;
use crate::defines;
use crate::error::AntError;
use crate::framing::Deframer;
use crate::message::{self, ChannelEventMessage, ChannelResponseCode, Message, Response};
use crate::sensor::{self, SensorKind, SensorValue};
use crate::transport::Transport;
use crate::Result;

use log::{debug, error, info, trace};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Poll ticks between reset attempts while the dongle stays silent.
const RESET_RETRY_TICKS: u32 = 100;
const MAX_RESET_ATTEMPTS: u32 = 2;
/// Emit a signal-quality update every this many received data pages.
const SIGNAL_QUALITY_INTERVAL: u32 = 25;

/// Commands from the host application.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Pair { device_number: u16, kind: SensorKind },
    Unpair { device_number: u16, kind: SensorKind },
    Quit,
}

/// Events delivered to the host, in frame-arrival order, never
/// concurrently with each other.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    DeviceFound {
        channel: u8,
        device_number: u16,
        kind: SensorKind,
    },
    DeviceLost {
        channel: u8,
    },
    SignalQuality {
        channel: u8,
        reliability: u8,
    },
    SearchTimeout {
        channel: u8,
    },
    SearchComplete {
        channel: u8,
    },
    PairingFailed {
        device_number: u16,
        kind: SensorKind,
    },
    HeartRate {
        channel: u8,
        bpm: u8,
    },
    Power {
        channel: u8,
        watts: u16,
        cadence: u8,
    },
    Cadence {
        channel: u8,
        rpm: f32,
    },
    WheelSpeed {
        channel: u8,
        rpm: f32,
    },
}

/// Build the pairing requests for a host sensor configuration, e.g.
/// `["12345h", "0p"]`. An empty configuration falls back to one wildcard
/// channel per supported sensor type.
pub fn pairing_requests(specs: &[String]) -> Result<Vec<Request>> {
    let pairings = if specs.is_empty() {
        sensor::default_pairings()
    } else {
        specs
            .iter()
            .map(|s| sensor::parse_pairing(s))
            .collect::<Result<Vec<_>>>()?
    };
    Ok(pairings
        .into_iter()
        .map(|(device_number, kind)| Request::Pair {
            device_number,
            kind,
        })
        .collect())
}

#[derive(Debug, PartialEq)]
enum State {
    NotReady,
    Reset,
    SetNetworkKey,
    Running,
}

pub struct Engine<T: Transport> {
    transport: T,
    deframer: Deframer,
    channels: ChannelManager,
    state: State,
    request: Receiver<Request>,
    event: Sender<Event>,
}

impl<T: Transport> Engine<T> {
    pub fn init(
        transport: T,
        rx: Receiver<Request>,
        tx: Sender<Event>,
        channel_count: usize,
    ) -> Result<Engine<T>> {
        if !transport.is_valid() {
            return Err(AntError::NoDevice);
        }
        Ok(Engine {
            transport,
            deframer: Deframer::new(),
            channels: ChannelManager::new(channel_count),
            state: State::NotReady,
            request: rx,
            event: tx,
        })
    }

    /// The protocol poll loop. Runs until the host sends `Quit`, drops its
    /// request sender, or the dongle refuses to reset.
    pub fn run(&mut self) -> Result<()> {
        if self.state == State::Running {
            return Err(AntError::AlreadyRunning);
        }
        let ticker = tick(POLL_INTERVAL);
        // First reset fires on the first silent tick.
        let mut reset_ticks = RESET_RETRY_TICKS;
        let mut reset_attempts = 0;
        loop {
            if ticker.recv().is_err() {
                break;
            }
            if !self.cycle(&mut reset_ticks, &mut reset_attempts)? {
                break;
            }
        }
        Ok(())
    }

    /// One read cycle: drain the transport through the deframer, dispatch
    /// every completed frame, then apply at most one queued channel
    /// operation and at most one host request. Returns false to stop.
    fn cycle(&mut self, reset_ticks: &mut u32, reset_attempts: &mut u32) -> Result<bool> {
        let bytes = self.transport.read();
        if bytes.is_empty() {
            match self.state {
                State::NotReady => {
                    debug!("setting state to Reset");
                    self.state = State::Reset;
                }
                State::Reset => {
                    *reset_ticks += 1;
                    if *reset_ticks >= RESET_RETRY_TICKS {
                        if *reset_attempts < MAX_RESET_ATTEMPTS {
                            debug!("sending reset command");
                            self.send(&message::reset());
                            *reset_attempts += 1;
                            *reset_ticks = 0;
                        } else {
                            return Err(AntError::Reset);
                        }
                    }
                }
                _ => {}
            }
        } else {
            for frame in self.deframer.extend(&bytes) {
                let response = message::decode(frame);
                trace!("routing response: {:x?}", response);
                self.route(response);
            }
        }

        if self.state != State::Running {
            return Ok(true);
        }

        if let Some(op) = self.channels.pop_pending() {
            if op.device_number < 0 {
                debug!("closing and unassigning channel {}", op.channel);
                self.send(&message::close_channel(op.channel));
                self.send(&message::unassign_channel(op.channel));
            } else if let Some(assign) = self
                .channels
                .channel(op.channel as usize)
                .filter(|c| c.in_use())
                .map(|c| c.assign_message())
            {
                self.send(&assign);
            }
        }

        if !self.process_request() {
            return Ok(false);
        }
        self.channels.start_waiting_search();
        Ok(true)
    }

    /// Handle at most one host request per cycle. Returns false on Quit or
    /// a disconnected host.
    fn process_request(&mut self) -> bool {
        match self.request.try_recv() {
            Ok(Request::Pair {
                device_number,
                kind,
            }) => {
                match self.channels.add_device(device_number, kind, -1) {
                    Ok(index) => {
                        debug!("pairing {:?} {} on channel {}", kind, device_number, index);
                        self.channels.associate_control_channels();
                    }
                    Err(_) => {
                        // Not fatal; the host may unpair something first.
                        self.emit(Event::PairingFailed {
                            device_number,
                            kind,
                        });
                    }
                }
                true
            }
            Ok(Request::Unpair {
                device_number,
                kind,
            }) => {
                if self.channels.remove_device(device_number, kind) {
                    self.channels.associate_control_channels();
                } else {
                    debug!("unpair: no channel for {:?} {}", kind, device_number);
                }
                true
            }
            Ok(Request::Quit) => false,
            Err(TryRecvError::Disconnected) => false,
            Err(TryRecvError::Empty) => true,
        }
    }

    fn route(&mut self, response: Response) {
        match self.state {
            State::NotReady => {} // Drop message
            State::Reset => match response {
                Response::Startup(_) => {
                    debug!("setting state to SetNetworkKey");
                    self.state = State::SetNetworkKey;
                    self.send(&message::set_network_key(
                        defines::ANT_NETWORK,
                        &defines::ANT_NETWORK_KEY,
                    ));
                }
                other => trace!("{:x?}", other), // Drop message
            },
            State::SetNetworkKey => match response {
                Response::Startup(_) => self.state = State::Reset,
                Response::ChannelEvent(mesg) => {
                    if mesg.message_id() == message::MESG_NETWORK_KEY_ID
                        && mesg.code() == ChannelResponseCode::ResponseNoError
                    {
                        debug!("setting state to Running");
                        self.state = State::Running;
                        self.send(&message::get_capabilities());
                    }
                }
                _ => {}
            },
            State::Running => match response {
                Response::Startup(_) => {
                    // The dongle rebooted underneath us; bring it back up.
                    error!("unexpected startup message, resetting");
                    self.state = State::Reset;
                }
                Response::ChannelEvent(mesg) => self.handle_channel_event(mesg),
                Response::BroadcastData(mesg) => {
                    self.handle_data(mesg.channel(), mesg.data().to_vec())
                }
                Response::AcknowledgedData(mesg) => {
                    self.handle_data(mesg.channel(), mesg.data().to_vec())
                }
                Response::BurstData(mesg) => {
                    trace!("burst {} on channel {}", mesg.sequence(), mesg.channel())
                }
                Response::ChannelId(mesg) => self.handle_channel_id(mesg),
                Response::ChannelStatus(mesg) => {
                    debug!(
                        "channel {} status {:#04x}",
                        mesg.channel(),
                        mesg.status()
                    )
                }
                Response::Capabilities(caps) => {
                    info!(
                        "dongle capabilities: {} channels, {} networks",
                        caps.max_channels(),
                        caps.max_networks()
                    )
                }
                Response::Version(v) => info!("dongle firmware {}", v.version()),
                Response::SerialNumber(sn) => {
                    debug!("dongle serial number {}", sn.serial_number())
                }
                Response::Unknown(frame) => trace!("unhandled message {:#04x}", frame.id()),
            },
        }
    }

    fn handle_channel_event(&mut self, mesg: ChannelEventMessage) {
        let index = mesg.channel() as usize;
        // Corrupted frames can carry any channel byte; out-of-range
        // indices are dropped, never dispatched.
        if index >= self.channels.len() {
            return;
        }
        if mesg.is_event() {
            match mesg.code() {
                ChannelResponseCode::EventRxSearchTimeout => {
                    let was_paired = self
                        .channels
                        .channel(index)
                        .map(|c| c.is_paired())
                        .unwrap_or(false);
                    if let Some(c) = self.channels.channel_mut(index) {
                        c.search_timed_out();
                    }
                    if was_paired {
                        self.emit(Event::DeviceLost {
                            channel: index as u8,
                        });
                    } else {
                        self.emit(Event::SearchTimeout {
                            channel: index as u8,
                        });
                    }
                }
                ChannelResponseCode::EventRxFail => {
                    if let Some(c) = self.channels.channel_mut(index) {
                        c.record_drop();
                    }
                }
                ChannelResponseCode::EventRxFailGoToSearch => {
                    if let Some(c) = self.channels.channel_mut(index) {
                        c.record_drop();
                        c.go_to_search();
                    }
                    self.emit(Event::DeviceLost {
                        channel: index as u8,
                    });
                }
                ChannelResponseCode::EventChannelClosed => {
                    debug!("channel {} closed", index);
                }
                code => trace!("channel {} event {:?}", index, code),
            }
            return;
        }
        match mesg.code() {
            ChannelResponseCode::ResponseNoError => {
                let next = self
                    .channels
                    .channel_mut(index)
                    .and_then(|c| c.route(&mesg));
                if let Some(next) = next {
                    self.send(&next);
                }
            }
            ChannelResponseCode::ChannelInWrongState => {
                // Ask the radio which state the channel is actually in so
                // the log shows what the command collided with.
                debug!("channel {} in wrong state", index);
                self.send(&message::get_channel_status(mesg.channel()));
            }
            code => debug!("channel {} command error {:?}", index, code),
        }
    }

    /// Broadcast or acknowledged data page for a channel: update counters,
    /// decode sensor values, and chase the device identity while the
    /// channel is still searching.
    fn handle_data(&mut self, channel: u8, data: Vec<u8>) {
        let index = channel as usize;
        let (values, searching, received, reliability) = match self.channels.channel_mut(index) {
            Some(c) => {
                c.record_rx();
                let kind = c.kind();
                let values = c.decoder.decode(kind, &data);
                (values, c.is_searching(), c.received(), c.reliability())
            }
            None => return,
        };
        if searching {
            // A wildcard search locks onto the first matching device; ask
            // the radio which one it found.
            self.send(&message::get_channel_id(channel));
        }
        for value in values {
            let event = match value {
                SensorValue::HeartRate(bpm) => Event::HeartRate { channel, bpm },
                SensorValue::Power { watts, cadence } => Event::Power {
                    channel,
                    watts,
                    cadence,
                },
                SensorValue::Cadence(rpm) => Event::Cadence { channel, rpm },
                SensorValue::WheelSpeed(rpm) => Event::WheelSpeed { channel, rpm },
            };
            self.emit(event);
        }
        if received > 0 && received % SIGNAL_QUALITY_INTERVAL == 0 {
            self.emit(Event::SignalQuality {
                channel,
                reliability,
            });
        }
    }

    fn handle_channel_id(&mut self, mesg: message::ChannelIdMessage) {
        let index = mesg.channel() as usize;
        let reported = sensor::kind_from_device_type(mesg.device_type());
        let found = match self.channels.channel_mut(index) {
            Some(c) if c.is_searching() && mesg.device_number() != 0 => {
                // The reported device type must classify to the sensor
                // family the channel was configured for; anything else is
                // a stale or corrupt identity report.
                let matches = match reported {
                    Some(kind) => kind == c.kind() || (kind.is_power() && c.kind().is_power()),
                    None => false,
                };
                if matches {
                    c.found(mesg.device_number(), mesg.transmission_type());
                    Some(c.kind())
                } else {
                    debug!(
                        "channel {}: device type {:#04x} does not match {:?}",
                        index,
                        mesg.device_type(),
                        c.kind()
                    );
                    None
                }
            }
            _ => None,
        };
        if let Some(kind) = found {
            info!(
                "channel {} found {:?} device {}",
                index,
                kind,
                mesg.device_number()
            );
            self.emit(Event::DeviceFound {
                channel: index as u8,
                device_number: mesg.device_number(),
                kind,
            });
            self.emit(Event::SearchComplete {
                channel: index as u8,
            });
            // Topology changed; a legacy power meter may now know which
            // companion to open.
            self.channels.associate_control_channels();
        }
    }

    fn send(&mut self, mesg: &Message) {
        // A failed write is not fatal; the next poll tick retries whatever
        // state-machine step is still outstanding.
        if let Err(e) = self.transport.write(&mesg.encode()) {
            error!("write failed: {}", e);
        }
    }

    fn emit(&self, event: Event) {
        if self.event.send(event).is_err() {
            debug!("host dropped the event receiver");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Message;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockTransport {
        inbound: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn queue(&mut self, mesg: &Message) {
            self.inbound.push_back(mesg.encode());
        }
    }

    impl Transport for MockTransport {
        fn is_valid(&self) -> bool {
            true
        }

        fn write(&mut self, bytes: &[u8]) -> Result<usize> {
            self.written.push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn read(&mut self) -> Vec<u8> {
            self.inbound.pop_front().unwrap_or_default()
        }
    }

    struct Harness {
        engine: Engine<MockTransport>,
        request: Sender<Request>,
        event: Receiver<Event>,
        reset_ticks: u32,
        reset_attempts: u32,
    }

    impl Harness {
        fn new(channel_count: usize) -> Self {
            let (request, request_rx) = crossbeam_channel::unbounded();
            let (event_tx, event) = crossbeam_channel::unbounded();
            let engine =
                Engine::init(MockTransport::default(), request_rx, event_tx, channel_count)
                    .unwrap();
            Harness {
                engine,
                request,
                event,
                reset_ticks: RESET_RETRY_TICKS,
                reset_attempts: 0,
            }
        }

        fn cycle(&mut self) -> bool {
            self.engine
                .cycle(&mut self.reset_ticks, &mut self.reset_attempts)
                .unwrap()
        }

        fn queue(&mut self, mesg: &Message) {
            self.engine.transport.queue(mesg);
        }

        fn last_written_id(&self) -> Option<u8> {
            // Encoded frame layout: sync, len, id, ...
            self.engine.transport.written.last().map(|buf| buf[2])
        }

        fn written_ids(&self) -> Vec<u8> {
            self.engine.transport.written.iter().map(|b| b[2]).collect()
        }

        fn ack(&mut self, channel: u8, message_id: u8) {
            self.queue(&Message::new(
                message::MESG_RESPONSE_EVENT_ID,
                &[channel, message_id, message::RESPONSE_NO_ERROR],
            ));
        }

        fn radio_event(&mut self, channel: u8, code: u8) {
            self.queue(&Message::new(
                message::MESG_RESPONSE_EVENT_ID,
                &[channel, message::MESG_EVENT_ID, code],
            ));
        }

        /// Walk init plus the full bring-up handshake to Running.
        fn bring_up(&mut self) {
            self.cycle(); // NotReady -> Reset
            self.cycle(); // sends reset
            assert_eq!(self.last_written_id(), Some(message::MESG_RESET));
            self.queue(&Message::new(message::MESG_STARTUP_MESG_ID, &[0x20]));
            self.cycle(); // startup -> network key sent
            assert_eq!(self.last_written_id(), Some(message::MESG_NETWORK_KEY_ID));
            self.ack(0, message::MESG_NETWORK_KEY_ID);
            self.cycle();
            assert_eq!(self.engine.state, State::Running);
        }

        /// Pair a device and feed every configuration ack through to the
        /// open channel.
        fn pair_and_open(&mut self, device_number: u16, kind: SensorKind, channel: u8) {
            self.request
                .send(Request::Pair {
                    device_number,
                    kind,
                })
                .unwrap();
            self.cycle(); // request handled, assign queued
            self.cycle(); // assign written
            assert_eq!(self.last_written_id(), Some(message::MESG_ASSIGN_CHANNEL_ID));
            for id in &[
                message::MESG_ASSIGN_CHANNEL_ID,
                message::MESG_CHANNEL_ID_ID,
                message::MESG_CHANNEL_SEARCH_TIMEOUT_ID,
                message::MESG_CHANNEL_MESG_PERIOD_ID,
                message::MESG_CHANNEL_RADIO_FREQ_ID,
                message::MESG_OPEN_CHANNEL_ID,
            ] {
                self.ack(channel, *id);
                self.cycle();
            }
        }
    }

    #[test]
    fn pairing_requests_from_config() {
        let requests = pairing_requests(&["12345h".to_string(), "0p".to_string()]).unwrap();
        assert_eq!(
            requests,
            vec![
                Request::Pair {
                    device_number: 12345,
                    kind: SensorKind::HeartRate
                },
                Request::Pair {
                    device_number: 0,
                    kind: SensorKind::Power
                },
            ]
        );
        // No configuration: a wildcard per supported type.
        let defaults = pairing_requests(&[]).unwrap();
        assert_eq!(defaults.len(), 5);
        assert!(pairing_requests(&["zz".to_string()]).is_err());
    }

    #[test]
    fn bring_up_reaches_running() {
        let mut h = Harness::new(4);
        h.bring_up();
    }

    #[test]
    fn reset_gives_up_after_bounded_attempts() {
        let mut h = Harness::new(4);
        h.cycle(); // NotReady -> Reset
        h.cycle(); // attempt 1
        h.reset_ticks = RESET_RETRY_TICKS;
        h.cycle(); // attempt 2
        h.reset_ticks = RESET_RETRY_TICKS;
        let result = h
            .engine
            .cycle(&mut h.reset_ticks, &mut h.reset_attempts);
        match result {
            Err(AntError::Reset) => {}
            other => panic!("expected reset failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn pair_walks_channel_bring_up() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);
        let ids = h.written_ids();
        let tail = &ids[ids.len() - 6..];
        assert_eq!(
            tail,
            &[
                message::MESG_ASSIGN_CHANNEL_ID,
                message::MESG_CHANNEL_ID_ID,
                message::MESG_CHANNEL_SEARCH_TIMEOUT_ID,
                message::MESG_CHANNEL_MESG_PERIOD_ID,
                message::MESG_CHANNEL_RADIO_FREQ_ID,
                message::MESG_OPEN_CHANNEL_ID,
            ]
        );
    }

    #[test]
    fn wildcard_search_resolves_device_identity() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);

        // First broadcast while searching triggers a channel id request.
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        assert_eq!(h.last_written_id(), Some(message::MESG_REQUEST));
        // Heart rate decodes even while searching.
        assert_eq!(
            h.event.try_recv(),
            Ok(Event::HeartRate {
                channel: 0,
                bpm: 140
            })
        );

        // The radio answers with the learned identity.
        h.queue(&message::set_channel_id(0, 31337, 0x78, 1));
        h.cycle();
        assert_eq!(
            h.event.try_recv(),
            Ok(Event::DeviceFound {
                channel: 0,
                device_number: 31337,
                kind: SensorKind::HeartRate
            })
        );
        assert_eq!(h.event.try_recv(), Ok(Event::SearchComplete { channel: 0 }));
        assert!(!h.engine.channels.channel(0).unwrap().is_searching());
        assert_eq!(h.engine.channels.channel(0).unwrap().device_number(), 31337);
    }

    #[test]
    fn pairing_failure_when_channels_exhausted() {
        let mut h = Harness::new(2);
        h.bring_up();
        h.pair_and_open(1, SensorKind::HeartRate, 0);
        h.pair_and_open(2, SensorKind::Cadence, 1);
        while h.event.try_recv().is_ok() {}

        h.request
            .send(Request::Pair {
                device_number: 3,
                kind: SensorKind::Speed,
            })
            .unwrap();
        h.cycle();
        assert_eq!(
            h.event.try_recv(),
            Ok(Event::PairingFailed {
                device_number: 3,
                kind: SensorKind::Speed
            })
        );
        assert_eq!(h.engine.channels.channels_in_use(), 2);
    }

    #[test]
    fn search_timeout_event_reaches_host() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::Power, 0);
        h.radio_event(0, message::EVENT_RX_SEARCH_TIMEOUT);
        h.cycle();
        assert_eq!(h.event.try_recv(), Ok(Event::SearchTimeout { channel: 0 }));
    }

    #[test]
    fn lost_device_reported_after_pairing() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        h.queue(&message::set_channel_id(0, 31337, 0x78, 1));
        h.cycle();
        while h.event.try_recv().is_ok() {}

        h.radio_event(0, message::EVENT_RX_SEARCH_TIMEOUT);
        h.cycle();
        assert_eq!(h.event.try_recv(), Ok(Event::DeviceLost { channel: 0 }));
    }

    #[test]
    fn lost_device_channel_rejoins_search() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        h.queue(&message::set_channel_id(0, 31337, 0x78, 1));
        h.cycle();
        while h.event.try_recv().is_ok() {}

        // The device drops out and the fallback search expires.
        h.radio_event(0, message::EVENT_RX_FAIL_GO_TO_SEARCH);
        h.cycle();
        assert_eq!(h.event.try_recv(), Ok(Event::DeviceLost { channel: 0 }));
        h.radio_event(0, message::EVENT_RX_SEARCH_TIMEOUT);
        h.cycle();
        assert_eq!(h.event.try_recv(), Ok(Event::DeviceLost { channel: 0 }));

        // The waiting-search rotation frees the slot and restarts the
        // search, keeping the learned device number.
        h.cycle(); // close + unassign
        h.cycle(); // assign
        let ids = h.written_ids();
        assert_eq!(
            &ids[ids.len() - 3..],
            &[
                message::MESG_CLOSE_CHANNEL_ID,
                message::MESG_UNASSIGN_CHANNEL_ID,
                message::MESG_ASSIGN_CHANNEL_ID,
            ]
        );
        assert!(h.engine.channels.channel(0).unwrap().is_searching());
        assert_eq!(h.engine.channels.channel(0).unwrap().device_number(), 31337);
    }

    #[test]
    fn mismatched_device_type_keeps_searching() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        while h.event.try_recv().is_ok() {}

        // A speed device type on a heartrate channel is not a pairing.
        h.queue(&message::set_channel_id(0, 31337, 0x7B, 1));
        h.cycle();
        assert!(h.event.try_recv().is_err());
        assert!(h.engine.channels.channel(0).unwrap().is_searching());
        assert_eq!(h.engine.channels.channel(0).unwrap().device_number(), 0);
    }

    #[test]
    fn wrong_state_response_queries_channel_status() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(1234, SensorKind::Cadence, 0);
        h.queue(&Message::new(
            message::MESG_RESPONSE_EVENT_ID,
            &[0, message::MESG_OPEN_CHANNEL_ID, message::CHANNEL_IN_WRONG_STATE],
        ));
        h.cycle();
        assert_eq!(h.last_written_id(), Some(message::MESG_REQUEST));
        let last = h.engine.transport.written.last().unwrap();
        // Request payload: channel, requested message id.
        assert_eq!(last[3], 0);
        assert_eq!(last[4], message::MESG_CHANNEL_STATUS_ID);
    }

    #[test]
    fn out_of_range_channel_is_dropped() {
        let mut h = Harness::new(2);
        h.bring_up();
        // Channel 7 on a 2-channel engine: silently ignored.
        h.radio_event(7, message::EVENT_RX_SEARCH_TIMEOUT);
        h.cycle();
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[7, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        assert!(h.event.try_recv().is_err());
    }

    #[test]
    fn unpair_closes_and_unassigns() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(1234, SensorKind::Cadence, 0);
        h.request
            .send(Request::Unpair {
                device_number: 1234,
                kind: SensorKind::Cadence,
            })
            .unwrap();
        h.cycle(); // request handled, unassign queued
        h.cycle(); // close + unassign written
        let ids = h.written_ids();
        assert_eq!(
            &ids[ids.len() - 2..],
            &[message::MESG_CLOSE_CHANNEL_ID, message::MESG_UNASSIGN_CHANNEL_ID]
        );
        assert_eq!(h.engine.channels.channels_in_use(), 0);
    }

    #[test]
    fn quit_request_stops_the_loop() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.request.send(Request::Quit).unwrap();
        assert!(!h.cycle());
    }

    #[test]
    fn signal_quality_emitted_periodically() {
        let mut h = Harness::new(4);
        h.bring_up();
        h.pair_and_open(0, SensorKind::HeartRate, 0);
        h.queue(&Message::new(
            message::MESG_BROADCAST_DATA_ID,
            &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
        ));
        h.cycle();
        h.queue(&message::set_channel_id(0, 42, 0x78, 1));
        h.cycle();
        while h.event.try_recv().is_ok() {}

        // Drops recorded against received pages lower the reliability.
        for _ in 0..5 {
            h.radio_event(0, message::EVENT_RX_FAIL);
            h.cycle();
        }
        for _ in 1..SIGNAL_QUALITY_INTERVAL {
            h.queue(&Message::new(
                message::MESG_BROADCAST_DATA_ID,
                &[0, 0x04, 0, 0, 0, 0, 0, 10, 140],
            ));
            h.cycle();
        }
        let mut quality = None;
        while let Ok(event) = h.event.try_recv() {
            if let Event::SignalQuality {
                channel,
                reliability,
            } = event
            {
                quality = Some((channel, reliability));
            }
        }
        // 5 drops over 25 pages: 100 - 100 * 5 / 25.
        assert_eq!(quality, Some((0, 80)));
    }
}
