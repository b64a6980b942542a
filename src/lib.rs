pub mod channel;
mod defines;
pub mod engine;
mod error;
pub mod framing;
pub mod message;
pub mod sensor;
pub mod transport;
pub mod usb;

pub type Result<T> = std::result::Result<T, error::AntError>;

pub use engine::{pairing_requests, Engine, Event, Request};
pub use error::AntError;
pub use sensor::SensorKind;
pub use transport::{SerialTransport, Transport};
pub use usb::{Context, UsbTransport};

pub use crossbeam_channel::unbounded;

pub use message::combine;
