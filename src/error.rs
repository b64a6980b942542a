use thiserror::Error;

#[derive(Error, Debug)]
pub enum AntError {
    #[error("{0}")]
    UsbDeviceError(#[from] rusb::Error),
    #[error("{0}")]
    SerialDeviceError(#[from] serialport::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("no ANT+ device found")]
    NoDevice,
    #[error("device failed to reset")]
    Reset,
    #[error("engine already running")]
    AlreadyRunning,
    #[error("no free channel available")]
    NoFreeChannel,
    #[error("unknown pairing string: {0}")]
    BadPairing(String),
}
