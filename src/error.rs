use crate::dataplane::DeviceId;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("{0} is already attached")]
    DuplicateDevice(DeviceId),

    #[error("{0} not found")]
    DeviceNotFound(DeviceId),

    #[error("{0} is a physical port and cannot be detached")]
    PhysicalDetach(DeviceId),
}

pub type Result<T> = std::result::Result<T, Error>;
