//! Reliable buffered serial channel for JoyCore devices.
//!
//! A background task keeps draining the serial port into an ordered buffer;
//! callers read exact lengths or delimited frames from that buffer with
//! cancellable waits, and thin text protocols sit on top.
pub mod channel;
pub mod config;
pub mod device;
pub mod protocol;
pub mod serial;

pub use channel::{
    CancellationToken, ChannelEvent, ChannelEventKind, ChannelOptions, ChannelState, ConnectOutcome,
    DisconnectOutcome, ReliableChannel,
};
pub use config::LinkConfig;
pub use serial::{Result, SerialError};
