pub mod buffer;
pub mod types;
mod ingest;
mod reliable;

pub use buffer::{SharedBuffer, WaitOutcome};
pub use reliable::{deadline_token, ReliableChannel};
pub use types::{
    ChannelEvent, ChannelEventKind, ChannelOptions, ChannelState, ConnectOutcome, DisconnectOutcome,
    MetricsSnapshot,
};
pub use tokio_util::sync::CancellationToken;
