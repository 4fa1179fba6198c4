//! Client runtime for a line-based server query protocol.
//!
//! A [`Client`] owns one query connection. Commands are written by caller
//! threads and answered through the correlation engine
//! ([`MessageProcessor`] plus [`WaitBlock`]), either in FIFO order or by
//! return code depending on [`tsq_config::CorrelationMode`]. Server
//! notifications are routed to [`EventHub`] subscribers by an
//! [`EventDispatcher`] strategy, and [`FileTransferManager`] moves file
//! contents over side connections negotiated on the query connection.

mod client;
mod dispatcher;
mod errors;
mod events;
mod file_transfer;
mod processor;
pub mod telemetry;
mod transport;
mod wait_block;

pub use client::{Client, KickReason, MessageTarget, PendingResponse, Response};
pub use dispatcher::{
    DisabledDispatcher, EventDispatcher, InlineDispatcher, WorkerDispatcher, build_dispatcher,
};
pub use errors::{ClientError, TransferError, TransportError};
pub use events::{EventHub, Subscribers};
pub use file_transfer::{
    DownloadRequest, FileTransferManager, TransferDirection, TransferNegotiator, TransferOptions,
    TransferStatus, TransferStream, TransferToken, UploadRequest,
};
pub use processor::{MessageProcessor, PendingRequests};
pub use transport::{
    LineSink, LineSource, QUERY_BANNER, StreamLineSource, TcpLineSink, TcpLineSource,
    TcpTransport,
};
pub use wait_block::{Outcome, WaitBlock, WaitHandle};

pub use tsq_config;
pub use tsq_proto;

#[cfg(test)]
mod tests;
