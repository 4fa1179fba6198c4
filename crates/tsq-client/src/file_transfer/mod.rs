//! Resumable file transfers over side connections.
//!
//! A transfer is negotiated on the query connection, then its bytes move over
//! a short-lived TCP connection to the negotiated port, opened by writing the
//! ASCII transfer key. Failures are recorded on the [`TransferToken`]; no
//! caller is blocked waiting for them.

mod manager;
mod token;

pub use manager::{
    DownloadRequest, FileTransferManager, TransferNegotiator, TransferOptions, UploadRequest,
};
pub use token::{TransferDirection, TransferStatus, TransferStream, TransferToken};
