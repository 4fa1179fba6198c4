//! Transfer queue and its single worker thread.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info, warn};
use tsq_config::ClientConfig;
use tsq_proto::ErrorCode;
use tsq_proto::schema::{FileDownload, FileTransfer, FileUpload};

use super::token::{
    Negotiated, TokenSpec, TransferDirection, TransferStatus, TransferStream, TransferToken,
};
use crate::{Client, ClientError, TransferError};

const TRANSFER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transfer");
const WORKER_THREAD: &str = "tsq-transfer";

/// Negotiation commands the manager issues over the query connection.
///
/// [`Client`] implements it; tests substitute their own.
pub trait TransferNegotiator: Send + Sync {
    /// `ftinitupload`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the server refuses the upload.
    fn init_upload(&self, request: &UploadRequest<'_>) -> Result<FileUpload, ClientError>;

    /// `ftinitdownload`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the server refuses the download.
    fn init_download(&self, request: &DownloadRequest<'_>) -> Result<FileDownload, ClientError>;

    /// `ftstop`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the command fails.
    fn stop(&self, server_transfer_id: u16, delete: bool) -> Result<(), ClientError>;

    /// `ftlist`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the command fails.
    fn list(&self) -> Result<Vec<FileTransfer>, ClientError>;
}

/// Parameters of an upload negotiation.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// Client-chosen transfer id.
    pub client_transfer_id: u16,
    /// Remote path.
    pub path: &'a str,
    /// Channel owning the file.
    pub channel_id: u64,
    /// Channel password, if any.
    pub channel_password: Option<&'a str>,
    /// Bytes to upload.
    pub size: u64,
    /// Replace an existing file.
    pub overwrite: bool,
    /// Continue a partial upload.
    pub resume: bool,
}

/// Parameters of a download negotiation.
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    /// Client-chosen transfer id.
    pub client_transfer_id: u16,
    /// Remote path.
    pub path: &'a str,
    /// Channel owning the file.
    pub channel_id: u64,
    /// Channel password, if any.
    pub channel_password: Option<&'a str>,
    /// Offset to start from.
    pub seek_position: u64,
}

impl TransferNegotiator for Client {
    fn init_upload(&self, request: &UploadRequest<'_>) -> Result<FileUpload, ClientError> {
        self.ft_init_upload(
            request.client_transfer_id,
            request.path,
            request.channel_id,
            request.channel_password,
            request.size,
            request.overwrite,
            request.resume,
        )
    }

    fn init_download(&self, request: &DownloadRequest<'_>) -> Result<FileDownload, ClientError> {
        self.ft_init_download(
            request.client_transfer_id,
            request.path,
            request.channel_id,
            request.channel_password,
            request.seek_position,
        )
    }

    fn stop(&self, server_transfer_id: u16, delete: bool) -> Result<(), ClientError> {
        self.ft_stop(server_transfer_id, delete)
    }

    fn list(&self) -> Result<Vec<FileTransfer>, ClientError> {
        self.ft_list()
    }
}

/// Options shared by uploads and downloads.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Replace an existing remote file (uploads only).
    pub overwrite: bool,
    /// Password of the owning channel.
    pub channel_password: Option<String>,
    /// Drop the local stream once the transfer is done.
    pub close_stream_when_done: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            channel_password: None,
            close_stream_when_done: true,
        }
    }
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<TransferToken>,
    running: bool,
}

struct Inner {
    negotiator: Arc<dyn TransferNegotiator>,
    host: String,
    chunk_size: usize,
    queue: Mutex<Queue>,
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Negotiates transfers and moves their bytes on one background worker.
///
/// The worker drains the queue one token at a time and exits when the queue
/// is empty; the next enqueue starts a new one.
pub struct FileTransferManager {
    inner: Arc<Inner>,
    next_transfer_id: AtomicU16,
}

impl FileTransferManager {
    /// Creates a manager whose side connections go to `host`.
    #[must_use]
    pub fn new(
        negotiator: Arc<dyn TransferNegotiator>,
        host: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                negotiator,
                host: host.into(),
                chunk_size: chunk_size.max(1),
                queue: Mutex::new(Queue::default()),
            }),
            next_transfer_id: AtomicU16::new(0),
        }
    }

    /// Creates a manager using the host and chunk size from `config`.
    #[must_use]
    pub fn from_config(negotiator: Arc<dyn TransferNegotiator>, config: &ClientConfig) -> Self {
        Self::new(negotiator, config.host.clone(), config.transfer_chunk_size)
    }

    /// Uploads the whole of `stream` to `path` in `channel_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Negotiation`] when the server refuses the
    /// upload; nothing is queued then.
    pub fn upload<S: TransferStream + 'static>(
        &self,
        mut stream: S,
        channel_id: u64,
        path: &str,
        options: TransferOptions,
    ) -> Result<TransferToken, TransferError> {
        let start = stream.stream_position()?;
        let size = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(start))?;

        let client_transfer_id = self.allocate_id();
        let reply = self.inner.negotiator.init_upload(&UploadRequest {
            client_transfer_id,
            path,
            channel_id,
            channel_password: options.channel_password.as_deref(),
            size,
            overwrite: options.overwrite,
            resume: false,
        })?;
        let negotiated = upload_negotiated(reply, size);
        let position = negotiated.seek_position.unwrap_or(start);
        let token = TransferToken::new(
            token_spec(TransferDirection::Upload, client_transfer_id, path, channel_id, options),
            Box::new(stream),
            negotiated,
            position,
        );
        self.enqueue(token.clone())?;
        Ok(token)
    }

    /// Downloads `path` in `channel_id` into `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Negotiation`] when the server refuses the
    /// download; nothing is queued then.
    pub fn download<S: TransferStream + 'static>(
        &self,
        mut stream: S,
        channel_id: u64,
        path: &str,
        options: TransferOptions,
    ) -> Result<TransferToken, TransferError> {
        let position = stream.stream_position()?;
        let client_transfer_id = self.allocate_id();
        let reply = self.inner.negotiator.init_download(&DownloadRequest {
            client_transfer_id,
            path,
            channel_id,
            channel_password: options.channel_password.as_deref(),
            seek_position: position,
        })?;
        let token = TransferToken::new(
            token_spec(TransferDirection::Download, client_transfer_id, path, channel_id, options),
            Box::new(stream),
            download_negotiated(reply, position),
            position,
        );
        self.enqueue(token.clone())?;
        Ok(token)
    }

    /// Re-negotiates a cancelled transfer from where it stopped and queues it.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotCancelled`] unless the token is
    /// cancelled, [`TransferError::StreamClosed`] when an abort released the
    /// local stream, or [`TransferError::Negotiation`] when the server
    /// refuses.
    pub fn resume(&self, token: &TransferToken) -> Result<(), TransferError> {
        let status = token.status();
        if status != TransferStatus::Cancelled {
            return Err(TransferError::NotCancelled {
                client_transfer_id: token.client_transfer_id(),
                status,
            });
        }
        if !token.has_stream() {
            return Err(TransferError::StreamClosed(token.client_transfer_id()));
        }

        let (negotiated, position) = match token.direction() {
            TransferDirection::Upload => {
                let size = token.size();
                let reply = self.inner.negotiator.init_upload(&UploadRequest {
                    client_transfer_id: token.client_transfer_id(),
                    path: token.path(),
                    channel_id: token.channel_id(),
                    channel_password: token.channel_password(),
                    size,
                    overwrite: false,
                    resume: true,
                })?;
                let negotiated = upload_negotiated(reply, size);
                let position = negotiated.seek_position.unwrap_or_default();
                (negotiated, position)
            }
            TransferDirection::Download => {
                let position = token.with_stream(|stream| stream.stream_position())?;
                let reply = self.inner.negotiator.init_download(&DownloadRequest {
                    client_transfer_id: token.client_transfer_id(),
                    path: token.path(),
                    channel_id: token.channel_id(),
                    channel_password: token.channel_password(),
                    seek_position: position,
                })?;
                let mut negotiated = download_negotiated(reply, position);
                negotiated.size = token.size();
                (negotiated, position)
            }
        };

        if !token.requeue(negotiated, position) {
            return Err(TransferError::NotCancelled {
                client_transfer_id: token.client_transfer_id(),
                status: token.status(),
            });
        }
        info!(
            target: TRANSFER_TARGET,
            client_transfer_id = token.client_transfer_id(),
            position,
            "transfer resumed"
        );
        self.enqueue(token.clone())
    }

    /// Cancels a waiting or running transfer on the server and locally.
    ///
    /// With `delete` the server discards the partial file, and a stream
    /// marked close-when-done is released. Tokens in any other state are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Negotiation`] when `ftstop` fails; the token
    /// is cancelled locally regardless.
    pub fn abort(&self, token: &TransferToken, delete: bool) -> Result<(), TransferError> {
        let Some(server_transfer_id) = token.cancel() else {
            return Ok(());
        };
        info!(
            target: TRANSFER_TARGET,
            client_transfer_id = token.client_transfer_id(),
            delete,
            "transfer aborted"
        );
        if delete && token.close_stream_when_done() {
            drop(token.take_stream());
        }
        self.inner.negotiator.stop(server_transfer_id, delete)?;
        Ok(())
    }

    /// Server-side progress of a running transfer.
    ///
    /// Returns `Ok(None)` when the token is not transferring or the server
    /// has no entry for it yet.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Negotiation`] when `ftlist` fails otherwise.
    pub fn stats(&self, token: &TransferToken) -> Result<Option<FileTransfer>, TransferError> {
        if token.status() != TransferStatus::Transferring {
            return Ok(None);
        }
        let transfers = match self.inner.negotiator.list() {
            Ok(transfers) => transfers,
            Err(error)
                if error
                    .command_error()
                    .is_some_and(|status| status.id == ErrorCode::DATABASE_EMPTY_RESULT) =>
            {
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let server_transfer_id = token.server_transfer_id();
        Ok(transfers
            .into_iter()
            .find(|entry| entry.server_transfer_id == server_transfer_id))
    }

    /// Number of tokens queued and not yet picked up by the worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue().pending.len()
    }

    fn allocate_id(&self) -> u16 {
        self.next_transfer_id.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue(&self, token: TransferToken) -> Result<(), TransferError> {
        let mut queue = self.inner.queue();
        queue.pending.push_back(token);
        if queue.running {
            return Ok(());
        }
        queue.running = true;
        drop(queue);

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name(WORKER_THREAD.to_owned())
            .spawn(move || run_worker(&inner))
        {
            Ok(_) => Ok(()),
            Err(source) => {
                let mut queue = self.inner.queue();
                queue.running = false;
                for stranded in queue.pending.drain(..) {
                    if let Some(attempt) = stranded.begin() {
                        stranded.finish(attempt, TransferStatus::Failed);
                    }
                }
                Err(TransferError::Spawn(source))
            }
        }
    }
}

fn token_spec(
    direction: TransferDirection,
    client_transfer_id: u16,
    path: &str,
    channel_id: u64,
    options: TransferOptions,
) -> TokenSpec {
    TokenSpec {
        direction,
        client_transfer_id,
        path: path.to_owned(),
        channel_id,
        channel_password: options.channel_password,
        close_stream_when_done: options.close_stream_when_done,
    }
}

fn upload_negotiated(reply: FileUpload, size: u64) -> Negotiated {
    Negotiated {
        server_transfer_id: reply.server_transfer_id,
        key: reply.key,
        port: reply.port,
        size,
        seek_position: Some(reply.seek_position),
    }
}

/// `position` is the offset the server was asked to start from; the local
/// stream is sought there before the first byte is written.
fn download_negotiated(reply: FileDownload, position: u64) -> Negotiated {
    Negotiated {
        server_transfer_id: reply.server_transfer_id,
        key: reply.key,
        port: reply.port,
        size: reply.size,
        seek_position: Some(position),
    }
}

fn run_worker(inner: &Inner) {
    debug!(target: TRANSFER_TARGET, "transfer worker started");
    loop {
        let next = {
            let mut queue = inner.queue();
            let next = queue.pending.pop_front();
            if next.is_none() {
                queue.running = false;
            }
            next
        };
        let Some(token) = next else {
            break;
        };
        run_transfer(inner, &token);
    }
    debug!(target: TRANSFER_TARGET, "transfer worker idle, exiting");
}

fn run_transfer(inner: &Inner, token: &TransferToken) {
    let Some(attempt) = token.begin() else {
        debug!(
            target: TRANSFER_TARGET,
            client_transfer_id = token.client_transfer_id(),
            status = ?token.status(),
            "skipping transfer that is no longer waiting"
        );
        return;
    };

    match copy_bytes(inner, token, attempt) {
        Ok(true) => {
            if token.finish(attempt, TransferStatus::Done) {
                info!(
                    target: TRANSFER_TARGET,
                    client_transfer_id = token.client_transfer_id(),
                    bytes = token.position(),
                    "transfer done"
                );
            }
        }
        Ok(false) => debug!(
            target: TRANSFER_TARGET,
            client_transfer_id = token.client_transfer_id(),
            "transfer interrupted"
        ),
        Err(error) => {
            if token.finish(attempt, TransferStatus::Failed) {
                warn!(
                    target: TRANSFER_TARGET,
                    client_transfer_id = token.client_transfer_id(),
                    %error,
                    "transfer failed"
                );
            }
        }
    }
}

/// Returns `Ok(false)` when the attempt was cancelled or superseded.
///
/// Every touch of the local stream is fenced by the attempt, so bytes a
/// stale connection delivers after a cancel are discarded.
fn copy_bytes(inner: &Inner, token: &TransferToken, attempt: u64) -> io::Result<bool> {
    let negotiated = token.negotiated();
    let mut socket = TcpStream::connect((inner.host.as_str(), negotiated.port))?;
    socket.write_all(negotiated.key.as_bytes())?;

    let start = token.with_active_stream(attempt, |stream| match negotiated.seek_position {
        Some(offset) => stream.seek(SeekFrom::Start(offset)),
        None => stream.stream_position(),
    })?;
    let Some(mut position) = start else {
        return Ok(false);
    };
    if !token.record_position(attempt, position) {
        return Ok(false);
    }

    let mut buffer = Vec::with_capacity(inner.chunk_size);
    while position < negotiated.size {
        let remaining = usize::try_from(negotiated.size - position).unwrap_or(usize::MAX);
        buffer.resize(remaining.min(inner.chunk_size), 0);
        let moved = match token.direction() {
            TransferDirection::Upload => {
                let Some(read) =
                    token.with_active_stream(attempt, |stream| stream.read(&mut buffer))?
                else {
                    return Ok(false);
                };
                if read == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                buffer.truncate(read);
                if !token.is_active(attempt) {
                    return Ok(false);
                }
                socket.write_all(&buffer)?;
                read
            }
            TransferDirection::Download => {
                let read = socket.read(&mut buffer)?;
                if read == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                buffer.truncate(read);
                if token
                    .with_active_stream(attempt, |stream| stream.write_all(&buffer))?
                    .is_none()
                {
                    return Ok(false);
                }
                read
            }
        };
        position += u64::try_from(moved).unwrap_or(u64::MAX);
        if !token.record_position(attempt, position) {
            return Ok(false);
        }
    }

    match token.direction() {
        TransferDirection::Upload => socket.flush()?,
        TransferDirection::Download => {
            if token
                .with_active_stream(attempt, |stream| stream.flush())?
                .is_none()
            {
                return Ok(false);
            }
        }
    }
    Ok(token.is_active(attempt))
}
