//! A file-transfer server implementing both the negotiation commands and
//! the byte side connections.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tsq_proto::schema::{FileDownload, FileTransfer, FileUpload};
use tsq_proto::{CommandError, ErrorCode};

use super::{WAIT, eventually};
use crate::{
    ClientError, DownloadRequest, TransferDirection, TransferNegotiator, UploadRequest,
};

const KEY_LEN: usize = 8;
const FILE_ALREADY_EXISTS: ErrorCode = ErrorCode(0x802);
const FILE_NOT_FOUND: ErrorCode = ErrorCode(0x803);

struct Job {
    path: String,
    direction: TransferDirection,
    server_transfer_id: u16,
    seek: u64,
    stop: Receiver<()>,
}

struct Stall {
    after: usize,
    tail: usize,
    release: Option<Receiver<()>>,
}

#[derive(Default)]
struct State {
    files: Mutex<HashMap<String, Vec<u8>>>,
    jobs: Mutex<HashMap<String, Job>>,
    active: Mutex<HashMap<u16, FileTransfer>>,
    stops: Mutex<HashMap<u16, Sender<()>>>,
    stall: Mutex<Option<Stall>>,
    next_id: AtomicU16,
    list_calls: AtomicUsize,
}

/// Serves an in-memory file map on a local port.
pub struct FakeFileServer {
    state: Arc<State>,
    port: u16,
}

impl FakeFileServer {
    /// Binds a listener on an ephemeral local port.
    pub fn start() -> Arc<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind transfer listener");
        let port = listener.local_addr().expect("listener address").port();
        let state = Arc::new(State::default());
        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let connection_state = Arc::clone(&accept_state);
                thread::spawn(move || serve_connection(&connection_state, stream));
            }
        });
        Arc::new(Self { state, port })
    }

    /// Stores a file as if previously uploaded.
    pub fn insert(&self, path: &str, contents: Vec<u8>) {
        lock(&self.state.files).insert(path.to_owned(), contents);
    }

    /// Contents of `path`, if present.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state.files).get(path).cloned()
    }

    /// Waits until `path` holds `len` bytes.
    pub fn wait_for_file(&self, path: &str, len: usize) -> Vec<u8> {
        assert!(
            eventually(|| self.file(path).is_some_and(|file| file.len() == len)),
            "{path} never reached {len} bytes"
        );
        self.file(path).unwrap_or_default()
    }

    /// Makes the next download connection send `bytes` bytes and then stall
    /// until the transfer is stopped.
    pub fn stall_next_download_after(&self, bytes: usize) {
        *lock(&self.state.stall) = Some(Stall {
            after: bytes,
            tail: 0,
            release: None,
        });
    }

    /// Makes the next download connection send `bytes` bytes, wait for the
    /// returned sender, then send `tail` more bytes and close, even if the
    /// transfer was stopped meanwhile.
    pub fn stall_next_download_with_tail(&self, bytes: usize, tail: usize) -> Sender<()> {
        let (release_tx, release_rx) = channel::bounded(1);
        *lock(&self.state.stall) = Some(Stall {
            after: bytes,
            tail,
            release: Some(release_rx),
        });
        release_tx
    }

    /// Number of `ftlist` calls served.
    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    fn open_job(&self, path: &str, direction: TransferDirection, seek: u64, size: u64) -> (u16, String) {
        let server_transfer_id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let key = format!("key{server_transfer_id:05}");
        let (stop_tx, stop_rx) = channel::bounded(1);
        lock(&self.state.stops).insert(server_transfer_id, stop_tx);
        lock(&self.state.active).insert(
            server_transfer_id,
            FileTransfer {
                path: path.to_owned(),
                size,
                size_done: seek,
                server_transfer_id,
                ..FileTransfer::default()
            },
        );
        lock(&self.state.jobs).insert(
            key.clone(),
            Job {
                path: path.to_owned(),
                direction,
                server_transfer_id,
                seek,
                stop: stop_rx,
            },
        );
        (server_transfer_id, key)
    }
}

impl TransferNegotiator for FakeFileServer {
    fn init_upload(&self, request: &UploadRequest<'_>) -> Result<FileUpload, ClientError> {
        let existing = lock(&self.state.files)
            .get(request.path)
            .map(|file| file.len() as u64);
        if existing.is_some() && !request.overwrite && !request.resume {
            return Err(command_error(FILE_ALREADY_EXISTS, "file already exists"));
        }
        let seek = if request.resume { existing.unwrap_or_default() } else { 0 };
        let (server_transfer_id, key) =
            self.open_job(request.path, TransferDirection::Upload, seek, request.size);
        Ok(FileUpload {
            client_transfer_id: request.client_transfer_id,
            server_transfer_id,
            key,
            port: self.port,
            seek_position: seek,
        })
    }

    fn init_download(&self, request: &DownloadRequest<'_>) -> Result<FileDownload, ClientError> {
        let size = lock(&self.state.files)
            .get(request.path)
            .map(|file| file.len() as u64)
            .ok_or_else(|| command_error(FILE_NOT_FOUND, "file not found"))?;
        let (server_transfer_id, key) = self.open_job(
            request.path,
            TransferDirection::Download,
            request.seek_position,
            size,
        );
        Ok(FileDownload {
            client_transfer_id: request.client_transfer_id,
            server_transfer_id,
            key,
            port: self.port,
            size,
        })
    }

    fn stop(&self, server_transfer_id: u16, delete: bool) -> Result<(), ClientError> {
        lock(&self.state.stops).remove(&server_transfer_id);
        let entry = lock(&self.state.active).remove(&server_transfer_id);
        if delete && let Some(entry) = entry {
            lock(&self.state.files).remove(&entry.path);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<FileTransfer>, ClientError> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        let active: Vec<_> = lock(&self.state.active).values().cloned().collect();
        if active.is_empty() {
            return Err(command_error(ErrorCode::DATABASE_EMPTY_RESULT, "database empty result set"));
        }
        Ok(active)
    }
}

fn serve_connection(state: &State, mut stream: TcpStream) {
    let mut key = [0_u8; KEY_LEN];
    if stream.read_exact(&mut key).is_err() {
        return;
    }
    let Some(job) = lock(&state.jobs).remove(&*String::from_utf8_lossy(&key)) else {
        return;
    };
    let seek = usize::try_from(job.seek).expect("seek fits in memory");

    match job.direction {
        TransferDirection::Download => {
            let contents = lock(&state.files).get(&job.path).cloned().unwrap_or_default();
            let remaining = contents.get(seek..).unwrap_or_default();
            let stall = lock(&state.stall).take();
            match stall {
                Some(stall) if stall.after < remaining.len() => {
                    let (head, rest) = remaining.split_at(stall.after);
                    drop(stream.write_all(head));
                    drop(stream.flush());
                    match stall.release {
                        Some(release) => {
                            drop(release.recv_timeout(WAIT));
                            let tail = rest.get(..stall.tail.min(rest.len())).unwrap_or_default();
                            drop(stream.write_all(tail));
                            drop(stream.flush());
                        }
                        // Hold the connection open until the transfer is stopped.
                        None => drop(job.stop.recv_timeout(WAIT)),
                    }
                    return;
                }
                _ => drop(stream.write_all(remaining)),
            }
        }
        TransferDirection::Upload => {
            let size = lock(&state.active)
                .get(&job.server_transfer_id)
                .map_or(0, |entry| entry.size);
            let expected = usize::try_from(size)
                .expect("size fits in memory")
                .saturating_sub(seek);
            lock(&state.files)
                .entry(job.path.clone())
                .or_default()
                .truncate(seek);
            let mut buffer = [0_u8; 256];
            let mut received = 0;
            while received < expected {
                let read = match stream.read(&mut buffer) {
                    Ok(0) | Err(_) => return,
                    Ok(read) => read,
                };
                // A stopped transfer keeps only what arrived before the stop.
                if matches!(job.stop.try_recv(), Err(TryRecvError::Disconnected)) {
                    return;
                }
                let chunk = buffer.get(..read).unwrap_or_default();
                lock(&state.files)
                    .entry(job.path.clone())
                    .or_default()
                    .extend_from_slice(chunk);
                received += read;
            }
        }
    }
    lock(&state.active).remove(&job.server_transfer_id);
}

fn command_error(id: ErrorCode, message: &str) -> ClientError {
    let mut error = CommandError::custom(message);
    error.id = id;
    ClientError::Command(error)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("fake server lock poisoned")
}
