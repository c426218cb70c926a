//! Per-file tailing.
//!
//! A [`TailedFile`] owns the identity, committed offset and background task of
//! one tracked log file. The task reads from the committed offset to EOF,
//! decodes each complete line, hands the reading downstream and only then
//! advances and persists the offset. When EOF is reached it sleeps and tries
//! again until cancelled.

use crate::devices::{Decoder, Reading};
use crate::file_id::FileId;
use crate::metadata::{FileMetadata, MetadataStore};
use crate::metrics;
use crate::splitter::{RecordSplitter, DEFAULT_MAX_LINE_BYTES};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const DEFAULT_READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("{} is no longer the tracked file (expected {expected}, found {found})", path.display())]
    IdentityMismatch {
        path: PathBuf,
        expected: FileId,
        found: FileId,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Idle,
    Opening,
    Tailing,
    Stopping,
    Stopped,
}

impl TailState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TailState::Opening | TailState::Tailing | TailState::Stopping
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Pause between passes once EOF is reached.
    pub tail_interval: Duration,
    pub read_chunk_bytes: usize,
    /// Longer lines are skipped rather than buffered.
    pub max_line_bytes: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            tail_interval: Duration::from_secs(5),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Everything a tailing task needs besides the file itself.
#[derive(Clone)]
pub struct TailContext {
    pub decoder: Arc<Decoder>,
    pub output: mpsc::Sender<Box<dyn Reading>>,
    pub store: MetadataStore,
    pub options: TailOptions,
    /// Session tokens are children of this one.
    pub parent: CancellationToken,
}

#[derive(Debug)]
struct FileState {
    identity: FileId,
    offset: u64,
    path: PathBuf,
    found: bool,
    status: TailState,
    session: u64,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    tracking_id: Uuid,
    state: Mutex<FileState>,
    // Serialises metadata writes so the newest state always lands last.
    save_lock: tokio::sync::Mutex<()>,
    /// Woken whenever a session ends.
    session_ended: Notify,
}

#[derive(Debug, Clone)]
pub struct TailedFile {
    inner: Arc<Inner>,
}

enum PassOutcome {
    Eof,
    Cancelled,
}

async fn sleep_or_cancel(duration: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

impl TailedFile {
    pub fn from_metadata(metadata: FileMetadata) -> Self {
        Self::build(
            metadata.tracking_id,
            metadata.identity,
            metadata.offset,
            metadata.path,
        )
    }

    /// A newly discovered file, tracked from its first byte.
    pub fn create(path: PathBuf, identity: FileId) -> Self {
        Self::build(Uuid::new_v4(), identity, 0, path)
    }

    fn build(tracking_id: Uuid, identity: FileId, offset: u64, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracking_id,
                state: Mutex::new(FileState {
                    identity,
                    offset,
                    path,
                    found: false,
                    status: TailState::Idle,
                    session: 0,
                    cancel: None,
                    handle: None,
                }),
                save_lock: tokio::sync::Mutex::new(()),
                session_ended: Notify::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FileState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tracking_id(&self) -> Uuid {
        self.inner.tracking_id
    }

    pub fn identity(&self) -> FileId {
        self.lock_state().identity
    }

    pub fn offset(&self) -> u64 {
        self.lock_state().offset
    }

    pub fn path(&self) -> PathBuf {
        self.lock_state().path.clone()
    }

    pub fn state(&self) -> TailState {
        self.lock_state().status
    }

    pub fn is_tailing(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_found(&self) -> bool {
        self.lock_state().found
    }

    pub fn set_found(&self, found: bool) {
        self.lock_state().found = found;
    }

    /// Record the name the file is currently visible under. Returns whether
    /// it changed.
    pub fn update_path(&self, path: &Path) -> bool {
        let mut state = self.lock_state();
        if state.path == path {
            return false;
        }
        state.path = path.to_path_buf();
        true
    }

    pub fn snapshot(&self) -> FileMetadata {
        let state = self.lock_state();
        FileMetadata {
            tracking_id: self.inner.tracking_id,
            identity: state.identity,
            offset: state.offset,
            path: state.path.clone(),
        }
    }

    pub async fn persist(&self, store: &MetadataStore) -> Result<(), crate::metadata::StoreError> {
        let _guard = self.inner.save_lock.lock().await;
        let snapshot = self.snapshot();
        store.save(&snapshot).await
    }

    /// Advance the committed offset and persist it. The in-memory offset moves
    /// even when the write fails; the next successful write catches up.
    async fn commit(&self, consumed: u64, store: &MetadataStore) {
        if consumed == 0 {
            return;
        }
        {
            let mut state = self.lock_state();
            state.offset = state.offset.saturating_add(consumed);
        }
        match self.persist(store).await {
            Ok(()) => metrics::OFFSET_COMMITS_TOTAL
                .with_label_values(&["ok"])
                .inc(),
            Err(err) => {
                metrics::OFFSET_COMMITS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                warn!(error = %err, "failed to persist offset");
            }
        }
    }

    /// Spawn the tailing task. Returns `false` without doing anything when a
    /// task is already active for this file.
    pub fn start(&self, ctx: &TailContext) -> bool {
        let mut state = self.lock_state();
        if state.status.is_active() {
            return false;
        }

        let cancel = ctx.parent.child_token();
        state.session += 1;
        state.status = TailState::Opening;
        state.cancel = Some(cancel.clone());

        let span = info_span!(
            "tail",
            path = %state.path.display(),
            tracking_id = %self.inner.tracking_id
        );
        let file = self.clone();
        let session = state.session;
        let ctx = ctx.clone();
        let handle = tokio::spawn(
            async move { file.run(ctx, cancel, session).await }.instrument(span),
        );
        state.handle = Some(handle);
        true
    }

    /// Cancel the task without waiting for it.
    pub fn request_stop(&self) {
        let mut state = self.lock_state();
        if !state.status.is_active() {
            return;
        }
        state.status = TailState::Stopping;
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
    }

    /// Cancel the task and wait up to `max_wait` for it to finish. A task
    /// that overruns is left to finish on its own.
    pub async fn stop(&self, max_wait: Duration) -> StopOutcome {
        let handle = {
            let mut state = self.lock_state();
            if !state.status.is_active() {
                return StopOutcome::NotRunning;
            }
            state.status = TailState::Stopping;
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
            state.handle.take()
        };

        // Another caller owns the join handle; wait for the session to end.
        let Some(handle) = handle else {
            return match tokio::time::timeout(max_wait, self.session_ended()).await {
                Ok(()) => StopOutcome::Stopped,
                Err(_) => StopOutcome::TimedOut,
            };
        };

        match tokio::time::timeout(max_wait, handle).await {
            Ok(Ok(())) => StopOutcome::Stopped,
            Ok(Err(err)) => {
                error!(tracking_id = %self.inner.tracking_id, error = %err, "tailing task failed");
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    tracking_id = %self.inner.tracking_id,
                    wait_ms = max_wait.as_millis() as u64,
                    "tailing task did not stop in time; detaching"
                );
                StopOutcome::TimedOut
            }
        }
    }

    async fn session_ended(&self) {
        loop {
            let notified = self.inner.session_ended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.state().is_active() {
                return;
            }
            notified.await;
        }
    }

    async fn run(self, ctx: TailContext, cancel: CancellationToken, session: u64) {
        let _guard = SessionGuard {
            file: &self,
            session,
        };
        metrics::ACTIVE_TAILERS.inc();

        match self.tail(&ctx, &cancel).await {
            Ok(()) => info!(offset = self.offset(), "tailing stopped"),
            Err(err) => error!(error = %err, "tailing aborted"),
        }
    }

    async fn tail(&self, ctx: &TailContext, cancel: &CancellationToken) -> Result<(), TailError> {
        let (path, expected) = {
            let state = self.lock_state();
            (state.path.clone(), state.identity)
        };

        let open_err = |source| TailError::Open {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).await.map_err(open_err)?;
        let metadata = file.metadata().await.map_err(open_err)?;
        let found = FileId::from_metadata(&metadata).map_err(open_err)?;
        if found != expected {
            return Err(TailError::IdentityMismatch {
                path,
                expected,
                found,
            });
        }

        {
            let mut state = self.lock_state();
            if state.status == TailState::Opening {
                state.status = TailState::Tailing;
            }
        }
        info!(offset = self.offset(), "tailing started");

        let read_err = |source| TailError::Read {
            path: path.clone(),
            source,
        };
        let mut buffer = vec![0u8; ctx.options.read_chunk_bytes.max(1)];
        let mut splitter = RecordSplitter::with_max_line_bytes(ctx.options.max_line_bytes);
        let mut shrink_reported = false;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let offset = self.offset();
            let len = file.metadata().await.map_err(read_err)?.len();
            if len < offset {
                if !shrink_reported {
                    warn!(offset, len, "file is shorter than the committed offset; waiting");
                    shrink_reported = true;
                }
            } else {
                shrink_reported = false;
                if len > offset {
                    match self
                        .read_pass(&mut file, offset, &mut buffer, &mut splitter, ctx, cancel)
                        .await
                        .map_err(read_err)?
                    {
                        PassOutcome::Eof => {}
                        PassOutcome::Cancelled => return Ok(()),
                    }
                }
            }

            if sleep_or_cancel(ctx.options.tail_interval, cancel).await {
                return Ok(());
            }
        }
    }

    /// Read from `offset` to EOF, emitting and committing every complete
    /// record. Trailing bytes without a terminator are left for the next pass.
    async fn read_pass(
        &self,
        file: &mut File,
        offset: u64,
        buffer: &mut [u8],
        splitter: &mut RecordSplitter,
        ctx: &TailContext,
        cancel: &CancellationToken,
    ) -> io::Result<PassOutcome> {
        file.seek(SeekFrom::Start(offset)).await?;
        splitter.restart();

        loop {
            let bytes_read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PassOutcome::Cancelled),
                result = file.read(buffer) => result?,
            };
            if bytes_read == 0 {
                break;
            }
            splitter.feed(&buffer[..bytes_read]);

            while let Some(record) = splitter.next_record() {
                match ctx.decoder.decode(&record.line) {
                    Ok(reading) => {
                        metrics::RECORDS_READ_TOTAL.inc();
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(PassOutcome::Cancelled),
                            result = ctx.output.send(reading) => result,
                        };
                        if sent.is_err() {
                            debug!("reading channel closed; ending pass");
                            return Ok(PassOutcome::Cancelled);
                        }
                    }
                    Err(err) => {
                        metrics::DECODE_ERRORS_TOTAL
                            .with_label_values(&[err.kind()])
                            .inc();
                        warn!(
                            error = %err,
                            offset = self.offset(),
                            "skipping undecodable record"
                        );
                    }
                }
                self.commit(record.consumed, &ctx.store).await;
            }

            let oversized = splitter.take_oversized();
            if oversized > 0 {
                metrics::DECODE_ERRORS_TOTAL
                    .with_label_values(&["oversized"])
                    .inc_by(oversized as u64);
                warn!(
                    max_line_bytes = ctx.options.max_line_bytes,
                    "skipping line longer than the limit"
                );
            }
        }

        self.commit(splitter.take_skipped(), &ctx.store).await;
        Ok(PassOutcome::Eof)
    }
}

/// Marks the session stopped however the task exits.
struct SessionGuard<'a> {
    file: &'a TailedFile,
    session: u64,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        metrics::ACTIVE_TAILERS.dec();
        let mut state = self.file.lock_state();
        if state.session == self.session {
            state.status = TailState::Stopped;
            state.cancel = None;
            state.handle = None;
        }
        drop(state);
        self.file.inner.session_ended.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINE_A: &str = r#"{"time" : "2018-03-04 17:02:15", "model" : "Acurite Rain Gauge", "id" : 1, "rain" : 0.5}"#;
    const LINE_B: &str = r#"{"time" : "2018-03-04 17:02:16", "model" : "Acurite Rain Gauge", "id" : 2, "rain" : 1.5}"#;
    const LINE_C: &str = r#"{"time" : "2018-03-04 17:02:17", "model" : "Acurite Rain Gauge", "id" : 3, "rain" : 2.5}"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        log: PathBuf,
        ctx: TailContext,
        rx: mpsc::Receiver<Box<dyn Reading>>,
    }

    async fn fixture(capacity: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rtl_433.log");
        std::fs::File::create(&log).unwrap();
        let store = MetadataStore::open(dir.path().join("meta")).await.unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = TailContext {
            decoder: Arc::new(Decoder::with_builtin_devices()),
            output: tx,
            store,
            options: TailOptions {
                tail_interval: Duration::from_millis(20),
                read_chunk_bytes: 16,
                max_line_bytes: 512,
            },
            parent: CancellationToken::new(),
        };
        Fixture {
            _dir: dir,
            log,
            ctx,
            rx,
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    async fn recv_id(rx: &mut mpsc::Receiver<Box<dyn Reading>>) -> String {
        let reading = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reading in time")
            .expect("channel open");
        reading.to_point(None).unwrap().tags["id"].clone()
    }

    async fn tracked(path: &Path) -> TailedFile {
        TailedFile::create(path.to_path_buf(), FileId::from_path(path).await.unwrap())
    }

    #[tokio::test]
    async fn emits_existing_and_appended_records_in_order() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("{LINE_A}\n{LINE_B}\n"));
        let file = tracked(&fx.log).await;

        assert!(file.start(&fx.ctx));
        assert_eq!(recv_id(&mut fx.rx).await, "1");
        assert_eq!(recv_id(&mut fx.rx).await, "2");

        append(&fx.log, &format!("{LINE_C}\r\n"));
        assert_eq!(recv_id(&mut fx.rx).await, "3");

        let total = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == total).await;

        let persisted = fx.ctx.store.load_all().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].offset, total);

        assert_eq!(file.stop(Duration::from_secs(5)).await, StopOutcome::Stopped);
        assert_eq!(file.state(), TailState::Stopped);
    }

    #[tokio::test]
    async fn resumes_from_committed_offset() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("{LINE_A}\n{LINE_B}\n"));
        let identity = FileId::from_path(&fx.log).await.unwrap();
        let file = TailedFile::from_metadata(FileMetadata {
            tracking_id: Uuid::new_v4(),
            identity,
            offset: LINE_A.len() as u64 + 1,
            path: fx.log.clone(),
        });

        file.start(&fx.ctx);
        assert_eq!(recv_id(&mut fx.rx).await, "2");
        file.stop(Duration::from_secs(5)).await;
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn partial_line_waits_for_its_terminator() {
        let mut fx = fixture(16).await;
        let (head, tail) = LINE_A.split_at(30);
        append(&fx.log, head);
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);

        sleep(Duration::from_millis(100)).await;
        assert!(fx.rx.try_recv().is_err());
        assert_eq!(file.offset(), 0);

        append(&fx.log, &format!("{tail}\n"));
        assert_eq!(recv_id(&mut fx.rx).await, "1");
        file.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn identity_mismatch_abandons_the_session() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("{LINE_A}\n"));
        let file = TailedFile::from_metadata(FileMetadata {
            tracking_id: Uuid::new_v4(),
            identity: FileId::new(u64::MAX, u64::MAX),
            offset: 3,
            path: fx.log.clone(),
        });

        assert!(file.start(&fx.ctx));
        wait_until(|| file.state() == TailState::Stopped).await;
        assert_eq!(file.offset(), 3);
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_file_stops_the_session() {
        let fx = fixture(16).await;
        let file = TailedFile::create(fx.log.with_extension("gone"), FileId::new(1, 1));
        file.start(&fx.ctx);
        wait_until(|| file.state() == TailState::Stopped).await;
        assert_eq!(file.stop(Duration::from_secs(1)).await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn undecodable_lines_are_skipped_and_committed() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("not json at all\n\n{LINE_B}\n"));
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);

        assert_eq!(recv_id(&mut fx.rx).await, "2");
        let total = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == total).await;
        file.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn start_is_idempotent_while_active() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("{LINE_A}\n"));
        let file = tracked(&fx.log).await;

        assert_eq!(file.stop(Duration::from_secs(1)).await, StopOutcome::NotRunning);
        assert!(file.start(&fx.ctx));
        assert!(!file.start(&fx.ctx));
        assert!(!file.start(&fx.ctx));

        append(&fx.log, &format!("{LINE_B}\n{LINE_C}\n"));
        assert_eq!(recv_id(&mut fx.rx).await, "1");
        assert_eq!(recv_id(&mut fx.rx).await, "2");
        assert_eq!(recv_id(&mut fx.rx).await, "3");

        let len = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == len).await;
        // Several more passes; a second task would emit everything again.
        sleep(Duration::from_millis(100)).await;
        assert!(fx.rx.try_recv().is_err());
        assert_eq!(file.offset(), len);
        assert_eq!(file.stop(Duration::from_secs(5)).await, StopOutcome::Stopped);

        // A stopped file can be started again and resumes at its offset.
        assert!(file.start(&fx.ctx));
        sleep(Duration::from_millis(60)).await;
        assert!(fx.rx.try_recv().is_err());
        assert_eq!(file.stop(Duration::from_secs(5)).await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn concurrent_stop_waits_for_the_session_to_end() {
        let fx = fixture(1).await;
        append(&fx.log, &format!("{LINE_A}\n{LINE_B}\n{LINE_C}\n"));
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);
        wait_until(|| file.offset() == LINE_A.len() as u64 + 1).await;

        let first = file.stop(Duration::from_secs(5));
        let second = async {
            let outcome = file.stop(Duration::from_secs(5)).await;
            (outcome, file.state())
        };
        let (first, (second, state_seen_by_second)) = tokio::join!(first, second);

        assert_eq!(first, StopOutcome::Stopped);
        assert_eq!(second, StopOutcome::Stopped);
        assert_eq!(state_seen_by_second, TailState::Stopped);
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped_and_committed() {
        let mut fx = fixture(16).await;
        let long = format!(r#"{{"model" : "{}"}}"#, "x".repeat(600));
        append(&fx.log, &format!("{LINE_A}\n{long}\n{LINE_B}\n"));
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);

        assert_eq!(recv_id(&mut fx.rx).await, "1");
        assert_eq!(recv_id(&mut fx.rx).await, "2");
        let len = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == len).await;

        // An unterminated long line is committed as it is skipped, and its
        // remainder stays skipped on later passes.
        append(&fx.log, &"y".repeat(700));
        let len = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == len).await;
        append(&fx.log, &format!("yyy\n{LINE_C}\n"));
        assert_eq!(recv_id(&mut fx.rx).await, "3");

        let len = std::fs::metadata(&fx.log).unwrap().len();
        wait_until(|| file.offset() == len).await;
        assert!(fx.rx.try_recv().is_err());
        file.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn shrinking_file_keeps_the_offset() {
        let mut fx = fixture(16).await;
        append(&fx.log, &format!("{LINE_A}\n"));
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);
        assert_eq!(recv_id(&mut fx.rx).await, "1");
        let committed = LINE_A.len() as u64 + 1;
        wait_until(|| file.offset() == committed).await;

        std::fs::OpenOptions::new()
            .write(true)
            .open(&fx.log)
            .unwrap()
            .set_len(0)
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(file.offset(), committed);
        assert!(file.is_tailing());
        file.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_send() {
        let mut fx = fixture(1).await;
        append(&fx.log, &format!("{LINE_A}\n{LINE_B}\n{LINE_C}\n"));
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);

        let first = LINE_A.len() as u64 + 1;
        wait_until(|| file.offset() == first).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(file.stop(Duration::from_secs(5)).await, StopOutcome::Stopped);
        // Only the reading that fit in the channel was committed.
        assert_eq!(file.offset(), first);
        assert_eq!(recv_id(&mut fx.rx).await, "1");
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_every_session() {
        let fx = fixture(16).await;
        let file = tracked(&fx.log).await;
        file.start(&fx.ctx);
        wait_until(|| file.state() == TailState::Tailing).await;

        fx.ctx.parent.cancel();
        wait_until(|| file.state() == TailState::Stopped).await;
    }
}
