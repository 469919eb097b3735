// crates/server/src/jobs/reader.rs
//! The per-job output pipeline.
//!
//! One reader task owns the process's combined output stream: it splits it
//! into lines, masks each line, and sends it into a channel. One writer task
//! consumes that channel, appending to the job's log file and publishing to
//! the log hub. Neither side knows who (if anyone) is observing; the reader
//! never learns where its lines end up.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use runhub_core::lines::LineSplitter;
use runhub_core::secrets::mask_secrets;

use super::hub::LogHub;

const READ_CHUNK: usize = 8192;
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Join handles for the two halves of the pipeline. The finalizer joins
/// both with a bounded wait after the process exits.
pub struct OutputTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Wire a process output stream to the log file and the hub.
///
/// Every line crossing the channel has already been masked; nothing
/// downstream ever sees a raw secret.
pub fn spawn_output_tasks<R>(
    output: R,
    job_id: String,
    log_path: PathBuf,
    secrets: Vec<String>,
    hub: Arc<LogHub>,
) -> OutputTasks
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let reader = tokio::spawn(read_output(output, secrets, tx));
    let writer = tokio::spawn(consume_lines(rx, job_id, log_path, hub));
    OutputTasks { reader, writer }
}

async fn read_output<R>(mut output: R, secrets: Vec<String>, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match output.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&chunk[..n]) {
                    if tx.send(mask_secrets(&line, &secrets)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading runner output failed");
                break;
            }
        }
    }
    // Processes that end without a final newline still get their last line.
    if let Some(rest) = splitter.flush() {
        let _ = tx.send(mask_secrets(&rest, &secrets)).await;
    }
}

async fn consume_lines(
    mut rx: mpsc::Receiver<String>,
    job_id: String,
    log_path: PathBuf,
    hub: Arc<LogHub>,
) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::error!(path = %log_path.display(), error = %e, "cannot open job log");
            None
        }
    };

    while let Some(line) = rx.recv().await {
        hub.publish(&job_id, &line);
        let mut write_failed = false;
        if let Some(f) = file.as_mut() {
            let mut buf = line.into_bytes();
            buf.push(b'\n');
            if let Err(e) = f.write_all(&buf).await {
                tracing::error!(path = %log_path.display(), error = %e, "writing job log failed");
                write_failed = true;
            }
        }
        if write_failed {
            file = None;
        }
    }

    if let Some(f) = file.as_mut() {
        let _ = f.flush().await;
    }
}
