//! Background writer for the outcome log
//!
//! Appends are queued on an unbounded channel and return immediately. A single
//! task drains the queue in order, in batches, through a fixed-size buffer. When
//! the buffer cannot take the next line the task waits for the file to drain it
//! before continuing, and every batch ends with a forced flush.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Size of the in-process write buffer in front of the log file
const SINK_BUFFER_CAPACITY: usize = 64 * 1024;

/// Most lines written between two forced flushes
const MAX_BATCH_LINES: usize = 256;

/// Decides per stored line whether it survives a rewrite
pub type LineFilter = Box<dyn FnMut(&str) -> bool + Send>;

enum WriteCommand {
    Append(String),
    Flush(oneshot::Sender<io::Result<()>>),
    Retain {
        keep: LineFilter,
        ack: oneshot::Sender<io::Result<usize>>,
    },
    Close(oneshot::Sender<io::Result<()>>),
}

/// Handle to the writer task
pub struct LogWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl LogWriter {
    /// Open (or create) the log file and start the writer task
    pub async fn open(path: &Path) -> io::Result<Self> {
        let sink = LogSink::open(path.to_path_buf()).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(sink, rx));
        Ok(Self { tx })
    }

    /// Queue one newline-terminated line
    pub fn enqueue(&self, line: String) -> io::Result<()> {
        self.tx.send(WriteCommand::Append(line)).map_err(|_| closed())
    }

    /// Wait until everything queued so far is on disk, reporting any deferred failure
    pub async fn flush(&self) -> io::Result<()> {
        self.request(WriteCommand::Flush).await
    }

    /// Rewrite the file keeping only lines accepted by `keep`; returns the number dropped.
    /// Runs on the writer task, so everything queued before it is considered.
    /// Lines that are not valid UTF-8 are kept without being offered to `keep`.
    pub async fn retain(&self, keep: LineFilter) -> io::Result<usize> {
        self.request(|ack| WriteCommand::Retain { keep, ack }).await
    }

    /// Drain the queue and close the file; the writer accepts nothing afterwards
    pub async fn close(&self) -> io::Result<()> {
        self.request(WriteCommand::Close).await
    }

    async fn request<T, F>(&self, build: F) -> io::Result<T>
    where
        F: FnOnce(oneshot::Sender<io::Result<T>>) -> WriteCommand,
    {
        let (ack, done) = oneshot::channel();
        self.tx.send(build(ack)).map_err(|_| closed())?;
        done.await.map_err(|_| closed())?
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "outcome log writer is closed")
}

struct LogSink {
    path: PathBuf,
    file: BufWriter<File>,
    /// First write failure since the last flush request
    failure: Option<io::Error>,
    drain_waits: u64,
}

impl LogSink {
    async fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path).await?;
        Ok(Self {
            path,
            file: BufWriter::with_capacity(SINK_BUFFER_CAPACITY, file),
            failure: None,
            drain_waits: 0,
        })
    }

    async fn write_batch(&mut self, batch: &[String]) {
        if let Err(e) = self.try_write_batch(batch).await {
            error!("Outcome log write failed ({} lines): {}", batch.len(), e);
            self.failure.get_or_insert(e);
        }
    }

    async fn try_write_batch(&mut self, batch: &[String]) -> io::Result<()> {
        for line in batch {
            let free = SINK_BUFFER_CAPACITY.saturating_sub(self.file.buffer().len());
            if line.len() > free {
                // buffer full: write_all below suspends until the file drains it
                self.drain_waits += 1;
                trace!("Outcome sink buffer full, waiting for drain ({} so far)", self.drain_waits);
            }
            self.file.write_all(line.as_bytes()).await?;
        }
        self.file.flush().await?;
        debug!("Flushed {} outcome lines to {}", batch.len(), self.path.display());
        Ok(())
    }

    fn take_failure(&mut self) -> io::Result<()> {
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn retain(&mut self, mut keep: LineFilter) -> io::Result<usize> {
        self.file.flush().await?;
        self.take_failure()?;

        let content = tokio::fs::read(&self.path).await?;
        let mut kept = Vec::with_capacity(content.len());
        let mut dropped = 0;
        for bytes in content.split(|b| *b == b'\n') {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            // lines that are not UTF-8 cannot be judged and stay
            let keep_line = std::str::from_utf8(bytes).map_or(true, |line| keep(line));
            if keep_line {
                kept.extend_from_slice(bytes);
                kept.push(b'\n');
            } else {
                dropped += 1;
            }
        }
        if dropped == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("rewrite.tmp");
        {
            let mut out = File::create(&tmp).await?;
            out.write_all(&kept).await?;
            out.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        self.file = BufWriter::with_capacity(SINK_BUFFER_CAPACITY, open_append(&self.path).await?);
        debug!("Rewrote {} dropping {} lines", self.path.display(), dropped);
        Ok(dropped)
    }

    async fn close(&mut self) -> io::Result<()> {
        let flushed = self.file.shutdown().await;
        self.take_failure()?;
        flushed
    }
}

async fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn run(mut sink: LogSink, mut rx: mpsc::UnboundedReceiver<WriteCommand>) {
    let mut carried: Option<WriteCommand> = None;

    loop {
        let command = match carried.take() {
            Some(command) => command,
            None => match rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            WriteCommand::Append(line) => {
                let mut batch = vec![line];
                while batch.len() < MAX_BATCH_LINES {
                    match rx.try_recv() {
                        Ok(WriteCommand::Append(line)) => batch.push(line),
                        Ok(other) => {
                            carried = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                sink.write_batch(&batch).await;
            }
            WriteCommand::Flush(ack) => {
                let _ = ack.send(sink.take_failure());
            }
            WriteCommand::Retain { keep, ack } => {
                let _ = ack.send(sink.retain(keep).await);
            }
            WriteCommand::Close(ack) => {
                let _ = ack.send(sink.close().await);
                break;
            }
        }
    }

    // anything still queued after close is dropped with the receiver
    debug!("Outcome writer for {} stopped", sink.path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let writer = LogWriter::open(&path).await.unwrap();

        for i in 0..1000 {
            writer.enqueue(format!("{{\"n\":{}}}\n", i)).unwrap();
        }
        writer.flush().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let numbers: Vec<usize> = text
            .lines()
            .map(|l| l.trim_start_matches("{\"n\":").trim_end_matches('}').parse().unwrap())
            .collect();
        assert_eq!(numbers, (0..1000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_large_lines_pass_through_full_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let writer = LogWriter::open(&path).await.unwrap();

        let big = format!("{}\n", "x".repeat(SINK_BUFFER_CAPACITY / 3));
        for _ in 0..10 {
            writer.enqueue(big.clone()).unwrap();
        }
        writer.close().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 10);
        assert_eq!(text.len(), big.len() * 10);
    }

    #[tokio::test]
    async fn test_retain_sees_queued_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let writer = LogWriter::open(&path).await.unwrap();

        writer.enqueue("a\n".to_string()).unwrap();
        writer.enqueue("b\n".to_string()).unwrap();
        writer.enqueue("a\n".to_string()).unwrap();
        let dropped = writer.retain(Box::new(|line| line != "a")).await.unwrap();
        writer.enqueue("c\n".to_string()).unwrap();
        writer.flush().await.unwrap();

        assert_eq!(dropped, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b\nc\n");
    }

    #[tokio::test]
    async fn test_retain_keeps_undecodable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, b"a\n\xff\xfe\nb\n").unwrap();
        let writer = LogWriter::open(&path).await.unwrap();

        let dropped = writer.retain(Box::new(|line| line != "a")).await.unwrap();

        assert_eq!(dropped, 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"\xff\xfe\nb\n");
    }

    #[tokio::test]
    async fn test_closed_writer_rejects_work() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::open(&dir.path().join("log.jsonl")).await.unwrap();
        writer.close().await.unwrap();

        // the task exits after acknowledging close
        tokio::task::yield_now().await;
        assert!(writer.flush().await.is_err());
    }
}
