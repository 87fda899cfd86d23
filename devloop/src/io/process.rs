//! Child processes with a deadline and bounded captured output.
//!
//! Both external boundaries that shell out (quality checks and the command-backed
//! generator) go through [`run_bounded`].

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long the output pipes may stay open after the child has exited.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// What a finished (or killed) child produced.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout beyond the capture limit.
    pub stdout_dropped: usize,
    /// Bytes dropped from stderr beyond the capture limit.
    pub stderr_dropped: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr, the way a terminal would interleave them coarsely.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Spawn `cmd`, feed it `stdin`, and wait at most `timeout`.
///
/// The child leads its own process group. On timeout the whole group is killed, so
/// grandchildren started by a shell script die with it; `timed_out` is set and that
/// is not an error. Spawn and wait failures are.
///
/// Stdout and stderr are drained on reader threads and at most `capture_limit` bytes
/// of each stream are kept. Once the child has exited, a process that still holds
/// the pipes open gets [`PIPE_GRACE`] before its group is killed, and the readers
/// are abandoned if even that does not close them.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), capture_limit))]
pub fn run_bounded(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    capture_limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.process_group(0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let started = Instant::now();
    let mut child = cmd.spawn().context("spawn command")?;
    let pgid = child.id();

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || -> std::io::Result<()> {
                pipe.write_all(&input)?;
                pipe.flush()
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, capture_limit, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, capture_limit, done_tx);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_process_group(pgid);
            if let Err(err) = child.kill() {
                debug!(error = %err, "direct kill after group kill failed");
            }
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let mut open = await_readers(&done_rx, 2, PIPE_GRACE)?;
    if open > 0 {
        warn!(open, "child exited but its output is still held open, killing its group");
        kill_process_group(pgid);
        open = await_readers(&done_rx, open, PIPE_GRACE)?;
        if open > 0 {
            warn!(open, "abandoning output readers");
        }
    }
    let elapsed = started.elapsed();

    if let Some(writer) = writer {
        if writer.is_finished() {
            match writer.join() {
                // A child that exits without reading its input closes the pipe early.
                Ok(Err(err)) if err.kind() != std::io::ErrorKind::BrokenPipe => {
                    warn!(error = %err, "failed to write child stdin");
                }
                Ok(_) => {}
                Err(_) => warn!("stdin writer thread panicked"),
            }
        } else {
            warn!("abandoning stdin writer, input is still held open");
        }
    }

    let (stdout, stdout_dropped) = take_capture(&stdout_capture);
    let (stderr, stderr_dropped) = take_capture(&stderr_capture);
    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output capped");
    }

    debug!(
        exit_code = ?status.code(),
        timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        "command finished"
    );
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
        elapsed,
    })
}

/// A `sh -c <script>` command rooted at `dir`.
pub fn shell(script: &str, dir: &std::path::Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).current_dir(dir);
    cmd
}

/// Best-effort SIGKILL to every process in group `pgid`.
fn kill_process_group(pgid: u32) {
    let target = format!("-{pgid}");
    let status = Command::new("kill")
        .args(["-s", "KILL", "--", target.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(pgid, "killed process group"),
        Ok(status) => debug!(pgid, exit_code = ?status.code(), "process group already gone"),
        Err(err) => warn!(pgid, error = %err, "failed to invoke kill"),
    }
}

fn spawn_reader<R>(reader: R, limit: usize, done: Sender<Result<()>>) -> SharedCapture
where
    R: Read + Send + 'static,
{
    let capture = SharedCapture::default();
    let sink = Arc::clone(&capture);
    thread::spawn(move || {
        let result = drain_limited(reader, limit, &sink);
        // The receiver is gone once the readers have been abandoned.
        let _ = done.send(result);
    });
    capture
}

/// Wait for `pending` readers to finish, at most `grace`. Returns how many are still open.
fn await_readers(
    done: &Receiver<Result<()>>,
    mut pending: usize,
    grace: Duration,
) -> Result<usize> {
    let deadline = Instant::now() + grace;
    while pending > 0 {
        match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => {
                result?;
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }
    Ok(pending)
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    (std::mem::take(&mut capture.kept), capture.dropped)
}

fn drain_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let room = limit.saturating_sub(capture.kept.len()).min(n);
        capture.kept.extend_from_slice(&chunk[..room]);
        capture.dropped += n - room;
    }
}
