//! Piped child process plumbing shared by the local runner and the docker CLI.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug)]
pub(crate) struct ProcessOutput {
  pub code: Option<i32>,
  pub stdout: Vec<u8>,
  /// Last lines written to stderr.
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Spawn `command`, write `input` to its stdin and collect its stdout.
///
/// Stdin is written and closed while stdout is drained, so large payloads in
/// either direction cannot deadlock. Stderr lines are logged under `label` as
/// they arrive. The child is killed if the returned future is dropped.
pub(crate) async fn run_with_input(mut command: Command, label: &str, input: Vec<u8>) -> io::Result<ProcessOutput> {
  command
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let mut child = command.spawn()?;
  let mut stdin = child
    .stdin
    .take()
    .ok_or_else(|| io::Error::other("child stdin was not captured"))?;
  let mut stdout = child
    .stdout
    .take()
    .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
  let stderr = child
    .stderr
    .take()
    .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

  let write = async move {
    stdin.write_all(&input).await?;
    stdin.shutdown().await
  };

  let read = async move {
    let mut buf = Vec::new();
    stdout.read_to_end(&mut buf).await?;
    Ok::<_, io::Error>(buf)
  };

  let forward = async move {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Some(line) = lines.next_line().await? {
      info!(plugin = %label, "{line}");
      if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
      }
      tail.push_back(line);
    }
    Ok::<_, io::Error>(tail)
  };

  let (written, stdout, tail) = tokio::join!(write, read, forward);

  // A process may exit without reading all of its input.
  if let Err(e) = written
    && e.kind() != io::ErrorKind::BrokenPipe
  {
    return Err(e);
  }
  let stdout = stdout?;
  let tail = tail?;

  let status = child.wait().await?;
  debug!(plugin = %label, status = %status, bytes = stdout.len(), "process finished");

  Ok(ProcessOutput {
    code: status.code(),
    stdout,
    stderr: Vec::from(tail).join("\n"),
  })
}
