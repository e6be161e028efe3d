//! IPC transport: spawns a capture helper as a child process and frames
//! over its piped stdio, standing in for Kismet's raw fd-pair handoff
//! (which needs unsafe fd juggling that has no safe equivalent in Tokio).

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tracing::{info, warn};

use super::{read_frame_from, write_frame_to, FrameTransport, TransportError};
use crate::wire::Frame;

/// A helper subprocess, framed over stdin/stdout.
pub struct IpcTransport {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl IpcTransport {
    /// Spawn `path` with `args`, taking ownership of its stdio.
    pub async fn spawn(path: &str, args: &[String]) -> Result<Self, TransportError> {
        let mut child = ProcessCommand::new(path)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::ProcessExited("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::ProcessExited("no stdout handle".into()))?;

        info!(path, pid = child.id(), "capture helper spawned");

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl FrameTransport for IpcTransport {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        read_frame_from(&mut self.stdout).await
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        write_frame_to(&mut self.stdin, frame).await
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                info!(?status, "capture helper already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to poll helper status"),
        }

        if let Some(id) = self.child.id() {
            // SIGTERM first; Child::kill() below sends a hard kill if it
            // doesn't exit in time.
            #[cfg(unix)]
            // SAFETY: kill(2) with a valid pid and SIGTERM always returns
            // safely; ESRCH (process already gone) is a normal outcome here.
            unsafe {
                libc::kill(id as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "capture helper exited after shutdown request");
            }
            Ok(Err(e)) => warn!(error = %e, "error waiting for helper exit"),
            Err(_) => {
                warn!("capture helper did not exit in time, killing");
                let _ = self.child.kill().await;
                let _ = self.child.wait().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_exchange_frames_with_cat() {
        // `cat` just echoes stdin to stdout, which is enough to exercise
        // the frame read/write path end-to-end without a real helper.
        let mut transport = IpcTransport::spawn("cat", &[]).await.expect("spawn cat");
        let frame = Frame::new(crate::wire::ProtoVersion::V3, 1, b"ping".to_vec());
        transport.write_frame(&frame).await.unwrap();
        let echoed = transport.read_frame().await.unwrap();
        assert_eq!(echoed.content, b"ping");
        transport.shutdown().await.unwrap();
    }
}
