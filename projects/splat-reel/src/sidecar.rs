//! Sidecar process plumbing.
//!
//! External models run in child processes that read one JSON request per line
//! on stdin and answer with one JSON response per line on stdout. Their stderr
//! is inherited so model logs show up next to ours.

use crate::error::{PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Program and arguments used to launch a sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SidecarCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

/// Newline-delimited JSON request/response channel.
pub struct JsonLines<R, W> {
    name: String,
    reader: R,
    writer: W,
    line: String,
}

impl<R: BufRead, W: Write> JsonLines<R, W> {
    pub fn new(name: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            name: name.into(),
            reader,
            writer,
            line: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send<T: Serialize>(&mut self, message: &T) -> PipelineResult<()> {
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');
        self.writer
            .write_all(&payload)
            .and_then(|_| self.writer.flush())
            .map_err(|e| PipelineError::sidecar(&self.name, format!("write failed: {e}")))
    }

    /// Reads the next non-blank line and decodes it.
    pub fn recv<T: DeserializeOwned>(&mut self) -> PipelineResult<T> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| PipelineError::sidecar(&self.name, format!("read failed: {e}")))?;
            if read == 0 {
                return Err(PipelineError::sidecar(&self.name, "closed its output"));
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed).map_err(|e| {
                PipelineError::sidecar(&self.name, format!("bad response '{trimmed}': {e}"))
            });
        }
    }

    pub fn request<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        request: &Req,
    ) -> PipelineResult<Resp> {
        self.send(request)?;
        self.recv()
    }
}

/// A running sidecar. The child is killed if it is still alive on drop.
pub struct SidecarProcess {
    child: Child,
    channel: JsonLines<BufReader<ChildStdout>, ChildStdin>,
}

impl SidecarProcess {
    pub fn spawn(name: &str, command: &SidecarCommand) -> PipelineResult<Self> {
        tracing::info!(
            "Starting {} sidecar: {} {:?}",
            name,
            command.program.display(),
            command.args
        );
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                PipelineError::sidecar(
                    name,
                    format!("failed to launch {}: {e}", command.program.display()),
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::sidecar(name, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::sidecar(name, "stdout not captured"))?;

        Ok(Self {
            child,
            channel: JsonLines::new(name, BufReader::new(stdout), stdin),
        })
    }

    pub fn channel(&mut self) -> &mut JsonLines<BufReader<ChildStdout>, ChildStdin> {
        &mut self.channel
    }

    /// Waits for the child to exit after it has been asked to shut down.
    pub fn wait(&mut self) -> PipelineResult<()> {
        let status = self.child.wait()?;
        if status.success() {
            tracing::info!("{} sidecar exited cleanly", self.channel.name());
            Ok(())
        } else {
            Err(PipelineError::sidecar(
                self.channel.name(),
                format!("exited with {status}"),
            ))
        }
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::warn!("Killing {} sidecar that was not shut down", self.channel.name());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Message {
        Ping { n: u32 },
        Pong { n: u32 },
    }

    #[test]
    fn test_send_writes_one_line_per_message() {
        let mut out = Vec::new();
        {
            let mut channel = JsonLines::new("test", Cursor::new(Vec::<u8>::new()), &mut out);
            channel.send(&Message::Ping { n: 1 }).unwrap();
            channel.send(&Message::Ping { n: 2 }).unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "{\"type\":\"ping\",\"n\":1}\n{\"type\":\"ping\",\"n\":2}\n"
        );
    }

    #[test]
    fn test_recv_skips_blank_lines_and_reports_eof() {
        let input = "\n{\"type\":\"pong\",\"n\":7}\n";
        let mut channel = JsonLines::new("test", Cursor::new(input.as_bytes()), Vec::<u8>::new());
        assert_eq!(channel.recv::<Message>().unwrap(), Message::Pong { n: 7 });
        let err = channel.recv::<Message>().unwrap_err();
        assert!(err.to_string().contains("closed its output"));
    }

    #[test]
    fn test_garbage_response_is_a_sidecar_error() {
        let mut channel = JsonLines::new("test", Cursor::new(&b"not json\n"[..]), Vec::<u8>::new());
        assert!(matches!(
            channel.recv::<Message>(),
            Err(PipelineError::Sidecar { .. })
        ));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let command = SidecarCommand::new("/nonexistent/sidecar-binary");
        assert!(matches!(
            SidecarProcess::spawn("test", &command),
            Err(PipelineError::Sidecar { .. })
        ));
    }
}
