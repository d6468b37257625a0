use crate::observer::OperationObserver;
use crate::RuntimeError;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::debug;

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Run `inv` to completion, relaying its merged stdout and stderr to
/// `observer` one line at a time as the lines arrive.
pub fn run_streaming(inv: &Invocation, observer: &dyn OperationObserver) -> Result<(), RuntimeError> {
    debug!("running: {inv}");
    let (reader, writer) = io::pipe()?;

    // The command owns the parent's copies of the write end; it must be
    // dropped before reading or the pipe never reports EOF.
    let mut child = {
        let mut cmd = inv.command();
        cmd.stdout(writer.try_clone()?).stderr(writer);
        cmd.spawn().map_err(|e| spawn_error(inv, &e))?
    };

    let relayed = relay_lines(reader, &inv.program, observer);
    let status = reap(&mut child, relayed)?;
    check_status(inv, status)
}

/// Run `inv` and return its stdout. Stderr is relayed to `observer`.
pub fn run_capture(
    inv: &Invocation,
    observer: &dyn OperationObserver,
) -> Result<String, RuntimeError> {
    debug!("running: {inv}");
    let mut child = inv
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(inv, &e))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr not captured"))?;

    let mut captured = Vec::new();
    let relayed = std::thread::scope(|s| -> Result<(), RuntimeError> {
        let relay = s.spawn(|| relay_lines(stderr, &inv.program, observer));
        stdout.read_to_end(&mut captured)?;
        relay
            .join()
            .map_err(|_| io::Error::other("stderr relay thread panicked"))??;
        Ok(())
    });

    let status = reap(&mut child, relayed)?;
    check_status(inv, status)?;
    Ok(String::from_utf8_lossy(&captured).into_owned())
}

fn relay_lines(
    source: impl Read,
    program: &str,
    observer: &dyn OperationObserver,
) -> Result<(), RuntimeError> {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        observer.line(program, line.trim_end());
    }
}

/// Wait for `child`. If reading its output failed, kill it first so it is
/// still reaped before the error is returned.
fn reap(child: &mut Child, relayed: Result<(), RuntimeError>) -> Result<ExitStatus, RuntimeError> {
    if let Err(e) = relayed {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }
    Ok(child.wait()?)
}

fn check_status(inv: &Invocation, status: ExitStatus) -> Result<(), RuntimeError> {
    if status.success() {
        return Ok(());
    }
    Err(RuntimeError::EngineInvocation {
        command: inv.to_string(),
        // Killed by a signal: no exit code.
        code: status.code().unwrap_or(-1),
    })
}

fn spawn_error(inv: &Invocation, e: &io::Error) -> RuntimeError {
    if e.kind() == io::ErrorKind::NotFound {
        RuntimeError::ToolMissing {
            tool: inv.program.clone(),
            reason: e.to_string(),
        }
    } else {
        RuntimeError::Io(io::Error::new(e.kind(), format!("{inv}: {e}")))
    }
}
