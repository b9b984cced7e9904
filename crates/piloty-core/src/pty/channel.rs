//! PTY channel: one master/child pair with byte-oriented I/O.
//!
//! Dimensions are fixed at open time; there is no resize entry point.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::error::{PilotyError, Result};

/// How a channel is opened: argv, working directory, extra environment, and
/// the fixed terminal dimensions.
#[derive(Debug, Clone)]
pub struct PtyOpen {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

pub struct PtyChannel {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl PtyChannel {
    /// Fork the child with the slave as its controlling terminal. The child
    /// inherits the server environment plus `TERM=xterm-256color` and starts
    /// in the requested cwd.
    pub fn open(opts: &PtyOpen) -> Result<Self> {
        if opts.rows == 0 || opts.cols == 0 {
            return Err(PilotyError::InvalidArgument(format!(
                "terminal dimensions must be at least 1x1, got {}x{}",
                opts.cols, opts.rows
            )));
        }
        let Some((program, args)) = opts.argv.split_first() else {
            return Err(PilotyError::InvalidArgument(
                "empty argv for session shell".to_string(),
            ));
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|source| PilotyError::Spawn { source })?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(&opts.cwd);
        // CommandBuilder starts from an empty environment; copy ours in
        // before the overrides.
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|source| PilotyError::Spawn { source })?;
        let pid = child.process_id();
        // The parent keeps only the master side.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|source| PilotyError::Spawn { source })?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|source| PilotyError::Spawn { source })?;

        debug!(pid = ?pid, cwd = %opts.cwd.display(), "pty channel opened");

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            child: Mutex::new(child),
            pid,
            closed: AtomicBool::new(false),
        })
    }

    /// Hand the blocking reader to the ingestion worker. Yields once.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Write all bytes to the master. `Write::write_all` retries partial
    /// writes internally.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PilotyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty channel closed",
            )));
        }
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let Some(writer) = guard.as_mut() else {
            return Err(PilotyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty writer gone",
            )));
        };
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Deliver a signal to the foreground process group of the terminal,
    /// falling back to the child's own group when the PTY cannot report one.
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let leader = {
            let guard = self.master.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().and_then(|m| m.process_group_leader())
        };
        let target = leader.or_else(|| self.pid.map(|p| p as i32)).ok_or_else(|| {
            PilotyError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no process to signal",
            ))
        })?;
        // Negative pid addresses the whole process group.
        kill(Pid::from_raw(-target), sig)
            .map_err(|errno| PilotyError::Io(std::io::Error::from_raw_os_error(errno as i32)))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        matches!(child.try_wait(), Ok(None))
    }

    /// SIGHUP the child, escalate to SIGKILL if it lingers, reap it, and
    /// close the master. Idempotent. Blocking; call from a blocking task.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let still_alive = {
            let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
            matches!(child.try_wait(), Ok(None))
        };
        if still_alive {
            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGHUP);
            }
            if !self.reap(Duration::from_millis(500)) {
                if let Some(pid) = self.pid {
                    warn!(pid = pid, "child survived SIGHUP, sending SIGKILL");
                    let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
                }
                if !self.reap(Duration::from_secs(2)) {
                    warn!(pid = ?self.pid, "child did not exit after SIGKILL");
                }
            }
        }

        *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.master.lock().unwrap_or_else(|e| e.into_inner()) = None;
        debug!(pid = ?self.pid, "pty channel closed");
    }

    fn reap(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
                match child.try_wait() {
                    Ok(Some(_)) => return true,
                    Ok(None) => {}
                    Err(_) => return true,
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse a signal name such as `INT`, `SIGTERM`, or `hup`.
pub fn signal_from_name(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    let sig = match bare {
        "HUP" => Signal::SIGHUP,
        "INT" => Signal::SIGINT,
        "QUIT" => Signal::SIGQUIT,
        "KILL" => Signal::SIGKILL,
        "TERM" => Signal::SIGTERM,
        "USR1" => Signal::SIGUSR1,
        "USR2" => Signal::SIGUSR2,
        "STOP" => Signal::SIGSTOP,
        "CONT" => Signal::SIGCONT,
        "WINCH" => Signal::SIGWINCH,
        other => {
            return Err(PilotyError::InvalidArgument(format!(
                "unknown signal name: {other}"
            )))
        }
    };
    Ok(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names_parse_with_and_without_prefix() {
        assert_eq!(signal_from_name("INT").unwrap(), Signal::SIGINT);
        assert_eq!(signal_from_name("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(signal_from_name("hup").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn unknown_signal_rejected() {
        assert!(matches!(
            signal_from_name("BOGUS"),
            Err(PilotyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_dimensions_rejected_at_open() {
        let opts = PtyOpen {
            argv: vec!["true".to_string()],
            cwd: PathBuf::from("/"),
            env: Vec::new(),
            rows: 0,
            cols: 80,
        };
        assert!(matches!(
            PtyChannel::open(&opts),
            Err(PilotyError::InvalidArgument(_))
        ));
    }
}
