//! Serial AT command channel to a GNSS-capable cellular modem.
//!
//! The serial fd is owned by a dedicated `std::thread`; async callers submit
//! commands over an `mpsc` channel and await the reply on a `oneshot`. The
//! port is configured raw 115200 8N1 with a 100 ms read timeout, and every
//! command is preceded by a flush so a late reply to an earlier command can
//! not be mistaken for the current one.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Reply deadline for a single AT command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

struct Request {
    command: String,
    reply: oneshot::Sender<Result<String, String>>,
}

/// Cloneable handle to an AT command port.
#[derive(Clone)]
pub struct AtPort {
    tx: mpsc::Sender<Request>,
    device: String,
}

impl AtPort {
    /// Open `device` (e.g. `/dev/ttyUSB2`) and start its I/O thread.
    ///
    /// The port is a [`File`] from the start, so it is closed on every early
    /// return and when the I/O thread exits.
    pub fn open(device: &str) -> Result<Self, String> {
        // O_NONBLOCK keeps the open from waiting on carrier detect.
        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(device)
            .map_err(|e| format!("open {device}: {e}"))?;
        set_blocking(&port).map_err(|e| format!("{device}: {e}"))?;
        set_raw_mode(&port).map_err(|e| format!("{device}: {e}"))?;

        let (tx, rx) = mpsc::channel::<Request>(16);
        let name = device.to_string();
        std::thread::Builder::new()
            .name(format!("at-{name}"))
            .spawn(move || serve(port, rx, &name))
            .map_err(|e| format!("spawn AT thread: {e}"))?;

        info!("AT port {device}: opened");
        Ok(Self {
            tx,
            device: device.to_string(),
        })
    }

    /// Send one AT command and wait for its final result code.
    pub async fn command(&self, cmd: &str) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                command: cmd.to_string(),
                reply,
            })
            .await
            .map_err(|_| format!("AT port {} closed", self.device))?;
        rx.await
            .map_err(|_| format!("AT port {} dropped the reply", self.device))?
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

/// Reads are paced by VTIME, not by O_NONBLOCK.
fn set_blocking(port: &File) -> Result<(), String> {
    let fd = port.as_raw_fd();
    let current = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| format!("F_GETFL: {e}"))?;
    let flags = OFlag::from_bits_truncate(current).difference(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| format!("F_SETFL: {e}"))?;
    Ok(())
}

/// 115200 8N1 raw, local line without hardware flow control. A read returns
/// after 100 ms of silence (VMIN=0, VTIME=1).
fn set_raw_mode(port: &File) -> Result<(), String> {
    let mut attrs = termios::tcgetattr(port).map_err(|e| format!("tcgetattr: {e}"))?;
    termios::cfmakeraw(&mut attrs);
    termios::cfsetspeed(&mut attrs, BaudRate::B115200).map_err(|e| format!("cfsetspeed: {e}"))?;
    attrs.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
    attrs.control_flags.remove(ControlFlags::CRTSCTS);
    attrs.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    attrs.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;
    termios::tcsetattr(port, SetArg::TCSANOW, &attrs).map_err(|e| format!("tcsetattr: {e}"))
}

/// I/O thread body. Disables echo once, then serves requests until every
/// [`AtPort`] handle is dropped. The port closes when this returns.
fn serve(mut port: File, mut rx: mpsc::Receiver<Request>, device: &str) {
    match transact(&mut port, "ATE0", Duration::from_secs(2)) {
        Ok(_) => debug!("AT port {device}: echo disabled"),
        Err(e) => warn!("AT port {device}: ATE0 failed ({e}), continuing"),
    }

    while let Some(req) = rx.blocking_recv() {
        let result = transact(&mut port, &req.command, COMMAND_TIMEOUT);
        if let Err(e) = &result {
            warn!("AT port {device}: {} failed: {e}", req.command);
        }
        let _ = req.reply.send(result);
    }

    debug!("AT port {device}: closing");
}

/// Flush, write `command\r`, read until a final result code or `timeout`.
fn transact(port: &mut File, command: &str, timeout: Duration) -> Result<String, String> {
    termios::tcflush(&*port, FlushArg::TCIOFLUSH).map_err(|e| format!("tcflush: {e}"))?;
    port
        .write_all(format!("{command}\r").as_bytes())
        .map_err(|e| format!("write: {e}"))?;

    let mut buf = [0u8; 512];
    let mut raw = String::new();
    let deadline = Instant::now() + timeout;
    while !has_final_result(&raw) {
        if Instant::now() >= deadline {
            return Err(format!(
                "no final result after {:.1}s: {}",
                timeout.as_secs_f64(),
                raw.trim()
            ));
        }
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => raw.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => return Err(format!("read: {e}")),
        }
    }
    Ok(clean_reply(&raw))
}

/// `OK`, `ERROR`, `+CME ERROR:` or `+CMS ERROR:` on a line of its own.
fn has_final_result(raw: &str) -> bool {
    raw.lines().map(str::trim).any(|line| {
        line == "OK"
            || line == "ERROR"
            || line.starts_with("+CME ERROR:")
            || line.starts_with("+CMS ERROR:")
    })
}

/// Drop control bytes, blank lines and echoed `AT...` command lines.
fn clean_reply(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.chars()
                .filter(|&c| !c.is_control() && c != '\u{FFFD}')
                .collect::<String>()
        })
        .filter(|line| {
            let text = line.trim_start_matches(|c: char| !c.is_ascii_alphabetic() && c != '+');
            !text.is_empty() && !text.starts_with("AT")
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_result_codes() {
        assert!(has_final_result("+QGPSLOC: 1,2\r\nOK\r\n"));
        assert!(has_final_result("ERROR\r\n"));
        assert!(has_final_result("+CME ERROR: 516\r\n"));
        assert!(!has_final_result("+QGPSLOC: 1,2\r\n"));
        assert!(!has_final_result(""));
    }

    #[test]
    fn test_clean_reply_strips_echo_and_garbage() {
        let raw = "\x00AT+QGPSLOC=2\r\n+QGPSLOC: 153233.0,45.5,-73.5,1.2,47.0,3,270.5,0.0,0.0,260226,08\r\n\r\nOK\r\n";
        let cleaned = clean_reply(raw);
        assert_eq!(
            cleaned,
            "+QGPSLOC: 153233.0,45.5,-73.5,1.2,47.0,3,270.5,0.0,0.0,260226,08\r\nOK"
        );
    }

    #[test]
    fn test_clean_reply_keeps_error_lines() {
        assert_eq!(clean_reply("\u{FFFD}+CME ERROR: 516\r\n"), "+CME ERROR: 516");
    }

    #[test]
    fn test_open_missing_device_fails() {
        let err = AtPort::open("/dev/walkps-no-such-tty").err().unwrap();
        assert!(err.starts_with("open /dev/walkps-no-such-tty"), "{err}");
    }

    #[test]
    fn test_open_non_tty_fails_at_termios() {
        let err = AtPort::open("/dev/null").err().unwrap();
        assert!(err.contains("tcgetattr"), "{err}");
    }
}
