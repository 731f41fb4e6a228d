//! Progress estimation from the compositing engine's diagnostic stream.
//!
//! ffmpeg announces the first input's length once (`Duration: 00:01:02.50`)
//! and then reports its position periodically (`time=00:00:31.20`).

use std::io::BufRead;
use std::sync::LazyLock;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid regex")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    AwaitingDuration,
    Tracking { total: f64, last: Option<u8> },
}

/// Turns engine output lines into whole-percent progress updates.
///
/// [`feed`](Self::feed) yields a percentage at most once per integer value
/// and never goes backwards.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    state: State,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingDuration,
        }
    }

    /// Total length in seconds, once announced.
    pub fn total(&self) -> Option<f64> {
        match self.state {
            State::AwaitingDuration => None,
            State::Tracking { total, .. } => Some(total),
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<u8> {
        match self.state {
            State::AwaitingDuration => {
                let total = capture_seconds(&DURATION_RE, line)?;
                if total > 0.0 {
                    self.state = State::Tracking { total, last: None };
                }
                None
            }
            State::Tracking { total, last } => {
                let current = capture_seconds(&TIME_RE, line)?;
                let percent = ((current / total) * 100.0).clamp(0.0, 100.0) as u8;
                if last.is_some_and(|l| percent <= l) {
                    return None;
                }
                self.state = State::Tracking {
                    total,
                    last: Some(percent),
                };
                Some(percent)
            }
        }
    }
}

/// The highest 10% mark passed when moving from `previous` to `current`
/// percent, if any. Updates arrive in jumps, so the mark is usually below
/// `current`.
pub fn crossed_decile(previous: Option<u8>, current: u8) -> Option<u8> {
    let mark = current / 10 * 10;
    match previous {
        Some(p) if p / 10 * 10 >= mark => None,
        _ => Some(mark),
    }
}

fn capture_seconds(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let h: f64 = caps[1].parse().ok()?;
    let m: f64 = caps[2].parse().ok()?;
    let s: f64 = caps[3].parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Call `on_line` for every `\n`- or `\r`-terminated line until EOF.
///
/// ffmpeg rewrites its status line with carriage returns, so splitting on
/// `\n` alone would hold back every update until the process exits.
pub fn for_each_line<R: BufRead>(
    mut reader: R,
    mut on_line: impl FnMut(&str),
) -> std::io::Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let consumed = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    on_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
        reader.consume(consumed);
    }
    if !pending.is_empty() {
        on_line(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}
