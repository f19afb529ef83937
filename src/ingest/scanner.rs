//! Line scanner: streams a log file, tracks the current sampling epoch and surfaces
//! identity lines and data lines.

use crate::error::LineError;
use crate::types::{Epoch, HostIdentity};
use std::io::{self, BufRead};

const TIME_PREFIX: &str = "TIME";
const IDENT_PREFIX: &str = "IDENT";

/// One non-blank data line under a known epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLine {
    pub line_no: usize,
    pub raw: String,
    pub epoch: Epoch,
}

impl DataLine {
    /// Leading record-type token.
    pub fn prefix(&self) -> &str {
        self.raw.split_whitespace().next().unwrap_or("")
    }

    /// All whitespace-separated tokens, prefix included.
    pub fn tokens(&self) -> Vec<&str> {
        self.raw.split_whitespace().collect()
    }
}

/// What the scanner found on a line worth reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Identity(HostIdentity),
    Epoch(Epoch),
    Data(DataLine),
    /// An anchor or identity line that did not parse. Counted as a parse error.
    Rejected { line_no: usize, error: LineError },
}

/// Per-file scan counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines_read: usize,
    pub blank_lines: usize,
    pub pre_epoch_lines: usize,
    pub epochs: usize,
}

/// Streams lines from a reader without buffering the file.
pub struct LineScanner<R> {
    reader: R,
    buf: Vec<u8>,
    epoch: Option<Epoch>,
    stats: ScanStats,
}

impl<R: BufRead> LineScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            epoch: None,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn current_epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    fn classify(&mut self, line_no: usize, line: &str) -> Option<ScanEvent> {
        let prefix = line.split_whitespace().next()?;
        match prefix {
            TIME_PREFIX => match parse_time_line(line) {
                Ok(epoch) => {
                    self.epoch = Some(epoch);
                    self.stats.epochs += 1;
                    Some(ScanEvent::Epoch(epoch))
                }
                Err(error) => Some(ScanEvent::Rejected { line_no, error }),
            },
            IDENT_PREFIX => match parse_ident_line(line) {
                Ok(identity) => Some(ScanEvent::Identity(identity)),
                Err(error) => Some(ScanEvent::Rejected { line_no, error }),
            },
            _ => match self.epoch {
                Some(epoch) => Some(ScanEvent::Data(DataLine {
                    line_no,
                    raw: line.to_string(),
                    epoch,
                })),
                None => {
                    self.stats.pre_epoch_lines += 1;
                    None
                }
            },
        }
    }
}

impl<R: BufRead> Iterator for LineScanner<R> {
    type Item = io::Result<ScanEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.stats.lines_read += 1;
            let line_no = self.stats.lines_read;
            let decoded = String::from_utf8_lossy(&self.buf);
            let line = decoded.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                self.stats.blank_lines += 1;
                continue;
            }
            let line = line.to_string();
            if let Some(event) = self.classify(line_no, &line) {
                return Some(Ok(event));
            }
        }
    }
}

/// `TIME <uptime[.frac]> <epoch_seconds>[.frac] [YYYY-MM-DD HH:MM:SS]`
pub fn parse_time_line(line: &str) -> Result<Epoch, LineError> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(TIME_PREFIX) {
        return Err(LineError::Malformed("TIME"));
    }
    let uptime = tokens
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|u| u.is_finite() && *u >= 0.0)
        .ok_or(LineError::Malformed("TIME"))?;
    let epoch_token = tokens.next().ok_or(LineError::Malformed("TIME"))?;
    let whole = epoch_token.split('.').next().unwrap_or("");
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LineError::Malformed("TIME"));
    }
    let epoch_ts = whole
        .parse::<i64>()
        .map_err(|_| LineError::Malformed("TIME"))?;
    Ok(Epoch {
        epoch_ts,
        run_seconds: uptime.trunc() as i64,
    })
}

/// `IDENT host <h> host_id <id> ver <v>` (any subset of keys) or `IDENT <ver> <host_id>`.
pub fn parse_ident_line(line: &str) -> Result<HostIdentity, LineError> {
    let tokens: Vec<&str> = line.split_whitespace().skip(1).collect();
    let keyword_form = tokens
        .first()
        .map(|t| matches!(*t, "host" | "host_id" | "ver"))
        .unwrap_or(false);

    let mut identity = HostIdentity::default();
    if keyword_form {
        for pair in tokens.chunks(2) {
            let [key, value] = pair else {
                return Err(LineError::Malformed("IDENT"));
            };
            match *key {
                "host" => identity.host = Some(value.to_string()),
                "host_id" => identity.host_id = Some(value.to_string()),
                "ver" => identity.ptop_version = Some(value.to_string()),
                _ => {}
            }
        }
    } else if let [ver, host_id] = tokens.as_slice() {
        identity.ptop_version = Some(ver.to_string());
        identity.host_id = Some(host_id.to_string());
        identity.host = Some(host_id.to_string());
    } else {
        return Err(LineError::Malformed("IDENT"));
    }

    if identity.is_empty() {
        return Err(LineError::Malformed("IDENT"));
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan(input: &str) -> (Vec<ScanEvent>, ScanStats) {
        let mut scanner = LineScanner::new(Cursor::new(input.as_bytes().to_vec()));
        let events = scanner.by_ref().map(|e| e.unwrap()).collect();
        (events, scanner.stats())
    }

    #[test]
    fn full_and_short_time_lines_parse() {
        let full = parse_time_line("TIME 12345.67 1700000000.123 2023-11-14 22:13:20").unwrap();
        assert_eq!(full.epoch_ts, 1_700_000_000);
        assert_eq!(full.run_seconds, 12345);

        let short = parse_time_line("TIME 0 1700000060").unwrap();
        assert_eq!(short.epoch_ts, 1_700_000_060);
        assert_eq!(short.run_seconds, 0);

        assert!(parse_time_line("TIME abc 1700000000").is_err());
        assert!(parse_time_line("TIME 1").is_err());
        assert!(parse_time_line("TIME 1 x17").is_err());
    }

    #[test]
    fn ident_forms() {
        let kw = parse_ident_line("IDENT host gm1 host_id 42-ab ver 8.6.2").unwrap();
        assert_eq!(kw.host.as_deref(), Some("gm1"));
        assert_eq!(kw.host_id.as_deref(), Some("42-ab"));
        assert_eq!(kw.ptop_version.as_deref(), Some("8.6.2"));

        let partial = parse_ident_line("IDENT host hostA ver 1.0").unwrap();
        assert_eq!(partial.host.as_deref(), Some("hostA"));
        assert!(partial.host_id.is_none());

        let simple = parse_ident_line("IDENT 9.0.1 XYZ123").unwrap();
        assert_eq!(simple.host.as_deref(), Some("XYZ123"));
        assert_eq!(simple.host_id.as_deref(), Some("XYZ123"));
        assert_eq!(simple.ptop_version.as_deref(), Some("9.0.1"));

        assert!(parse_ident_line("IDENT").is_err());
        assert!(parse_ident_line("IDENT host").is_err());
    }

    #[test]
    fn data_before_first_epoch_is_skipped() {
        let (events, stats) = scan(
            "IDENT host h ver 1\nCPU cpu0 u 1\n\nTIME 0 1700000000\nCPU cpu0 u 2\n",
        );
        assert_eq!(stats.pre_epoch_lines, 1);
        assert_eq!(stats.blank_lines, 1);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ScanEvent::Identity(_)));
        assert!(matches!(events[1], ScanEvent::Epoch(_)));
        match &events[2] {
            ScanEvent::Data(line) => {
                assert_eq!(line.prefix(), "CPU");
                assert_eq!(line.line_no, 5);
                assert_eq!(line.epoch.epoch_ts, 1_700_000_000);
                assert_eq!(line.tokens(), vec!["CPU", "cpu0", "u", "2"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn malformed_time_keeps_previous_epoch() {
        let (events, stats) =
            scan("TIME 0 1700000000\nTIME bogus\nMEM t 1\nTIME 1 1700000060\nMEM t 2\n");
        assert_eq!(stats.epochs, 2);
        assert!(matches!(events[1], ScanEvent::Rejected { line_no: 2, .. }));
        let epochs: Vec<i64> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Data(d) => Some(d.epoch.epoch_ts),
                _ => None,
            })
            .collect();
        assert_eq!(epochs, vec![1_700_000_000, 1_700_000_060]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let mut bytes = b"TIME 0 1700000000\nTOP 1 2 3.0% ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.push(b'\n');
        let mut scanner = LineScanner::new(Cursor::new(bytes));
        let events: Vec<ScanEvent> = scanner.by_ref().map(|e| e.unwrap()).collect();
        assert_eq!(events.len(), 2);
    }
}
