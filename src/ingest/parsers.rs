//! Plugin parsers: a registration table from record prefix to a parsing strategy.
//!
//! Four strategies cover every registered family:
//! - fixed-anchor: literal keywords locate positional values (`CPU`, `MEM`, `DISK`, ...)
//! - key/value: alternating mnemonic and value tokens (fast-path and proxy records)
//! - triplet: repeating `(index, count, avg)` groups (DB latency histograms)
//! - opaque: the raw line is kept, nothing is extracted
//!
//! The strategy is chosen by prefix lookup, never by sniffing line content.

use crate::error::LineError;
use crate::ingest::scanner::DataLine;
use crate::types::{FieldValue, ParsedRecord, TripletGroup};
use std::collections::HashMap;

/// Result of a fixed-anchor extractor on a line it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Record,
    /// Banner/header line of the family; neither a record nor an error.
    Ignored,
}

/// Extracts fields from the tokens after the prefix.
pub type AnchorFn = fn(&[&str], &mut ParsedRecord) -> Result<Handled, LineError>;

/// Positional token preceding the key/value pairs.
#[derive(Debug, Clone, Copy)]
pub enum Leading {
    Label(&'static str),
    Number(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct KeyValueSpec {
    pub leading: &'static [Leading],
    /// Field name for an optional bare word between the leading tokens and the pairs.
    pub protocol_label: Option<&'static str>,
    /// Mnemonics the family is known to emit.
    pub known_keys: &'static [&'static str],
    /// Unit tokens that may appear where a key is expected; skipped.
    pub unit_tokens: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct TripletSpec {
    pub width: usize,
}

/// Parsing strategy registered for one prefix.
#[derive(Clone, Copy)]
pub enum PluginParser {
    FixedAnchor(AnchorFn),
    KeyValue(KeyValueSpec),
    Triplet(TripletSpec),
    Opaque,
}

impl std::fmt::Debug for PluginParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginParser::FixedAnchor(_) => write!(f, "FixedAnchor"),
            PluginParser::KeyValue(spec) => f.debug_tuple("KeyValue").field(spec).finish(),
            PluginParser::Triplet(spec) => f.debug_tuple("Triplet").field(spec).finish(),
            PluginParser::Opaque => write!(f, "Opaque"),
        }
    }
}

/// Outcome of dispatching one data line.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Record(ParsedRecord),
    Ignored,
    Failed(LineError),
    Unregistered,
}

/// Prefix to parser lookup table.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    parsers: HashMap<&'static str, PluginParser>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Every record family the collector is known to write.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("CPU", PluginParser::FixedAnchor(parse_cpu));
        registry.register("MEM", PluginParser::FixedAnchor(parse_mem));
        registry.register("DISK", PluginParser::FixedAnchor(parse_disk));
        registry.register("NET", PluginParser::FixedAnchor(parse_net));
        registry.register("TOP", PluginParser::FixedAnchor(parse_top));
        registry.register("SMAPS", PluginParser::FixedAnchor(parse_smaps));
        registry.register("FPC", PluginParser::FixedAnchor(parse_fpc));
        registry.register("FPP", PluginParser::FixedAnchor(parse_fpp));
        registry.register("FPS", PluginParser::FixedAnchor(parse_fps));

        registry.register(
            "FPPORTS",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[Leading::Label("port")],
                protocol_label: None,
                known_keys: &["ip", "op", "ib", "ob", "ie", "oe", "mc", "im", "in"],
                unit_tokens: &[],
            }),
        );
        registry.register(
            "FPMBUF",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[],
                protocol_label: None,
                known_keys: &["muc"],
                unit_tokens: &[],
            }),
        );
        registry.register(
            "DBMPOOL",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[],
                protocol_label: None,
                known_keys: &["sz", "total", "used", "free", "used_percent"],
                unit_tokens: &["MiB"],
            }),
        );
        registry.register(
            "DOT_STAT",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[Leading::Label("index"), Leading::Label("addr")],
                protocol_label: Some("protocol"),
                known_keys: &["rx", "tx", "dp", "qd"],
                unit_tokens: &[],
            }),
        );
        registry.register(
            "DOH_STAT",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[Leading::Label("index"), Leading::Label("addr")],
                protocol_label: None,
                known_keys: &["rx", "tx", "dp", "qd"],
                unit_tokens: &[],
            }),
        );
        registry.register(
            "TCP_DCA_STAT",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[
                    Leading::Number("iface_count"),
                    Leading::Label("interface_addr"),
                ],
                protocol_label: None,
                known_keys: &["rx", "tx", "dp", "qd", "os", "cs", "as"],
                unit_tokens: &[],
            }),
        );
        registry.register(
            "FPVLSTATS",
            PluginParser::KeyValue(KeyValueSpec {
                leading: &[],
                protocol_label: None,
                known_keys: &[
                    "F-P", "F-W", "F-B", "F-BA", "N-P", "N-W", "N-B", "N-R", "N-BA", "N-DD",
                    "T-F", "T-B",
                ],
                unit_tokens: &[],
            }),
        );

        for prefix in ["DBWR", "DBWA", "DBRD"] {
            registry.register(prefix, PluginParser::Triplet(TripletSpec { width: 3 }));
        }

        for prefix in ["SYSINFO", "PSTREE", "FPDEBUG", "LIMITS"] {
            registry.register(prefix, PluginParser::Opaque);
        }
        registry
    }

    pub fn register(&mut self, prefix: &'static str, parser: PluginParser) {
        self.parsers.insert(prefix, parser);
    }

    pub fn parser_for(&self, prefix: &str) -> Option<&PluginParser> {
        self.parsers.get(prefix)
    }

    pub fn prefixes(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self.parsers.keys().copied().collect();
        out.sort_unstable();
        out
    }

    /// Dispatch one data line to its registered handler.
    pub fn dispatch(&self, line: &DataLine) -> Dispatch {
        let tokens = line.tokens();
        let Some((&prefix, parser)) = tokens
            .first()
            .and_then(|p| self.parsers.get_key_value(*p))
        else {
            return Dispatch::Unregistered;
        };
        let args = &tokens[1..];
        let mut record = ParsedRecord::new(prefix, &line.raw, line.epoch);

        let outcome = match parser {
            PluginParser::FixedAnchor(extract) => extract(args, &mut record),
            PluginParser::KeyValue(spec) => fold_key_values(spec, args, &mut record),
            PluginParser::Triplet(spec) => collect_triplets(spec, args, &mut record),
            PluginParser::Opaque => Ok(Handled::Record),
        };
        match outcome {
            Ok(Handled::Record) => Dispatch::Record(record),
            Ok(Handled::Ignored) => Dispatch::Ignored,
            Err(err) => Dispatch::Failed(err),
        }
    }
}

fn number(field: &str, token: &str) -> Result<f64, LineError> {
    let cleaned = token
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim_end_matches('%');
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LineError::NotANumber {
            field: field.to_string(),
            token: token.to_string(),
        })
}

fn is_integer(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn anchor_at(args: &[&str], keyword: &str) -> Option<usize> {
    args.iter().position(|t| *t == keyword)
}

fn required_anchor(args: &[&str], keyword: &'static str) -> Result<usize, LineError> {
    anchor_at(args, keyword).ok_or(LineError::MissingAnchor { anchor: keyword })
}

/// Read `names.len()` numbers starting right after `at`.
fn take_after(
    args: &[&str],
    at: usize,
    names: &[&str],
    record: &mut ParsedRecord,
) -> Result<(), LineError> {
    let start = at + 1;
    let needed = start + names.len();
    if args.len() < needed {
        return Err(LineError::Truncated {
            expected: needed + 1,
            actual: args.len() + 1,
        });
    }
    for (name, token) in names.iter().zip(&args[start..needed]) {
        record.set_number(name, number(name, token)?);
    }
    Ok(())
}

fn take_required(
    args: &[&str],
    keyword: &'static str,
    names: &[&str],
    record: &mut ParsedRecord,
) -> Result<(), LineError> {
    let at = required_anchor(args, keyword)?;
    take_after(args, at, names, record)
}

/// Optional anchors are skipped when absent or when their values do not parse.
fn take_optional(args: &[&str], keyword: &str, names: &[&str], record: &mut ParsedRecord) {
    if let Some(at) = anchor_at(args, keyword) {
        let mut scratch = record.clone();
        if take_after(args, at, names, &mut scratch).is_ok() {
            for name in names {
                if let Some(v) = scratch.number(name) {
                    record.set_number(name, v);
                }
            }
        }
    }
}

fn leading_token<'a>(args: &[&'a str], idx: usize) -> Result<&'a str, LineError> {
    args.get(idx).copied().ok_or(LineError::Truncated {
        expected: idx + 2,
        actual: args.len() + 1,
    })
}

/// `CPU <cpuN> u <util> [id/io <idle> <iowait>] [u/s/n <user> <sys> <nice>] [irq h/s <hard> <soft>]`
fn parse_cpu(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    let cpu_id = leading_token(args, 0)?;
    if !cpu_id.starts_with("cpu") {
        return Err(LineError::Malformed("CPU"));
    }
    record.set_text("cpu_id", cpu_id);
    take_required(args, "u", &["utilization"], record)?;
    take_optional(args, "id/io", &["idle_percent", "iowait_percent"], record);
    take_optional(
        args,
        "u/s/n",
        &["user_percent", "system_percent", "nice_percent"],
        record,
    );
    take_optional(args, "h/s", &["hardirq_percent", "softirq_percent"], record);
    Ok(Handled::Record)
}

/// `MEM t <bytes> f <%> b <%> c <%> s <%> a <%> sh <%> sw <%> [<swap_bytes>]
///  [h <total> <free>] [A <%>] [pio <in> <out>] [sio <in> <out>]`
fn parse_mem(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    take_required(args, "t", &["total_memory"], record)?;
    take_required(args, "f", &["free_percent"], record)?;
    take_required(args, "b", &["buffers_percent"], record)?;
    take_required(args, "c", &["cached_percent"], record)?;
    take_required(args, "s", &["slab_percent"], record)?;
    take_required(args, "a", &["anon_percent"], record)?;
    take_required(args, "sh", &["sysv_shm_percent"], record)?;
    let sw = required_anchor(args, "sw")?;
    take_after(args, sw, &["swap_used_percent"], record)?;
    if let Some(total) = args.get(sw + 2).and_then(|t| number("swap_total_bytes", t).ok()) {
        record.set_number("swap_total_bytes", total);
    }
    take_optional(args, "h", &["hugepages_total", "hugepages_free"], record);
    take_optional(args, "A", &["available_percent"], record);
    take_optional(args, "pio", &["pgpgin_rate", "pgpgout_rate"], record);
    take_optional(args, "sio", &["swapin_rate", "swapout_rate"], record);
    Ok(Handled::Record)
}

/// `DISK <idx> <dev> rkxt <r/s> <rKiB/s> <ravgkb> <ravgms> wkxt <w/s> <wKiB/s> <wavgkb> <wavgms>
///  sqb <svc_ms> <queue> <busy%>`
fn parse_disk(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    let index = leading_token(args, 0)?;
    if !is_integer(index) {
        return Err(LineError::NotANumber {
            field: "disk_index".to_string(),
            token: index.to_string(),
        });
    }
    record.set_text("disk_index", index);
    record.set_text("device_name", leading_token(args, 1)?);
    take_required(
        args,
        "rkxt",
        &[
            "reads_per_sec",
            "read_kib_per_sec",
            "read_avg_kb",
            "read_avg_ms",
        ],
        record,
    )?;
    take_required(
        args,
        "wkxt",
        &[
            "writes_per_sec",
            "write_kib_per_sec",
            "write_avg_kb",
            "write_avg_ms",
        ],
        record,
    )?;
    take_required(
        args,
        "sqb",
        &["service_time_ms", "avg_queue_len", "device_busy_percent"],
        record,
    )?;
    Ok(Handled::Record)
}

/// Rate form `NET <if> rk <pps> <kib> tk <pps> <kib> rd <drops> td <drops>` or
/// cumulative form `NET ifstat <if> <rxp> <rxb> <txp> <txb> <rxd> <txd>`.
fn parse_net(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    if args.first() == Some(&"ifstat") {
        record.subtype = Some("ifstat");
        record.set_text("interface", leading_token(args, 1)?);
        take_after(
            args,
            1,
            &[
                "rx_packets_total",
                "rx_bytes_total",
                "tx_packets_total",
                "tx_bytes_total",
                "rx_dropped_packets_total",
                "tx_dropped_packets_total",
            ],
            record,
        )?;
        return Ok(Handled::Record);
    }

    record.subtype = Some("rate");
    record.set_text("interface", leading_token(args, 0)?);
    take_required(args, "rk", &["rx_packets_per_sec", "rx_kib_per_sec"], record)?;
    take_required(args, "tk", &["tx_packets_per_sec", "tx_kib_per_sec"], record)?;
    take_required(args, "rd", &["rx_drops_per_sec"], record)?;
    take_required(args, "td", &["tx_drops_per_sec"], record)?;
    Ok(Handled::Record)
}

/// `TOP <ppid> <pid> <cpu>% [<total> (<user> <sys>) <prio> (<exec ...>)]`
///
/// The extended section is all-or-nothing; when it does not parse only the CPU
/// percentage is kept.
fn parse_top(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    let ppid = leading_token(args, 0)?;
    let pid = leading_token(args, 1)?;
    for (field, token) in [("ppid", ppid), ("pid", pid)] {
        if !is_integer(token) {
            return Err(LineError::NotANumber {
                field: field.to_string(),
                token: token.to_string(),
            });
        }
    }
    record.set_text("ppid", ppid);
    record.set_text("pid", pid);
    record.set_number("cpu_percent", number("cpu_percent", leading_token(args, 2)?)?);

    if args.len() >= 8 {
        let extended = (|| -> Result<(f64, f64, f64), LineError> {
            if !args[4].starts_with('(') || !args[5].ends_with(')') {
                return Err(LineError::Malformed("TOP"));
            }
            Ok((
                number("total_cpu_seconds", args[3])?,
                number("user_cpu_seconds", args[4])?,
                number("system_cpu_seconds", args[5])?,
            ))
        })();
        if let Ok((total, user, system)) = extended {
            record.set_number("total_cpu_seconds", total);
            record.set_number("user_cpu_seconds", user);
            record.set_number("system_cpu_seconds", system);
            record.set_text("prio", args[6]);
            let exec = args[7..].join(" ");
            let exec = exec.trim_start_matches('(').trim_end_matches(')');
            if !exec.is_empty() {
                record.set_text("exec", exec);
            }
        }
    }
    Ok(Handled::Record)
}

/// `SMAPS <pid> <...> <rss_kib> <swap_kib> <...> c <exec>`
///
/// rss/swap are the first pair of integer tokens after the token following the pid;
/// the exec path after the `c` anchor is reduced to its basename.
fn parse_smaps(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    let pid = leading_token(args, 0)?;
    if !is_integer(pid) {
        return Err(LineError::NotANumber {
            field: "pid".to_string(),
            token: pid.to_string(),
        });
    }
    let c_at = required_anchor(args, "c")?;
    let exec = args.get(c_at + 1).ok_or(LineError::Truncated {
        expected: c_at + 3,
        actual: args.len() + 1,
    })?;
    let pair = (2..c_at.saturating_sub(1))
        .find(|&i| is_integer(args[i]) && is_integer(args[i + 1]))
        .ok_or(LineError::Malformed("SMAPS"))?;

    record.set_text("pid", pid);
    record.set_number("rss_kib", number("rss_kib", args[pair])?);
    record.set_number("swap_kib", number("swap_kib", args[pair + 1])?);
    record.set_text("exec", exec.rsplit('/').next().unwrap_or(exec));
    Ok(Handled::Record)
}

/// `FPC <cpu> <busy%> <cycles> <cycles/pkt> <cycles-ic/pkt>`; banner lines are ignored.
fn parse_fpc(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    match args.first() {
        Some(cpu) if is_integer(cpu) && args.len() >= 5 => {
            record.set_text("cpu", *cpu);
            take_after(
                args,
                0,
                &[
                    "busy_percent",
                    "cycles_total",
                    "cycles_per_packet",
                    "cycles_ic_pkt",
                ],
                record,
            )?;
            Ok(Handled::Record)
        }
        _ => Ok(Handled::Ignored),
    }
}

/// `FPP <total_cycles> <total_packets>`
fn parse_fpp(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    let cycles = number("total_cycles", leading_token(args, 0)?)?;
    let packets = number("total_packets", leading_token(args, 1)?)?;
    record.set_number("total_cycles", cycles);
    record.set_number("total_packets", packets);
    let per_packet = if packets > 0.0 { cycles / packets } else { 0.0 };
    record.set_number("cycles_per_packet", per_packet);
    Ok(Handled::Record)
}

/// `FPS iod <incoming> <outgoing> <dropped> mhb <missed> <hit> <bypass>`
fn parse_fps(args: &[&str], record: &mut ParsedRecord) -> Result<Handled, LineError> {
    take_required(
        args,
        "iod",
        &[
            "incoming_dns_packets",
            "outgoing_dns_packets",
            "dropped_dns_packets",
        ],
        record,
    )?;
    take_required(
        args,
        "mhb",
        &["missed_dns_packets", "hit_dns_packets", "bypass_dns_packets"],
        record,
    )?;
    Ok(Handled::Record)
}

/// Fold `key value` pairs after the leading tokens. Values that are not numbers and
/// mnemonics the family does not list are kept as text fields.
fn fold_key_values(
    spec: &KeyValueSpec,
    args: &[&str],
    record: &mut ParsedRecord,
) -> Result<Handled, LineError> {
    for (idx, lead) in spec.leading.iter().enumerate() {
        let token = leading_token(args, idx)?;
        match lead {
            Leading::Label(name) => record.set_text(name, token),
            Leading::Number(name) => record.set_number(name, number(name, token)?),
        }
    }

    let mut rest = &args[spec.leading.len()..];
    if let (Some(label), Some(first)) = (spec.protocol_label, rest.first()) {
        let bare_word = first.chars().all(|c| c.is_ascii_alphabetic());
        if bare_word && !spec.known_keys.contains(first) {
            record.set_text(label, *first);
            rest = &rest[1..];
        }
    }

    let mut pairs = 0usize;
    let mut iter = rest.iter().filter(|t| !spec.unit_tokens.contains(*t));
    while let Some(key) = iter.next() {
        let key = key.trim_end_matches(':');
        match iter.next() {
            Some(value) => {
                let cleaned = value.trim_end_matches('%');
                let parsed = cleaned.parse::<f64>().ok().filter(|v| v.is_finite());
                let field = match parsed {
                    Some(v) => FieldValue::Number(v),
                    None => FieldValue::Text(value.to_string()),
                };
                record.fields.insert(key.to_string(), field);
                pairs += 1;
            }
            None => {
                record
                    .fields
                    .insert(key.to_string(), FieldValue::Text(String::new()));
            }
        }
    }

    if pairs == 0 {
        return Err(LineError::Truncated {
            expected: spec.leading.len() + 3,
            actual: args.len() + 1,
        });
    }
    Ok(Handled::Record)
}

/// Collect `(index, count, avg)` groups until fewer than `width` tokens remain.
fn collect_triplets(
    spec: &TripletSpec,
    args: &[&str],
    record: &mut ParsedRecord,
) -> Result<Handled, LineError> {
    let width = spec.width.max(3);
    for group in args.chunks_exact(width) {
        record.groups.push(TripletGroup {
            index: group[0].to_string(),
            count: number("count", group[1])?,
            avg: number("avg", group[2])?,
        });
    }
    if record.groups.is_empty() {
        return Err(LineError::Truncated {
            expected: width + 1,
            actual: args.len() + 1,
        });
    }
    Ok(Handled::Record)
}
