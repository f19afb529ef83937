//! Metric catalog: a static declarative table per record family mapping raw field
//! tokens to canonical metric names, kinds, units and legacy aliases.
//!
//! Aliases are metadata for read-time consumers. Emission always uses canonical names.

use serde::Serialize;
use std::fmt;

/// How a field's value is interpreted and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Label,
    Gauge,
    Counter,
    Delta,
    Rate,
    HistogramBucket,
    HistogramAvg,
    Text,
    Opaque,
}

impl MetricKind {
    /// Whether the value becomes a numeric sample of its own.
    pub fn is_emitted(self) -> bool {
        matches!(
            self,
            MetricKind::Gauge
                | MetricKind::Counter
                | MetricKind::Delta
                | MetricKind::Rate
                | MetricKind::HistogramBucket
                | MetricKind::HistogramAvg
        )
    }
}

/// Normalized metric category, carried as the `metric_category` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Cpu,
    Mem,
    Disk,
    Net,
    Top,
    Smaps,
    Db,
    Fastpath,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Cpu,
        Category::Mem,
        Category::Disk,
        Category::Net,
        Category::Top,
        Category::Smaps,
        Category::Db,
        Category::Fastpath,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "CPU",
            Category::Mem => "MEM",
            Category::Disk => "DISK",
            Category::Net => "NET",
            Category::Top => "TOP",
            Category::Smaps => "SMAPS",
            Category::Db => "DB",
            Category::Fastpath => "FASTPATH",
            Category::Other => "OTHER",
        }
    }

    /// Case-insensitive lookup.
    pub fn parse(name: &str) -> Option<Category> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    /// Field token as produced by the family's parser.
    pub token: &'static str,
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: &'static str,
    pub description: &'static str,
    pub aliases: &'static [&'static str],
}

/// A per-second rate derived from a cumulative counter across consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDef {
    pub source: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct FamilyDef {
    pub prefix: &'static str,
    pub category: Category,
    /// Label carrying the record subtype, if the family has subtypes.
    pub subtype_label: Option<&'static str>,
    pub labels: &'static [&'static str],
    /// Labels that identify one series for delta tracking.
    pub key_labels: &'static [&'static str],
    pub metrics: &'static [MetricDef],
    pub rates: &'static [RateDef],
}

impl FamilyDef {
    pub fn metric(&self, token: &str) -> Option<&'static MetricDef> {
        self.metrics.iter().find(|m| m.token == token)
    }

    pub fn is_label(&self, token: &str) -> bool {
        self.labels.contains(&token)
    }
}

/// Categorizer answer for one `(prefix, token)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categorized {
    pub canonical_name: String,
    pub metric_kind: MetricKind,
    pub is_label: bool,
    pub aliases: Vec<&'static str>,
}

const fn metric(
    token: &'static str,
    name: &'static str,
    kind: MetricKind,
    unit: &'static str,
    description: &'static str,
) -> MetricDef {
    MetricDef {
        token,
        name,
        kind,
        unit,
        description,
        aliases: &[],
    }
}

const fn aliased(
    token: &'static str,
    name: &'static str,
    kind: MetricKind,
    unit: &'static str,
    description: &'static str,
    aliases: &'static [&'static str],
) -> MetricDef {
    MetricDef {
        token,
        name,
        kind,
        unit,
        description,
        aliases,
    }
}

const fn rate(source: &'static str, name: &'static str, unit: &'static str) -> RateDef {
    RateDef { source, name, unit }
}

use MetricKind::{Counter, Gauge, HistogramAvg, HistogramBucket};

static CPU_METRICS: [MetricDef; 8] = [
    aliased(
        "utilization",
        "cpu_utilization",
        Gauge,
        "percent",
        "Overall CPU utilization",
        &["cpu_utilization_percent", "utilization"],
    ),
    metric("idle_percent", "cpu_idle_percent", Gauge, "percent", "CPU idle percent"),
    metric("iowait_percent", "cpu_iowait_percent", Gauge, "percent", "CPU iowait percent"),
    metric("user_percent", "cpu_user_percent", Gauge, "percent", "CPU user time percent"),
    metric("system_percent", "cpu_system_percent", Gauge, "percent", "CPU system time percent"),
    metric("nice_percent", "cpu_nice_percent", Gauge, "percent", "CPU nice time percent"),
    metric("hardirq_percent", "cpu_hardirq_percent", Gauge, "percent", "CPU hard IRQ time percent"),
    metric("softirq_percent", "cpu_softirq_percent", Gauge, "percent", "CPU soft IRQ time percent"),
];

#[rustfmt::skip]
static MEM_METRICS: [MetricDef; 16] = [
    metric("total_memory", "mem_total_memory", Gauge, "bytes", "Total system memory bytes"),
    metric("free_percent", "mem_free_percent", Gauge, "percent", "Free memory percent"),
    metric("buffers_percent", "mem_buffers_percent", Gauge, "percent", "Buffers percent"),
    metric("cached_percent", "mem_cached_percent", Gauge, "percent", "Cached memory percent"),
    metric("slab_percent", "mem_slab_percent", Gauge, "percent", "Slab percent"),
    metric("anon_percent", "mem_anon_percent", Gauge, "percent", "Anonymous memory percent"),
    metric("sysv_shm_percent", "mem_sysv_shm_percent", Gauge, "percent", "SYSV shared memory percent"),
    metric("swap_used_percent", "mem_swap_used_percent", Gauge, "percent", "Swap used percent"),
    metric("swap_total_bytes", "mem_swap_total_bytes", Gauge, "bytes", "Total swap space bytes"),
    metric("hugepages_total", "mem_hugepages_total", Gauge, "count", "Huge pages total"),
    metric("hugepages_free", "mem_hugepages_free", Gauge, "count", "Huge pages free"),
    metric("available_percent", "mem_available_percent", Gauge, "percent", "Available memory percent"),
    metric("pgpgin_rate", "mem_pgpgin_rate", Gauge, "pages_per_sec", "Page in rate"),
    metric("pgpgout_rate", "mem_pgpgout_rate", Gauge, "pages_per_sec", "Page out rate"),
    metric("swapin_rate", "mem_swapin_rate", Gauge, "pages_per_sec", "Swap in rate"),
    metric("swapout_rate", "mem_swapout_rate", Gauge, "pages_per_sec", "Swap out rate"),
];

#[rustfmt::skip]
static DISK_METRICS: [MetricDef; 11] = [
    metric("reads_per_sec", "disk_reads_per_sec", Gauge, "ops_per_sec", "Disk read operations per second"),
    metric("read_kib_per_sec", "disk_read_kib_per_sec", Gauge, "kib_per_sec", "Disk read KiB per second"),
    metric("read_avg_kb", "disk_read_avg_kb", Gauge, "kilobytes", "Average KB per read op"),
    metric("read_avg_ms", "disk_read_avg_ms", Gauge, "milliseconds", "Average read latency (ms)"),
    metric("writes_per_sec", "disk_writes_per_sec", Gauge, "ops_per_sec", "Disk write operations per second"),
    metric("write_kib_per_sec", "disk_write_kib_per_sec", Gauge, "kib_per_sec", "Disk write KiB per second"),
    metric("write_avg_kb", "disk_write_avg_kb", Gauge, "kilobytes", "Average KB per write op"),
    metric("write_avg_ms", "disk_write_avg_ms", Gauge, "milliseconds", "Average write latency (ms)"),
    metric("service_time_ms", "disk_service_time_ms", Gauge, "milliseconds", "Average device service time (ms)"),
    metric("avg_queue_len", "disk_avg_queue_len", Gauge, "requests", "Average queue length"),
    metric("device_busy_percent", "disk_device_busy_percent", Gauge, "percent", "Percentage of time device was busy"),
];

#[rustfmt::skip]
static NET_METRICS: [MetricDef; 12] = [
    aliased("rx_packets_per_sec", "net_rx_packets_per_sec", Gauge, "packets_per_sec", "Receive packets per second", &["net_rk_packets_per_sec"]),
    aliased("rx_kib_per_sec", "net_rx_kib_per_sec", Gauge, "kib_per_sec", "Receive KiB per second", &["net_rk_kib_per_sec"]),
    aliased("tx_packets_per_sec", "net_tx_packets_per_sec", Gauge, "packets_per_sec", "Transmit packets per second", &["net_tk_packets_per_sec"]),
    aliased("tx_kib_per_sec", "net_tx_kib_per_sec", Gauge, "kib_per_sec", "Transmit KiB per second", &["net_tk_kib_per_sec"]),
    aliased("rx_drops_per_sec", "net_rx_drops_per_sec", Gauge, "drops_per_sec", "Receive packet drops per second", &["net_rd_drops_per_sec"]),
    aliased("tx_drops_per_sec", "net_tx_drops_per_sec", Gauge, "drops_per_sec", "Transmit packet drops per second", &["net_td_drops_per_sec"]),
    metric("rx_packets_total", "net_rx_packets_total", Counter, "packets", "Cumulative RX packets"),
    metric("rx_bytes_total", "net_rx_bytes_total", Counter, "bytes", "Cumulative RX bytes"),
    metric("tx_packets_total", "net_tx_packets_total", Counter, "packets", "Cumulative TX packets"),
    metric("tx_bytes_total", "net_tx_bytes_total", Counter, "bytes", "Cumulative TX bytes"),
    metric("rx_dropped_packets_total", "net_rx_dropped_packets_total", Counter, "packets", "Cumulative dropped RX packets"),
    metric("tx_dropped_packets_total", "net_tx_dropped_packets_total", Counter, "packets", "Cumulative dropped TX packets"),
];

static NET_RATES: [RateDef; 4] = [
    rate("rx_packets_total", "net_ifstat_rx_packets_per_sec", "packets_per_sec"),
    rate("rx_bytes_total", "net_ifstat_rx_bytes_per_sec", "bytes_per_sec"),
    rate("tx_packets_total", "net_ifstat_tx_packets_per_sec", "packets_per_sec"),
    rate("tx_bytes_total", "net_ifstat_tx_bytes_per_sec", "bytes_per_sec"),
];

#[rustfmt::skip]
static TOP_METRICS: [MetricDef; 4] = [
    aliased("cpu_percent", "tasks_cpu_percent", Gauge, "percent", "Per-process CPU percent over sample interval", &["top_cpu_percent"]),
    aliased("total_cpu_seconds", "tasks_total_cpu_seconds", Counter, "seconds", "Per-process accumulated total CPU time seconds", &["top_cpu_time_total_seconds"]),
    aliased("user_cpu_seconds", "tasks_user_cpu_seconds", Counter, "seconds", "Per-process accumulated user CPU time seconds", &["top_cpu_time_user_seconds"]),
    aliased("system_cpu_seconds", "tasks_system_cpu_seconds", Counter, "seconds", "Per-process accumulated system CPU time seconds", &["top_cpu_time_sys_seconds"]),
];

static TOP_RATES: [RateDef; 1] = [rate(
    "total_cpu_seconds",
    "tasks_cpu_seconds_per_sec",
    "seconds_per_sec",
)];

static SMAPS_METRICS: [MetricDef; 2] = [
    metric("rss_kib", "smaps_rss_kb", Gauge, "kB", "Per-process resident set size (kB)"),
    metric("swap_kib", "smaps_swap_kb", Gauge, "kB", "Per-process swap usage (kB)"),
];

#[rustfmt::skip]
static DBWR_METRICS: [MetricDef; 2] = [
    metric("count", "dbwr_bucket_count_total", HistogramBucket, "events", "DBWR bucket event count"),
    metric("avg", "dbwr_bucket_avg_latency_seconds", HistogramAvg, "seconds", "DBWR bucket average latency seconds"),
];

#[rustfmt::skip]
static DBWA_METRICS: [MetricDef; 2] = [
    metric("count", "dbwa_bucket_count_total", HistogramBucket, "events", "DBWA bucket event count"),
    metric("avg", "dbwa_bucket_avg_latency_seconds", HistogramAvg, "seconds", "DBWA bucket average latency seconds"),
];

#[rustfmt::skip]
static DBRD_METRICS: [MetricDef; 2] = [
    metric("count", "dbrd_bucket_count_total", HistogramBucket, "events", "DBRD bucket event count"),
    metric("avg", "dbrd_bucket_avg_latency_seconds", HistogramAvg, "seconds", "DBRD bucket average latency seconds"),
];

static DBMPOOL_METRICS: [MetricDef; 5] = [
    metric("sz", "dbmpool_sz", Gauge, "mib", "DB memory pool configured size MiB"),
    metric("total", "dbmpool_total", Gauge, "mib", "DB memory pool total MiB"),
    metric("used", "dbmpool_used", Gauge, "mib", "DB memory pool used MiB"),
    metric("free", "dbmpool_free", Gauge, "mib", "DB memory pool free MiB"),
    metric("used_percent", "dbmpool_used_percent", Gauge, "percent", "DB memory pool used percent"),
];

/// `im` counts receive misses and `in` counts input events.
static FPPORTS_METRICS: [MetricDef; 9] = [
    metric("ip", "fpports_ip_total", Counter, "packets", "FP ports input packets total"),
    metric("op", "fpports_op_total", Counter, "packets", "FP ports output packets total"),
    metric("ib", "fpports_ib_total", Counter, "bytes", "FP ports input bytes total"),
    metric("ob", "fpports_ob_total", Counter, "bytes", "FP ports output bytes total"),
    metric("ie", "fpports_ie_total", Counter, "errors", "FP ports input errors total"),
    metric("oe", "fpports_oe_total", Counter, "errors", "FP ports output errors total"),
    metric("mc", "fpports_mc_total", Counter, "packets", "FP ports multicast packets total"),
    metric("im", "fpports_im_total", Counter, "packets", "FP ports imiss packets total"),
    metric("in", "fpports_in_total", Counter, "events", "FP ports input events total"),
];

static FPPORTS_RATES: [RateDef; 4] = [
    rate("ip", "fpports_ip_per_sec", "packets_per_sec"),
    rate("op", "fpports_op_per_sec", "packets_per_sec"),
    rate("ib", "fpports_ib_per_sec", "bytes_per_sec"),
    rate("ob", "fpports_ob_per_sec", "bytes_per_sec"),
];

static FPMBUF_METRICS: [MetricDef; 1] = [metric(
    "muc",
    "fpm_muc",
    Gauge,
    "count",
    "FPMBUF mbuf usage count",
)];

#[rustfmt::skip]
static FPC_METRICS: [MetricDef; 4] = [
    metric("busy_percent", "fpc_cpu_busy_percent", Gauge, "percent", "Fast path CPU busy percent"),
    metric("cycles_total", "fpc_cycles_total", Counter, "cycles", "Fast path CPU cycles total"),
    metric("cycles_per_packet", "fpc_cycles_per_packet", Gauge, "cycles_per_packet", "Cycles per packet"),
    metric("cycles_ic_pkt", "fpc_cycles_ic_pkt", Gauge, "cycles_per_packet", "Cycles per inner packet"),
];

static FPC_RATES: [RateDef; 1] = [rate("cycles_total", "fpc_cycles_per_sec", "cycles_per_sec")];

#[rustfmt::skip]
static FPP_METRICS: [MetricDef; 3] = [
    metric("total_cycles", "fpp_total_cycles", Counter, "cycles", "Fast path total CPU cycles for packet processing"),
    metric("total_packets", "fpp_total_packets", Counter, "packets", "Fast path total packets received from NIC"),
    metric("cycles_per_packet", "fpp_cycles_per_packet", Gauge, "cycles_per_packet", "Fast path average cycles per packet"),
];

#[rustfmt::skip]
static FPS_METRICS: [MetricDef; 6] = [
    metric("incoming_dns_packets", "fps_incoming_dns_packets", Counter, "packets", "Fast path incoming DNS packets"),
    metric("outgoing_dns_packets", "fps_outgoing_dns_packets", Counter, "packets", "Fast path outgoing DNS packets"),
    metric("dropped_dns_packets", "fps_dropped_dns_packets", Counter, "packets", "Fast path dropped DNS packets"),
    metric("missed_dns_packets", "fps_missed_dns_packets", Counter, "packets", "Fast path missed DNS packets"),
    metric("hit_dns_packets", "fps_hit_dns_packets", Counter, "packets", "Fast path hit DNS packets"),
    metric("bypass_dns_packets", "fps_bypass_dns_packets", Counter, "packets", "Fast path bypass DNS packets"),
];

static DOT_METRICS: [MetricDef; 4] = [
    metric("rx", "dot_rx_total", Counter, "packets", "DOT rx packets total"),
    metric("tx", "dot_tx_total", Counter, "packets", "DOT tx packets total"),
    metric("dp", "dot_dp_total", Counter, "packets", "DOT dropped packets total"),
    metric("qd", "dot_qd_total", Counter, "packets", "DOT queued drops total"),
];

static DOT_RATES: [RateDef; 2] = [
    rate("rx", "dot_rx_per_sec", "packets_per_sec"),
    rate("tx", "dot_tx_per_sec", "packets_per_sec"),
];

static DOH_METRICS: [MetricDef; 4] = [
    metric("rx", "doh_rx_total", Counter, "packets", "DOH rx packets total"),
    metric("tx", "doh_tx_total", Counter, "packets", "DOH tx packets total"),
    metric("dp", "doh_dp_total", Counter, "packets", "DOH dropped packets total"),
    metric("qd", "doh_qd_total", Counter, "packets", "DOH queued drops total"),
];

static DOH_RATES: [RateDef; 2] = [
    rate("rx", "doh_rx_per_sec", "packets_per_sec"),
    rate("tx", "doh_tx_per_sec", "packets_per_sec"),
];

#[rustfmt::skip]
static TCP_DCA_METRICS: [MetricDef; 8] = [
    metric("iface_count", "tcp_dca_interfaces", Gauge, "count", "TCP DCA interface count"),
    metric("rx", "tcp_dca_rx_packets_total", Counter, "packets", "TCP DCA RX packets total"),
    metric("tx", "tcp_dca_tx_packets_total", Counter, "packets", "TCP DCA TX packets total"),
    metric("dp", "tcp_dca_dropped_packets_total", Counter, "packets", "TCP DCA dropped packets total"),
    metric("qd", "tcp_dca_queue_drops_total", Counter, "drops", "TCP DCA queue drops total"),
    metric("os", "tcp_dca_opened_sessions_total", Counter, "sessions", "TCP DCA opened sessions total"),
    metric("cs", "tcp_dca_closed_sessions_total", Counter, "sessions", "TCP DCA closed sessions total"),
    metric("as", "tcp_dca_active_sessions", Gauge, "sessions", "TCP DCA active sessions"),
];

static TCP_DCA_RATES: [RateDef; 3] = [
    rate("rx", "tcp_dca_rx_packets_per_sec", "packets_per_sec"),
    rate("tx", "tcp_dca_tx_packets_per_sec", "packets_per_sec"),
    rate("os", "tcp_dca_opened_sessions_per_sec", "sessions_per_sec"),
];

static FPVL_METRICS: [MetricDef; 12] = [
    metric("F-P", "fpvl_f_pending", Gauge, "count", "Fast path F pending"),
    metric("F-W", "fpvl_f_working", Gauge, "count", "Fast path F working"),
    metric("F-B", "fpvl_f_blocked", Gauge, "count", "Fast path F blocked"),
    metric("F-BA", "fpvl_f_blocked_async", Gauge, "count", "Fast path F blocked async"),
    metric("N-P", "fpvl_n_pending", Gauge, "count", "Fast path N pending"),
    metric("N-W", "fpvl_n_working", Gauge, "count", "Fast path N working"),
    metric("N-B", "fpvl_n_blocked", Gauge, "count", "Fast path N blocked"),
    metric("N-R", "fpvl_n_running", Gauge, "count", "Fast path N running"),
    metric("N-BA", "fpvl_n_blocked_async", Gauge, "count", "Fast path N blocked async"),
    metric("N-DD", "fpvl_n_dropped", Gauge, "count", "Fast path N dropped"),
    metric("T-F", "fpvl_total_fast", Gauge, "count", "Fast path total fast"),
    metric("T-B", "fpvl_total_blocked", Gauge, "count", "Fast path total blocked"),
];

const fn family(
    prefix: &'static str,
    category: Category,
    labels: &'static [&'static str],
    metrics: &'static [MetricDef],
    rates: &'static [RateDef],
) -> FamilyDef {
    FamilyDef {
        prefix,
        category,
        subtype_label: None,
        labels,
        key_labels: labels,
        metrics,
        rates,
    }
}

const fn opaque(prefix: &'static str) -> FamilyDef {
    family(prefix, Category::Other, &[], &[], &[])
}

#[rustfmt::skip]
static FAMILIES: [FamilyDef; 23] = [
    family("CPU", Category::Cpu, &["cpu_id"], &CPU_METRICS, &[]),
    family("MEM", Category::Mem, &[], &MEM_METRICS, &[]),
    family("DISK", Category::Disk, &["disk_index", "device_name"], &DISK_METRICS, &[]),
    FamilyDef {
        prefix: "NET",
        category: Category::Net,
        subtype_label: Some("kind"),
        labels: &["interface"],
        key_labels: &["interface"],
        metrics: &NET_METRICS,
        rates: &NET_RATES,
    },
    FamilyDef {
        prefix: "TOP",
        category: Category::Top,
        subtype_label: None,
        labels: &["pid", "ppid", "prio", "exec"],
        key_labels: &["pid", "ppid"],
        metrics: &TOP_METRICS,
        rates: &TOP_RATES,
    },
    family("SMAPS", Category::Smaps, &["pid", "exec"], &SMAPS_METRICS, &[]),
    family("DBWR", Category::Db, &["bucket"], &DBWR_METRICS, &[]),
    family("DBWA", Category::Db, &["bucket"], &DBWA_METRICS, &[]),
    family("DBRD", Category::Db, &["bucket"], &DBRD_METRICS, &[]),
    family("DBMPOOL", Category::Db, &[], &DBMPOOL_METRICS, &[]),
    family("FPPORTS", Category::Fastpath, &["port"], &FPPORTS_METRICS, &FPPORTS_RATES),
    family("FPMBUF", Category::Fastpath, &[], &FPMBUF_METRICS, &[]),
    family("FPC", Category::Fastpath, &["cpu"], &FPC_METRICS, &FPC_RATES),
    family("FPP", Category::Fastpath, &[], &FPP_METRICS, &[]),
    family("FPS", Category::Fastpath, &[], &FPS_METRICS, &[]),
    family("DOT_STAT", Category::Fastpath, &["index", "addr", "protocol"], &DOT_METRICS, &DOT_RATES),
    family("DOH_STAT", Category::Fastpath, &["index", "addr"], &DOH_METRICS, &DOH_RATES),
    family("TCP_DCA_STAT", Category::Fastpath, &["interface_addr"], &TCP_DCA_METRICS, &TCP_DCA_RATES),
    family("FPVLSTATS", Category::Fastpath, &[], &FPVL_METRICS, &[]),
    opaque("SYSINFO"),
    opaque("PSTREE"),
    opaque("FPDEBUG"),
    opaque("LIMITS"),
];

/// Static family table lookup.
pub fn family_for(prefix: &str) -> Option<&'static FamilyDef> {
    FAMILIES.iter().find(|f| f.prefix == prefix)
}

pub fn families() -> impl Iterator<Item = &'static FamilyDef> {
    FAMILIES.iter()
}

pub fn category_of(prefix: &str) -> Category {
    family_for(prefix)
        .map(|f| f.category)
        .unwrap_or(Category::Other)
}

/// Map a `(prefix, field token)` pair to its canonical metric.
///
/// Unknown pairs are opaque and named `<prefix>_<token>` in lower case.
pub fn categorize(prefix: &str, token: &str) -> Categorized {
    let family = family_for(prefix);
    if let Some(family) = family {
        if family.is_label(token) || family.subtype_label == Some(token) {
            return Categorized {
                canonical_name: token.to_string(),
                metric_kind: MetricKind::Label,
                is_label: true,
                aliases: Vec::new(),
            };
        }
        if let Some(def) = family.metric(token) {
            return Categorized {
                canonical_name: def.name.to_string(),
                metric_kind: def.kind,
                is_label: false,
                aliases: def.aliases.to_vec(),
            };
        }
        if let Some(def) = family.rates.iter().find(|r| r.name == token) {
            return Categorized {
                canonical_name: def.name.to_string(),
                metric_kind: MetricKind::Rate,
                is_label: false,
                aliases: Vec::new(),
            };
        }
    }
    Categorized {
        canonical_name: format!(
            "{}_{}",
            prefix.to_ascii_lowercase(),
            token.to_ascii_lowercase().replace('-', "_")
        ),
        metric_kind: MetricKind::Opaque,
        is_label: false,
        aliases: Vec::new(),
    }
}

fn all_metrics() -> impl Iterator<Item = &'static MetricDef> {
    families().flat_map(|f| f.metrics.iter())
}

/// Legacy aliases declared for a canonical metric.
pub fn aliases_for(canonical_name: &str) -> &'static [&'static str] {
    all_metrics()
        .find(|m| m.name == canonical_name)
        .map(|m| m.aliases)
        .unwrap_or(&[])
}

/// Canonical name for a legacy alias, or the name itself when it is already canonical.
pub fn resolve_alias(name: &str) -> Option<&'static str> {
    all_metrics()
        .find(|m| m.name == name || m.aliases.contains(&name))
        .map(|m| m.name)
}
