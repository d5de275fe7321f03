/// Parser for `iostat` output, Linux (sysstat) and AIX flavors.
///
/// The first non-empty line decides the flavor and is mandatory:
///
/// - Linux: `Linux <kernel> (<host>) <date> <arch> (<N> CPU)` - the host
///   name, the run date and the cpu count all come from here.
/// - AIX: `System configuration: lcpu=8 drives=4 ...` - key=value pairs,
///   no host name.
///
/// Anything else is not an iostat file and the parse is rejected.
///
/// The body is a sequence of sampling blocks.  With `-t` each block is
/// preceded by a timestamp line; the stamp formats are locale-dependent and
/// are tried in a fixed fallback order, including time-of-day-only stamps
/// (`Time: 09:30:01 AM`) that are resolved against the banner date and roll
/// over midnight.  Without `-t` there is no time at all; block timestamps
/// are then synthesized at one-second spacing from the banner date (warned
/// once), and a table reappearing marks the next block, since no stamp line
/// will.
///
/// Within a block:
///
/// - `avg-cpu:  %user %nice %system ...` declares the cpu columns; the next
///   non-empty line carries the values (one plain `avg-cpu` type)
/// - `Device: tps kB_read/s ...` (Linux) or `Disks: % tm_act Kbps ...`
///   (AIX) declares per-device columns; each following row is one device,
///   sub-typed by device name, until a blank line ends the table
/// - AIX `tty: tin tout` declares the terminal columns the same way
///   avg-cpu does
///
/// AIX writes percentage column names as two tokens (`% tm_act`); those are
/// fused back into one field name here.  Each sealed record also gets a
/// `Device (Total)`/`Disks (Total)` group summing the per-device rows.
use crate::postprocess::SubTypeTotal;
use crate::{
    DataSet, ParseOptions, PostprocessorRegistry, RecordAssembler, SkipIndex, TypeBuilder,
    TypeKey,
};

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use perfutils::{add_seconds, localize, parse_metric, tokenize, Delimiter, Timestamp};
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use tracing::{debug, warn};
use ustr::Ustr;

pub fn parse_iostat(input: &mut dyn Read, opts: &ParseOptions) -> Result<DataSet> {
    IostatParser::new(opts)?.parse(input)
}

// Full date-time stamp formats, most specific first.

const STAMP_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

// Banner date formats, same fallback idea.

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m/%d/%y", "%Y-%m-%d"];

// What the parser expects next, after seeing a column header.

#[derive(Clone, Copy)]
enum Section {
    Idle,
    // Values for a single-row type (avg-cpu, tty) follow.
    SingleRow(TypeKey),
    // Per-device rows for the given primary id follow until a blank line.
    Devices(Ustr),
}

struct IostatParser<'a> {
    opts: &'a ParseOptions,
    set: DataSet,
    asm: RecordAssembler,
    post: PostprocessorRegistry,
    builder: TypeBuilder,
    section: Section,
    banner_seen: bool,
    linux_banner: Regex,
    // Current date for resolving time-only stamps; advanced on rollover.
    date: Option<NaiveDate>,
    last_time_of_day: Option<NaiveTime>,
    // Synthetic clock for files without -t.
    synthetic: i64,
    synthetic_mode: bool,
    discarded: usize,
}

impl<'a> IostatParser<'a> {
    fn new(opts: &'a ParseOptions) -> Result<IostatParser<'a>> {
        let mut post = PostprocessorRegistry::new();
        post.register_record(Box::new(SubTypeTotal::new(&["Device", "Disks"])));
        Ok(IostatParser {
            opts,
            set: DataSet::new(),
            asm: RecordAssembler::new(),
            post,
            builder: TypeBuilder::new(),
            section: Section::Idle,
            banner_seen: false,
            linux_banner: Regex::new(
                r"^Linux\s+(\S+)\s+\(([^)]+)\)\s+(\S+)(?:\s+\S+)?(?:\s+\((\d+)\s+CPU\))?",
            )?,
            date: None,
            last_time_of_day: None,
            synthetic: 0,
            synthetic_mode: false,
            discarded: 0,
        })
    }

    fn parse(mut self, input: &mut dyn Read) -> Result<DataSet> {
        let reader = BufReader::new(input);
        for line in reader.lines() {
            let line = line?;
            self.line(line.trim_end())?;
        }
        self.asm.close(&mut self.set, &self.post);
        if self.set.records().is_empty() {
            bail!("Empty iostat file: no sample blocks found");
        }
        if self.discarded > 0 {
            warn!("Dropped {} unusable iostat lines", self.discarded);
        }
        Ok(self.set)
    }

    fn line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            // A blank line ends whatever table was in progress.
            self.section = Section::Idle;
            return Ok(());
        }
        if !self.banner_seen {
            return self.banner(line);
        }
        if let Some(t) = self.try_timestamp(line) {
            self.section = Section::Idle;
            self.asm.open(&mut self.set, &self.post, t, line.trim());
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("avg-cpu:") {
            self.single_row_header("avg-cpu", "CPU averages", rest);
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("tty:") {
            self.single_row_header("tty", "Terminal I/O", rest);
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("Device") {
            // Older sysstat writes `Device:`, newer just `Device`.
            self.device_header("Device", "Disk devices", rest.trim_start_matches(':'));
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("Disks:") {
            self.device_header("Disks", "Disk devices", rest);
            return Ok(());
        }
        match self.section {
            Section::Idle => {
                debug!("Uninterpretable iostat line ignored: {line}");
                Ok(())
            }
            Section::SingleRow(key) => {
                self.section = Section::Idle;
                self.values_row(key, line)
            }
            Section::Devices(id) => self.device_row(id, line),
        }
    }

    fn banner(&mut self, line: &str) -> Result<()> {
        if let Some(caps) = self.linux_banner.captures(line) {
            self.set.set_metadata("kernel", &caps[1]);
            self.set.set_hostname(&caps[2]);
            self.date = parse_banner_date(&caps[3]);
            if self.date.is_none() {
                warn!(
                    "Unrecognized banner date {}, time-only stamps will not resolve",
                    &caps[3]
                );
            }
            if let Some(cpus) = caps.get(4) {
                self.set.set_metadata("cpus", cpus.as_str());
            }
            self.banner_seen = true;
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("System configuration:") {
            // AIX: key=value pairs, lcpu doubling as the cpu count.
            for pair in rest.split_whitespace() {
                if let Some((k, v)) = pair.split_once('=') {
                    self.set.set_metadata(k, v);
                    if k == "lcpu" {
                        self.set.set_metadata("cpus", v);
                    }
                }
            }
            self.banner_seen = true;
            return Ok(());
        }
        bail!("Not an iostat file: unrecognized first line {line:?}")
    }

    // A candidate timestamp line.  `Time:`-prefixed and bare time-of-day
    // stamps resolve against the banner date; full stamps stand alone.

    fn try_timestamp(&mut self, line: &str) -> Option<Timestamp> {
        let s = line.trim().trim_start_matches("Time:").trim();
        for fmt in STAMP_FORMATS {
            if let Ok(local) = NaiveDateTime::parse_from_str(s, fmt) {
                self.date = Some(local.date());
                self.last_time_of_day = Some(local.time());
                return Some(localize(local, self.opts.timezone));
            }
        }
        let time = ["%I:%M:%S %p", "%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())?;
        let mut date = self.date?;
        // A time-of-day earlier than the previous sample means the clock
        // passed midnight.
        if let Some(prev) = self.last_time_of_day {
            if time < prev {
                date = date.succ_opt()?;
                self.date = Some(date);
            }
        }
        self.last_time_of_day = Some(time);
        Some(localize(date.and_time(time), self.opts.timezone))
    }

    fn single_row_header(&mut self, id: &str, name: &str, rest: &str) {
        let names = fuse_percent_columns(rest);
        let refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        self.builder.define(id, name, refs, &SkipIndex::new());
        self.section = Section::SingleRow(TypeKey::plain(id));
    }

    fn device_header(&mut self, id: &str, name: &str, rest: &str) {
        let names = fuse_percent_columns(rest);
        let refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        self.builder.define(id, name, refs, &SkipIndex::new());
        self.section = Section::Devices(Ustr::from(id));
    }

    fn values_row(&mut self, key: TypeKey, line: &str) -> Result<()> {
        let values = match self.parse_values(&key, line, 0) {
            Some(v) => v,
            None => return Ok(()),
        };
        self.ensure_open_for(&key);
        self.append(key, values)
    }

    fn device_row(&mut self, id: Ustr, line: &str) -> Result<()> {
        let fields = tokenize(line, &Delimiter::Whitespace);
        if fields.len() < 2 {
            warn!("Short device row dropped: {line}");
            self.discarded += 1;
            return Ok(());
        }
        let key = TypeKey::sub(id.as_str(), fields[0].as_ref());
        let values = match self.parse_values(&key, line, 1) {
            Some(v) => v,
            None => return Ok(()),
        };
        self.ensure_open_for(&key);
        self.append(key, values)
    }

    fn append(&mut self, key: TypeKey, values: Vec<f64>) -> Result<()> {
        let ty = self
            .builder
            .materialize(&mut self.set, key, values.len())?
            .clone();
        let mark = self.asm.mark().unwrap_or_default();
        self.asm.append(&ty, mark.as_str(), values);
        Ok(())
    }

    // Numeric tail of a row; None means the row was dropped (and logged).

    fn parse_values(&mut self, key: &TypeKey, line: &str, skip: usize) -> Option<Vec<f64>> {
        let fields = tokenize(line, &Delimiter::Whitespace);
        let mut values = Vec::with_capacity(fields.len().saturating_sub(skip));
        for f in &fields[skip..] {
            match parse_metric(f.as_ref()) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable {key} field {f}, row dropped");
                    self.discarded += 1;
                    return None;
                }
            }
        }
        Some(values)
    }

    // Files without -t carry no time at all; invent a one-second grid from
    // the banner date so the records still order.

    fn ensure_open(&mut self) {
        if self.asm.is_open() {
            return;
        }
        if !self.synthetic_mode {
            warn!("No timestamps in iostat input; synthesizing one-second spacing");
            self.synthetic_mode = true;
        }
        let base = match self.date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(midnight) => localize(midnight, self.opts.timezone),
            None => perfutils::epoch(),
        };
        let t = add_seconds(base, self.synthetic);
        self.synthetic += 1;
        let mark = format!("#{}", self.synthetic);
        self.asm.open(&mut self.set, &self.post, t, &mark);
    }

    // With no stamp lines there is nothing to seal a block either; a column
    // reappearing in the open record means the next sampling block started.

    fn ensure_open_for(&mut self, key: &TypeKey) {
        if self.synthetic_mode && self.asm.has(key) {
            self.asm.close(&mut self.set, &self.post);
        }
        self.ensure_open();
    }
}

fn parse_banner_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

// Fuse a stray "%" token onto the following word so field names are single
// tokens: "% user" -> "%user".

fn fuse_percent_columns(rest: &str) -> Vec<String> {
    let mut out = vec![];
    let mut tokens = rest.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "%" {
            if let Some(next) = tokens.next() {
                out.push(format!("%{next}"));
            }
        } else {
            out.push(tok.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfutils::timestamp_from_ymdhms;

    fn parse(text: &str) -> Result<DataSet> {
        let mut bs = text.as_bytes();
        parse_iostat(&mut bs, &ParseOptions::default())
    }

    const LINUX_BANNER: &str = "Linux 3.10.0-1160.el7.x86_64 (web01) 07/12/2013 _x86_64_ (4 CPU)";

    #[test]
    fn test_linux_banner() {
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             \n\
             Time: 09:30:01 AM\n\
             avg-cpu:  %user %nice %system %iowait %steal %idle\n\
             \x20          10.0  0.0   5.0     2.0    0.0  83.0\n"
        ))
        .unwrap();
        assert!(set.hostname().as_str() == "web01");
        assert!(set.metadata("cpus") == Some("4"));
        assert!(set.metadata("kernel") == Some("3.10.0-1160.el7.x86_64"));
        let ty = set.resolve_type(&TypeKey::plain("avg-cpu")).unwrap();
        assert!(ty.field_index("%iowait") == Some(3));
        let rec = &set.records()[0];
        assert!(rec.timestamp() == timestamp_from_ymdhms(2013, 7, 12, 9, 30, 1));
        assert!(rec.values(&ty.key()).unwrap() == [10.0, 0.0, 5.0, 2.0, 0.0, 83.0]);
    }

    #[test]
    fn test_device_rows_subtyped() {
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             \n\
             Time: 09:30:01 AM\n\
             Device:            tps    kB_read/s    kB_wrtn/s\n\
             sda               1.50        12.00        34.00\n\
             sdb               0.25         1.00         2.00\n\
             \n\
             Time: 09:30:31 AM\n\
             Device:            tps    kB_read/s    kB_wrtn/s\n\
             sda               2.50        13.00        35.00\n"
        ))
        .unwrap();
        assert!(set.records().len() == 2);
        let sda = set.resolve_type(&TypeKey::sub("Device", "sda")).unwrap();
        let sdb = set.resolve_type(&TypeKey::sub("Device", "sdb")).unwrap();
        assert!(sda.field_index("tps") == Some(0));
        assert!(set.records()[0].values(&sda.key()).unwrap() == [1.5, 12.0, 34.0]);
        assert!(set.records()[0].values(&sdb.key()).unwrap() == [0.25, 1.0, 2.0]);
        assert!(set.records()[1].values(&sda.key()).unwrap() == [2.5, 13.0, 35.0]);
        assert!(!set.records()[1].has(&sdb.key()));
        // The per-record total sums the devices.
        let total = TypeKey::plain("Device (Total)");
        assert!(set.records()[0].values(&total).unwrap() == [1.75, 13.0, 36.0]);
        assert!(set.records()[1].values(&total).unwrap() == [2.5, 13.0, 35.0]);
    }

    #[test]
    fn test_midnight_rollover() {
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             Time: 11:59:31 PM\n\
             avg-cpu:  %user %system %idle\n\
             \x20          10.0    5.0  85.0\n\
             Time: 12:00:01 AM\n\
             avg-cpu:  %user %system %idle\n\
             \x20          11.0    5.0  84.0\n"
        ))
        .unwrap();
        assert!(set.records().len() == 2);
        assert!(set.records()[0].timestamp() == timestamp_from_ymdhms(2013, 7, 12, 23, 59, 31));
        assert!(set.records()[1].timestamp() == timestamp_from_ymdhms(2013, 7, 13, 0, 0, 1));
    }

    #[test]
    fn test_full_stamp_lines() {
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             07/12/2013 09:30:01 AM\n\
             avg-cpu:  %user %system %idle\n\
             \x20          10.0    5.0  85.0\n"
        ))
        .unwrap();
        assert!(set.records()[0].timestamp() == timestamp_from_ymdhms(2013, 7, 12, 9, 30, 1));
    }

    #[test]
    fn test_aix_banner_and_disks() {
        let set = parse(
            "System configuration: lcpu=8 drives=3 paths=2 vdisks=0\n\
             \n\
             tty:      tin   tout\n\
             \x20       0.1   30.5\n\
             Disks:    % tm_act   Kbps   tps\n\
             hdisk0        1.5   120.0   3.5\n\
             hdisk1        0.0     0.0   0.0\n",
        )
        .unwrap();
        assert!(set.metadata("lcpu") == Some("8"));
        assert!(set.metadata("cpus") == Some("8"));
        let tty = set.resolve_type(&TypeKey::plain("tty")).unwrap();
        assert!(tty.field_index("tout") == Some(1));
        let d0 = set.resolve_type(&TypeKey::sub("Disks", "hdisk0")).unwrap();
        assert!(d0.field_index("%tm_act") == Some(0));
        assert!(set.records()[0].values(&d0.key()).unwrap() == [1.5, 120.0, 3.5]);
    }

    #[test]
    fn test_synthetic_times_without_t() {
        // No -t: two blocks, synthesized increasing timestamps.
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             avg-cpu:  %user %system %idle\n\
             \x20          10.0    5.0  85.0\n\
             \n\
             avg-cpu:  %user %system %idle\n\
             \x20          11.0    5.0  84.0\n"
        ))
        .unwrap();
        assert!(set.records().len() == 2);
        assert!(set.records()[0].timestamp() < set.records()[1].timestamp());
        let cpu = TypeKey::plain("avg-cpu");
        assert!(set.records()[0].values(&cpu).unwrap() == [10.0, 5.0, 85.0]);
        assert!(set.records()[1].values(&cpu).unwrap() == [11.0, 5.0, 84.0]);
    }

    #[test]
    fn test_synthetic_blocks_keep_tables_together() {
        // Blank lines also separate the tables *within* a block; only a
        // repeated table starts a new record.
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             avg-cpu:  %user %system %idle\n\
             \x20          10.0    5.0  85.0\n\
             \n\
             Device:            tps    kB_read/s\n\
             sda               1.50        12.00\n\
             \n\
             avg-cpu:  %user %system %idle\n\
             \x20          11.0    5.0  84.0\n\
             \n\
             Device:            tps    kB_read/s\n\
             sda               2.50        13.00\n"
        ))
        .unwrap();
        assert!(set.records().len() == 2);
        let cpu = TypeKey::plain("avg-cpu");
        let sda = TypeKey::sub("Device", "sda");
        assert!(set.records()[0].values(&cpu).unwrap() == [10.0, 5.0, 85.0]);
        assert!(set.records()[0].values(&sda).unwrap() == [1.5, 12.0]);
        assert!(set.records()[1].values(&cpu).unwrap() == [11.0, 5.0, 84.0]);
        assert!(set.records()[1].values(&sda).unwrap() == [2.5, 13.0]);
    }

    #[test]
    fn test_unrecognized_header_is_fatal() {
        assert!(parse("some random text\n").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_garbage_row_dropped() {
        let set = parse(&format!(
            "{LINUX_BANNER}\n\
             Time: 09:30:01 AM\n\
             Device:            tps    kB_read/s\n\
             sda               1.50        bogus\n\
             sdb               0.25         1.00\n"
        ))
        .unwrap();
        assert!(!set.records()[0].has(&TypeKey::sub("Device", "sda")));
        assert!(set.records()[0].values(&TypeKey::sub("Device", "sdb")).unwrap() == [0.25, 1.0]);
    }
}
