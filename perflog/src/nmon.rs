/// Parser for NMON output (AIX and Linux).
///
/// An NMON file is comma-separated with the line's meaning keyed by its
/// first field:
///
/// - `AAA,<key>,<value>` - file metadata: host name, sampling interval,
///   snapshot count, base date, cpu count, and so on.  All of it lands in
///   the data set's metadata map; `host`, `interval` and `date` are also
///   interpreted here.
///
/// - `BBB*,<seq>,<text>` - multi-line free-text blocks of system
///   configuration (`BBBP` command output, `BBBC`/`BBBV` config dumps).
///   Accumulated verbatim into one metadata entry per block id.
///
/// - `<ID>,<description>,<field>,...` - a type header, declaring the field
///   list for metric group `ID`.  Headers normally all precede the first
///   timestamp marker but may also appear mid-stream when nmon discovers a
///   device late; both are accepted (first declaration wins).
///
/// - `ZZZZ,Tnnnn,HH:MM:SS,DD-MMM-YYYY` - a timestamp marker opening
///   sampling interval `Tnnnn`.  The date part is optional in some builds;
///   then the `AAA,date` metadatum supplies it.  Timestamps are local and
///   resolved against the caller's UTC offset.
///
/// - `<ID>,Tnnnn,v1,v2,...` - one data line for group `ID` within interval
///   `Tnnnn`.  Lines for one interval may arrive in any order but must
///   agree on the mark; a disagreeing line is misplaced and dropped.
///
/// - `TOP,<pid>,Tnnnn,...,<command>` - per-process samples, preceded by a
///   `TOP,+PID,Time,...` header.  `UARG,Tnnnn,<pid>,<name>,<args>` supplies
///   full command lines after the fact.  Both feed the process tracker,
///   which splits histories on pid reuse.
///
/// - `SUMMARY,Tnnnn,...,<command>` - workload summary rows whose trailing
///   field is a command name; each command becomes a sub-type id.
///
/// Error policy follows the engine taxonomy: a file without any timestamp
/// marker, a data row before the first marker (for an id not on the ignore
/// list), or unrecoverable backwards time is fatal; a bad numeric field,
/// bad pid, short/long row or misplaced mark costs only that row.
use crate::postprocess::{NetColumnTotal, ProcessCpuScale};
use crate::{
    generic_fields, DataSet, DataType, Observation, ParseOptions, PostprocessorRegistry,
    ProcessTracker, RecordAssembler, SkipIndex, TransformRegistry, TypeBuilder, TypeKey,
};

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveTime};
use perfutils::{add_seconds, localize, parse_metric, tokenize, Delimiter, Timestamp};
use std::io::{BufRead, BufReader, Read};
use tracing::{debug, warn};
use ustr::Ustr;

/// Parse a whole NMON stream into a DataSet.

pub fn parse_nmon(input: &mut dyn Read, opts: &ParseOptions) -> Result<DataSet> {
    NmonParser::new(opts).parse(input)
}

// AIX physical/scaled cpu groups that we deliberately do not model; data
// rows for these may legally precede the first marker in some builds.

const IGNORED_ID_PREFIXES: &[&str] = &["PCPU", "SCPU"];

// All mutable parsing state lives here, created per call; the parser
// function is freely reusable and reentrancy is a non-question.

struct NmonParser<'a> {
    opts: &'a ParseOptions,
    set: DataSet,
    asm: RecordAssembler,
    builder: TypeBuilder,
    skips: SkipIndex,
    transforms: TransformRegistry,
    post: PostprocessorRegistry,
    tracker: ProcessTracker,
    base_date: Option<NaiveDate>,
    interval: Option<i64>,
    saw_marker: bool,
    discarded: usize,
}

impl<'a> NmonParser<'a> {
    fn new(opts: &'a ParseOptions) -> NmonParser<'a> {
        let mut builder = TypeBuilder::new();
        builder.define_deferred("SUMMARY", "Workload summary");

        let mut post = PostprocessorRegistry::new();
        post.register_record(Box::new(NetColumnTotal));
        if opts.scale_process_cpu {
            post.register_set(Box::new(ProcessCpuScale::new()));
        }

        NmonParser {
            opts,
            set: DataSet::new(),
            asm: RecordAssembler::new(),
            builder,
            skips: SkipIndex::new(),
            transforms: TransformRegistry::standard(),
            post,
            tracker: ProcessTracker::new("TOP"),
            base_date: None,
            interval: None,
            saw_marker: false,
            discarded: 0,
        }
    }

    fn parse(mut self, input: &mut dyn Read) -> Result<DataSet> {
        let reader = BufReader::new(input);
        for line in reader.lines() {
            let line = line?;
            self.line(line.trim_end())?;
        }
        self.asm.close(&mut self.set, &self.post);
        if !self.saw_marker {
            bail!("Not an NMON file: no ZZZZ timestamp marker found");
        }
        self.post.run_set(&mut self.set);
        for p in self.tracker.into_processes() {
            self.set.add_process(p);
        }
        if self.discarded > 0 {
            warn!("Dropped {} unusable NMON lines", self.discarded);
        }
        Ok(self.set)
    }

    fn line(&mut self, line: &str) -> Result<()> {
        let fields = tokenize(line, &Delimiter::Comma);
        if fields.is_empty() {
            return Ok(());
        }
        match fields[0].as_ref() {
            "AAA" => self.metadata(&fields),
            "ZZZZ" => self.marker(&fields)?,
            "TOP" => self.top(&fields)?,
            "UARG" => self.uarg(line, &fields)?,
            "SUMMARY" => self.summary(&fields)?,
            id if id.starts_with("BBB") => self.freeform(id, line),
            _ => self.data_or_header(&fields)?,
        }
        Ok(())
    }

    fn metadata(&mut self, fields: &[std::borrow::Cow<str>]) {
        if fields.len() < 2 {
            return;
        }
        let key = fields[1].as_ref();
        let value = fields[2..]
            .iter()
            .map(|f| f.as_ref())
            .collect::<Vec<&str>>()
            .join(",");
        let value = value.trim_matches(',');
        match key {
            "host" => self.set.set_hostname(value),
            "interval" => self.interval = value.parse::<i64>().ok().filter(|iv| *iv > 0),
            "date" => self.base_date = NaiveDate::parse_from_str(value, "%d-%b-%Y").ok(),
            _ => {}
        }
        self.set.set_metadata(key, value);
    }

    fn freeform(&mut self, id: &str, line: &str) {
        // Keep the block verbatim, minus the `BBBx,` prefix.
        let content = line.splitn(2, ',').nth(1).unwrap_or("");
        self.set.append_metadata(id, content);
    }

    fn marker(&mut self, fields: &[std::borrow::Cow<str>]) -> Result<()> {
        if fields.len() < 3 {
            warn!("Short ZZZZ line, dropped");
            self.discarded += 1;
            return Ok(());
        }
        let mark = fields[1].as_ref();
        let time = match NaiveTime::parse_from_str(fields[2].as_ref(), "%H:%M:%S") {
            Ok(t) => t,
            Err(_) => {
                warn!("Bad time {} at {mark}, marker dropped", fields[2]);
                self.discarded += 1;
                return Ok(());
            }
        };
        let date = if fields.len() > 3 {
            match NaiveDate::parse_from_str(fields[3].as_ref(), "%d-%b-%Y") {
                Ok(d) => {
                    self.base_date = Some(d);
                    d
                }
                Err(_) => {
                    warn!("Bad date {} at {mark}, marker dropped", fields[3]);
                    self.discarded += 1;
                    return Ok(());
                }
            }
        } else {
            match self.base_date {
                Some(d) => d,
                None => bail!("ZZZZ marker {mark} has no date and no AAA,date was seen"),
            }
        };
        let mut t = localize(date.and_time(time), self.opts.timezone);
        t = self.check_monotonic(t, mark)?;
        self.saw_marker = true;
        self.asm.open(&mut self.set, &self.post, t, mark);
        Ok(())
    }

    // Non-decreasing record time is a model invariant.  Corrupt files do go
    // backwards; with an interval hint and lenient mode we synthesize the
    // next plausible time, otherwise the file is rejected.

    fn check_monotonic(&self, t: Timestamp, mark: &str) -> Result<Timestamp> {
        let prev = match self.asm.timestamp().or(self.set.last_record_time()) {
            Some(p) => p,
            None => return Ok(t),
        };
        if t >= prev {
            return Ok(t);
        }
        if self.opts.lenient_time {
            if let Some(iv) = self.interval {
                let fixed = add_seconds(prev, iv);
                warn!(
                    "Time went backwards at {mark} ({t} < {prev}); synthesized {fixed} from the interval hint"
                );
                return Ok(fixed);
            }
        }
        bail!("Time went backwards at {mark} ({t} < {prev}) and no recovery is configured")
    }

    fn top(&mut self, fields: &[std::borrow::Cow<str>]) -> Result<()> {
        if fields.len() < 2 {
            return Ok(());
        }
        if fields[1].starts_with('+') {
            // TOP,+PID,Time,%CPU,...,Command - the per-process field header.
            if fields.len() > 4 {
                let names: Vec<&str> = fields[3..fields.len() - 1]
                    .iter()
                    .map(|f| f.as_ref())
                    .collect();
                self.builder
                    .define("TOP", "Process statistics", names, &self.skips);
            }
            return Ok(());
        }
        let pid = match fields[1].parse::<u32>() {
            Ok(p) => p,
            Err(_) => {
                // Informational lines like `TOP,%CPU Utilisation` land here
                // too; only complain when it looked like data.
                if fields.len() > 3 {
                    warn!("TOP line with unparsable pid {}, dropped", fields[1]);
                    self.discarded += 1;
                }
                return Ok(());
            }
        };
        if fields.len() < 5 {
            warn!("Short TOP line for pid {pid}, dropped");
            self.discarded += 1;
            return Ok(());
        }
        let mark = fields[2].as_ref();
        let time = self.interval_time(mark, "TOP")?;
        let time = match time {
            Some(t) => t,
            None => {
                self.discarded += 1;
                return Ok(());
            }
        };
        let command = fields[fields.len() - 1].as_ref();
        let mut values = Vec::with_capacity(fields.len() - 4);
        for f in &fields[3..fields.len() - 1] {
            match parse_metric(f.as_ref()) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable TOP field {f} for pid {pid} at {mark}, row dropped");
                    self.discarded += 1;
                    return Ok(());
                }
            }
        }
        let values = self.skips.apply(Ustr::from("TOP"), values);

        let obs = self.tracker.observe(pid, time, command, None);
        let process = self.tracker.get(obs.current());
        let key = process.type_key();
        let start = process.start();
        let ty = self
            .builder
            .materialize_for_process(&mut self.set, key, values.len(), pid, start)?
            .clone();
        if let Observation::Split { old, .. } = obs {
            // Same interval already holds rows for the previous generation.
            let old_key = self.tracker.get(old).type_key();
            self.asm.redirect(&old_key, &ty);
        }
        self.asm.append(&ty, mark, values);
        Ok(())
    }

    fn uarg(&mut self, line: &str, fields: &[std::borrow::Cow<str>]) -> Result<()> {
        if fields.len() < 4 {
            warn!("Short UARG line, dropped");
            self.discarded += 1;
            return Ok(());
        }
        let mark = fields[1].as_ref();
        let pid = match fields[2].parse::<u32>() {
            Ok(p) => p,
            Err(_) => {
                warn!("UARG line with unparsable pid {}, dropped", fields[2]);
                self.discarded += 1;
                return Ok(());
            }
        };
        let time = match self.interval_time(mark, "UARG")? {
            Some(t) => t,
            None => {
                self.discarded += 1;
                return Ok(());
            }
        };
        let name = fields[3].as_ref();
        // The command line may itself contain commas; recover it from the
        // raw line past the fourth separator.
        let cmdline = line
            .splitn(5, ',')
            .nth(4)
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let obs = self.tracker.observe(pid, time, name, cmdline);
        if let Observation::Split { old, new } = obs {
            // Rows already recorded this interval belong to the new
            // generation; move them under its type.
            let old_key = self.tracker.get(old).type_key();
            let process = self.tracker.get(new);
            let key = process.type_key();
            let start = process.start();
            let ncols = self.builder.field_count("TOP").unwrap_or(0);
            let ty = self
                .builder
                .materialize_for_process(&mut self.set, key, ncols, pid, start)?
                .clone();
            self.asm.redirect(&old_key, &ty);
        }
        Ok(())
    }

    fn summary(&mut self, fields: &[std::borrow::Cow<str>]) -> Result<()> {
        if fields.len() < 4 {
            warn!("Short SUMMARY line, dropped");
            self.discarded += 1;
            return Ok(());
        }
        let mark = fields[1].as_ref();
        if self.interval_time(mark, "SUMMARY")?.is_none() {
            self.discarded += 1;
            return Ok(());
        }
        let command = fields[fields.len() - 1].as_ref();
        let mut values = Vec::with_capacity(fields.len() - 3);
        for f in &fields[2..fields.len() - 1] {
            match parse_metric(f.as_ref()) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable SUMMARY field {f} at {mark}, row dropped");
                    self.discarded += 1;
                    return Ok(());
                }
            }
        }
        let key = TypeKey::sub("SUMMARY", command);
        let ty = self
            .builder
            .materialize(&mut self.set, key, values.len())?
            .clone();
        self.asm.append(&ty, mark, values);
        Ok(())
    }

    fn data_or_header(&mut self, fields: &[std::borrow::Cow<str>]) -> Result<()> {
        let id = fields[0].as_ref();
        if IGNORED_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
            return Ok(());
        }
        if fields.len() < 2 || !is_mark(fields[1].as_ref()) {
            // A header: ID,Description,field,field,...
            if fields.len() >= 3 {
                let names: Vec<&str> = fields[2..].iter().map(|f| f.as_ref()).collect();
                if id == "CPU_ALL" && !self.builder.is_defined(id) {
                    // The derived Idle%/Busy columns must not be modeled;
                    // their position varies between builds (Linux inserts
                    // Steal% and has no Busy), so locate them by name.  The
                    // busy number is re-derived by the CPU transform from
                    // user+sys.
                    let drop: Vec<usize> = names
                        .iter()
                        .enumerate()
                        .filter(|(_, n)| **n == "Idle%" || **n == "Busy")
                        .map(|(i, _)| i)
                        .collect();
                    self.skips.add(id, drop);
                }
                self.builder.define(id, fields[1].as_ref(), names, &self.skips);
            } else {
                debug!("Uninterpretable line with id {id}, ignored");
            }
            return Ok(());
        }
        let mark = fields[1].as_ref();
        if !self.saw_marker {
            bail!("Data line for {id} before any timestamp marker");
        }
        let mut values = Vec::with_capacity(fields.len() - 2);
        for f in &fields[2..] {
            match parse_metric(f.as_ref()) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable {id} field {f} at {mark}, row dropped");
                    self.discarded += 1;
                    return Ok(());
                }
            }
        }
        let mut values = self.skips.apply(Ustr::from(id), values);
        let ty = self.ensure_type(TypeKey::plain(id), values.len())?;
        self.transforms.apply(&ty, &mut values);
        self.asm.append(&ty, mark, values);
        Ok(())
    }

    // Resolve or lazily construct a plain type, building it through the
    // transform registry so derived columns are declared up front.

    fn ensure_type(&mut self, key: TypeKey, ncols: usize) -> Result<DataType> {
        if !self.set.has_type(&key) {
            let id = key.id();
            let (name, raw_fields) = match self.builder.template_fields(id.as_str()) {
                Some((name, fields)) => (name, fields),
                None => {
                    debug!("Type {key} constructed lazily from its first data row");
                    (id, generic_fields(ncols))
                }
            };
            let ty = self.transforms.build_type(key, name.as_str(), raw_fields);
            self.set.declare_type(ty)?;
        }
        Ok(self.set.resolve_type(&key)?.clone())
    }

    // The time a per-process or summary row belongs to.  Ok(None) means the
    // row is out of sync and should be dropped; an Err means the row arrived
    // before any record context existed, which is fatal.

    fn interval_time(&self, mark: &str, what: &str) -> Result<Option<Timestamp>> {
        if !self.asm.is_open() {
            bail!("{what} line at {mark} before any timestamp marker");
        }
        if self.asm.mark().map(|m| m.as_str() != mark).unwrap_or(true) {
            warn!(
                "{what}: misplaced record at {mark}, current interval is {}",
                self.asm.mark().unwrap_or_default()
            );
            return Ok(None);
        }
        Ok(self.asm.timestamp())
    }
}

fn is_mark(f: &str) -> bool {
    f.len() >= 2 && f.starts_with('T') && f[1..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<DataSet> {
        let mut bs = text.as_bytes();
        parse_nmon(&mut bs, &ParseOptions::default())
    }

    fn parse_with(text: &str, opts: &ParseOptions) -> Result<DataSet> {
        let mut bs = text.as_bytes();
        parse_nmon(&mut bs, opts)
    }

    #[test]
    fn test_minimal_file() {
        let set = parse(
            "AAA,host,web01\n\
             AAA,cpus,,4\n\
             CPU_ALL,CPU Total web01,User%,Sys%,Wait%,Idle%,Busy,CPUs\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             CPU_ALL,T0001,10.0,5.0,3.0,82.0,,4\n",
        )
        .unwrap();
        assert!(set.hostname().as_str() == "web01");
        assert!(set.metadata("cpus") == Some("4"));
        let ty = set.resolve_type(&TypeKey::plain("CPU_ALL")).unwrap();
        // Idle%/Busy skip-indexed away, CPU% derived by the transform.
        assert_eq!(
            ty.fields().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            vec!["User%", "Sys%", "Wait%", "CPUs", "CPU%"]
        );
        assert!(set.records().len() == 1);
        let rec = &set.records()[0];
        assert!(rec.mark().as_str() == "T0001");
        assert!(rec.values(&ty.key()).unwrap() == [10.0, 5.0, 3.0, 4.0, 15.0]);
    }

    #[test]
    fn test_cpu_all_linux_columns_keep_steal() {
        // Linux builds insert Steal% where AIX has Busy; only the named
        // Idle% column is dropped here.
        let set = parse(
            "AAA,host,web01\n\
             CPU_ALL,CPU Total web01,User%,Sys%,Wait%,Idle%,Steal%,CPUs\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             CPU_ALL,T0001,10.0,5.0,3.0,80.0,2.0,4\n",
        )
        .unwrap();
        let ty = set.resolve_type(&TypeKey::plain("CPU_ALL")).unwrap();
        assert_eq!(
            ty.fields().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            vec!["User%", "Sys%", "Wait%", "Steal%", "CPUs", "CPU%"]
        );
        let rec = &set.records()[0];
        assert!(rec.values(&ty.key()).unwrap() == [10.0, 5.0, 3.0, 2.0, 4.0, 15.0]);
    }

    #[test]
    fn test_marker_closes_previous_record() {
        let set = parse(
            "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             MEM,T0001,16000.0,4000.0\n\
             ZZZZ,T0002,00:00:32,15-AUG-2013\n\
             MEM,T0002,16000.0,3000.0\n",
        )
        .unwrap();
        assert!(set.records().len() == 2);
        assert!(set.records()[0].timestamp() < set.records()[1].timestamp());
        let ty = set.resolve_type(&TypeKey::plain("MEM")).unwrap();
        // memused derived by the memory transform.
        assert!(set.records()[1].values(&ty.key()).unwrap() == [16000.0, 3000.0, 13000.0]);
    }

    #[test]
    fn test_misplaced_data_line_dropped() {
        let set = parse(
            "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             MEM,T0099,16000.0,4000.0\n\
             MEM,T0001,16000.0,4000.0\n",
        )
        .unwrap();
        assert!(set.records().len() == 1);
        let ty = set.resolve_type(&TypeKey::plain("MEM")).unwrap();
        assert!(set.records()[0].values(&ty.key()).unwrap() == [16000.0, 4000.0, 12000.0]);
    }

    #[test]
    fn test_short_row_padded() {
        let set = parse(
            "AAA,host,web01\n\
             VM,Paging,pgpgin,pgpgout,pswpin\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             VM,T0001,1.0,2.0\n",
        )
        .unwrap();
        let ty = set.resolve_type(&TypeKey::plain("VM")).unwrap();
        assert!(set.records()[0].values(&ty.key()).unwrap() == [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_data_before_marker_is_fatal() {
        let r = parse(
            "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             MEM,T0001,16000.0,4000.0\n",
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_ignored_ids_before_marker() {
        // PCPU data before the first marker is on the ignore list, not fatal.
        let set = parse(
            "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             PCPU_ALL,T0001,1.0,2.0\n\
             ZZZZ,T0001,00:00:02,15-AUG-2013\n\
             MEM,T0001,16000.0,4000.0\n",
        )
        .unwrap();
        assert!(!set.has_type(&TypeKey::plain("PCPU_ALL")));
    }

    #[test]
    fn test_not_nmon() {
        assert!(parse("hello,world\n").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_backwards_time_strict_vs_lenient() {
        let text = "AAA,host,web01\n\
             AAA,interval,30\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             MEM,T0001,16000.0,4000.0\n\
             ZZZZ,T0002,09:00:00,15-AUG-2013\n\
             MEM,T0002,16000.0,5000.0\n";
        assert!(parse(text).is_err());

        let opts = ParseOptions::default().with_lenient_time(true);
        let set = parse_with(text, &opts).unwrap();
        assert!(set.records().len() == 2);
        // Synthesized from the interval hint: previous + 30s.
        let t0 = set.records()[0].timestamp();
        let t1 = set.records()[1].timestamp();
        assert!(t1 == add_seconds(t0, 30));
    }

    #[test]
    fn test_backwards_time_lenient_without_interval() {
        // Lenient mode without an interval hint still rejects.
        let text = "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             MEM,T0001,16000.0,4000.0\n\
             ZZZZ,T0002,09:00:00,15-AUG-2013\n";
        let opts = ParseOptions::default().with_lenient_time(true);
        assert!(parse_with(text, &opts).is_err());
    }

    #[test]
    fn test_top_and_uarg_process_split() {
        let set = parse(
            "AAA,host,web01\n\
             TOP,%CPU Utilisation\n\
             TOP,+PID,Time,%CPU,%Usr,%Sys,Size,Command\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             TOP,100,T0001,20.0,15.0,5.0,1024,java\n\
             ZZZZ,T0002,10:00:30,15-AUG-2013\n\
             TOP,100,T0002,30.0,20.0,10.0,1024,postgres\n",
        )
        .unwrap();
        // Pid 100 was reused: two distinct processes, split at T0002.
        assert!(set.processes().len() == 2);
        let java = &set.processes()[0];
        let postgres = &set.processes()[1];
        assert!(java.name().as_str() == "java");
        assert!(postgres.name().as_str() == "postgres");
        assert!(java.end() == postgres.start());
        assert!(java.type_key() != postgres.type_key());
        // Each generation's data sits under its own type.
        let r0 = &set.records()[0];
        let r1 = &set.records()[1];
        assert!(r0.has(&java.type_key()) && !r0.has(&postgres.type_key()));
        assert!(r1.has(&postgres.type_key()) && !r1.has(&java.type_key()));
        // Field names come from the TOP header.
        let ty = set.resolve_type(&java.type_key()).unwrap();
        assert!(ty.field_index("%CPU") == Some(0));
        assert!(ty.process() == Some((100, java.start())));
    }

    #[test]
    fn test_uarg_attaches_command_line() {
        let set = parse(
            "AAA,host,web01\n\
             TOP,+PID,Time,%CPU,%Usr,%Sys,Size,Command\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             TOP,100,T0001,20.0,15.0,5.0,1024,java\n\
             UARG,T0001,100,java,java -jar app.jar\n",
        )
        .unwrap();
        assert!(set.processes().len() == 1);
        assert!(set.processes()[0].command_line() == Some("java -jar app.jar"));
    }

    #[test]
    fn test_summary_subtypes_by_command() {
        let set = parse(
            "AAA,host,web01\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             SUMMARY,T0001,12.5,3.5,java\n\
             SUMMARY,T0001,1.0,0.5,sshd\n",
        )
        .unwrap();
        assert!(set.has_type(&TypeKey::sub("SUMMARY", "java")));
        assert!(set.has_type(&TypeKey::sub("SUMMARY", "sshd")));
        let rec = &set.records()[0];
        assert!(rec.values(&TypeKey::sub("SUMMARY", "java")).unwrap() == [12.5, 3.5]);
    }

    #[test]
    fn test_net_total_postprocessor_runs() {
        let set = parse(
            "AAA,host,web01\n\
             NET,Network I/O web01,eth0-read-KB/s,eth0-write-KB/s,lo-read-KB/s,lo-write-KB/s\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             NET,T0001,100.0,50.0,2.0,2.0\n",
        )
        .unwrap();
        let total = set.records()[0]
            .values(&TypeKey::plain("NET (Total)"))
            .unwrap();
        assert!(total == [102.0, 52.0]);
    }

    #[test]
    fn test_process_cpu_scaling_toggle() {
        let text = "AAA,host,web01\n\
             AAA,cpus,4\n\
             TOP,+PID,Time,%CPU,%Usr,%Sys,Size,Command\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             TOP,100,T0001,200.0,150.0,50.0,1024,java\n";
        let unscaled = parse(text).unwrap();
        let key = unscaled.processes()[0].type_key();
        assert!(unscaled.records()[0].values(&key).unwrap()[0] == 200.0);

        let opts = ParseOptions::default().with_process_cpu_scaling(true);
        let scaled = parse_with(text, &opts).unwrap();
        let key = scaled.processes()[0].type_key();
        assert!(scaled.records()[0].values(&key).unwrap()[0] == 50.0);
    }

    #[test]
    fn test_bad_numeric_row_dropped_not_fatal() {
        let set = parse(
            "AAA,host,web01\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             MEM,T0001,16000.0,garbage\n\
             ZZZZ,T0002,10:00:30,15-AUG-2013\n\
             MEM,T0002,16000.0,4000.0\n",
        )
        .unwrap();
        assert!(set.records().len() == 2);
        let ty = set.resolve_type(&TypeKey::plain("MEM")).unwrap();
        assert!(!set.records()[0].has(&ty.key()));
        assert!(set.records()[1].has(&ty.key()));
    }

    #[test]
    fn test_nan_and_inf_sentinels() {
        let set = parse(
            "AAA,host,web01\n\
             FCREAD,Fibre read KB/s,fc0,fc1\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             FCREAD,T0001,nan,INF\n",
        )
        .unwrap();
        let ty = set.resolve_type(&TypeKey::plain("FCREAD")).unwrap();
        let v = set.records()[0].values(&ty.key()).unwrap();
        assert!(v[0].is_nan());
        assert!(v[1] == f64::INFINITY);
    }

    #[test]
    fn test_bbb_blocks_accumulate() {
        let set = parse(
            "AAA,host,web01\n\
             BBBP,000,uname\n\
             BBBP,001,\"Linux web01 2.6.32\"\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n",
        )
        .unwrap();
        let text = set.metadata("BBBP").unwrap();
        assert!(text.contains("uname"));
        assert!(text.contains("Linux web01 2.6.32"));
    }

    #[test]
    fn test_timezone_resolution() {
        // 10:00 local at +02:00 is 08:00 UTC.
        let opts = ParseOptions::default().with_timezone(2 * 3600);
        let set = parse_with(
            "AAA,host,web01\n\
             ZZZZ,T0001,10:00:00,15-AUG-2013\n\
             SUMMARY,T0001,1.0,sh\n",
            &opts,
        )
        .unwrap();
        let t = set.records()[0].timestamp();
        assert!(t == perfutils::timestamp_from_ymdhms(2013, 8, 15, 8, 0, 0));
    }

    #[test]
    fn test_mark_without_date_uses_aaa_date() {
        let set = parse(
            "AAA,host,web01\n\
             AAA,date,15-AUG-2013\n\
             MEM,Memory web01,memtotal,memfree\n\
             ZZZZ,T0001,10:00:00\n\
             MEM,T0001,16000.0,4000.0\n",
        )
        .unwrap();
        assert!(
            set.records()[0].timestamp() == perfutils::timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0)
        );
    }
}
