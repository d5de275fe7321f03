/// Parser for `zpool iostat -v` output.
///
/// The stream is a sequence of sampling blocks.  Each block is a device
/// table bounded by dashed separator lines, preceded by two column-header
/// lines (ignored; the six columns are fixed) and, when zpool ran with
/// `-T`, by a timestamp line - either a bare epoch-seconds number (`-T u`)
/// or a `date`-style stamp (`-T d`).  Without `-T` there is no time at
/// all; timestamps are then synthesized at one-second spacing (warned
/// once).
///
/// Table rows are one device each: a name, then alloc/free/read-ops/
/// write-ops/read-bw/write-bw with binary unit suffixes (`1.2K`, `3.4M`)
/// or `-` for "no data".  Indentation encodes the vdev tree; rows are
/// sub-typed by the slash-joined path (`tank`, `tank/mirror`,
/// `tank/mirror/sda`).  Values are parsed to plain bytes/ops and the
/// field names carry the unit, which is the unit-rename transform's job.
use crate::{
    DataSet, ParseOptions, PostprocessorRegistry, RecordAssembler, TransformRegistry, TypeKey,
};

use anyhow::{bail, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use perfutils::{add_seconds, epoch, localize, parse_sized, tokenize, Delimiter, Timestamp};
use std::io::{BufRead, BufReader, Read};
use tracing::warn;
use ustr::Ustr;

const FIELDS: &[&str] = &["alloc", "free", "read ops", "write ops", "read bw", "write bw"];

const DATE_STAMP_FORMATS: &[&str] = &["%a %b %e %H:%M:%S %Y", "%Y-%m-%d.%H:%M:%S"];

pub fn parse_zpool(input: &mut dyn Read, opts: &ParseOptions) -> Result<DataSet> {
    ZpoolParser::new(opts).parse(input)
}

struct ZpoolParser<'a> {
    opts: &'a ParseOptions,
    set: DataSet,
    asm: RecordAssembler,
    post: PostprocessorRegistry,
    transforms: TransformRegistry,
    in_table: bool,
    // Timestamp seen since the last table, consumed by the next one.
    pending_time: Option<(Timestamp, String)>,
    // Vdev path stack as (indent, name) pairs.
    stack: Vec<(usize, Ustr)>,
    blocks: usize,
    warned_synthetic: bool,
    discarded: usize,
}

impl<'a> ZpoolParser<'a> {
    fn new(opts: &'a ParseOptions) -> ZpoolParser<'a> {
        ZpoolParser {
            opts,
            set: DataSet::new(),
            asm: RecordAssembler::new(),
            post: PostprocessorRegistry::new(),
            transforms: TransformRegistry::standard(),
            in_table: false,
            pending_time: None,
            stack: vec![],
            blocks: 0,
            warned_synthetic: false,
            discarded: 0,
        }
    }

    fn parse(mut self, input: &mut dyn Read) -> Result<DataSet> {
        let reader = BufReader::new(input);
        for line in reader.lines() {
            let line = line?;
            self.line(&line)?;
        }
        self.asm.close(&mut self.set, &self.post);
        if self.blocks == 0 {
            bail!("Not a zpool iostat stream: no device table found");
        }
        if self.discarded > 0 {
            warn!("Dropped {} unusable zpool iostat lines", self.discarded);
        }
        Ok(self.set)
    }

    fn line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        if is_separator(line) {
            if self.in_table {
                self.in_table = false;
            } else {
                self.begin_block();
            }
            return Ok(());
        }
        if self.in_table {
            return self.device_row(line);
        }
        if let Some(stamped) = self.try_timestamp(line) {
            self.pending_time = Some(stamped);
        }
        // Anything else between tables is a column-header line; the six
        // columns are fixed, so there is nothing to learn from it.
        Ok(())
    }

    fn begin_block(&mut self) {
        self.in_table = true;
        self.stack.clear();
        let (t, mark) = match self.pending_time.take() {
            Some(stamped) => stamped,
            None => {
                if !self.warned_synthetic {
                    warn!("No -T timestamps in zpool iostat input; synthesizing one-second spacing");
                    self.warned_synthetic = true;
                }
                (add_seconds(epoch(), self.blocks as i64), format!("#{}", self.blocks + 1))
            }
        };
        self.blocks += 1;
        self.asm.open(&mut self.set, &self.post, t, &mark);
    }

    fn try_timestamp(&self, line: &str) -> Option<(Timestamp, String)> {
        let s = line.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let secs = s.parse::<i64>().ok()?;
            return Some((Utc.timestamp_opt(secs, 0).single()?, s.to_string()));
        }
        DATE_STAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|local| (localize(local, self.opts.timezone), s.to_string()))
    }

    fn device_row(&mut self, line: &str) -> Result<()> {
        let indent = line.len() - line.trim_start().len();
        let fields = tokenize(line, &Delimiter::Whitespace);
        if fields.len() != FIELDS.len() + 1 {
            warn!("Malformed zpool device row dropped: {line}");
            self.discarded += 1;
            return Ok(());
        }
        let name = fields[0].as_ref();
        let mut values = Vec::with_capacity(FIELDS.len());
        for f in &fields[1..] {
            match parse_sized(f.as_ref()) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable zpool value {f} for {name}, row dropped");
                    self.discarded += 1;
                    return Ok(());
                }
            }
        }
        // Indentation places this device in the vdev tree.
        while self.stack.last().map_or(false, |(i, _)| *i >= indent) {
            self.stack.pop();
        }
        self.stack.push((indent, Ustr::from(name)));
        let path = self
            .stack
            .iter()
            .map(|(_, n)| n.as_str())
            .collect::<Vec<&str>>()
            .join("/");

        let key = TypeKey::sub("zpool", &path);
        if !self.set.has_type(&key) {
            let raw = FIELDS.iter().map(|f| Ustr::from(f)).collect();
            let ty = self.transforms.build_type(key, &path, raw);
            self.set.declare_type(ty)?;
        }
        let ty = self.set.resolve_type(&key)?.clone();
        self.transforms.apply(&ty, &mut values);
        let mark = self.asm.mark().unwrap_or_default();
        self.asm.append(&ty, mark.as_str(), values);
        Ok(())
    }
}

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && t.bytes().all(|b| b == b'-' || b == b' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfutils::timestamp_from_ymdhms;

    fn parse(text: &str) -> Result<DataSet> {
        let mut bs = text.as_bytes();
        parse_zpool(&mut bs, &ParseOptions::default())
    }

    const TABLE: &str = "\
\x20              capacity     operations    bandwidth
pool          alloc   free   read  write   read  write
------------  -----  -----  -----  -----  -----  -----
tank           1.2G  10.8G      5      3   100K   200K
  mirror       1.2G  10.8G      5      3   100K   200K
    sda           -      -      2      1    50K  100K
------------  -----  -----  -----  -----  -----  -----
";

    #[test]
    fn test_vdev_tree_subtyping() {
        let set = parse(&format!("1376560800\n{TABLE}")).unwrap();
        assert!(set.records().len() == 1);
        let rec = &set.records()[0];
        assert!(rec.timestamp() == timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0));
        let tank = set.resolve_type(&TypeKey::sub("zpool", "tank")).unwrap();
        // Units renamed by the transform, values scaled by their suffixes.
        assert!(tank.field_index("alloc (bytes)") == Some(0));
        assert!(tank.field_index("read (ops/s)") == Some(2));
        let v = rec.values(&tank.key()).unwrap();
        assert!(v[0] == 1.2 * 1024.0 * 1024.0 * 1024.0);
        assert!(v[2] == 5.0);
        assert!(v[4] == 100.0 * 1024.0);
        assert!(set.has_type(&TypeKey::sub("zpool", "tank/mirror")));
        let sda = set
            .resolve_type(&TypeKey::sub("zpool", "tank/mirror/sda"))
            .unwrap();
        let v = rec.values(&sda.key()).unwrap();
        assert!(v[0].is_nan() && v[1].is_nan());
        assert!(v[2] == 2.0);
    }

    #[test]
    fn test_repeated_blocks_with_epoch_stamps() {
        let set = parse(&format!("1376560800\n{TABLE}1376560805\n{TABLE}")).unwrap();
        assert!(set.records().len() == 2);
        assert!(
            set.records()[1].timestamp()
                == add_seconds(set.records()[0].timestamp(), 5)
        );
    }

    #[test]
    fn test_date_stamp() {
        let set = parse(&format!("Thu Aug 15 10:00:00 2013\n{TABLE}")).unwrap();
        assert!(set.records()[0].timestamp() == timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0));
    }

    #[test]
    fn test_synthetic_times_without_t() {
        let set = parse(&format!("{TABLE}{TABLE}")).unwrap();
        assert!(set.records().len() == 2);
        assert!(set.records()[0].timestamp() < set.records()[1].timestamp());
    }

    #[test]
    fn test_not_zpool_is_fatal() {
        assert!(parse("hello\nworld\n").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_malformed_row_dropped() {
        let table = "\
------------  -----  -----  -----  -----  -----  -----
tank           1.2G  10.8G      5      3   100K   200K
broken         1.2G
------------  -----  -----  -----  -----  -----  -----
";
        let set = parse(table).unwrap();
        assert!(set.has_type(&TypeKey::sub("zpool", "tank")));
        assert!(!set.has_type(&TypeKey::sub("zpool", "broken")));
    }
}
