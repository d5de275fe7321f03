/// Parser for FIO sample logs (bandwidth/IOPS/latency logs written by
/// `write_bw_log` and friends).
///
/// Every line is one sample:
///
///   <ms>, <value>, <direction>, <blocksize>[, <offset>]
///
/// where `ms` is milliseconds since the start of the job and direction 0,
/// 1, 2 mean read, write, trim.  One logical record covers all directions
/// sampled at one `ms`; lines sharing a stamp accumulate into one
/// three-field vector (a direction missing at that stamp stays NaN).
///
/// The times are relative, so records are anchored at the epoch; consumers
/// care about deltas, not wall clock.  A first line that does not have this
/// shape fails the parse; later malformed lines cost themselves only.
use crate::{
    DataSet, DataType, ParseOptions, PostprocessorRegistry, RecordAssembler, TypeKey,
};

use anyhow::{bail, Result};
use chrono::Duration;
use perfutils::{epoch, parse_metric, tokenize, Delimiter};
use std::io::{BufRead, BufReader, Read};
use tracing::warn;
use ustr::Ustr;

const DIRECTIONS: &[&str] = &["read", "write", "trim"];

pub fn parse_fio(input: &mut dyn Read, _opts: &ParseOptions) -> Result<DataSet> {
    let mut set = DataSet::new();
    let ty = set
        .declare_type(DataType::new(
            TypeKey::plain("fio"),
            "FIO samples",
            DIRECTIONS.iter().map(|d| Ustr::from(d)).collect(),
        ))?
        .clone();
    let mut asm = RecordAssembler::new();
    let post = PostprocessorRegistry::new();

    let mut current: Option<(i64, [f64; 3])> = None;
    let mut discarded = 0usize;
    let mut first = true;

    let reader = BufReader::new(input);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = tokenize(line, &Delimiter::Comma);
        let parsed = parse_sample(&fields);
        if first {
            // The format has no header; the first line is the only place to
            // decide this is a FIO log at all.
            if parsed.is_none() {
                bail!("Not a FIO sample log: unrecognized first line {line:?}");
            }
            first = false;
        }
        let (ms, value, dir) = match parsed {
            Some(s) => s,
            None => {
                warn!("Malformed FIO sample dropped: {line}");
                discarded += 1;
                continue;
            }
        };
        match current {
            Some((cur_ms, ref mut pending)) if cur_ms == ms => {
                pending[dir] = value;
            }
            Some((prev_ms, _)) if ms < prev_ms => {
                warn!("FIO sample at {ms}ms is before {prev_ms}ms, dropped");
                discarded += 1;
            }
            _ => {
                flush(&mut set, &mut asm, &post, &ty, current.take());
                let mut pending = [f64::NAN; 3];
                pending[dir] = value;
                current = Some((ms, pending));
            }
        }
    }
    flush(&mut set, &mut asm, &post, &ty, current.take());
    asm.close(&mut set, &post);
    if set.records().is_empty() {
        bail!("Empty FIO sample log");
    }
    if discarded > 0 {
        warn!("Dropped {discarded} unusable FIO samples");
    }
    Ok(set)
}

// (ms, value, direction) from one line, or None if the shape is wrong.

fn parse_sample(fields: &[std::borrow::Cow<str>]) -> Option<(i64, f64, usize)> {
    if fields.len() < 4 {
        return None;
    }
    let ms = fields[0].trim().parse::<i64>().ok().filter(|ms| *ms >= 0)?;
    let value = parse_metric(fields[1].as_ref())?;
    let dir = fields[2].trim().parse::<usize>().ok()?;
    if dir >= DIRECTIONS.len() {
        return None;
    }
    Some((ms, value, dir))
}

fn flush(
    set: &mut DataSet,
    asm: &mut RecordAssembler,
    post: &PostprocessorRegistry,
    ty: &DataType,
    current: Option<(i64, [f64; 3])>,
) {
    if let Some((ms, pending)) = current {
        let mark = format!("{ms}");
        asm.open(set, post, epoch() + Duration::milliseconds(ms), &mark);
        asm.append(ty, &mark, pending.to_vec());
    }
}
