/// Parser for JMeter aggregate CSV result files (JTL in CSV mode).
///
/// The first line is a header naming the columns; everything afterwards is
/// driven by it.  Three column classes, keyed by field name:
///
/// - required: `timeStamp` (epoch milliseconds), `elapsed`, `label`; a
///   header missing any of these fails the parse
/// - known metrics, each with an aggregation policy for when several
///   samples land in the same one-second bucket: averaged (`elapsed`,
///   `Latency`, `Connect`, `success`, ...), summed (`bytes`, `sentBytes`),
///   or maxed (`grpThreads`, `allThreads`)
/// - known non-metrics (`responseCode`, `threadName`, `URL`, ...), dropped
///   without comment; anything not on either list is dropped with a
///   warning
///
/// `success` is boolean in the file and ingests as 0/1, so its per-bucket
/// average is the success ratio.  Rows are sub-typed by label (one type per
/// transaction) and bucketed to whole seconds; buckets are emitted as
/// records in time order at the end, so an out-of-order input file still
/// yields a monotonic record sequence.
use crate::{DataRecord, DataSet, DataType, ParseOptions, TypeKey};

use anyhow::{bail, Result};
use chrono::Duration;
use itertools::Itertools;
use perfutils::{epoch, parse_metric, tokenize, Delimiter};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read};
use tracing::warn;
use ustr::Ustr;

const AVERAGED: &[&str] = &["elapsed", "Latency", "Connect", "IdleTime", "success"];
const SUMMED: &[&str] = &["bytes", "sentBytes", "SampleCount", "ErrorCount"];
const MAXED: &[&str] = &["grpThreads", "allThreads"];
const IGNORED: &[&str] = &[
    "responseCode",
    "responseMessage",
    "threadName",
    "dataType",
    "failureMessage",
    "URL",
    "Hostname",
    "Encoding",
    "Filename",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Policy {
    Average,
    Sum,
    Max,
}

struct Column {
    // Cell position in a data row.
    index: usize,
    name: Ustr,
    policy: Policy,
}

// Per-bucket, per-column accumulator.  NaN inputs are "no data" and do not
// count toward any policy.

#[derive(Clone, Copy)]
struct Cell {
    sum: f64,
    max: f64,
    count: u32,
}

impl Cell {
    fn new() -> Cell {
        Cell {
            sum: 0.0,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    fn add(&mut self, v: f64) {
        if v.is_nan() {
            return;
        }
        self.sum += v;
        if v > self.max {
            self.max = v;
        }
        self.count += 1;
    }

    fn finish(&self, policy: Policy) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        match policy {
            Policy::Average => self.sum / self.count as f64,
            Policy::Sum => self.sum,
            Policy::Max => self.max,
        }
    }
}

pub fn parse_jmeter(input: &mut dyn Read, _opts: &ParseOptions) -> Result<DataSet> {
    let reader = BufReader::new(input);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(l) => l?,
        None => bail!("Not a JMeter CSV: empty input"),
    };
    let cells = tokenize(header.trim_end(), &Delimiter::Comma);
    let mut ts_ix = None;
    let mut label_ix = None;
    let mut columns: Vec<Column> = vec![];
    for (i, cell) in cells.iter().enumerate() {
        let name = cell.as_ref();
        match name {
            "timeStamp" => ts_ix = Some(i),
            "label" => label_ix = Some(i),
            _ if AVERAGED.contains(&name) => columns.push(Column {
                index: i,
                name: Ustr::from(name),
                policy: Policy::Average,
            }),
            _ if SUMMED.contains(&name) => columns.push(Column {
                index: i,
                name: Ustr::from(name),
                policy: Policy::Sum,
            }),
            _ if MAXED.contains(&name) => columns.push(Column {
                index: i,
                name: Ustr::from(name),
                policy: Policy::Max,
            }),
            _ if IGNORED.contains(&name) => {}
            _ => warn!("Unknown JMeter column {name:?}, ignored"),
        }
    }
    let ts_ix = match ts_ix {
        Some(i) => i,
        None => bail!("Not a JMeter CSV: no timeStamp column"),
    };
    let label_ix = match label_ix {
        Some(i) => i,
        None => bail!("Not a JMeter CSV: no label column"),
    };
    if !columns.iter().any(|c| c.name.as_str() == "elapsed") {
        bail!("Not a JMeter CSV: no elapsed column");
    }

    // bucket second -> label -> per-column accumulators.
    let mut buckets: BTreeMap<i64, HashMap<Ustr, Vec<Cell>>> = BTreeMap::new();
    let mut discarded = 0usize;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cells = tokenize(line.trim_end(), &Delimiter::Comma);
        let stamp = cells
            .get(ts_ix)
            .and_then(|c| c.trim().parse::<i64>().ok());
        let stamp = match stamp {
            Some(ms) => ms,
            None => {
                warn!("JMeter row with unparsable timeStamp dropped: {line}");
                discarded += 1;
                continue;
            }
        };
        let label = match cells.get(label_ix) {
            Some(l) if !l.trim().is_empty() => Ustr::from(l.trim()),
            _ => {
                warn!("JMeter row with no label dropped: {line}");
                discarded += 1;
                continue;
            }
        };
        let mut values = Vec::with_capacity(columns.len());
        let mut bad = false;
        for col in &columns {
            let cell = cells.get(col.index).map(|c| c.as_ref()).unwrap_or("");
            match parse_cell(cell) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable JMeter cell {cell:?}, row dropped: {line}");
                    bad = true;
                    break;
                }
            }
        }
        if bad {
            discarded += 1;
            continue;
        }
        let acc = buckets
            .entry(stamp.div_euclid(1000))
            .or_default()
            .entry(label)
            .or_insert_with(|| vec![Cell::new(); columns.len()]);
        for (cell, v) in acc.iter_mut().zip(values) {
            cell.add(v);
        }
    }
    if buckets.is_empty() {
        bail!("JMeter CSV has a header but no samples");
    }
    if discarded > 0 {
        warn!("Dropped {discarded} unusable JMeter rows");
    }

    let mut set = DataSet::new();
    let fields: Vec<Ustr> = columns.iter().map(|c| c.name).collect();
    for (bucket, labels) in buckets {
        let t = epoch() + Duration::seconds(bucket);
        let mut record = DataRecord::new(t, &format!("{bucket}"));
        for label in labels.keys().sorted() {
            let key = TypeKey::Sub(Ustr::from("JMeter"), *label);
            let ty = set
                .declare_type(DataType::new(key, label.as_str(), fields.clone()))?
                .clone();
            let values = labels[label]
                .iter()
                .zip(&columns)
                .map(|(cell, col)| cell.finish(col.policy))
                .collect();
            record.set(&ty, values);
        }
        set.add_record(record);
    }
    Ok(set)
}

// JMeter booleans ingest as 0/1 so averages become ratios.

fn parse_cell(cell: &str) -> Option<f64> {
    let t = cell.trim();
    if t.eq_ignore_ascii_case("true") {
        return Some(1.0);
    }
    if t.eq_ignore_ascii_case("false") {
        return Some(0.0);
    }
    parse_metric(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfutils::Timestamp;

    fn parse(text: &str) -> Result<DataSet> {
        let mut bs = text.as_bytes();
        parse_jmeter(&mut bs, &ParseOptions::default())
    }

    const HEADER: &str =
        "timeStamp,elapsed,label,responseCode,success,bytes,grpThreads,allThreads,Latency";

    fn t(bucket: i64) -> Timestamp {
        epoch() + Duration::seconds(bucket)
    }

    #[test]
    fn test_bucketing_and_policies() {
        // Three samples for one label in one second bucket.
        let set = parse(&format!(
            "{HEADER}\n\
             1376560800100,100,Login,200,true,1000,2,4,80\n\
             1376560800500,200,Login,200,true,2000,3,4,120\n\
             1376560800900,300,Login,500,false,3000,2,4,100\n"
        ))
        .unwrap();
        assert!(set.records().len() == 1);
        let rec = &set.records()[0];
        assert!(rec.timestamp() == t(1376560800));
        let ty = set.resolve_type(&TypeKey::sub("JMeter", "Login")).unwrap();
        // elapsed averaged, success averaged to a ratio, bytes summed,
        // thread counts maxed, Latency averaged.
        assert!(rec.value(&ty, "elapsed") == Some(200.0));
        assert!((rec.value(&ty, "success").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!(rec.value(&ty, "bytes") == Some(6000.0));
        assert!(rec.value(&ty, "grpThreads") == Some(3.0));
        assert!(rec.value(&ty, "allThreads") == Some(4.0));
        assert!(rec.value(&ty, "Latency") == Some(100.0));
    }

    #[test]
    fn test_labels_subtyped() {
        let set = parse(&format!(
            "{HEADER}\n\
             1376560800100,100,Login,200,true,1000,2,4,80\n\
             1376560800200,50,Search,200,true,500,2,4,40\n"
        ))
        .unwrap();
        assert!(set.has_type(&TypeKey::sub("JMeter", "Login")));
        assert!(set.has_type(&TypeKey::sub("JMeter", "Search")));
        let rec = &set.records()[0];
        assert!(rec.has(&TypeKey::sub("JMeter", "Login")));
        assert!(rec.has(&TypeKey::sub("JMeter", "Search")));
    }

    #[test]
    fn test_out_of_order_rows_still_monotonic() {
        let set = parse(&format!(
            "{HEADER}\n\
             1376560802000,100,Login,200,true,1000,2,4,80\n\
             1376560800000,100,Login,200,true,1000,2,4,80\n\
             1376560801000,100,Login,200,true,1000,2,4,80\n"
        ))
        .unwrap();
        assert!(set.records().len() == 3);
        for w in set.records().windows(2) {
            assert!(w[0].timestamp() <= w[1].timestamp());
        }
    }

    #[test]
    fn test_missing_required_columns_fatal() {
        assert!(parse("elapsed,label\n100,Login\n").is_err());
        assert!(parse("timeStamp,elapsed\n1,2\n").is_err());
        assert!(parse("timeStamp,label\n1,Login\n").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_bad_rows_dropped() {
        let set = parse(&format!(
            "{HEADER}\n\
             notatime,100,Login,200,true,1000,2,4,80\n\
             1376560800100,bogus,Login,200,true,1000,2,4,80\n\
             1376560800100,100,Login,200,true,1000,2,4,80\n"
        ))
        .unwrap();
        assert!(set.records().len() == 1);
        let ty = set.resolve_type(&TypeKey::sub("JMeter", "Login")).unwrap();
        assert!(set.records()[0].value(&ty, "elapsed") == Some(100.0));
    }
}
