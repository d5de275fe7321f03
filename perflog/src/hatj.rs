/// Parser for HATJ load-test CSV result files.
///
/// A HATJ file is one header line followed by per-transaction samples:
///
///   timestamp,transaction,<metric>,<metric>,...
///   1376560800123,Login,250,1,0
///
/// The first column is an epoch-milliseconds stamp, the second names the
/// transaction; the header's remaining columns name the metric fields.
/// Rows are sub-typed by transaction and bucketed to whole seconds; when
/// several samples for one transaction land in the same bucket their
/// fields are averaged (NaN-aware).  Buckets become records in time order,
/// so an unordered file still produces a monotonic record sequence.
use crate::{DataRecord, DataSet, DataType, ParseOptions, TypeKey};

use anyhow::{bail, Result};
use chrono::Duration;
use itertools::Itertools;
use perfutils::{epoch, parse_metric, tokenize, Delimiter};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read};
use tracing::warn;
use ustr::Ustr;

pub fn parse_hatj(input: &mut dyn Read, _opts: &ParseOptions) -> Result<DataSet> {
    let reader = BufReader::new(input);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(l) => l?,
        None => bail!("Not a HATJ CSV: empty input"),
    };
    let cells = tokenize(header.trim_end(), &Delimiter::Comma);
    if cells.len() < 3 {
        bail!("Not a HATJ CSV: header has fewer than three columns");
    }
    let fields: Vec<Ustr> = cells[2..].iter().map(|c| Ustr::from(c.as_ref())).collect();

    // bucket second -> transaction -> (per-field sums, sample count per field).
    let mut buckets: BTreeMap<i64, HashMap<Ustr, Vec<(f64, u32)>>> = BTreeMap::new();
    let mut discarded = 0usize;
    let mut first = true;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cells = tokenize(line.trim_end(), &Delimiter::Comma);
        let stamp = cells
            .first()
            .and_then(|c| c.trim().parse::<i64>().ok())
            .filter(|ms| *ms > 0);
        if first {
            // No magic token anywhere; the first data row is the only place
            // to decide this is HATJ output at all.
            if stamp.is_none() {
                bail!("Not a HATJ CSV: first data row has no epoch timestamp");
            }
            first = false;
        }
        let stamp = match stamp {
            Some(ms) => ms,
            None => {
                warn!("HATJ row with unparsable timestamp dropped: {line}");
                discarded += 1;
                continue;
            }
        };
        let transaction = match cells.get(1) {
            Some(t) if !t.trim().is_empty() => Ustr::from(t.trim()),
            _ => {
                warn!("HATJ row with no transaction name dropped: {line}");
                discarded += 1;
                continue;
            }
        };
        let mut values = Vec::with_capacity(fields.len());
        let mut bad = false;
        for i in 0..fields.len() {
            let cell = cells.get(i + 2).map(|c| c.as_ref()).unwrap_or("");
            match parse_metric(cell) {
                Some(v) => values.push(v),
                None => {
                    warn!("Unparsable HATJ cell {cell:?}, row dropped: {line}");
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
            .entry(transaction)
            .or_insert_with(|| vec![(0.0, 0); fields.len()]);
        for ((sum, count), v) in acc.iter_mut().zip(values) {
            if !v.is_nan() {
                *sum += v;
                *count += 1;
            }
        }
    }
    if buckets.is_empty() {
        bail!("HATJ CSV has a header but no samples");
    }
    if discarded > 0 {
        warn!("Dropped {discarded} unusable HATJ rows");
    }

    let mut set = DataSet::new();
    for (bucket, transactions) in buckets {
        let t = epoch() + Duration::seconds(bucket);
        let mut record = DataRecord::new(t, &format!("{bucket}"));
        for transaction in transactions.keys().sorted() {
            let key = TypeKey::Sub(Ustr::from("HATJ"), *transaction);
            let ty = set
                .declare_type(DataType::new(key, transaction.as_str(), fields.clone()))?
                .clone();
            let values = transactions[transaction]
                .iter()
                .map(|(sum, count)| {
                    if *count == 0 {
                        f64::NAN
                    } else {
                        sum / *count as f64
                    }
                })
                .collect();
            record.set(&ty, values);
        }
        set.add_record(record);
    }
    Ok(set)
}
