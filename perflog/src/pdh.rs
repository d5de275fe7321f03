/// Shared machinery for PDH-style CSVs (Windows Perfmon relogs and VMware
/// ESXTop batch captures both use the Performance Data Helper layout).
///
/// The first line is the header and is mandatory.  Cell 0 identifies the
/// format and the capture zone:
///
///   "(PDH-CSV 4.0) (Pacific Standard Time)(480)"
///
/// where 480 is the zone bias in minutes (UTC = local + bias).  Every other
/// cell is a counter path:
///
///   \\HOST\Category(instance)\Counter
///
/// The instance part is optional.  Columns are grouped by (category,
/// instance) into one type per group, sub-typed when an instance is
/// present, with the counter names as fields in column order.  The host
/// name comes from the first counter path.
///
/// Data rows start with a local timestamp, `MM/dd/yyyy HH:mm:ss.mmm`.  How
/// that resolves to UTC differs per tool: Perfmon stamps are local to the
/// header bias, ESXTop stamps are already UTC no matter what the header
/// claims.  A blank or single-space cell is "no data" (NaN); a garbage cell
/// costs that group's contribution for that row only.
use crate::{
    DataSet, DataType, ParseOptions, PostprocessorRegistry, RecordAssembler, TypeKey,
};

use anyhow::{bail, Result};
use chrono::{FixedOffset, NaiveDateTime};
use perfutils::{localize, parse_metric, tokenize, Delimiter, Timestamp};
use regex::Regex;
use std::borrow::Cow;
use std::io::{BufRead, BufReader, Read};
use tracing::warn;
use ustr::Ustr;

/// How data-row timestamps resolve to UTC.

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ZoneMode {
    /// Local to the header's zone bias, the caller's offset if the header
    /// carries none.
    HeaderBias,
    /// Already UTC regardless of the header (ESXTop).
    Utc,
}

/// One parsed counter path.

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct CounterPath {
    pub host: Ustr,
    pub category: Ustr,
    pub instance: Option<Ustr>,
    pub counter: Ustr,
}

impl CounterPath {
    pub fn type_key(&self) -> TypeKey {
        match self.instance {
            Some(instance) => TypeKey::Sub(self.category, instance),
            None => TypeKey::Plain(self.category),
        }
    }
}

/// Parse `\\HOST\Category(instance)\Counter`.  None for cells that are not
/// counter paths.

pub(crate) fn parse_counter_path(cell: &str) -> Option<CounterPath> {
    let rest = cell.strip_prefix(r"\\")?;
    let (host, path) = rest.split_once('\\')?;
    let (object, counter) = path.rsplit_once('\\')?;
    if host.is_empty() || object.is_empty() || counter.is_empty() {
        return None;
    }
    let (category, instance) = match object.strip_suffix(')').and_then(|o| o.split_once('(')) {
        Some((cat, inst)) => (cat, Some(Ustr::from(inst))),
        None => (object, None),
    };
    Some(CounterPath {
        host: Ustr::from(host),
        category: Ustr::from(category),
        instance,
        counter: Ustr::from(counter),
    })
}

const ROW_STAMP_FORMATS: &[&str] = &["%m/%d/%Y %H:%M:%S%.f", "%m/%d/%Y %H:%M:%S"];

pub(crate) struct PdhHeader {
    pub zone_name: Option<String>,
    pub bias: Option<FixedOffset>,
    // Per data column (cells 1..): the group and field it feeds, or None
    // for columns whose header cell did not parse (warned, values ignored).
    pub columns: Vec<Option<(TypeKey, Ustr)>>,
}

pub(crate) fn parse_pdh_header(set: &mut DataSet, cells: &[Cow<str>]) -> Result<PdhHeader> {
    let magic = Regex::new(r"^\(PDH-CSV 4\.0\)(?: \((.+)\)\((-?\d+)\))?$")?;
    let caps = match cells.first().and_then(|c| magic.captures(c.as_ref())) {
        Some(c) => c,
        None => bail!("Not a PDH CSV: missing (PDH-CSV 4.0) header cell"),
    };
    let zone_name = caps.get(1).map(|m| m.as_str().to_string());
    // The bias is minutes *west* of UTC, Windows style.
    let bias = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .and_then(|minutes| FixedOffset::west_opt(minutes * 60));
    if let Some(zone) = &zone_name {
        set.set_metadata("timezone", zone);
    }

    let mut columns = Vec::with_capacity(cells.len().saturating_sub(1));
    // (key, name, fields) per group, in first-seen column order.
    let mut groups: Vec<(TypeKey, Ustr, Vec<Ustr>)> = vec![];
    for cell in &cells[1..] {
        let path = match parse_counter_path(cell.as_ref()) {
            Some(p) => p,
            None => {
                warn!("Unparsable counter path {cell:?}, column ignored");
                columns.push(None);
                continue;
            }
        };
        if set.hostname().is_empty() {
            set.set_hostname(path.host.as_str());
        }
        let key = path.type_key();
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, fields)) => fields.push(path.counter),
            None => groups.push((key, path.category, vec![path.counter])),
        }
        columns.push(Some((key, path.counter)));
    }
    if columns.iter().all(|c| c.is_none()) {
        bail!("PDH header declares no usable counters");
    }
    for (key, name, fields) in groups {
        set.declare_type(DataType::new(key, name.as_str(), fields))?;
    }
    Ok(PdhHeader {
        zone_name,
        bias,
        columns,
    })
}

/// The shared ingestion loop over a PDH CSV body.

pub(crate) fn parse_pdh(
    input: &mut dyn Read,
    opts: &ParseOptions,
    zone: ZoneMode,
) -> Result<DataSet> {
    let mut set = DataSet::new();
    let mut asm = RecordAssembler::new();
    let post = PostprocessorRegistry::new();
    let reader = BufReader::new(input);
    let mut lines = reader.lines();

    let header_line = match lines.next() {
        Some(l) => l?,
        None => bail!("Not a PDH CSV: empty input"),
    };
    let header = parse_pdh_header(&mut set, &tokenize(&header_line, &Delimiter::Comma))?;
    let offset = match zone {
        ZoneMode::Utc => FixedOffset::east_opt(0).unwrap_or(opts.timezone),
        ZoneMode::HeaderBias => header.bias.unwrap_or(opts.timezone),
    };

    // Column plan: for each group, the data-column indices feeding it, in
    // field order.  Relog writes counter-major headers, so one group's
    // columns are routinely interleaved with other groups'.
    let mut plan: Vec<(TypeKey, Vec<usize>)> = vec![];
    for (i, column) in header.columns.iter().enumerate() {
        if let Some((key, _)) = column {
            match plan.iter_mut().find(|(k, _)| k == key) {
                Some((_, cols)) => cols.push(i),
                None => plan.push((*key, vec![i])),
            }
        }
    }

    let mut discarded = 0usize;
    for line in lines {
        let line = line?;
        let cells = tokenize(line.trim_end(), &Delimiter::Comma);
        if cells.is_empty() {
            continue;
        }
        let stamp = cells[0].as_ref();
        let t = match parse_row_stamp(stamp, offset) {
            Some(t) => t,
            None => {
                warn!("Unparsable PDH timestamp {stamp:?}, row dropped");
                discarded += 1;
                continue;
            }
        };
        asm.open(&mut set, &post, t, stamp);

        // Gather each group's full vector; a garbage cell voids only its
        // group's contribution for this row.
        'group: for (key, cols) in &plan {
            let mut values = Vec::with_capacity(cols.len());
            for &i in cols {
                let cell = cells.get(i + 1).map(|c| c.as_ref()).unwrap_or("");
                match parse_metric(cell) {
                    Some(v) => values.push(v),
                    None => {
                        warn!("Unparsable PDH cell {cell:?} at {stamp}, {key} dropped this row");
                        discarded += 1;
                        continue 'group;
                    }
                }
            }
            // Header-declared types always resolve; a miss would be a
            // column-plan bug, not an input problem.
            if let Ok(ty) = set.resolve_type(key) {
                let ty = ty.clone();
                asm.append(&ty, stamp, values);
            }
        }
    }
    asm.close(&mut set, &post);
    if set.records().is_empty() {
        bail!("PDH CSV has a header but no data rows");
    }
    if discarded > 0 {
        warn!("Dropped {discarded} unusable PDH cells or rows");
    }
    Ok(set)
}

fn parse_row_stamp(s: &str, offset: FixedOffset) -> Option<Timestamp> {
    ROW_STAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|local| localize(local, offset))
}
