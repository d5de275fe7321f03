/// Parser for Windows Perfmon CSV captures (`relog -f csv` output).
///
/// Pure PDH: the grammar and the ingestion loop live in `pdh`; what is
/// Perfmon-specific is only the time semantics.  Row stamps are local to
/// the capture zone and the header's bias cell says which zone that was, so
/// they resolve against the header bias, falling back to the caller's
/// offset for the occasional relog output that drops the zone suffix.
use crate::pdh::{parse_pdh, ZoneMode};
use crate::{DataSet, ParseOptions};

use anyhow::Result;
use std::io::Read;

pub fn parse_perfmon(input: &mut dyn Read, opts: &ParseOptions) -> Result<DataSet> {
    parse_pdh(input, opts, ZoneMode::HeaderBias)
}
