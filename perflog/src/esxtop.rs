/// Parser for VMware ESXTop batch captures (`esxtop -b` output).
///
/// The file is a PDH CSV like Perfmon's, with two ESXTop quirks:
///
/// - row stamps are UTC no matter what zone the header cell claims
/// - the per-VM counter groups are named `Group Cpu(123456:vmname)` (and
///   `Group Memory(...)` etc.) where the instance is a world id plus the
///   VM or world name; those carry a process identity worth surfacing
///
/// The whole group list is in the header, so a VM's life span is simply the
/// record range of the capture; there is no per-sample observation and no
/// pid-reuse question here.
use crate::pdh::{parse_pdh, ZoneMode};
use crate::{DataSet, ParseOptions, Process};

use anyhow::Result;
use regex::Regex;
use std::io::Read;
use tracing::debug;

pub fn parse_esxtop(input: &mut dyn Read, opts: &ParseOptions) -> Result<DataSet> {
    let mut set = parse_pdh(input, opts, ZoneMode::Utc)?;
    attach_vm_processes(&mut set)?;
    Ok(set)
}

// Instances shaped like "123456:vmname" under the Group categories identify
// VMs/worlds; register each as a tracked process spanning the capture.

fn attach_vm_processes(set: &mut DataSet) -> Result<()> {
    let world = Regex::new(r"^(\d+):(.+)$")?;
    let (start, end) = match (set.records().first(), set.records().last()) {
        (Some(first), Some(last)) => (first.timestamp(), last.timestamp()),
        _ => return Ok(()),
    };
    let mut found = vec![];
    for ty in set.types() {
        if !ty.id().as_str().starts_with("Group ") {
            continue;
        }
        let sub = match ty.sub_id() {
            Some(s) => s,
            None => continue,
        };
        let caps = match world.captures(sub.as_str()) {
            Some(c) => c,
            None => continue,
        };
        let pid = match caps[1].parse::<u32>() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let name = caps[2].to_string();
        // The same world shows up under several Group categories; keep one
        // process per world id, keyed to its Group Cpu type when there is
        // one (the registry iterates in no particular order).
        let candidate = Process::new(pid, start, end, &name, None, ty.key());
        match found.iter_mut().find(|p: &&mut Process| p.pid() == pid) {
            Some(existing) => {
                if ty.id().as_str() == "Group Cpu" {
                    *existing = candidate;
                }
            }
            None => found.push(candidate),
        }
    }
    debug!("Registered {} ESXTop worlds as processes", found.len());
    found.sort_by_key(|p| p.pid());
    for p in found {
        set.add_process(p);
    }
    Ok(())
}
