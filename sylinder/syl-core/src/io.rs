//! ASCII data files, restart descriptors and the result folder layout.
//!
//! The rod file format is line-oriented: a count line, a metadata line,
//! then one rod per line
//!
//! ```text
//! C <gid> <radius> <mx> <my> <mz> <px> <py> <pz> <group>
//! ```
//!
//! with type `S` marking immovable rods, followed by the link lines
//! `P <i> <j>` (pin), `E <i> <j>` (extend), `B <i> <j>` (bend) and
//! `T <i> <j> <k>` (tri-bend).
//!
//! The restart descriptor is four lines: rng seed, step count, snapshot id
//! and the most recent snapshot file name.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use syl_constraint::ConstraintBlock;
use syl_types::{Gid, Link, LinkMaps, Sylinder, TriLink};

use crate::SystemError;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SystemError + '_ {
    move |source| SystemError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialise rods and links into the ASCII data format.
#[must_use]
pub fn format_dat(rods: &[Sylinder], links: &LinkMaps, time: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", rods.len());
    let _ = writeln!(out, "time {time:.8e}");
    for sy in rods {
        let m = sy.end_minus();
        let p = sy.end_plus();
        let tag = if sy.is_immovable { 'S' } else { 'C' };
        let _ = writeln!(
            out,
            "{tag} {} {:.8e} {:.8e} {:.8e} {:.8e} {:.8e} {:.8e} {:.8e} {}",
            sy.gid, sy.radius, m.x, m.y, m.z, p.x, p.y, p.z, sy.group
        );
    }
    for link in links.iter_pin() {
        let _ = writeln!(out, "P {} {}", link.prev, link.next);
    }
    for link in links.iter_extend() {
        let _ = writeln!(out, "E {} {}", link.prev, link.next);
    }
    for link in links.iter_bend() {
        let _ = writeln!(out, "B {} {}", link.prev, link.next);
    }
    for link in links.iter_tri_bend() {
        let _ = writeln!(out, "T {} {} {}", link.center, link.left, link.right);
    }
    out
}

/// Write the ASCII data file.
///
/// # Errors
///
/// I/O failures carry the offending path.
pub fn write_dat(
    path: &Path,
    rods: &[Sylinder],
    links: &LinkMaps,
    time: f64,
) -> Result<(), SystemError> {
    std::fs::write(path, format_dat(rods, links, time)).map_err(io_err(path))
}

/// Parse an ASCII data file into rods and link maps.
///
/// # Errors
///
/// Unreadable files and malformed lines are reported with path and line
/// number.
pub fn read_dat(path: &Path) -> Result<(Vec<Sylinder>, LinkMaps), SystemError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    let mut rods = Vec::new();
    let mut links = LinkMaps::new();

    // The first two lines are the count and metadata; both are advisory.
    for (index, line) in text.lines().enumerate().skip(2) {
        let line_no = index + 1;
        let parse = move || SystemError::Parse {
            path: path.to_path_buf(),
            line: line_no,
        };
        let mut fields = line.split_whitespace();
        let Some(tag) = fields.next() else {
            continue;
        };
        match tag {
            "C" | "S" => {
                let mut next_f64 = || -> Result<f64, SystemError> {
                    fields.next().and_then(|t| t.parse().ok()).ok_or_else(parse)
                };
                let gid = next_f64()? as i64;
                let radius = next_f64()?;
                let m = nalgebra::Point3::new(next_f64()?, next_f64()?, next_f64()?);
                let p = nalgebra::Point3::new(next_f64()?, next_f64()?, next_f64()?);
                let group = next_f64().map_or(-1, |g| g as i32);
                let mut sy = Sylinder::from_endpoints(Gid::new(gid), radius, m, p);
                sy.group = group;
                sy.is_immovable = tag == "S";
                rods.push(sy);
            }
            "P" | "E" | "B" => {
                let mut next_gid = || -> Result<Gid, SystemError> {
                    fields
                        .next()
                        .and_then(|t| t.parse().ok())
                        .map(Gid::new)
                        .ok_or_else(parse)
                };
                let link = Link {
                    prev: next_gid()?,
                    next: next_gid()?,
                };
                match tag {
                    "P" => links.insert_pin(link),
                    "E" => links.insert_extend(link),
                    _ => links.insert_bend(link),
                }
            }
            "T" => {
                let mut next_gid = || -> Result<Gid, SystemError> {
                    fields
                        .next()
                        .and_then(|t| t.parse().ok())
                        .map(Gid::new)
                        .ok_or_else(parse)
                };
                links.insert_tri_bend(TriLink {
                    center: next_gid()?,
                    left: next_gid()?,
                    right: next_gid()?,
                });
            }
            _ => {} // unknown tags are skipped, matching the reader's tolerance
        }
    }
    Ok((rods, links))
}

/// Restart descriptor contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartInfo {
    /// Rng seed of the interrupted run.
    pub rng_seed: u64,
    /// Step count at the last snapshot.
    pub step_count: usize,
    /// Snapshot id of the last snapshot.
    pub snap_id: usize,
    /// File name of the most recent snapshot.
    pub snapshot_file: String,
}

/// Write the four-line restart descriptor.
///
/// # Errors
///
/// I/O failures carry the offending path.
pub fn write_restart(path: &Path, info: &RestartInfo) -> Result<(), SystemError> {
    let text = format!(
        "{}\n{}\n{}\n{}\n",
        info.rng_seed, info.step_count, info.snap_id, info.snapshot_file
    );
    std::fs::write(path, text).map_err(io_err(path))
}

/// Read the restart descriptor.
///
/// # Errors
///
/// Unreadable or malformed descriptors are reported with path and line.
pub fn read_restart(path: &Path) -> Result<RestartInfo, SystemError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    let mut lines = text.lines();
    let mut field = |line: usize| -> Result<&str, SystemError> {
        lines.next().ok_or(SystemError::Parse {
            path: path.to_path_buf(),
            line,
        })
    };
    let parse_fail = |line: usize| SystemError::Parse {
        path: path.to_path_buf(),
        line,
    };
    Ok(RestartInfo {
        rng_seed: field(1)?.trim().parse().map_err(|_| parse_fail(1))?,
        step_count: field(2)?.trim().parse().map_err(|_| parse_fail(2))?,
        snap_id: field(3)?.trim().parse().map_err(|_| parse_fail(3))?,
        snapshot_file: field(4)?.trim().to_string(),
    })
}

/// Result folder for a snapshot id: `./result/result<lo>-<hi>/`, with the
/// per-folder file count bounded by the rank count.
#[must_use]
pub fn result_folder(base: &Path, snap_id: usize, n_ranks: usize) -> PathBuf {
    let per_folder = (400 / n_ranks.max(1)).max(1);
    let lo = (snap_id / per_folder) * per_folder;
    let hi = lo + per_folder - 1;
    base.join("result").join(format!("result{lo}-{hi}"))
}

/// Dump the step's constraint blocks for visualisation: one line per block
/// with kind, participants, gap, multiplier and the two lab-frame points.
///
/// # Errors
///
/// I/O failures carry the offending path.
pub fn write_constraint_blocks<'a>(
    path: &Path,
    blocks: impl Iterator<Item = &'a ConstraintBlock>,
) -> Result<(), SystemError> {
    let file = std::fs::File::create(path).map_err(io_err(path))?;
    let mut out = std::io::BufWriter::new(file);
    for block in blocks {
        let kind = if block.bilateral { 'B' } else { 'U' };
        writeln!(
            out,
            "{kind} {} {} {:.6e} {:.6e} {:.6e} {:.6e} {:.6e} {:.6e} {:.6e} {:.6e}",
            block.gid_i,
            block.gid_j,
            block.delta0,
            block.gamma,
            block.lab_i.x,
            block.lab_i.y,
            block.lab_i.z,
            block.lab_j.x,
            block.lab_j.y,
            block.lab_j.z,
        )
        .map_err(io_err(path))?;
    }
    Ok(())
}
