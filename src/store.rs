//! Append-only result files.
//!
//! Every row is written with its own open/append/sync cycle, so once
//! [append] returns the row survives a crash. Between sessions a file can be
//! compacted into a gzip sidecar (`<name>.gz`) and later restored with
//! [prepare]. When both forms exist the plain file wins.

use crate::error::Result;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::Serialize;
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Path of the compacted sidecar for `path`.
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Append one row, writing the header first if the file is new (or empty).
pub fn append<R: Serialize>(path: &Path, row: &R) -> Result<()> {
    let fresh = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(fresh)
        .from_writer(file);
    wtr.serialize(row)?;
    wtr.flush()?;
    let file = wtr.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    Ok(())
}

/// Compress `path` into its sidecar and remove the plain file.
///
/// No-op if the plain file is absent.
pub fn compact(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Ok(());
    }
    let gz = archive_path(path);
    info!(file = %path.display(), "compacting");

    let mut input = BufReader::new(File::open(path)?);
    let mut enc = GzEncoder::new(BufWriter::new(File::create(&gz)?), Compression::default());
    io::copy(&mut input, &mut enc)?;
    let out = enc.finish()?.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()?;

    fs::remove_file(path)?;
    Ok(())
}

/// Make `path` appendable again after a previous [compact].
///
/// An existing plain file is left untouched; otherwise the sidecar, if any,
/// is decompressed back into place. Nothing is created when neither exists.
pub fn prepare(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    let gz = archive_path(path);
    if !gz.is_file() {
        return Ok(());
    }
    debug!(file = %gz.display(), "restoring from archive");

    let mut dec = GzDecoder::new(BufReader::new(File::open(&gz)?));
    let mut out = BufWriter::new(File::create(path)?);
    io::copy(&mut dec, &mut out)?;
    let out = out.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()?;
    Ok(())
}

/// Next session number for a ping results file: one past the highest
/// `session` value found, or 1 when the file is missing, empty or unreadable.
pub fn next_session(path: &Path) -> u64 {
    match max_session(path) {
        Ok(max) => max.map_or(1, |m| m + 1),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "cannot scan sessions, starting at 1");
            1
        }
    }
}

fn max_session(path: &Path) -> Result<Option<u64>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let Some(idx) = rdr.headers()?.iter().position(|h| h == "session") else {
        return Ok(None);
    };

    let mut max = None;
    for record in rdr.records() {
        let record = record?;
        if let Some(session) = record.get(idx).and_then(|v| v.trim().parse::<u64>().ok()) {
            max = max.max(Some(session));
        }
    }
    Ok(max)
}

/// Location of every result file of one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultFiles {
    pub ping: PathBuf,
    pub tcp: PathBuf,
    pub tcp_reverse: PathBuf,
    pub udp: PathBuf,
}

impl ResultFiles {
    pub fn under(dir: &Path) -> Self {
        Self {
            ping: dir.join("ping_results.csv"),
            tcp: dir.join("iperf_results.csv"),
            tcp_reverse: dir.join("iperf_reverse_results.csv"),
            udp: dir.join("iperf_udp_results.csv"),
        }
    }

    /// TCP file for the given direction.
    pub fn tcp_for(&self, reverse: bool) -> &Path {
        if reverse { &self.tcp_reverse } else { &self.tcp }
    }

    /// Files written by the orchestrator itself.
    pub fn throughput(&self) -> [&Path; 3] {
        [&self.tcp, &self.tcp_reverse, &self.udp]
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.ping, &self.tcp, &self.tcp_reverse, &self.udp]
    }

    pub fn prepare_throughput(&self) -> Result<()> {
        self.throughput().into_iter().try_for_each(prepare)
    }

    /// Compact every file, logging instead of failing on individual errors.
    pub fn compact_all(&self) {
        for path in self.all() {
            if let Err(e) = compact(path) {
                warn!(file = %path.display(), error = %e, "compaction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PingRecord, TestLabel};
    use chrono::NaiveDateTime;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn row(session: u64, rtt: f64) -> PingRecord {
        PingRecord {
            timestamp: NaiveDateTime::parse_from_str("2025-10-01 08:30:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            session,
            test_label: TestLabel::VpnOn,
            ping_latency_ms: rtt,
            ping_jitter_ms: 0.0,
            ping_loss_percent: 0.0,
        }
    }

    const HEADER: &str =
        "timestamp,session,test_label,ping_latency_ms,ping_jitter_ms,ping_loss_%";

    #[test]
    fn append_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        append(&path, &row(1, 12.346)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            format!("{HEADER}\n2025-10-01T08:30:00,1,VPN_ON,12.35,0.00,0.00\n")
        );
    }

    #[test]
    fn append_never_duplicates_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        for i in 0..3 {
            append(&path, &row(1, 10.0 + i as f64)).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("timestamp,").count(), 1);
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn append_to_empty_file_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        File::create(&path).unwrap();
        append(&path, &row(1, 10.0)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with(HEADER));
    }

    #[test]
    fn compact_then_prepare_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        append(&path, &row(1, 10.0)).unwrap();
        append(&path, &row(2, 11.0)).unwrap();
        let before = fs::read(&path).unwrap();

        compact(&path).unwrap();
        assert!(!path.exists());
        let mut archived = Vec::new();
        GzDecoder::new(File::open(archive_path(&path)).unwrap())
            .read_to_end(&mut archived)
            .unwrap();
        assert_eq!(archived, before);

        prepare(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);

        // appending after restore keeps a single header
        append(&path, &row(3, 12.0)).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("timestamp,").count(), 1);
    }

    #[test]
    fn compact_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        compact(&path).unwrap();
        assert!(!archive_path(&path).exists());
    }

    #[test]
    fn prepare_keeps_existing_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        append(&path, &row(1, 10.0)).unwrap();
        compact(&path).unwrap();
        append(&path, &row(9, 99.0)).unwrap();
        let plain = fs::read(&path).unwrap();

        prepare(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), plain);
    }

    #[test]
    fn prepare_without_anything_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        prepare(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn next_session_scans_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        assert_eq!(next_session(&path), 1);

        for s in [1, 2, 3] {
            append(&path, &row(s, 10.0)).unwrap();
        }
        assert_eq!(next_session(&path), 4);
    }

    #[test]
    fn next_session_of_empty_file_is_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.csv");
        File::create(&path).unwrap();
        assert_eq!(next_session(&path), 1);
    }

    #[test]
    fn result_files_layout() {
        let files = ResultFiles::under(Path::new("data/alice"));
        assert_eq!(files.ping, Path::new("data/alice/ping_results.csv"));
        assert_eq!(files.tcp_for(true), Path::new("data/alice/iperf_reverse_results.csv"));
        assert_eq!(archive_path(&files.tcp), Path::new("data/alice/iperf_results.csv.gz"));
    }
}
