use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::limits::MAX_RECORD_LEN;
use crate::model::*;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Where the ledger's snapshot lives. `save` always receives the full set.
pub trait Store: Send {
    fn load(&mut self) -> io::Result<Vec<Reservation>>;
    fn save(&mut self, reservations: &[Reservation]) -> io::Result<()>;
}

/// Flat, text-only record as written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub section: String,
    pub date: String,
    pub start: String,
    pub end: String,
    pub owner: String,
    pub purpose: String,
    pub contact: String,
    pub status: String,
    /// Empty while the reservation is active.
    pub cancelled_on: String,
}

impl From<&Reservation> for SnapshotRecord {
    fn from(r: &Reservation) -> Self {
        let (status, cancelled_on) = match r.status {
            Status::Active => ("active", String::new()),
            Status::Cancelled { at } => ("cancelled", at.format(TIMESTAMP_FORMAT).to_string()),
        };
        Self {
            id: r.id.to_string(),
            section: r.section.as_str().to_string(),
            date: r.date.format(DATE_FORMAT).to_string(),
            start: format_hhmm(r.span.start),
            end: format_hhmm(r.span.end),
            owner: r.owner.clone(),
            purpose: r.purpose.clone().unwrap_or_default(),
            contact: r.contact.clone().unwrap_or_default(),
            status: status.to_string(),
            cancelled_on,
        }
    }
}

impl TryFrom<SnapshotRecord> for Reservation {
    type Error = String;

    fn try_from(rec: SnapshotRecord) -> Result<Self, Self::Error> {
        let id = Ulid::from_string(&rec.id).map_err(|e| format!("bad id {:?}: {e}", rec.id))?;
        let section = rec.section.parse::<Section>().map_err(|e| e.to_string())?;
        let date = NaiveDate::parse_from_str(&rec.date, DATE_FORMAT)
            .map_err(|e| format!("bad date {:?}: {e}", rec.date))?;
        let start = parse_hhmm(&rec.start).ok_or_else(|| format!("bad start {:?}", rec.start))?;
        let end = parse_hhmm(&rec.end).ok_or_else(|| format!("bad end {:?}", rec.end))?;
        if start >= end {
            return Err(format!("empty range {}-{}", rec.start, rec.end));
        }
        let status = match rec.status.as_str() {
            "active" => Status::Active,
            "cancelled" => {
                let at = NaiveDateTime::parse_from_str(&rec.cancelled_on, TIMESTAMP_FORMAT)
                    .map_err(|e| format!("bad cancelled_on {:?}: {e}", rec.cancelled_on))?;
                Status::Cancelled { at }
            }
            other => return Err(format!("bad status {other:?}")),
        };
        Ok(Reservation {
            id,
            section,
            date,
            span: Span::new(start, end),
            owner: rec.owner,
            purpose: non_empty(rec.purpose),
            contact: non_empty(rec.contact),
            status,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Convert decoded records, skipping (and logging) the ones that don't parse.
fn into_reservations(records: Vec<SnapshotRecord>) -> Vec<Reservation> {
    records
        .into_iter()
        .filter_map(|rec| {
            let id = rec.id.clone();
            match Reservation::try_from(rec) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("skipping unreadable snapshot record {id}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Encode a single record to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, record: &SnapshotRecord) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Full-overwrite snapshot file.
///
/// Format per record: `[u32: len][bincode: SnapshotRecord][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - `save` writes a sibling temp file, fsyncs, then renames it over the snapshot,
///   so a crash mid-save leaves the previous snapshot intact.
/// - A truncated or corrupt trailing record is discarded on load.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("snapshot.tmp")
    }

    /// Read all valid records. A missing file is an empty snapshot.
    pub fn read_records(path: &Path) -> io::Result<Vec<SnapshotRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                warn!("snapshot {}: record length {len} too large, stopping", path.display());
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("snapshot {}: truncated record, stopping", path.display());
                    break;
                }
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("snapshot {}: truncated record, stopping", path.display());
                    break;
                }
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                warn!("snapshot {}: checksum mismatch, stopping", path.display());
                break;
            }

            match bincode::deserialize::<SnapshotRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("snapshot {}: undecodable record ({e}), stopping", path.display());
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Write records to the temp file and fsync.
    fn write_tmp(&self, records: &[SnapshotRecord]) -> io::Result<()> {
        let file = File::create(self.tmp_path())?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

impl Store for SnapshotFile {
    fn load(&mut self) -> io::Result<Vec<Reservation>> {
        Ok(into_reservations(Self::read_records(&self.path)?))
    }

    fn save(&mut self, reservations: &[Reservation]) -> io::Result<()> {
        let records: Vec<SnapshotRecord> = reservations.iter().map(SnapshotRecord::from).collect();
        self.write_tmp(&records)?;
        fs::rename(self.tmp_path(), &self.path)
    }
}

/// In-process store. Goes through `SnapshotRecord` so it round-trips like the file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<SnapshotRecord>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<SnapshotRecord>) -> Self {
        Self { records, saves: 0 }
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl Store for MemoryStore {
    fn load(&mut self) -> io::Result<Vec<Reservation>> {
        Ok(into_reservations(self.records.clone()))
    }

    fn save(&mut self, reservations: &[Reservation]) -> io::Result<()> {
        self.records = reservations.iter().map(SnapshotRecord::from).collect();
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("splitroom_test_snapshot");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn reservation(section: Section, start: Minute, end: Minute, owner: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            section,
            date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            span: Span::new(start, end),
            owner: owner.into(),
            purpose: Some("meeting".into()),
            contact: None,
            status: Status::Active,
        }
    }

    fn cancelled(mut r: Reservation) -> Reservation {
        r.status = Status::Cancelled {
            at: NaiveDate::from_ymd_opt(2025, 3, 30)
                .unwrap()
                .and_hms_opt(17, 5, 9)
                .unwrap(),
        };
        r
    }

    #[test]
    fn record_uses_text_fields() {
        let r = cancelled(reservation(Section::Full, 600, 690, "Suzuki"));
        let rec = SnapshotRecord::from(&r);
        assert_eq!(rec.section, "full");
        assert_eq!(rec.date, "2025-04-01");
        assert_eq!(rec.start, "10:00");
        assert_eq!(rec.end, "11:30");
        assert_eq!(rec.purpose, "meeting");
        assert_eq!(rec.contact, "");
        assert_eq!(rec.status, "cancelled");
        assert_eq!(rec.cancelled_on, "2025-03-30T17:05:09");

        let active = SnapshotRecord::from(&reservation(Section::Rear, 540, 570, "Sato"));
        assert_eq!(active.status, "active");
        assert_eq!(active.cancelled_on, "");
    }

    #[test]
    fn record_rejects_bad_fields() {
        let good = SnapshotRecord::from(&reservation(Section::Front, 540, 600, "A"));

        let mut bad_date = good.clone();
        bad_date.date = "2025/04/01".into();
        assert!(Reservation::try_from(bad_date).is_err());

        let mut inverted = good.clone();
        inverted.start = "11:00".into();
        assert!(Reservation::try_from(inverted).is_err());

        let mut bad_status = good.clone();
        bad_status.status = "pending".into();
        assert!(Reservation::try_from(bad_status).is_err());

        let mut missing_cancel_time = good;
        missing_cancel_time.status = "cancelled".into();
        assert!(Reservation::try_from(missing_cancel_time).is_err());
    }

    #[test]
    fn save_and_load_file() {
        let path = tmp_path("save_and_load.snapshot");
        let rs = vec![
            reservation(Section::Front, 600, 660, "Tanaka"),
            reservation(Section::Rear, 630, 690, "Sato"),
            cancelled(reservation(Section::Full, 540, 570, "Suzuki")),
        ];

        let mut store = SnapshotFile::new(&path);
        store.save(&rs).unwrap();

        let loaded = SnapshotFile::new(&path).load().unwrap();
        assert_eq!(loaded, rs);
        assert!(!store.tmp_path().exists());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let path = tmp_path("overwrite.snapshot");
        let mut store = SnapshotFile::new(&path);
        let first = vec![
            reservation(Section::Front, 600, 660, "A"),
            reservation(Section::Rear, 600, 660, "B"),
        ];
        store.save(&first).unwrap();
        let second = vec![first[1].clone()];
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap(), second);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_nonexistent_file() {
        let path = tmp_path("nonexistent.snapshot");
        let loaded = SnapshotFile::new(&path).load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_discards_truncated_tail() {
        let path = tmp_path("truncation.snapshot");
        let r = reservation(Section::Front, 600, 660, "Tanaka");
        SnapshotFile::new(&path).save(std::slice::from_ref(&r)).unwrap();

        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap(); // length prefix + partial payload
        }

        let loaded = SnapshotFile::new(&path).load().unwrap();
        assert_eq!(loaded, vec![r]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.snapshot");
        let first = reservation(Section::Front, 600, 660, "A");
        SnapshotFile::new(&path).save(std::slice::from_ref(&first)).unwrap();

        {
            let payload =
                bincode::serialize(&SnapshotRecord::from(&reservation(Section::Rear, 600, 660, "B")))
                    .unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let loaded = SnapshotFile::new(&path).load().unwrap();
        assert_eq!(loaded, vec![first]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_oversized_length_prefix() {
        let path = tmp_path("oversized.snapshot");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        let loaded = SnapshotFile::new(&path).load().unwrap();
        assert!(loaded.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_skips_unparseable_record() {
        let good = reservation(Section::Front, 600, 660, "A");
        let mut bad = SnapshotRecord::from(&reservation(Section::Rear, 600, 660, "B"));
        bad.section = "balcony".into();

        let mut store = MemoryStore::with_records(vec![bad, SnapshotRecord::from(&good)]);
        assert_eq!(store.load().unwrap(), vec![good]);
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryStore::new();
        let rs = vec![reservation(Section::Full, 600, 660, "A")];
        store.save(&rs).unwrap();
        store.save(&rs).unwrap();
        assert_eq!(store.saves(), 2);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.load().unwrap(), rs);
    }
}
