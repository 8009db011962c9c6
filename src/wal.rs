use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::store::Record;

/// Frame overhead: u32 length prefix + u32 crc32 suffix.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single record to `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn EOF.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a WAL file back.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<Record>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// Bytes after the valid prefix (torn write or corruption).
    pub discarded_len: u64,
}

/// Append-only write-ahead log of committed store transactions.
///
/// Format per entry: `[u32: len][bincode: Record][u32: crc32]`.
/// A torn or corrupt tail is cut off when the log is opened, so later
/// appends never land behind unreadable bytes.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, truncating it to `valid_len`.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one record and fsync.
    #[cfg(test)]
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record; durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, record: &Record) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot to a temp file and fsync it.
    pub fn write_compact_file(path: &Path, snapshot: &Record) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_record(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every valid record. Stops at the first torn or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            if replay.valid_len + len + FRAME_OVERHEAD > file_len {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            let Ok(record) = bincode::deserialize::<Record>(&payload) else {
                break;
            };
            replay.records.push(record);
            replay.valid_len += len + FRAME_OVERHEAD;
        }

        replay.discarded_len = file_len - replay.valid_len;
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AppliedOp, Item, Key, Versioned};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("studiokeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn guard_commit(date: &str, version: u64) -> Record {
        Record::Commit(vec![AppliedOp::Put {
            key: Key::new(format!("SLOT#studio#{date}"), "GUARD"),
            value: Versioned {
                item: Item::Guard,
                version,
            },
        }])
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let records = vec![guard_commit("2026-03-10", 1), guard_commit("2026-03-10", 2)];
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.records, records);
        assert_eq!(replay.discarded_len, 0);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn torn_tail_is_discarded_and_cut_on_open() {
        let path = tmp_path("torn_tail.wal");
        let first = guard_commit("2026-03-10", 1);
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.records, vec![first.clone()]);
        assert_eq!(replay.discarded_len, 6);

        // Appending after reopen must stay readable.
        let second = guard_commit("2026-03-11", 1);
        {
            let mut wal = Wal::open(&path, replay.valid_len).unwrap();
            wal.append(&second).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.records, vec![first, second]);
        assert_eq!(replay.discarded_len, 0);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let record = guard_commit("2026-03-10", 1);
        {
            let payload = bincode::serialize(&record).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.records.is_empty());
        assert!(replay.discarded_len > 0);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let snapshot = Record::Snapshot(vec![(
            Key::new("SLOT#studio#2026-03-10", "GUARD"),
            Versioned {
                item: Item::Guard,
                version: 9,
            },
        )]);
        let after = guard_commit("2026-03-10", 10);

        {
            let mut wal = Wal::open(&path, 0).unwrap();
            for v in 1..=9 {
                wal.append(&guard_commit("2026-03-10", v)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            Wal::write_compact_file(wal.path(), &snapshot).unwrap();
            wal.swap_compact_file().unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            wal.append(&after).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.records, vec![snapshot, after]);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered_flush.wal");
        let records: Vec<Record> = (1..=5).map(|v| guard_commit("2026-03-10", v)).collect();
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            for r in &records {
                wal.append_buffered(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().records, records);
    }
}
