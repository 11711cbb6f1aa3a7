use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: the length prefix and the CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode one commit record to [len][bincode][crc32] format. Returns the
/// frame size.
fn encode_record(writer: &mut impl Write, record: &[Event]) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(FRAME_OVERHEAD + payload.len() as u64)
}

/// Append-only Write-Ahead Log of commit records.
///
/// Format per entry: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - One entry is one record, so a record is replayed whole or not at all.
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
///
/// The file never holds anything past the last synced batch for long: a
/// batch that fails to write or sync is cut off again by `rollback`, so
/// later batches are never appended behind a torn frame.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    unsynced_len: u64,
    appends_since_compact: u64,
    unsynced_appends: u64,
    /// Set when a rollback itself failed; the file tail is unknown.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, appending after whatever is
    /// already there.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            unsynced_len: 0,
            appends_since_compact: 0,
            unsynced_appends: 0,
            poisoned: false,
        })
    }

    /// Replay `path`, cut any torn tail off the file, and open it for
    /// appending right after the last intact record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Vec<Event>>)> {
        let (records, intact_len) = scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact_len
        {
            tracing::warn!(
                "discarding {} bytes of torn tail from {}",
                meta.len() - intact_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, records))
    }

    /// Append a single record and fsync. Used by tests only;
    /// production code uses `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, record: &[Event]) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Append a record to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered records.
    pub fn append_buffered(&mut self, record: &[Event]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        self.unsynced_len += encode_record(&mut self.writer, record)?;
        self.unsynced_appends += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.appends_since_compact += self.unsynced_appends;
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        Ok(())
    }

    /// Throw away everything appended since the last successful
    /// `flush_sync`, in the buffer and on disk. If this fails the WAL
    /// refuses all further appends.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_synced();
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        if let Err(ref e) = result {
            tracing::error!("WAL rollback failed, refusing further appends: {e}");
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_synced(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // Dropping the old writer may still push its buffer out; the
        // truncate below removes whatever it wrote.
        self.writer = BufWriter::new(file);
        self.writer.get_ref().set_len(self.synced_len)?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot record to a temp file and fsync.
    pub fn write_compact_file(path: &Path, snapshot: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_record(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.unsynced_len = 0;
        self.appends_since_compact = 0;
        self.unsynced_appends = 0;
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, snapshot: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, snapshot)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact record on disk, oldest first. A short or corrupt last
    /// frame is where a crash cut the log and is skipped. A corrupt frame
    /// with more data behind it fails with `InvalidData`.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<Event>>> {
        scan(path).map(|(records, _)| records)
    }
}

/// Intact records and the byte length they occupy from the start of the file.
fn scan(path: &Path) -> io::Result<(Vec<Vec<Event>>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;
    loop {
        let (payload, frame_len) = match read_frame(&mut reader)? {
            Frame::End => break,
            Frame::Intact(payload) => {
                let frame_len = FRAME_OVERHEAD + payload.len() as u64;
                (Some(payload), frame_len)
            }
            Frame::Corrupt { len } => (None, FRAME_OVERHEAD + len as u64),
        };
        let record = payload.and_then(|p| bincode::deserialize::<Vec<Event>>(&p).ok());
        let Some(record) = record else {
            if offset + frame_len < file_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "corrupt WAL record at byte {offset} of {} with {} bytes after it",
                        path.display(),
                        file_len - offset - frame_len
                    ),
                ));
            }
            break;
        };
        records.push(record);
        offset += frame_len;
    }
    Ok((records, offset))
}

enum Frame {
    /// Clean end of file or a frame cut short by it.
    End,
    Intact(Vec<u8>),
    /// Complete frame whose checksum does not match.
    Corrupt { len: u32 },
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let Some(len) = read_u32(reader)? else {
        return Ok(Frame::End);
    };
    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::End),
        Err(e) => return Err(e),
    }
    match read_u32(reader)? {
        Some(crc) if crc == crc32fast::hash(&payload) => Ok(Frame::Intact(payload)),
        Some(_) => Ok(Frame::Corrupt { len }),
        None => Ok(Frame::End),
    }
}

fn read_u32(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
