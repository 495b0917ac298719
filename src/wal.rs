use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes, or report a clean/truncated end as `Ok(false)`.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only reservation log.
///
/// Entry format: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` covers the payload only. A torn or corrupt tail (crash mid-write)
/// ends replay at the last good entry and is cut off when the log is reopened.
///
/// Appends collect in memory and reach the file only through [`Wal::commit`].
/// A failed commit leaves the file exactly as long as it was after the last
/// successful one, so an event reported as failed can never resurface on replay.
pub struct Wal {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    /// File length covered by successful commits.
    committed_len: u64,
    /// A rollback could not truncate; the next commit must do it first.
    dirty_tail: bool,
    appends_since_compact: u64,
    #[cfg(test)]
    faults: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl Wal {
    /// Open the log for appending and return the events it already holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(path = %path.display(), on_disk, valid_len, "truncating torn WAL tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            committed_len: valid_len,
            dirty_tail: false,
            appends_since_compact: 0,
            #[cfg(test)]
            faults: Default::default(),
        };
        Ok((wal, events))
    }

    /// Append one event and commit it.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.commit()
    }

    /// Queue an event for the next [`Wal::commit`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let mark = self.pending.len();
        if let Err(e) = encode_event(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_events += 1;
        Ok(())
    }

    /// Write and fsync every queued event, or none of them.
    pub fn commit(&mut self) -> io::Result<()> {
        let result = self.write_pending();
        match &result {
            Ok(()) => {
                self.committed_len += self.pending.len() as u64;
                self.appends_since_compact += self.pending_events;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, events = self.pending_events, "WAL commit failed, rolling back");
                self.rollback();
            }
        }
        self.discard_pending();
        result
    }

    /// Drop queued events without writing them.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_events = 0;
    }

    fn write_pending(&mut self) -> io::Result<()> {
        if self.dirty_tail {
            self.file.set_len(self.committed_len)?;
            self.dirty_tail = false;
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        #[cfg(test)]
        self.take_fault()?;
        self.file.write_all(&self.pending)?;
        self.file.sync_all()
    }

    /// Cut the file back to the last committed length. Partial frames from a
    /// failed write would otherwise be completed by the next successful one.
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.committed_len) {
            tracing::error!(path = %self.path.display(), error = %e, "WAL rollback failed, retrying on next commit");
            self.dirty_tail = true;
        }
    }

    /// Count of upcoming commits that write half their bytes and then fail.
    #[cfg(test)]
    pub(crate) fn fault_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        self.faults.clone()
    }

    #[cfg(test)]
    fn take_fault(&mut self) -> io::Result<()> {
        use std::sync::atomic::Ordering;
        let armed = self
            .faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !armed {
            return Ok(());
        }
        let half = self.pending.len() / 2;
        self.file.write_all(&self.pending[..half])?;
        Err(io::Error::new(io::ErrorKind::StorageFull, "simulated disk full"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted snapshot next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen for appending.
    /// Queued events are dropped; callers commit before compacting.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.file = file;
        self.dirty_tail = false;
        self.discard_pending();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Events committed since the log was opened or last compacted.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All intact events in log order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Intact events plus the byte length they occupy.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), replayed = events.len(), "WAL checksum mismatch, discarding tail");
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "undecodable WAL entry, discarding tail");
                    break;
                }
            }
            valid_len += 8 + payload.len() as u64;
        }

        Ok((events, valid_len))
    }
}
