use crate::error::RecordingError;
use crate::frame::FrameData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Magic number of the clip journal format: "VGCL"
const JOURNAL_MAGIC: [u8; 4] = *b"VGCL";
const JOURNAL_VERSION: u32 = 1;
pub const JOURNAL_HEADER_SIZE: usize = 64;
pub const JOURNAL_EXTENSION: &str = "clip";

const FRAME_COUNT_OFFSET: u64 = 8;
const PRE_EVENT_OFFSET: u64 = 24;
const CAMERA_ID_OFFSET: usize = 32;
const CAMERA_ID_LEN: usize = JOURNAL_HEADER_SIZE - CAMERA_ID_OFFSET;

/// Per-record prefix: timestamp (u64 ns), frame id (u64), payload length (u32)
const RECORD_PREFIX_SIZE: usize = 20;

/// Pending bytes that trigger a write to the OS
const FLUSH_THRESHOLD: usize = 2 * 1024 * 1024;
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Largest frame payload accepted back from disk
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Fixed-size header at the start of every journal.
///
/// Layout (little endian): magic[0..4], version[4..8], frame count[8..12],
/// fps[12..16], width[16..20], height[20..24], pre-event frames[24..28],
/// reserved[28..32], camera id (NUL padded)[32..64].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalHeader {
    pub version: u32,
    /// Zero until the journal is finalized
    pub frame_count: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pre_event_frames: u32,
    pub camera_id: String,
}

impl JournalHeader {
    pub fn new(camera_id: &str, fps: u32, width: u32, height: u32) -> Self {
        Self {
            version: JOURNAL_VERSION,
            frame_count: 0,
            fps,
            width,
            height,
            pre_event_frames: 0,
            camera_id: camera_id.to_string(),
        }
    }

    fn encode(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut header = [0u8; JOURNAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&JOURNAL_MAGIC);
        header[4..8].copy_from_slice(&self.version.to_le_bytes());
        header[8..12].copy_from_slice(&self.frame_count.to_le_bytes());
        header[12..16].copy_from_slice(&self.fps.to_le_bytes());
        header[16..20].copy_from_slice(&self.width.to_le_bytes());
        header[20..24].copy_from_slice(&self.height.to_le_bytes());
        header[24..28].copy_from_slice(&self.pre_event_frames.to_le_bytes());

        let id = truncate_utf8(&self.camera_id, CAMERA_ID_LEN);
        header[CAMERA_ID_OFFSET..CAMERA_ID_OFFSET + id.len()].copy_from_slice(id.as_bytes());
        header
    }

    fn decode(bytes: &[u8; JOURNAL_HEADER_SIZE]) -> Result<Self, RecordingError> {
        if bytes[0..4] != JOURNAL_MAGIC {
            return Err(RecordingError::journal("invalid clip journal: bad magic number"));
        }

        let version = read_u32(bytes, 4);
        if version != JOURNAL_VERSION {
            return Err(RecordingError::journal(format!(
                "unsupported clip journal version: {}",
                version
            )));
        }

        let id_bytes = &bytes[CAMERA_ID_OFFSET..];
        let id_len = id_bytes.iter().position(|b| *b == 0).unwrap_or(CAMERA_ID_LEN);

        Ok(Self {
            version,
            frame_count: read_u32(bytes, 8),
            fps: read_u32(bytes, 12),
            width: read_u32(bytes, 16),
            height: read_u32(bytes, 20),
            pre_event_frames: read_u32(bytes, 24),
            camera_id: String::from_utf8_lossy(&id_bytes[..id_len]).into_owned(),
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn truncate_utf8(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn io_error(context: &str, path: &Path, e: std::io::Error) -> RecordingError {
    RecordingError::journal(format!("{} {}: {}", context, path.display(), e))
}

/// Append-only writer for one clip.
///
/// Frames are buffered in memory, handed to the OS past a size threshold and
/// synced to disk at least once per second. [`ClipJournal::finalize`] patches
/// the header counters and syncs the file.
pub struct ClipJournal {
    file: BufWriter<File>,
    buffer: Vec<u8>,
    header: JournalHeader,
    path: PathBuf,
    clip_id: String,
    last_sync: Instant,
}

impl ClipJournal {
    /// Create `<dir>/<clip_id>.clip` and write its header
    pub async fn create(
        dir: &Path,
        clip_id: &str,
        header: JournalHeader,
    ) -> Result<Self, RecordingError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| RecordingError::DirectoryCreation {
                path: dir.display().to_string(),
                source,
            })?;

        let path = dir.join(format!("{}.{}", clip_id, JOURNAL_EXTENSION));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| io_error("failed to create", &path, e))?;

        let mut file = BufWriter::new(file);
        file.write_all(&header.encode())
            .await
            .map_err(|e| io_error("failed to write header of", &path, e))?;

        debug!(clip = clip_id, path = %path.display(), "Created clip journal");

        Ok(Self {
            file,
            buffer: Vec::with_capacity(FLUSH_THRESHOLD),
            header,
            path,
            clip_id: clip_id.to_string(),
            last_sync: Instant::now(),
        })
    }

    pub async fn append(&mut self, frame: &FrameData) -> Result<(), RecordingError> {
        let timestamp_nanos = frame
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;

        self.buffer.extend_from_slice(&timestamp_nanos.to_le_bytes());
        self.buffer.extend_from_slice(&frame.id.to_le_bytes());
        self.buffer
            .extend_from_slice(&(frame.jpeg.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(&frame.jpeg);
        self.header.frame_count += 1;

        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_buffer().await?;
        }

        if self.last_sync.elapsed() >= SYNC_INTERVAL {
            self.sync().await?;
        }

        Ok(())
    }

    /// Record that every frame written so far is pre-event footage
    pub fn mark_pre_event(&mut self) {
        self.header.pre_event_frames = self.header.frame_count;
    }

    async fn flush_buffer(&mut self) -> Result<(), RecordingError> {
        if !self.buffer.is_empty() {
            self.file
                .write_all(&self.buffer)
                .await
                .map_err(|e| io_error("failed to write", &self.path, e))?;
            self.buffer.clear();
        }
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), RecordingError> {
        self.flush_buffer().await?;
        self.file
            .flush()
            .await
            .map_err(|e| io_error("failed to flush", &self.path, e))?;
        self.file
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| io_error("failed to sync", &self.path, e))?;

        self.last_sync = Instant::now();
        debug!(clip = %self.clip_id, frames = self.header.frame_count, "Synced clip journal");
        Ok(())
    }

    /// Write pending frames, patch the header counters and sync the file
    pub async fn finalize(mut self) -> Result<FinalizedJournal, RecordingError> {
        self.flush_buffer().await?;
        self.file
            .flush()
            .await
            .map_err(|e| io_error("failed to flush", &self.path, e))?;

        let mut file = self.file.into_inner();
        file.seek(std::io::SeekFrom::Start(FRAME_COUNT_OFFSET))
            .await
            .map_err(|e| io_error("failed to seek in", &self.path, e))?;
        file.write_all(&self.header.frame_count.to_le_bytes())
            .await
            .map_err(|e| io_error("failed to patch frame count of", &self.path, e))?;
        file.seek(std::io::SeekFrom::Start(PRE_EVENT_OFFSET))
            .await
            .map_err(|e| io_error("failed to seek in", &self.path, e))?;
        file.write_all(&self.header.pre_event_frames.to_le_bytes())
            .await
            .map_err(|e| io_error("failed to patch pre-event count of", &self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("failed to sync", &self.path, e))?;

        info!(
            clip = %self.clip_id,
            frames = self.header.frame_count,
            "Finalized clip journal"
        );

        Ok(FinalizedJournal {
            path: self.path,
            header: self.header,
        })
    }

    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A closed journal and its final header
#[derive(Debug, Clone)]
pub struct FinalizedJournal {
    pub path: PathBuf,
    pub header: JournalHeader,
}

/// Streaming reader for clip journals.
///
/// Journals whose header was never patched (the writer crashed) are read up
/// to the last complete record; a truncated trailing record is skipped.
pub struct ClipReader {
    file: tokio::io::BufReader<File>,
    header: JournalHeader,
    path: PathBuf,
    frames_read: u32,
    truncated: bool,
}

impl ClipReader {
    pub async fn open(path: &Path) -> Result<Self, RecordingError> {
        let file = File::open(path)
            .await
            .map_err(|e| io_error("failed to open", path, e))?;
        let mut file = tokio::io::BufReader::new(file);

        let mut raw = [0u8; JOURNAL_HEADER_SIZE];
        file.read_exact(&mut raw)
            .await
            .map_err(|e| io_error("failed to read header of", path, e))?;
        let header = JournalHeader::decode(&raw)?;

        Ok(Self {
            file,
            header,
            path: path.to_path_buf(),
            frames_read: 0,
            truncated: false,
        })
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    /// Whether the header frame count was patched on close
    pub fn is_finalized(&self) -> bool {
        self.header.frame_count > 0
    }

    /// Whether reading stopped at an incomplete trailing record
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete frame, `None` at the end of the usable data
    pub async fn next_frame(&mut self) -> Result<Option<FrameData>, RecordingError> {
        if self.truncated
            || (self.is_finalized() && self.frames_read >= self.header.frame_count)
        {
            return Ok(None);
        }

        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        match read_full(&mut self.file, &mut prefix).await {
            Ok(0) => return Ok(None),
            Ok(n) if n < RECORD_PREFIX_SIZE => return Ok(self.mark_truncated()),
            Ok(_) => {}
            Err(e) => return Err(io_error("failed to read", &self.path, e)),
        }

        let mut word = [0u8; 8];
        word.copy_from_slice(&prefix[0..8]);
        let timestamp = SystemTime::UNIX_EPOCH + Duration::from_nanos(u64::from_le_bytes(word));
        word.copy_from_slice(&prefix[8..16]);
        let frame_id = u64::from_le_bytes(word);
        let len = read_u32(&prefix, 16) as usize;

        if len > MAX_FRAME_BYTES {
            warn!(
                path = %self.path.display(),
                len,
                "Implausible frame length in clip journal, stopping"
            );
            return Ok(self.mark_truncated());
        }

        let mut jpeg = vec![0u8; len];
        match read_full(&mut self.file, &mut jpeg).await {
            Ok(n) if n < len => return Ok(self.mark_truncated()),
            Ok(_) => {}
            Err(e) => return Err(io_error("failed to read", &self.path, e)),
        }

        self.frames_read += 1;
        Ok(Some(FrameData::new(
            frame_id,
            timestamp,
            self.header.camera_id.clone(),
            jpeg,
            self.header.width,
            self.header.height,
        )))
    }

    fn mark_truncated(&mut self) -> Option<FrameData> {
        warn!(
            path = %self.path.display(),
            frames = self.frames_read,
            "Clip journal ends with an incomplete record"
        );
        self.truncated = true;
        None
    }

    pub fn frames_read(&self) -> u32 {
        self.frames_read
    }
}

/// Fill `buf` as far as the file allows, returning the bytes read
async fn read_full(file: &mut tokio::io::BufReader<File>, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Read every complete frame of a journal
pub async fn read_journal(path: &Path) -> Result<(JournalHeader, Vec<FrameData>), RecordingError> {
    let mut reader = ClipReader::open(path).await?;
    let mut frames = Vec::with_capacity(reader.header().frame_count as usize);
    while let Some(frame) = reader.next_frame().await? {
        frames.push(frame);
    }

    let mut header = reader.header().clone();
    if !reader.is_finalized() {
        header.frame_count = frames.len() as u32;
    }
    Ok((header, frames))
}

/// Find all clip journals in a directory
pub async fn find_journals(dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
    let mut journals = Vec::new();

    if !dir.exists() {
        return Ok(journals);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("failed to list", dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("failed to list", dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some(JOURNAL_EXTENSION) {
            journals.push(path);
        }
    }

    journals.sort();
    Ok(journals)
}

pub async fn delete_journal(path: &Path) -> Result<(), RecordingError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| io_error("failed to delete", path, e))?;
    debug!("Deleted clip journal {}", path.display());
    Ok(())
}

/// Clip id from its journal path
pub fn clip_id_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::frame_at;
    use tempfile::TempDir;

    async fn write_journal(dir: &Path, frames: u64) -> FinalizedJournal {
        let mut journal = ClipJournal::create(dir, "clip-a", JournalHeader::new("lobby", 20, 32, 24))
            .await
            .unwrap();
        for id in 0..frames {
            journal.append(&frame_at(id, id * 50, "lobby")).await.unwrap();
            if id == 1 {
                journal.mark_pre_event();
            }
        }
        journal.finalize().await.unwrap()
    }

    #[tokio::test]
    async fn test_journal_write_read() {
        let temp_dir = TempDir::new().unwrap();
        let finalized = write_journal(temp_dir.path(), 5).await;

        assert_eq!(finalized.header.frame_count, 5);
        assert_eq!(finalized.header.pre_event_frames, 2);

        let (header, frames) = read_journal(&finalized.path).await.unwrap();
        assert_eq!(header.camera_id, "lobby");
        assert_eq!((header.fps, header.width, header.height), (20, 32, 24));
        assert_eq!(header.frame_count, 5);
        assert_eq!(header.pre_event_frames, 2);
        assert_eq!(frames.iter().map(|f| f.id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(frames[3].timestamp, frame_at(3, 150, "lobby").timestamp);
        assert_eq!(frames[3].jpeg, frame_at(3, 150, "lobby").jpeg);
    }

    #[tokio::test]
    async fn test_reader_tolerates_truncated_tail() {
        let temp_dir = TempDir::new().unwrap();
        let finalized = write_journal(temp_dir.path(), 3).await;

        // Simulate a crash: header never patched, last record cut short
        let mut bytes = tokio::fs::read(&finalized.path).await.unwrap();
        bytes[8..12].copy_from_slice(&0u32.to_le_bytes());
        bytes.truncate(bytes.len() - 10);
        tokio::fs::write(&finalized.path, &bytes).await.unwrap();

        let mut reader = ClipReader::open(&finalized.path).await.unwrap();
        assert!(!reader.is_finalized());
        let mut ids = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            ids.push(frame.id);
        }
        assert_eq!(ids, vec![0, 1]);
        assert!(reader.is_truncated());

        let (header, frames) = read_journal(&finalized.path).await.unwrap();
        assert_eq!(header.frame_count, 2);
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_magic_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bogus.clip");
        tokio::fs::write(&path, vec![0u8; JOURNAL_HEADER_SIZE]).await.unwrap();

        assert!(ClipReader::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_find_and_delete_journals() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_journals(&temp_dir.path().join("missing")).await.unwrap().is_empty());

        let finalized = write_journal(temp_dir.path(), 1).await;
        tokio::fs::write(temp_dir.path().join("notes.txt"), b"x").await.unwrap();

        let found = find_journals(temp_dir.path()).await.unwrap();
        assert_eq!(found, vec![finalized.path.clone()]);
        assert_eq!(clip_id_of(&found[0]), "clip-a");

        delete_journal(&finalized.path).await.unwrap();
        assert!(find_journals(temp_dir.path()).await.unwrap().is_empty());
    }

    #[test]
    fn test_long_camera_id_is_truncated_on_char_boundary() {
        let id = "cámara-".repeat(8);
        let header = JournalHeader::new(&id, 20, 640, 480);
        let decoded = JournalHeader::decode(&header.encode()).unwrap();
        assert!(decoded.camera_id.len() <= CAMERA_ID_LEN);
        assert!(id.starts_with(&decoded.camera_id));
    }
}
