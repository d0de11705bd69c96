use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use tracing::warn;

/// One key/value write as it sits in the log.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Entry {
    /// Monotonic write sequence, survives compaction.
    pub seq: u64,
    pub key: String,
    pub value: Vec<u8>,
}

/// Append-only log file. Frame format: [Length u32 LE][rkyv bytes].
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    strict: bool,
    current_offset: u64,
}

impl Segment {
    pub fn new(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            strict,
            current_offset,
        })
    }

    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    pub fn append(&mut self, entry: &Entry) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 256>(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let start = self.current_offset;
        let len = bytes.len() as u32;

        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);
        self.file.write_all(&frame)?;

        if self.strict {
            self.file.sync_data()?;
        }

        self.current_offset += frame.len() as u64;
        Ok(start)
    }

    pub fn read(&self, offset: u64) -> io::Result<Entry> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        read_frame(&mut file).map(|(entry, _)| entry)
    }

    /// Reads every complete frame from the start of the file. A torn frame at
    /// the tail (crash mid-append) is cut off so later appends stay readable.
    pub fn recover(&mut self) -> io::Result<Vec<(u64, Entry)>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut offset = 0u64;
        while offset < self.current_offset {
            match read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push((offset, entry));
                    offset += frame_len;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(
                        "segment {:?} has a torn frame at offset {}, truncating {} bytes",
                        self.file_path,
                        offset,
                        self.current_offset - offset
                    );
                    self.file.set_len(offset)?;
                    self.current_offset = offset;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<(Entry, u64)> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;

    // rkyv needs the archive aligned in memory.
    let mut aligned = AlignedVec::with_capacity(len);
    aligned.extend_from_slice(&bytes);

    let archived = rkyv::check_archived_root::<Entry>(&aligned[..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let entry: Entry = archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "entry deserialize failed"))?;
    Ok((entry, 4 + len as u64))
}
