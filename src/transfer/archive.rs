//! Streaming zip archives
//!
//! The archive is produced on the blocking pool and pushed through a bounded
//! channel into the HTTP response. The zip writer patches each entry's local
//! header once the entry is complete, so the entry being written is held in
//! an anonymous spool file and released downstream as soon as the writer
//! finishes it. Memory use stays bounded by the channel capacity no matter
//! how large the selection is. Once streaming has begun, problems are logged
//! rather than returned: the response headers are already on the wire.

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::storage::naming::unique_name_by;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Sizes at or above this need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Tuning for the producer side of an archive stream
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSettings {
    pub chunk_size: usize,
    pub channel_capacity: usize,
}

/// What ended up in an archive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// `Write` adapter that hands fixed-size chunks to an async receiver.
///
/// Blocks while the channel is full. Fails with `BrokenPipe` once the
/// receiver is gone.
pub struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Bytes>, chunk_size: usize) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        self.tx
            .blocking_send(Bytes::from(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.chunk_size {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.send_buffer()
    }
}

/// Seekable front for a forward-only sink.
///
/// Bytes past the last flush live in `spool` and may still be rewritten;
/// `flush` copies them to `out` and forgets them. Seeking back into bytes
/// that were already flushed fails with `Unsupported`.
pub struct SpoolWriter<W: Write> {
    out: W,
    spool: File,
    /// Logical offset of the first spooled byte.
    committed: u64,
    len: u64,
    pos: u64,
}

impl<W: Write> SpoolWriter<W> {
    pub fn new(out: W) -> io::Result<Self> {
        Ok(Self {
            out,
            spool: tempfile::tempfile()?,
            committed: 0,
            len: 0,
            pos: 0,
        })
    }

    /// Bytes already handed to the sink.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for SpoolWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.spool.seek(SeekFrom::Start(self.pos - self.committed))?;
        let n = self.spool.write(buf)?;
        self.pos += n as u64;
        self.len = self.len.max(self.pos);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Mid-entry flushes keep the spool; a header patch may still follow.
        if self.pos == self.len && self.len > self.committed {
            self.spool.seek(SeekFrom::Start(0))?;
            let pending = self.len - self.committed;
            let copied = io::copy(&mut (&mut self.spool).take(pending), &mut self.out)?;
            if copied != pending {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "archive spool shorter than expected",
                ));
            }
            self.spool.set_len(0)?;
            self.committed = self.len;
        }
        self.out.flush()
    }
}

impl<W: Write> Seek for SpoolWriter<W> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let next = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        };

        match next {
            Some(next) if next >= self.committed => {
                self.pos = next;
                Ok(next)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek into archive bytes already streamed",
            )),
        }
    }
}

/// Only present to satisfy the `Read` bound on `ZipWriter::set_flush_on_finish_file`;
/// the writer never reads back in this path.
impl<W: Write> Read for SpoolWriter<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "archive spool is write-only",
        ))
    }
}

/// Starts producing a zip of `sources` and returns the byte stream feeding the response.
///
/// `excluded` (the trash directory) is never descended into. Dropping the
/// stream stops the producer at its next read or write and closes any open file.
pub fn stream_archive(
    sources: Vec<PathBuf>,
    excluded: PathBuf,
    settings: ArchiveSettings,
) -> impl Stream<Item = Result<Bytes, io::Error>> {
    let (tx, rx) = mpsc::channel::<Bytes>(settings.channel_capacity);

    tokio::task::spawn_blocking(move || {
        let receiver_gone = tx.clone();
        let writer = ChannelWriter::new(tx, settings.chunk_size);
        let result = write_archive(writer, &sources, &excluded, || receiver_gone.is_closed());

        match result {
            Ok(summary) => info!(
                "Archive streamed: {} files, {} directories, {} skipped, {} bytes read",
                summary.files, summary.directories, summary.skipped, summary.bytes
            ),
            Err(ZipError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!("Archive download abandoned by client");
            }
            Err(e) => error!("Archive stream failed: {}", e),
        }
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, io::Error>(chunk), rx))
    })
}

fn entry_options(large_file: bool) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .large_file(large_file)
}

fn abandoned() -> ZipError {
    ZipError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "archive consumer went away",
    ))
}

/// Writes a zip of `sources` into `out`, each under its base name, and flushes `out`.
///
/// Missing sources are skipped with a warning. Duplicate base names get a
/// ` (n)` suffix. Only write failures abort, as does `is_cancelled` returning
/// true, which is checked between reads.
pub fn write_archive<W, C>(
    out: W,
    sources: &[PathBuf],
    excluded: &Path,
    is_cancelled: C,
) -> Result<ArchiveSummary, ZipError>
where
    W: Write,
    C: Fn() -> bool,
{
    let mut zip = ZipWriter::new(SpoolWriter::new(out)?);
    // Each finished entry is released downstream before the next one starts.
    zip.set_flush_on_finish_file(true);

    let mut summary = ArchiveSummary::default();
    let mut used_names: HashSet<String> = HashSet::new();

    for source in sources {
        if is_cancelled() {
            return Err(abandoned());
        }

        let metadata = match fs::metadata(source) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping archive source {}: {}", source.display(), e);
                summary.skipped += 1;
                continue;
            }
        };

        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "files".to_string());
        let name = unique_name_by(&base, |candidate| used_names.contains(candidate));
        used_names.insert(name.clone());

        if metadata.is_dir() {
            add_tree(&mut zip, source, &name, excluded, &is_cancelled, &mut summary)?;
        } else if metadata.is_file() {
            add_file(&mut zip, source, &name, metadata.len(), &is_cancelled, &mut summary)?;
        } else {
            warn!("Skipping special file {}", source.display());
            summary.skipped += 1;
        }
    }

    zip.finish()?.into_inner()?;
    Ok(summary)
}

fn add_tree<Z, C>(
    zip: &mut ZipWriter<Z>,
    root: &Path,
    name: &str,
    excluded: &Path,
    is_cancelled: &C,
    summary: &mut ArchiveSummary,
) -> Result<(), ZipError>
where
    Z: Write + Seek,
    C: Fn() -> bool,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != excluded);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable archive entry: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut archive_path = name.to_string();
        for component in relative.components() {
            archive_path.push('/');
            archive_path.push_str(&component.as_os_str().to_string_lossy());
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            zip.add_directory(archive_path, entry_options(false))?;
            summary.directories += 1;
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            add_file(zip, entry.path(), &archive_path, size, is_cancelled, summary)?;
        } else {
            // Links may point outside the storage root.
            debug!("Skipping symlink {}", entry.path().display());
            summary.skipped += 1;
        }
    }

    Ok(())
}

/// Copies one file into the archive. The file handle is closed before returning.
fn add_file<Z, C>(
    zip: &mut ZipWriter<Z>,
    path: &Path,
    archive_path: &str,
    size: u64,
    is_cancelled: &C,
    summary: &mut ArchiveSummary,
) -> Result<(), ZipError>
where
    Z: Write + Seek,
    C: Fn() -> bool,
{
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            summary.skipped += 1;
            return Ok(());
        }
    };

    zip.start_file(archive_path, entry_options(size >= ZIP64_THRESHOLD))?;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if is_cancelled() {
            return Err(abandoned());
        }
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // The entry stays truncated; the rest of the archive is still useful.
                warn!("Read failure on {}, entry truncated: {}", path.display(), e);
                break;
            }
        };
        zip.write_all(&buffer[..n])?;
        summary.bytes += n as u64;
    }

    summary.files += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn names_in(bytes: Vec<u8>) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn files_and_directories_use_base_names() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("photos/2024")).unwrap();
        fs::write(root.join("photos/2024/cat.jpg"), b"meow").unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/a.txt"), b"hello").unwrap();

        let mut out = Vec::new();
        let summary = write_archive(
            &mut out,
            &[root.join("photos"), root.join("docs/a.txt")],
            &root.join(".trash"),
            || false,
        )
        .unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 9);
        assert_eq!(
            names_in(out),
            vec!["a.txt", "photos/", "photos/2024/", "photos/2024/cat.jpg"]
        );
    }

    #[test]
    fn missing_sources_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kept.txt"), b"x").unwrap();

        let mut out = Vec::new();
        let summary = write_archive(
            &mut out,
            &[dir.path().join("gone.txt"), dir.path().join("kept.txt")],
            &dir.path().join(".trash"),
            || false,
        )
        .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(names_in(out), vec!["kept.txt"]);
    }

    #[test]
    fn duplicate_base_names_are_disambiguated() {
        let dir = TempDir::new().unwrap();
        for sub in ["a", "b"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("x.txt"), sub).unwrap();
        }

        let mut out = Vec::new();
        write_archive(
            &mut out,
            &[dir.path().join("a/x.txt"), dir.path().join("b/x.txt")],
            &dir.path().join(".trash"),
            || false,
        )
        .unwrap();

        assert_eq!(names_in(out), vec!["x (1).txt", "x.txt"]);
    }

    #[test]
    fn excluded_directory_is_not_descended() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::write(root.join(".trash/secret.txt"), b"x").unwrap();
        fs::write(root.join("public.txt"), b"x").unwrap();

        let mut out = Vec::new();
        write_archive(&mut out, &[root.clone()], &root.join(".trash"), || false).unwrap();

        assert_eq!(names_in(out), vec!["root/", "root/public.txt"]);
    }

    #[test]
    fn content_survives_compression() {
        let dir = TempDir::new().unwrap();
        let payload = "line of text\n".repeat(10_000);
        fs::write(dir.path().join("big.txt"), &payload).unwrap();

        let mut out = Vec::new();
        write_archive(
            &mut out,
            &[dir.path().join("big.txt")],
            &dir.path().join(".trash"),
            || false,
        )
        .unwrap();
        assert!(out.len() < payload.len());

        let mut archive = ZipArchive::new(Cursor::new(out)).unwrap();
        let mut content = String::new();
        archive
            .by_name("big.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, payload);
    }

    #[test]
    fn spool_releases_bytes_only_on_flush() {
        let mut out = Vec::new();
        let mut spool = SpoolWriter::new(&mut out).unwrap();
        spool.write_all(b"HEADER--body").unwrap();
        spool.seek(SeekFrom::Start(6)).unwrap();
        spool.write_all(b"!!").unwrap();
        spool.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(spool.committed(), 0);

        spool.flush().unwrap();
        assert_eq!(spool.committed(), 12);
        let err = spool.seek(SeekFrom::Start(3)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        spool.write_all(b"tail").unwrap();
        assert_eq!(spool.seek(SeekFrom::Current(0)).unwrap(), 16);
        spool.into_inner().unwrap();
        assert_eq!(out, b"HEADER!!bodytail");
    }

    #[test]
    fn spool_keeps_pending_bytes_when_flushed_mid_entry() {
        let mut out = Vec::new();
        let mut spool = SpoolWriter::new(&mut out).unwrap();
        spool.write_all(b"abcdef").unwrap();
        spool.seek(SeekFrom::Start(2)).unwrap();
        spool.flush().unwrap();
        assert_eq!(spool.committed(), 0);

        spool.write_all(b"XY").unwrap();
        spool.seek(SeekFrom::End(0)).unwrap();
        spool.into_inner().unwrap();
        assert_eq!(out, b"abXYef");
    }

    #[test]
    fn cancellation_stops_the_archive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();

        let err = write_archive(
            Vec::new(),
            &[dir.path().join("a.txt")],
            &dir.path().join(".trash"),
            || true,
        )
        .unwrap_err();
        assert!(matches!(err, ZipError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn finished_entries_reach_the_sink_before_the_archive_ends() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"beta").unwrap();

        let sink = SharedSink::default();
        let mut zip = ZipWriter::new(SpoolWriter::new(sink.clone()).unwrap());
        zip.set_flush_on_finish_file(true);
        let mut summary = ArchiveSummary::default();
        let never = || false;
        add_file(&mut zip, &dir.path().join("a.txt"), "a.txt", 5, &never, &mut summary).unwrap();
        assert!(sink.0.borrow().is_empty());
        add_file(&mut zip, &dir.path().join("b.txt"), "b.txt", 4, &never, &mut summary).unwrap();

        // Starting b.txt finished a.txt and released it.
        let released = sink.0.borrow().len();
        assert!(released > 0);

        zip.finish().unwrap().into_inner().unwrap();
        assert!(sink.0.borrow().len() > released);
        assert_eq!(names_in(sink.0.take()), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn channel_writer_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut writer = ChannelWriter::new(tx, 4);
        let err = writer.write_all(b"12345678").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn stream_yields_a_complete_archive() {
        use futures_util::StreamExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"beta").unwrap();

        let stream = stream_archive(
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")],
            dir.path().join(".trash"),
            ArchiveSettings {
                chunk_size: 16,
                channel_capacity: 2,
            },
        );
        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let bytes: Vec<u8> = chunks.concat();

        assert_eq!(names_in(bytes), vec!["a.txt", "b.txt"]);
    }
}
