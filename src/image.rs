/*
    mbsrv
    MASSBUS disk and tape drive emulation server

    Copyright 2023-2025 the mbsrv contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    image.rs

    Container file support: flat sector images for disk drives, and simh
    ".tap" style containers for tape drives.

*/

//! Host container files for emulated media.
//!
//! Disk images are flat arrays of fixed size sectors, addressed by absolute
//! sector number. Tape images use the simh ".tap" convention: each record is
//! framed by a 32 bit little endian length prefix and suffix, a zero length
//! prefix is a tape mark, and the end of the file is the end of the tape.
//! The trailing length makes reverse traversal possible without reading the
//! whole tape.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// The longest tape record we will read or write, in bytes. Records claiming
/// to be longer than this are treated as a lost tape position.
pub const MAX_RECORD_LENGTH: usize = 65_536;

#[derive(Debug)]
pub enum ImageError {
    NotOpen,
    RecordTooLong,
}

impl std::error::Error for ImageError {}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::NotOpen => write!(f, "no image file is attached"),
            ImageError::RecordTooLong => write!(f, "tape record exceeds the maximum length"),
        }
    }
}

fn open_image(path: &Path, read_only: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(!read_only)
        .create(!read_only)
        .open(path)?;
    Ok(file)
}

/// A random access disk container: a flat array of sectors. The logical
/// sector size depends on how the pack is encoded (512 bytes for 16 bit
/// packs, 1024 for 18 bit ones) and may be changed after the file is opened.
pub struct DiskImage {
    file: Option<File>,
    path: PathBuf,
    read_only: bool,
    sector_size: u32,
}

impl DiskImage {
    pub fn new(sector_size: u32) -> Self {
        DiskImage { file: None, path: PathBuf::new(), read_only: false, sector_size }
    }

    /// Open (creating if necessary) the image file. If the host file is
    /// write protected the image falls back to read only mode.
    pub fn open(&mut self, path: &Path, read_only: bool) -> Result<()> {
        let (file, read_only) = match open_image(path, read_only) {
            Ok(file) => (file, read_only),
            Err(_) if !read_only => (open_image(path, true)?, true),
            Err(e) => return Err(e),
        };
        self.file = Some(file);
        self.path = path.to_path_buf();
        self.read_only = read_only;
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn file_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn set_sector_size(&mut self, sector_size: u32) {
        self.sector_size = sector_size;
    }

    /// Read one sector into `buf`, which must be exactly one sector long.
    pub fn read_sector(&mut self, lba: u32, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), self.sector_size as usize);
        let offset = lba as u64 * self.sector_size as u64;
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write one sector from `buf`, which must be exactly one sector long.
    pub fn write_sector(&mut self, lba: u32, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), self.sector_size as usize);
        if self.read_only {
            bail!("image {} is read only", self.path.display());
        }
        let offset = lba as u64 * self.sector_size as u64;
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }
}

/// What a tape read or space operation ran into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TapeEvent {
    /// A data record; the payload is its length in bytes.
    Record(usize),
    /// A tape mark (zero length record). The mark has been consumed.
    TapeMark,
    /// The beginning or end of the tape, depending on direction.
    EotBot,
    /// The framing is corrupt; the tape position is lost.
    BadTape,
}

/// An append oriented tape container in simh ".tap" format.
///
/// The image never physically reads backwards: `read_forward_record` always
/// returns bytes in forward order, and reverse read semantics live entirely
/// in the caller. Reverse *spacing* works by walking the trailing length
/// words.
pub struct TapeImage {
    file: Option<File>,
    path: PathBuf,
    read_only: bool,
    position: u64,
}

impl TapeImage {
    pub fn new() -> Self {
        TapeImage { file: None, path: PathBuf::new(), read_only: false, position: 0 }
    }

    /// Open (creating if necessary) the image file, positioned at BOT. If
    /// the host file is write protected the image falls back to read only.
    pub fn open(&mut self, path: &Path, read_only: bool) -> Result<()> {
        let (file, read_only) = match open_image(path, read_only) {
            Ok(file) => (file, read_only),
            Err(_) if !read_only => (open_image(path, true)?, true),
            Err(e) => return Err(e),
        };
        self.file = Some(file);
        self.path = path.to_path_buf();
        self.read_only = read_only;
        self.position = 0;
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
        self.position = 0;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn file_name(&self) -> String {
        self.path.display().to_string()
    }

    /// True if the tape is positioned at the load point.
    pub fn is_bot(&self) -> bool {
        self.position == 0
    }

    /// True if the tape is positioned at the end of the recorded data.
    pub fn is_eot(&self) -> bool {
        match self.length() {
            Ok(len) => self.position >= len,
            Err(_) => false,
        }
    }

    /// Reposition the tape to the load point.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn length(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(ImageError::NotOpen)?;
        Ok(file.metadata()?.len())
    }

    fn read_length_word(&mut self, offset: u64) -> Result<u32> {
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        let mut word = [0u8; 4];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Read the next record in the forward direction into `buf`. Returns
    /// the event encountered; for `Record` the payload bytes are in
    /// `buf[..n]`. Framing that doesn't add up is reported as `BadTape`.
    pub fn read_forward_record(&mut self, buf: &mut [u8]) -> Result<TapeEvent> {
        let len = self.length()?;
        if self.position >= len {
            return Ok(TapeEvent::EotBot);
        }
        if self.position + 4 > len {
            return Ok(TapeEvent::BadTape);
        }
        let prefix = self.read_length_word(self.position)? as u64;
        if prefix == 0 {
            self.position += 4;
            return Ok(TapeEvent::TapeMark);
        }
        if prefix as usize > MAX_RECORD_LENGTH
            || prefix as usize > buf.len()
            || self.position + 8 + prefix > len
        {
            return Ok(TapeEvent::BadTape);
        }
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.seek(SeekFrom::Start(self.position + 4))?;
        file.read_exact(&mut buf[..prefix as usize])?;
        let suffix = self.read_length_word(self.position + 4 + prefix)?;
        if suffix as u64 != prefix {
            return Ok(TapeEvent::BadTape);
        }
        self.position += 8 + prefix;
        Ok(TapeEvent::Record(prefix as usize))
    }

    /// Space forward over one record. A tape mark stops (and is consumed
    /// by) the operation.
    pub fn space_forward_record(&mut self) -> Result<TapeEvent> {
        let len = self.length()?;
        if self.position >= len {
            return Ok(TapeEvent::EotBot);
        }
        if self.position + 4 > len {
            return Ok(TapeEvent::BadTape);
        }
        let prefix = self.read_length_word(self.position)? as u64;
        if prefix == 0 {
            self.position += 4;
            return Ok(TapeEvent::TapeMark);
        }
        if prefix as usize > MAX_RECORD_LENGTH || self.position + 8 + prefix > len {
            return Ok(TapeEvent::BadTape);
        }
        let suffix = self.read_length_word(self.position + 4 + prefix)?;
        if suffix as u64 != prefix {
            return Ok(TapeEvent::BadTape);
        }
        self.position += 8 + prefix;
        Ok(TapeEvent::Record(prefix as usize))
    }

    /// Space backward over one record. A tape mark stops (and is consumed
    /// by) the operation; the load point reports `EotBot`.
    pub fn space_reverse_record(&mut self) -> Result<TapeEvent> {
        if self.position == 0 {
            return Ok(TapeEvent::EotBot);
        }
        if self.position < 4 {
            return Ok(TapeEvent::BadTape);
        }
        let suffix = self.read_length_word(self.position - 4)? as u64;
        if suffix == 0 {
            self.position -= 4;
            return Ok(TapeEvent::TapeMark);
        }
        if suffix as usize > MAX_RECORD_LENGTH || self.position < 8 + suffix {
            return Ok(TapeEvent::BadTape);
        }
        let prefix = self.read_length_word(self.position - 8 - suffix)?;
        if prefix as u64 != suffix {
            return Ok(TapeEvent::BadTape);
        }
        self.position -= 8 + suffix;
        Ok(TapeEvent::Record(suffix as usize))
    }

    /// Space forward over one file: skip records until a tape mark has been
    /// consumed. `EotBot` is returned if the tape runs out first.
    pub fn space_forward_file(&mut self) -> Result<TapeEvent> {
        loop {
            match self.space_forward_record()? {
                TapeEvent::Record(_) => continue,
                TapeEvent::TapeMark => return Ok(TapeEvent::Record(0)),
                other => return Ok(other),
            }
        }
    }

    /// Space backward over one file: skip records until a tape mark has
    /// been consumed. `EotBot` is returned if the load point comes first.
    pub fn space_reverse_file(&mut self) -> Result<TapeEvent> {
        loop {
            match self.space_reverse_record()? {
                TapeEvent::Record(_) => continue,
                TapeEvent::TapeMark => return Ok(TapeEvent::Record(0)),
                other => return Ok(other),
            }
        }
    }

    /// Append one data record at the current position. Anything previously
    /// recorded after this point is lost: writing in the middle of a tape
    /// truncates the rest, which is the closest a container file can come
    /// to the behavior of real oxide.
    pub fn write_record(&mut self, data: &[u8]) -> Result<()> {
        if self.read_only {
            bail!("image {} is read only", self.path.display());
        }
        if data.is_empty() || data.len() > MAX_RECORD_LENGTH {
            bail!(ImageError::RecordTooLong);
        }
        let length = (data.len() as u32).to_le_bytes();
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.seek(SeekFrom::Start(self.position))?;
        file.write_all(&length)?;
        file.write_all(data)?;
        file.write_all(&length)?;
        self.position += 8 + data.len() as u64;
        file.set_len(self.position)?;
        Ok(())
    }

    /// Write a tape mark at the current position, truncating the rest.
    pub fn write_mark(&mut self) -> Result<()> {
        if self.read_only {
            bail!("image {} is read only", self.path.display());
        }
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.seek(SeekFrom::Start(self.position))?;
        file.write_all(&0u32.to_le_bytes())?;
        self.position += 4;
        file.set_len(self.position)?;
        Ok(())
    }

    /// Erase everything after the current position.
    pub fn truncate(&mut self) -> Result<()> {
        if self.read_only {
            bail!("image {} is read only", self.path.display());
        }
        let file = self.file.as_mut().ok_or(ImageError::NotOpen)?;
        file.set_len(self.position)?;
        Ok(())
    }
}

impl Default for TapeImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod testing {
    //! Throwaway file paths for image tests.

    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(0);

    /// A unique path under the system temp directory, removed on drop.
    pub struct TempPath(pub PathBuf);

    impl TempPath {
        pub fn new(tag: &str) -> Self {
            let n = NEXT.fetch_add(1, Ordering::Relaxed);
            let mut path = std::env::temp_dir();
            path.push(format!("mbsrv-test-{}-{}-{}", std::process::id(), tag, n));
            TempPath(path)
        }
    }

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TempPath;
    use super::*;

    #[test]
    fn disk_sectors_round_trip() {
        let path = TempPath::new("disk");
        let mut image = DiskImage::new(512);
        image.open(&path.0, false).unwrap();
        let sector: Vec<u8> = (0..512).map(|i| (i % 251) as u8).collect();
        image.write_sector(42, &sector).unwrap();
        let mut back = vec![0u8; 512];
        image.read_sector(42, &mut back).unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn disk_read_past_the_end_fails() {
        let path = TempPath::new("disk-eof");
        let mut image = DiskImage::new(512);
        image.open(&path.0, false).unwrap();
        let mut buf = vec![0u8; 512];
        assert!(image.read_sector(0, &mut buf).is_err());
    }

    fn build_tape(path: &std::path::Path, records: &[&[u8]], marks_after: &[usize]) -> TapeImage {
        let mut image = TapeImage::new();
        image.open(path, false).unwrap();
        for (i, rec) in records.iter().enumerate() {
            image.write_record(rec).unwrap();
            if marks_after.contains(&i) {
                image.write_mark().unwrap();
            }
        }
        image.rewind();
        image
    }

    #[test]
    fn tape_records_read_forward_in_order() {
        let path = TempPath::new("tap-fwd");
        let mut image = build_tape(&path.0, &[b"hello", b"world!!"], &[0]);
        let mut buf = [0u8; 64];

        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::Record(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::TapeMark);
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::Record(7));
        assert_eq!(&buf[..7], b"world!!");
        assert!(image.is_eot());
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::EotBot);
    }

    #[test]
    fn tape_spacing_is_symmetric() {
        let path = TempPath::new("tap-space");
        let mut image = build_tape(&path.0, &[b"one", b"two", b"three"], &[1]);

        assert_eq!(image.space_forward_record().unwrap(), TapeEvent::Record(3));
        assert_eq!(image.space_forward_record().unwrap(), TapeEvent::Record(3));
        assert_eq!(image.space_forward_record().unwrap(), TapeEvent::TapeMark);
        assert_eq!(image.space_forward_record().unwrap(), TapeEvent::Record(5));
        assert_eq!(image.space_forward_record().unwrap(), TapeEvent::EotBot);

        assert_eq!(image.space_reverse_record().unwrap(), TapeEvent::Record(5));
        assert_eq!(image.space_reverse_record().unwrap(), TapeEvent::TapeMark);
        assert_eq!(image.space_reverse_record().unwrap(), TapeEvent::Record(3));
        assert_eq!(image.space_reverse_record().unwrap(), TapeEvent::Record(3));
        assert!(image.is_bot());
        assert_eq!(image.space_reverse_record().unwrap(), TapeEvent::EotBot);
    }

    #[test]
    fn tape_file_spacing_consumes_the_mark() {
        let path = TempPath::new("tap-file");
        let mut image = build_tape(&path.0, &[b"a", b"b", b"c"], &[1]);
        assert_eq!(image.space_forward_file().unwrap(), TapeEvent::Record(0));
        // Position is just past the mark; the next record is "c".
        let mut buf = [0u8; 8];
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::Record(1));
        assert_eq!(&buf[..1], b"c");
        assert_eq!(image.space_forward_file().unwrap(), TapeEvent::EotBot);
    }

    #[test]
    fn writing_mid_tape_truncates_the_rest() {
        let path = TempPath::new("tap-trunc");
        let mut image = build_tape(&path.0, &[b"first", b"second"], &[]);
        image.rewind();
        image.space_forward_record().unwrap();
        image.write_record(b"replacement").unwrap();
        assert!(image.is_eot());
        image.rewind();
        let mut buf = [0u8; 64];
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::Record(5));
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::Record(11));
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::EotBot);
    }

    #[test]
    fn corrupt_framing_reports_bad_tape() {
        let path = TempPath::new("tap-bad");
        {
            let mut file = std::fs::File::create(&path.0).unwrap();
            // A prefix claiming 100 bytes with only garbage behind it.
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(b"short").unwrap();
        }
        let mut image = TapeImage::new();
        image.open(&path.0, false).unwrap();
        let mut buf = [0u8; 256];
        assert_eq!(image.read_forward_record(&mut buf).unwrap(), TapeEvent::BadTape);
    }

    #[test]
    fn read_only_images_refuse_writes() {
        let path = TempPath::new("tap-ro");
        build_tape(&path.0, &[b"data"], &[]);
        let mut image = TapeImage::new();
        image.open(&path.0, true).unwrap();
        assert!(image.is_read_only());
        assert!(image.write_record(b"nope").is_err());
        assert!(image.write_mark().is_err());
    }
}
