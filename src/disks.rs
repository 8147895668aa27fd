/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Shard files on disk, with optional transparent zstd compression.

Files are opened on demand and dropped after use, so a catalog of many
shards never holds more than one handle per reader.
*/

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    ops::Deref,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Suffix marking a zstd-compressed shard.
pub const ZSTD_SUFFIX: &str = "zst";

pub trait ReadDisk {
    type ReadDisk: Read;
    fn read_disk(&self) -> std::io::Result<Self::ReadDisk>;
}

pub trait WriteDisk {
    type WriteDisk: Write;
    fn write_disk(&self) -> std::io::Result<Self::WriteDisk>;
}

/// Zstd compression level (<https://facebook.github.io/zstd/zstd_manual.html>).
///
/// Bounded [0-22]. 0 is a default compression level, 1-22 is from lower
/// compression to higher compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct ZstdLevel {
    level: i32,
}

impl ZstdLevel {
    /// Construct in a constant context. If this fails, `value` is outside
    /// of [0, 22].
    pub const fn const_new(value: i32) -> Result<Self, i32> {
        if value >= 0 && value < 23 {
            Ok(Self { level: value })
        } else {
            Err(value)
        }
    }
}

impl Default for ZstdLevel {
    fn default() -> Self {
        Self { level: 0 }
    }
}

impl TryFrom<i32> for ZstdLevel {
    type Error = String;
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::const_new(value).map_err(|value| format!("{value} is outside of [0-22]"))
    }
}

impl From<ZstdLevel> for i32 {
    fn from(val: ZstdLevel) -> Self {
        val.level
    }
}

impl Deref for ZstdLevel {
    type Target = i32;
    fn deref(&self) -> &Self::Target {
        &self.level
    }
}

/// How shard bytes are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Zstd(ZstdLevel),
}

impl Compression {
    /// Detects compression from the file name suffix.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext == ZSTD_SUFFIX => Self::Zstd(ZstdLevel::default()),
            _ => Self::None,
        }
    }

    /// File name suffix for a shard of base extension `ext`.
    pub fn file_suffix(&self, ext: &str) -> String {
        match self {
            Self::None => ext.to_string(),
            Self::Zstd(_) => format!("{ext}.{ZSTD_SUFFIX}"),
        }
    }
}

/// A shard file, opened for each read or write and closed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFile {
    path: PathBuf,
    compression: Compression,
}

impl ShardFile {
    pub fn new(path: PathBuf, compression: Compression) -> Self {
        Self { path, compression }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl From<PathBuf> for ShardFile {
    fn from(value: PathBuf) -> Self {
        let compression = Compression::from_path(&value);
        Self::new(value, compression)
    }
}

impl AsRef<Path> for ShardFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Read handle for a [`ShardFile`].
pub enum ShardReader {
    Plain(BufReader<File>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::Decoder<'static, BufReader<File>>),
}

impl Read for ShardReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(inner) => inner.read(buf),
            #[cfg(feature = "zstd")]
            Self::Zstd(inner) => inner.read(buf),
        }
    }
}

impl ReadDisk for ShardFile {
    type ReadDisk = ShardReader;

    fn read_disk(&self) -> std::io::Result<Self::ReadDisk> {
        let file = File::open(&self.path)?;
        match self.compression {
            Compression::None => Ok(ShardReader::Plain(BufReader::new(file))),
            #[cfg(feature = "zstd")]
            Compression::Zstd(_) => Ok(ShardReader::Zstd(zstd::Decoder::new(file)?)),
            #[cfg(not(feature = "zstd"))]
            Compression::Zstd(_) => Err(zstd_disabled()),
        }
    }
}

/// Write handle for a [`ShardFile`].
///
/// Call [`Self::finish`] once all data is written, otherwise a compressed
/// shard is left without its final frame.
pub enum ShardWriter {
    Plain(BufWriter<File>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

impl ShardWriter {
    /// Flushes all buffered data and closes any compression frame.
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            Self::Plain(mut inner) => inner.flush(),
            #[cfg(feature = "zstd")]
            Self::Zstd(inner) => inner.finish()?.flush(),
        }
    }
}

impl Write for ShardWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(inner) => inner.write(buf),
            #[cfg(feature = "zstd")]
            Self::Zstd(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(inner) => inner.flush(),
            #[cfg(feature = "zstd")]
            Self::Zstd(inner) => inner.flush(),
        }
    }
}

impl WriteDisk for ShardFile {
    type WriteDisk = ShardWriter;

    fn write_disk(&self) -> std::io::Result<Self::WriteDisk> {
        let file = BufWriter::new(
            File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?,
        );
        match self.compression {
            Compression::None => Ok(ShardWriter::Plain(file)),
            #[cfg(feature = "zstd")]
            Compression::Zstd(level) => Ok(ShardWriter::Zstd(zstd::Encoder::new(file, *level)?)),
            #[cfg(not(feature = "zstd"))]
            Compression::Zstd(_) => Err(zstd_disabled()),
        }
    }
}

#[cfg(not(feature = "zstd"))]
fn zstd_disabled() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "zstd shards need the `zstd` feature",
    )
}
