use crate::errors::{Error, Result};
use crate::hashing::{DependencyRecords, Digest};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// The version of the entry serialization data format.
///
/// Writes always use the current version; reads accept 1..=4.
const ENTRY_DATA_FORMAT_VERSION: i32 = 4;

/// Whether captured program output is stored compressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionMode {
    #[default]
    None = 0,
    All = 1,
}

impl CompressionMode {
    fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(CompressionMode::None),
            1 => Ok(CompressionMode::All),
            _ => Err(Error::invalid_input(format!(
                "unknown compression mode: {value}"
            ))),
        }
    }
}

/// The serialized record of a past compilation: output-file identifiers,
/// captured diagnostics, return code, and dependency digests.
///
/// Immutable once constructed. The wire format is a flat byte string of
/// little-endian i32 scalars and length-prefixed payloads; dependency
/// records are serialized in path-sorted order so the bytes are stable
/// across processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    file_ids: Vec<String>,
    dependency_records: DependencyRecords,
    compression_mode: CompressionMode,
    std_out: Vec<u8>,
    std_err: Vec<u8>,
    return_code: i32,
}

impl CacheEntry {
    #[must_use]
    pub fn new(
        file_ids: Vec<String>,
        dependency_records: DependencyRecords,
        compression_mode: CompressionMode,
        std_out: Vec<u8>,
        std_err: Vec<u8>,
        return_code: i32,
    ) -> Self {
        Self {
            file_ids,
            dependency_records,
            compression_mode,
            std_out,
            std_err,
            return_code,
        }
    }

    #[must_use]
    pub fn file_ids(&self) -> &[String] {
        &self.file_ids
    }

    #[must_use]
    pub fn dependency_records(&self) -> &DependencyRecords {
        &self.dependency_records
    }

    #[must_use]
    pub fn compression_mode(&self) -> CompressionMode {
        self.compression_mode
    }

    #[must_use]
    pub fn std_out(&self) -> &[u8] {
        &self.std_out
    }

    #[must_use]
    pub fn std_err(&self) -> &[u8] {
        &self.std_err
    }

    #[must_use]
    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    /// Serialize at the current format version
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        write_i32(&mut data, ENTRY_DATA_FORMAT_VERSION);
        write_i32(&mut data, self.compression_mode as i32);
        write_string_vec(&mut data, &self.file_ids);
        match self.compression_mode {
            CompressionMode::All => {
                write_bytes(&mut data, &compress(&self.std_out)?);
                write_bytes(&mut data, &compress(&self.std_err)?);
            }
            CompressionMode::None => {
                write_bytes(&mut data, &self.std_out);
                write_bytes(&mut data, &self.std_err);
            }
        }
        write_i32(&mut data, self.return_code);
        write_i32(&mut data, self.dependency_records.len() as i32);
        for (path, digest) in &self.dependency_records {
            write_bytes(&mut data, path.as_bytes());
            data.extend_from_slice(digest.as_bytes());
        }
        Ok(data)
    }

    /// Deserialize any supported format version.
    ///
    /// Fields a legacy version lacks are defaulted: compression mode None
    /// before version 2, empty dependency map before version 4. Versions 1
    /// and 2 stored file identifiers as a map; its keys are taken sorted so
    /// reconstruction does not depend on the writer's map order.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let format_version = reader.read_i32()?;
        if format_version > ENTRY_DATA_FORMAT_VERSION {
            return Err(Error::unsupported(
                "cache entry format",
                format!(
                    "version {format_version} is newer than supported version \
                     {ENTRY_DATA_FORMAT_VERSION}"
                ),
            ));
        }

        let compression_mode = if format_version >= 2 {
            CompressionMode::from_i32(reader.read_i32()?)?
        } else {
            CompressionMode::None
        };
        let file_ids = if format_version >= 3 {
            reader.read_string_vec()?
        } else {
            let mut keys: Vec<String> = reader
                .read_legacy_string_map()?
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            keys.sort();
            keys
        };
        let mut std_out = reader.read_bytes()?;
        let mut std_err = reader.read_bytes()?;
        let return_code = reader.read_i32()?;
        let dependency_records = if format_version >= 4 {
            reader.read_dependency_records()?
        } else {
            DependencyRecords::new()
        };

        if compression_mode == CompressionMode::All {
            std_out = decompress(&std_out)?;
            std_err = decompress(&std_err)?;
        }

        Ok(Self {
            file_ids,
            dependency_records,
            compression_mode,
            std_out,
            std_err,
            return_code,
        })
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::invalid_input(format!("corrupt compressed payload: {e}")))?;
    Ok(decompressed)
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_i32(out, data.len() as i32);
    out.extend_from_slice(data);
}

fn write_string_vec(out: &mut Vec<u8>, values: &[String]) {
    write_i32(out, values.len() as i32);
    for value in values {
        write_bytes(out, value.as_bytes());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            return Err(Error::invalid_input(
                "premature end of serialized data stream",
            ));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| Error::invalid_input(format!("negative length in data stream: {count}")))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| Error::invalid_input(format!("invalid UTF-8 in data stream: {e}")))
    }

    fn read_string_vec(&mut self) -> Result<Vec<String>> {
        let count = self.read_count()?;
        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    fn read_legacy_string_map(&mut self) -> Result<Vec<(String, String)>> {
        let count = self.read_count()?;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn read_digest(&mut self) -> Result<Digest> {
        let bytes = self.take(Digest::SIZE)?;
        let mut raw = [0u8; Digest::SIZE];
        raw.copy_from_slice(bytes);
        Ok(Digest::from_bytes(raw))
    }

    fn read_dependency_records(&mut self) -> Result<DependencyRecords> {
        let count = self.read_count()?;
        let mut records = DependencyRecords::new();
        for _ in 0..count {
            let path = self.read_string()?;
            let digest = self.read_digest()?;
            records.insert(path, digest);
        }
        Ok(records)
    }
}
