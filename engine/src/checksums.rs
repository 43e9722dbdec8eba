//! Content hashing.
//!
//! This module provides:
//! - Multiple digest algorithms (CRC32, MD5, SHA-256, BLAKE3) behind one interface
//! - Streaming file digests with optional progress reporting
//! - Post-copy verification of source against destination
//!
//! Algorithms are selected by caller-facing names such as `"SHA-256"` or
//! `"CRC32"`; an unknown name is an error, never a silent fallback.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default read size for hashing.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// CRC32 (fast, 32-bit, not collision resistant)
    Crc32,
    /// MD5 (deprecated, but included for compatibility)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit, optionally keyed)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc32 => write!(f, "CRC32"),
            Self::Md5 => write!(f, "MD5"),
            Self::Sha256 => write!(f, "SHA-256"),
            Self::Blake3 => write!(f, "BLAKE3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = EngineError;

    /// Case-insensitive; `-` and `_` are ignored, so `"SHA-256"` and
    /// `"sha256"` name the same algorithm.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "crc32" => Ok(Self::Crc32),
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            _ => Err(EngineError::UnsupportedAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    /// Get the algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the lowercase hex representation
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for computing checksums
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

const CRC32_TABLE: [u32; 256] = crc32_table();

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ 0xedb88320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32 (IEEE) of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.crc ^ 0xffffffff
}

/// CRC32 hasher
struct Crc32Hasher {
    crc: u32,
}

impl Crc32Hasher {
    fn new() -> Self {
        Crc32Hasher { crc: 0xffffffff }
    }
}

impl ChecksumHasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.crc ^ byte as u32) & 0xff) as usize;
            self.crc = (self.crc >> 8) ^ CRC32_TABLE[index];
        }
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Crc32,
            format!("{:08x}", self.crc ^ 0xffffffff),
        )
    }
}

/// MD5 hasher (backed by md5 crate)
struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

/// SHA-256 hasher (backed by sha2 crate)
struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

/// BLAKE3 hasher (backed by blake3 crate)
struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm.
///
/// A key is only accepted by BLAKE3.
pub fn create_hasher(
    algorithm: ChecksumAlgorithm,
    key: Option<&[u8; 32]>,
) -> Result<Box<dyn ChecksumHasher>, EngineError> {
    if key.is_some() && algorithm != ChecksumAlgorithm::Blake3 {
        return Err(EngineError::KeyNotSupported {
            algorithm: algorithm.to_string(),
        });
    }
    let hasher: Box<dyn ChecksumHasher> = match algorithm {
        ChecksumAlgorithm::Crc32 => Box::new(Crc32Hasher::new()),
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: match key {
                Some(key) => blake3::Hasher::new_keyed(key),
                None => blake3::Hasher::new(),
            },
        }),
    };
    Ok(hasher)
}

/// Parameters of one file digest.
pub struct DigestRequest<'a> {
    pub path: &'a Path,
    pub buffer_size: usize,
    pub algorithm: ChecksumAlgorithm,
    pub key: Option<&'a [u8; 32]>,
    /// Called after each chunk with `(total_bytes, bytes_processed)`
    pub progress: Option<&'a dyn Fn(u64, u64)>,
}

impl<'a> DigestRequest<'a> {
    pub fn new(path: &'a Path, algorithm: ChecksumAlgorithm) -> Self {
        DigestRequest {
            path,
            buffer_size: DEFAULT_BUFFER_SIZE,
            algorithm,
            key: None,
            progress: None,
        }
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn key(mut self, key: &'a [u8; 32]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn progress(mut self, progress: &'a dyn Fn(u64, u64)) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Stream a file through the requested digest.
///
/// The result does not depend on `buffer_size`; a zero buffer is rejected
/// before the file is touched.
pub fn hash_file(request: &DigestRequest<'_>) -> Result<ChecksumValue, EngineError> {
    if request.buffer_size == 0 {
        return Err(EngineError::ZeroBufferSize);
    }
    let mut hasher = create_hasher(request.algorithm, request.key)?;

    let read_error = |e: io::Error| EngineError::ReadError {
        path: request.path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(request.path).map_err(read_error)?;
    let total = file.metadata().map_err(read_error)?.len();

    let mut buffer = vec![0u8; request.buffer_size];
    let mut processed: u64 = 0;
    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        hasher.update(&buffer[..n]);
        processed += n as u64;
        if let Some(progress) = request.progress {
            progress(total, processed);
        }
    }

    Ok(hasher.finalize())
}

/// Hash a file with an algorithm named by the caller, returning lowercase hex.
pub fn hash_file_named(
    path: &Path,
    buffer_size: usize,
    algorithm: &str,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<String, EngineError> {
    if buffer_size == 0 {
        return Err(EngineError::ZeroBufferSize);
    }
    let algorithm: ChecksumAlgorithm = algorithm.parse()?;
    let request = DigestRequest {
        path,
        buffer_size,
        algorithm,
        key: None,
        progress,
    };
    Ok(hash_file(&request)?.hex)
}

/// Hash source and destination and fail with `ChecksumMismatch` if they differ.
pub fn verify_copy(
    source: &Path,
    destination: &Path,
    algorithm: ChecksumAlgorithm,
    buffer_size: usize,
) -> Result<ChecksumValue, EngineError> {
    let expected = hash_file(&DigestRequest::new(source, algorithm).buffer_size(buffer_size))?;
    let actual = hash_file(&DigestRequest::new(destination, algorithm).buffer_size(buffer_size))?;
    if expected != actual {
        return Err(EngineError::ChecksumMismatch {
            path: destination.to_path_buf(),
            expected: expected.hex,
            actual: actual.hex,
        });
    }
    Ok(actual)
}
