use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{HashError, HashResult};

const CHUNK_SIZE: usize = 8192;

/// Digest algorithms a package feed may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    /// Length in bytes of a raw digest produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }

    /// Parses an algorithm name as feeds spell it (`SHA512`, `sha-256`, `blake3`).
    ///
    /// # Errors
    ///
    /// * [`HashError::UnknownAlgorithm`] if the name is not recognised.
    pub fn from_name(name: &str) -> HashResult<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => {
                Err(HashError::UnknownAlgorithm {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Guesses the SHA family member from a raw digest length.
    fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(HashAlgorithm::Sha1),
            32 => Some(HashAlgorithm::Sha256),
            64 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashValue {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl HashValue {
    /// Wraps raw digest bytes, checking the length against the algorithm.
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> HashResult<Self> {
        if bytes.len() != algorithm.digest_len() {
            return Err(HashError::InvalidLength {
                algorithm: algorithm.name(),
                expected: algorithm.digest_len(),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            algorithm,
            bytes,
        })
    }

    /// Decodes an advertised base64 digest.
    ///
    /// When `algorithm` is `None` the `fallback` algorithm is used if the decoded
    /// length matches it, otherwise the algorithm is inferred from the length.
    ///
    /// # Errors
    ///
    /// * [`HashError::InvalidEncoding`] if the text is not canonical standard base64.
    /// * [`HashError::UnknownAlgorithm`] if `algorithm` names nothing we support.
    /// * [`HashError::InvalidLength`] if the digest has the wrong size.
    ///
    /// # Example
    ///
    /// ```
    /// use pkgfeed_utils::hash::{HashAlgorithm, HashValue};
    ///
    /// let hash = HashValue::decode("Kq5sNclPz7QV2+lfQIuc6R7oRu0=", None, HashAlgorithm::Sha512).unwrap();
    /// assert_eq!(hash.algorithm(), HashAlgorithm::Sha1);
    /// ```
    pub fn decode(
        encoded: &str,
        algorithm: Option<&str>,
        fallback: HashAlgorithm,
    ) -> HashResult<Self> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|err| {
            HashError::InvalidEncoding {
                input: encoded.to_string(),
                reason: err.to_string(),
            }
        })?;

        let algorithm = match algorithm.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => HashAlgorithm::from_name(name)?,
            None if bytes.len() == fallback.digest_len() => fallback,
            None => HashAlgorithm::from_digest_len(bytes.len()).unwrap_or(fallback),
        };

        Self::new(algorithm, bytes)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_base64())
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(chunk),
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
            Hasher::Blake3(h) => {
                h.update(chunk);
            }
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Computes and compares content digests.
///
/// Implementations must be pure: the same input always produces the same digest.
pub trait HashVerifier: Send + Sync {
    /// Algorithm assumed for advertised hashes that do not name one.
    fn default_algorithm(&self) -> HashAlgorithm;

    fn hasher(&self, algorithm: HashAlgorithm) -> Hasher {
        Hasher::new(algorithm)
    }

    /// Hashes everything `reader` yields, one chunk at a time.
    fn compute(&self, algorithm: HashAlgorithm, reader: &mut dyn Read) -> io::Result<Vec<u8>> {
        let mut hasher = self.hasher(algorithm);
        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }

    fn verify(&self, computed: &[u8], expected: &[u8]) -> bool {
        digest_eq(computed, expected)
    }
}

/// Default [`HashVerifier`] backed by the RustCrypto and blake3 implementations.
#[derive(Debug, Clone, Copy)]
pub struct CryptoHashProvider {
    algorithm: HashAlgorithm,
}

impl CryptoHashProvider {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
        }
    }
}

impl Default for CryptoHashProvider {
    fn default() -> Self {
        Self::new(HashAlgorithm::Sha512)
    }
}

impl HashVerifier for CryptoHashProvider {
    fn default_algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compares two digests: lengths first, then bytes in constant time.
pub fn digest_eq(computed: &[u8], expected: &[u8]) -> bool {
    if computed.len() != expected.len() {
        return false;
    }
    computed.ct_eq(expected).into()
}

/// Calculates the checksum of a file with the given algorithm.
///
/// The file is read in chunks, so large files are never loaded into memory at once.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
///
/// # Example
///
/// ```no_run
/// use pkgfeed_utils::error::HashResult;
/// use pkgfeed_utils::hash::{calculate_checksum, HashAlgorithm};
///
/// fn main() -> HashResult<()> {
///     let checksum = calculate_checksum("/path/to/file", HashAlgorithm::Sha256)?;
///     println!("Checksum is {}", checksum);
///     Ok(())
/// }
/// ```
pub fn calculate_checksum<P: AsRef<Path>>(
    file_path: P,
    algorithm: HashAlgorithm,
) -> HashResult<HashValue> {
    let file_path = file_path.as_ref();
    let read_failed = |err| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source: err,
        }
    };

    let mut file = File::open(file_path).map_err(read_failed)?;
    let digest = CryptoHashProvider::new(algorithm)
        .compute(algorithm, &mut file)
        .map_err(read_failed)?;

    HashValue::new(algorithm, digest)
}

/// Verifies the checksum of a file against an expected digest.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn verify_checksum<P: AsRef<Path>>(file_path: P, expected: &HashValue) -> HashResult<bool> {
    let actual = calculate_checksum(file_path, expected.algorithm())?;
    Ok(digest_eq(actual.as_bytes(), expected.as_bytes()))
}
