//! Digest tap over the merged output stream.
//!
//! The algorithm is fixed at construction; snapshots are taken by cloning
//! the running state and finalizing the clone, so a mid-stream digest
//! reflects exactly the bytes emitted so far without disturbing the tap.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{XgetError, XgetResult};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    /// Parse a user-supplied algorithm name.
    ///
    /// Accepts the common spellings (`sha256`, `sha-256`, `SHA256`).
    pub fn parse(name: &str) -> XgetResult<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(XgetError::HashUnsupported(name.to_string())),
        }
    }
}

#[derive(Clone)]
enum State {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Running digest over the reassembled byte stream.
#[derive(Clone)]
pub struct HasherTap {
    state: State,
    bytes_seen: u64,
}

impl HasherTap {
    pub fn new(algo: HashAlgo) -> Self {
        let state = match algo {
            HashAlgo::Md5 => State::Md5(Md5::new()),
            HashAlgo::Sha1 => State::Sha1(Sha1::new()),
            HashAlgo::Sha224 => State::Sha224(Sha224::new()),
            HashAlgo::Sha256 => State::Sha256(Sha256::new()),
            HashAlgo::Sha384 => State::Sha384(Sha384::new()),
            HashAlgo::Sha512 => State::Sha512(Sha512::new()),
        };
        Self {
            state,
            bytes_seen: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            State::Md5(h) => h.update(chunk),
            State::Sha1(h) => h.update(chunk),
            State::Sha224(h) => h.update(chunk),
            State::Sha256(h) => h.update(chunk),
            State::Sha384(h) => h.update(chunk),
            State::Sha512(h) => h.update(chunk),
        }
        self.bytes_seen += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Digest of everything consumed so far, as raw bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        match self.state.clone() {
            State::Md5(h) => h.finalize().to_vec(),
            State::Sha1(h) => h.finalize().to_vec(),
            State::Sha224(h) => h.finalize().to_vec(),
            State::Sha256(h) => h.finalize().to_vec(),
            State::Sha384(h) => h.finalize().to_vec(),
            State::Sha512(h) => h.finalize().to_vec(),
        }
    }

    /// Digest of everything consumed so far, lowercase hex.
    pub fn snapshot_hex(&self) -> String {
        hex::encode(self.snapshot())
    }
}

impl std::fmt::Debug for HasherTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HasherTap")
            .field("bytes_seen", &self.bytes_seen)
            .finish_non_exhaustive()
    }
}
