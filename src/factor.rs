//! authentication factors and share vaults
//!
//! both physical variants hide behind one capability trait, [`ShareVault`]:
//! await a physical authentication event, store/load one sealed share per
//! event, commit the durable record once everything is stored, release the
//! peripheral on the way out.
//!
//! - [`FingerVault`]: fingerprint-gated, shares in a flat json record file
//! - [`TokenVault`]: tag-gated, shares chunked onto the tag's data blocks,
//!   with a manifest file recording each share's ciphertext length

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::blocks::{self, BlockMedium, DATA_BASE_BLOCK};
use crate::codec::ShareRecord;
use crate::device::{FingerprintDevice, TagReader};
use crate::{Error, Result};

/// transient proof of one physical interaction. never persisted.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub label: String,
}

/// capability surface the protocol coordinator drives.
///
/// one `await_event` gates exactly one `store_share`/`load_share`: binding a
/// physical instant to a single share means a captured factor event leaks at
/// most one share.
pub trait ShareVault {
    /// block until a physical authentication event occurs. transient
    /// capture failures are retried with operator feedback; only fatal
    /// device errors surface.
    fn await_event(&mut self, prompt: &str) -> Result<AuthEvent>;

    /// stage or persist the sealed share for index `index`. indices arrive
    /// in order, one per authentication event.
    fn store_share(&mut self, index: usize, ciphertext: &str) -> Result<()>;

    /// write the durable record. called exactly once, only after every
    /// share was stored - nothing durable exists before this point.
    fn commit(&mut self) -> Result<()>;

    /// load the durable record, returning the share count
    fn open(&mut self) -> Result<usize>;

    /// retrieve the sealed share for index `index` (after an event)
    fn load_share(&mut self, index: usize) -> Result<String>;

    /// deauthenticate / idle the peripheral. idempotent.
    fn release(&mut self);
}

/// outcome of the enroll ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// the finger is already registered; nothing was overwritten
    AlreadyEnrolled { position: u16 },
    Enrolled { position: u16 },
}

enum EnrollCycle {
    Known(u16),
    Matched,
    Mismatch,
}

/// fingerprint-gated vault backed by a flat record file
pub struct FingerVault<D: FingerprintDevice> {
    device: D,
    record_path: PathBuf,
    staged: Vec<String>,
    record: Option<ShareRecord>,
    removal_pause: Duration,
}

impl<D: FingerprintDevice> FingerVault<D> {
    pub fn new(device: D, record_path: &Path) -> Self {
        Self {
            device,
            record_path: record_path.to_path_buf(),
            staged: Vec::new(),
            record: None,
            removal_pause: Duration::from_secs(2),
        }
    }

    pub fn with_removal_pause(mut self, pause: Duration) -> Self {
        self.removal_pause = pause;
        self
    }

    /// poll the sensor until an image converts into slot `slot`
    fn capture(&mut self, slot: u8) -> Result<()> {
        while !self.device.read_image()? {}
        self.device.convert(slot)
    }

    /// one enroll capture cycle: two samples of the same finger
    fn enroll_cycle(&mut self) -> Result<EnrollCycle> {
        println!("Waiting for finger...");
        self.capture(1)?;
        if let Some(position) = self.device.search()? {
            return Ok(EnrollCycle::Known(position));
        }

        println!("Remove finger...");
        std::thread::sleep(self.removal_pause);
        println!("Place same finger again...");
        self.capture(2)?;

        if self.device.compare()? {
            Ok(EnrollCycle::Matched)
        } else {
            Ok(EnrollCycle::Mismatch)
        }
    }

    /// register a new finger. an already-known finger aborts cleanly
    /// without overwriting; a sample mismatch restarts the two-capture
    /// cycle, not the whole operation.
    pub fn enroll(&mut self) -> Result<EnrollOutcome> {
        loop {
            match self.enroll_cycle() {
                Ok(EnrollCycle::Known(position)) => {
                    return Ok(EnrollOutcome::AlreadyEnrolled { position });
                }
                Ok(EnrollCycle::Matched) => break,
                Ok(EnrollCycle::Mismatch) => {
                    println!("Fingerprints do not match, try again");
                }
                Err(Error::Capture(reason)) => {
                    warn!(%reason, "error processing fingerprint, try again");
                }
                Err(e) => return Err(e),
            }
        }

        self.device.create_template()?;
        let position = self.device.store_template()?;
        Ok(EnrollOutcome::Enrolled { position })
    }
}

impl<D: FingerprintDevice> ShareVault for FingerVault<D> {
    fn await_event(&mut self, prompt: &str) -> Result<AuthEvent> {
        println!("{prompt}");
        loop {
            println!("Waiting for finger...");
            let found = self
                .capture(1)
                .and_then(|()| self.device.search());
            match found {
                Ok(Some(position)) => {
                    return Ok(AuthEvent {
                        label: format!("finger #{position}"),
                    });
                }
                Ok(None) => println!("No match found!"),
                Err(Error::Capture(reason)) => {
                    warn!(%reason, "error processing fingerprint, try again");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn store_share(&mut self, index: usize, ciphertext: &str) -> Result<()> {
        if index != self.staged.len() {
            return Err(Error::Protocol(format!(
                "share {index} stored out of order (expected {})",
                self.staged.len()
            )));
        }
        self.staged.push(ciphertext.to_string());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        ShareRecord::new(self.staged.clone()).save(&self.record_path)
    }

    fn open(&mut self) -> Result<usize> {
        let record = ShareRecord::load(&self.record_path)?;
        let count = record.len();
        self.record = Some(record);
        Ok(count)
    }

    fn load_share(&mut self, index: usize) -> Result<String> {
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| Error::Protocol("record not opened".into()))?;
        record
            .encrypted_keys
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("no share at index {index}")))
    }

    fn release(&mut self) {}
}

/// manifest persisted alongside the key file for the token variant.
/// records each share's ciphertext byte length so the read side derives the
/// block count instead of hardcoding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenManifest {
    lengths: Vec<usize>,
}

/// tag reader with per-block sector authentication, viewed as a block medium
struct AuthedMedium<'a, R: TagReader>(&'a mut R);

impl<R: TagReader> BlockMedium for AuthedMedium<'_, R> {
    fn write_block(&mut self, index: u8, data: &[u8; 16]) -> Result<()> {
        self.0.auth_block(index)?;
        self.0.write_block(index, data)
    }

    fn read_block(&mut self, index: u8) -> Result<[u8; 16]> {
        self.0.auth_block(index)?;
        self.0.read_block(index)
    }
}

/// tag-gated vault: one share per tag, chunked onto its data blocks
pub struct TokenVault<R: TagReader> {
    reader: R,
    manifest_path: PathBuf,
    staged_lengths: Vec<usize>,
    lengths: Option<Vec<usize>>,
}

impl<R: TagReader> TokenVault<R> {
    pub fn new(reader: R, manifest_path: &Path) -> Self {
        Self {
            reader,
            manifest_path: manifest_path.to_path_buf(),
            staged_lengths: Vec::new(),
            lengths: None,
        }
    }
}

impl<R: TagReader> ShareVault for TokenVault<R> {
    fn await_event(&mut self, prompt: &str) -> Result<AuthEvent> {
        println!("{prompt}");
        loop {
            let found = self
                .reader
                .wait_for_tag()
                .and_then(|uid| self.reader.select(&uid).map(|()| uid));
            match found {
                Ok(uid) => {
                    println!("Tag detected with UID: {uid}");
                    return Ok(AuthEvent {
                        label: uid.to_string(),
                    });
                }
                Err(Error::Capture(reason)) => {
                    warn!(%reason, "tag not readable, try again");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn store_share(&mut self, index: usize, ciphertext: &str) -> Result<()> {
        if index != self.staged_lengths.len() {
            return Err(Error::Protocol(format!(
                "share {index} stored out of order (expected {})",
                self.staged_lengths.len()
            )));
        }
        let bytes = ciphertext.as_bytes();
        blocks::write(&mut AuthedMedium(&mut self.reader), DATA_BASE_BLOCK, bytes)?;
        self.staged_lengths.push(bytes.len());
        println!("Tag saved! Remove tag");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let manifest = TokenManifest {
            lengths: self.staged_lengths.clone(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Format(e.to_string()))?;
        std::fs::write(&self.manifest_path, json).map_err(|e| Error::Storage(e.to_string()))
    }

    fn open(&mut self) -> Result<usize> {
        let json = std::fs::read_to_string(&self.manifest_path)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let manifest: TokenManifest =
            serde_json::from_str(&json).map_err(|e| Error::Format(e.to_string()))?;
        let count = manifest.lengths.len();
        self.lengths = Some(manifest.lengths);
        Ok(count)
    }

    fn load_share(&mut self, index: usize) -> Result<String> {
        let len = *self
            .lengths
            .as_ref()
            .ok_or_else(|| Error::Protocol("record not opened".into()))?
            .get(index)
            .ok_or_else(|| Error::Protocol(format!("no share at index {index}")))?;
        let raw = blocks::read(
            &mut AuthedMedium(&mut self.reader),
            DATA_BASE_BLOCK,
            blocks::blocks_for_len(len),
        )?;
        String::from_utf8(blocks::trim_zeros(raw))
            .map_err(|_| Error::Format("tag payload is not text".into()))
    }

    fn release(&mut self) {
        self.reader.halt();
    }
}

impl<R: TagReader> Drop for TokenVault<R> {
    // the antenna is idled on every exit path, interrupts included
    fn drop(&mut self) {
        self.reader.halt();
    }
}
