//! software device backends for development and testing
//!
//! no hardware involved, NOT a security boundary: the "fingerprint" is a
//! sha-256 digest of a sample typed on stdin, and a "tag" is a 64-block file
//! in a directory, named after the uid derived from a typed label. useful to
//! exercise every code path against a dev vault; production deployments
//! implement [`FingerprintDevice`]/[`TagReader`] against real drivers.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{FingerprintDevice, TagReader, TagUid};
use crate::{Error, Result};

const TAG_BLOCKS: usize = 64;

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout()
        .flush()
        .map_err(|e| Error::Capture(e.to_string()))?;
    let mut line = String::new();
    let n = std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| Error::Capture(e.to_string()))?;
    if n == 0 {
        return Err(Error::DeviceInit("stdin closed".into()));
    }
    Ok(line.trim().to_string())
}

fn digest(sample: &str) -> [u8; 32] {
    Sha256::digest(sample.as_bytes()).into()
}

/// stdin-driven fingerprint sensor; templates are digests in a json file
pub struct SoftwareFinger {
    path: PathBuf,
    templates: Vec<String>,
    slots: [Option<[u8; 32]>; 2],
    last_sample: Option<String>,
}

impl SoftwareFinger {
    pub fn open(path: &Path) -> Result<Self> {
        let templates = if path.exists() {
            let json = fs::read_to_string(path)
                .map_err(|e| Error::DeviceInit(e.to_string()))?;
            serde_json::from_str(&json).map_err(|e| Error::DeviceInit(e.to_string()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            templates,
            slots: [None, None],
            last_sample: None,
        })
    }

    fn save_templates(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.templates).map_err(|e| Error::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl FingerprintDevice for SoftwareFinger {
    fn read_image(&mut self) -> Result<bool> {
        let sample = prompt_line("  [software sensor] finger sample (enter to skip): ")?;
        if sample.is_empty() {
            return Ok(false);
        }
        self.last_sample = Some(sample);
        Ok(true)
    }

    fn convert(&mut self, slot: u8) -> Result<()> {
        let sample = self
            .last_sample
            .take()
            .ok_or_else(|| Error::Capture("no image captured".into()))?;
        let idx = match slot {
            1 => 0,
            2 => 1,
            _ => return Err(Error::Capture(format!("invalid slot {slot}"))),
        };
        self.slots[idx] = Some(digest(&sample));
        Ok(())
    }

    fn search(&mut self) -> Result<Option<u16>> {
        let probe = self.slots[0].ok_or_else(|| Error::Capture("slot 1 empty".into()))?;
        let probe_hex = hex::encode(probe);
        Ok(self
            .templates
            .iter()
            .position(|t| *t == probe_hex)
            .map(|p| p as u16))
    }

    fn compare(&mut self) -> Result<bool> {
        match (self.slots[0], self.slots[1]) {
            (Some(a), Some(b)) => Ok(a == b),
            _ => Err(Error::Capture("both slots required".into())),
        }
    }

    fn create_template(&mut self) -> Result<()> {
        if self.slots[0].is_none() || self.slots[1].is_none() {
            return Err(Error::Capture("both slots required".into()));
        }
        Ok(())
    }

    fn store_template(&mut self) -> Result<u16> {
        let tpl = self.slots[0].ok_or_else(|| Error::Capture("slot 1 empty".into()))?;
        self.templates.push(hex::encode(tpl));
        self.save_templates()?;
        Ok((self.templates.len() - 1) as u16)
    }
}

/// stdin-driven tag reader; each tag is a 1 KiB file of 64 blocks
pub struct SoftwareTag {
    dir: PathBuf,
    current: Option<PathBuf>,
}

impl SoftwareTag {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::DeviceInit(e.to_string()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            current: None,
        })
    }

    fn tag_file(&self) -> Result<fs::File> {
        let path = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Capture("no tag selected".into()))?;
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Capture(e.to_string()))
    }
}

impl TagReader for SoftwareTag {
    fn wait_for_tag(&mut self) -> Result<TagUid> {
        loop {
            let label = prompt_line("  [software reader] tag label: ")?;
            if label.is_empty() {
                continue;
            }
            let d = digest(&label);
            return Ok(TagUid([d[0], d[1], d[2], d[3]]));
        }
    }

    fn select(&mut self, uid: &TagUid) -> Result<()> {
        let path = self.dir.join(format!("{}.tag", hex::encode(uid.0)));
        if !path.exists() {
            fs::write(&path, vec![0u8; TAG_BLOCKS * 16])
                .map_err(|e| Error::Capture(e.to_string()))?;
        }
        self.current = Some(path);
        Ok(())
    }

    fn auth_block(&mut self, _block: u8) -> Result<()> {
        if self.current.is_none() {
            return Err(Error::Capture("no tag selected".into()));
        }
        Ok(())
    }

    fn read_block(&mut self, block: u8) -> Result<[u8; 16]> {
        let mut file = self.tag_file()?;
        file.seek(SeekFrom::Start(block as u64 * 16))
            .map_err(|e| Error::Medium {
                block,
                reason: e.to_string(),
            })?;
        let mut buf = [0u8; 16];
        file.read_exact(&mut buf).map_err(|e| Error::Medium {
            block,
            reason: e.to_string(),
        })?;
        Ok(buf)
    }

    fn write_block(&mut self, block: u8, data: &[u8; 16]) -> Result<()> {
        let mut file = self.tag_file()?;
        file.seek(SeekFrom::Start(block as u64 * 16))
            .map_err(|e| Error::Medium {
                block,
                reason: e.to_string(),
            })?;
        file.write_all(data).map_err(|e| Error::Medium {
            block,
            reason: e.to_string(),
        })
    }

    fn halt(&mut self) {
        self.current = None;
    }
}
