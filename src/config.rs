//! Redundant configuration records in non-volatile storage
//!
//! The sensor node keeps a small configuration record (boot counter,
//! revision counter) in an external EEPROM. The record is written to two
//! backup slots; each copy carries a CRC-32 and a revision number, and on
//! read the CRC-valid copy with the highest revision wins. Corrupt or
//! stale slots are rewritten to the authoritative value, so a power cut in
//! the middle of a save costs at most one slot.
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, info, warn};

/// Serialized record size: three u32 fields, reserved padding, CRC-32.
/// A multiple of the EEPROM page size.
pub const RECORD_SIZE: usize = 192;
/// Record layout version understood by this implementation
pub const CONFIG_VERSION: u32 = 1;
/// Number of backup slots, at consecutive [`RECORD_SIZE`] offsets
pub const NR_CONFIG_BACKUP: usize = 2;

const CRC_OFFSET: usize = RECORD_SIZE - 4;

const CONFIG_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Error {
    /// No slot could be written
    SaveFailed,
}

/// Error of the underlying storage device.
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct StorageError;

/// Byte-addressed non-volatile storage holding the config slots.
pub trait ConfigStorage {
    fn read(&mut self, offset: usize, data: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
}

/// The persisted configuration values.
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct SavedConfig {
    pub version: u32,
    pub boot_count: u32,
    pub revision: u32,
}

impl SavedConfig {
    /// Factory state: current layout version, counters at zero.
    pub fn default_record() -> Self {
        Self {
            version: CONFIG_VERSION,
            boot_count: 0,
            revision: 0,
        }
    }

    fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.boot_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.revision.to_le_bytes());
        // 12..CRC_OFFSET stays reserved
        let crc = CONFIG_CRC.checksum(&bytes[..CRC_OFFSET]);
        bytes[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Parse one slot; `None` for an unknown version or a CRC mismatch.
    fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Option<Self> {
        let stored_crc = u32::from_le_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        if CONFIG_CRC.checksum(&bytes[..CRC_OFFSET]) != stored_crc {
            return None;
        }
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != CONFIG_VERSION {
            return None;
        }
        Some(Self {
            version,
            boot_count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            revision: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Redundant record store on top of a [`ConfigStorage`].
pub struct ConfigStore<S> {
    storage: S,
}

impl<S: ConfigStorage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Persist `config` into every backup slot, bumping its revision.
    /// Fails only when no slot could be written.
    pub fn save(&mut self, config: &mut SavedConfig) -> Result<(), Error> {
        config.revision = config.revision.wrapping_add(1);
        let bytes = config.to_bytes();

        let mut failed = 0;
        for slot in 0..NR_CONFIG_BACKUP {
            if self.storage.write(slot * RECORD_SIZE, &bytes).is_err() {
                warn!("config slot {} write failed", slot);
                failed += 1;
            }
        }

        if failed == NR_CONFIG_BACKUP {
            Err(Error::SaveFailed)
        } else {
            Ok(())
        }
    }

    /// Load the authoritative configuration.
    ///
    /// The CRC-valid slot with the highest revision wins. When slots are
    /// corrupt, unreadable or disagree, every slot is resynchronized to
    /// the winning record; when no valid slot exists the factory record is
    /// installed.
    pub fn read(&mut self) -> Result<SavedConfig, Error> {
        let mut latest: Option<SavedConfig> = None;
        let mut out_of_sync = false;

        for slot in 0..NR_CONFIG_BACKUP {
            let mut bytes = [0u8; RECORD_SIZE];
            if self.storage.read(slot * RECORD_SIZE, &mut bytes).is_err() {
                warn!("config slot {} unreadable", slot);
                out_of_sync = true;
                continue;
            }
            match SavedConfig::from_bytes(&bytes) {
                Some(record) => {
                    debug!("config slot {} valid, revision {}", slot, record.revision);
                    match latest {
                        Some(best) if best.revision >= record.revision => {
                            if best.revision != record.revision {
                                out_of_sync = true;
                            }
                        }
                        Some(_) => {
                            out_of_sync = true;
                            latest = Some(record);
                        }
                        None => latest = Some(record),
                    }
                }
                None => {
                    info!("config slot {} invalid", slot);
                    out_of_sync = true;
                }
            }
        }

        let mut config = match latest {
            Some(config) => config,
            None => {
                warn!("no valid config slot, installing defaults");
                SavedConfig::default_record()
            }
        };

        if latest.is_none() || out_of_sync {
            self.save(&mut config)?;
        }

        Ok(config)
    }

    /// Boot-time ritual: load, count the boot, persist.
    pub fn boot(&mut self) -> Result<SavedConfig, Error> {
        let mut config = self.read()?;
        config.boot_count = config.boot_count.wrapping_add(1);
        self.save(&mut config)?;
        info!("boot count: {}", config.boot_count);
        debug!("config revision: {}", config.revision);
        Ok(config)
    }
}
