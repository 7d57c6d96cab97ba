//! `FotaStore` adapter over the ESP-IDF OTA partition API.
//!
//! The slot model maps onto IDF app partitions: the bytecode image is the
//! application binary, the partition table fixes placement, and the IDF
//! verifies images itself at finalize — so `checksum_slot` reports
//! "no checksum" and the wire CRC step is skipped. There is no separately
//! updatable VM image on this platform; `find_vm_slot` returns the no-erase
//! sentinel and `attempt` switches the boot partition as a whole.
//!
//! Rollback protection comes for free: `attempt` marks the new partition
//! tentative, and the next boot's `accept` (driven by the login path) calls
//! `mark_app_valid`.

use log::{info, warn};

use crate::agent::ports::{FOTA_RECORD_WORDS, FotaRecord, FotaStore, StoreError};

/// Transfer chunk size advertised in the bootloader record at login.
const CHUNK_SIZE: u32 = 4096;

/// ESP-IDF `FotaStore` backed by the `esp-ota` crate.
pub struct EspFotaStore {
    update: Option<esp_ota::OtaUpdate>,
}

impl Default for EspFotaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EspFotaStore {
    pub fn new() -> Self {
        Self { update: None }
    }

    fn running_slot() -> u32 {
        unsafe {
            let part = esp_idf_svc::sys::esp_ota_get_running_partition();
            if part.is_null() {
                0
            } else {
                u32::from((*part).subtype)
            }
        }
    }

    fn next_slot_addr() -> i64 {
        unsafe {
            let part = esp_idf_svc::sys::esp_ota_get_next_update_partition(core::ptr::null());
            if part.is_null() {
                0
            } else {
                i64::from((*part).address)
            }
        }
    }
}

impl FotaStore for EspFotaStore {
    fn get_record(&mut self) -> Result<FotaRecord, StoreError> {
        let mut words = [0u32; FOTA_RECORD_WORDS];
        words[0] = 1; // the bootloader booted us, the image is committed
        words[1] = 0; // single VM slot on this platform
        words[4] = Self::running_slot();
        words[8] = CHUNK_SIZE;
        Ok(FotaRecord(words))
    }

    fn find_bytecode_slot(&mut self) -> i64 {
        Self::next_slot_addr()
    }

    fn find_vm_slot(&mut self) -> i64 {
        0
    }

    fn erase_slot(&mut self, _addr: u32, size: u32) -> Result<(), StoreError> {
        // begin() selects and erases the inactive partition.
        info!("opening OTA partition ({size} bytes)");
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("ota begin failed: {e:?}");
            StoreError::EraseFailed
        })?;
        self.update = Some(update);
        Ok(())
    }

    fn write_slot(&mut self, _addr: u32, data: &[u8]) -> Result<(), StoreError> {
        // Blocks arrive strictly in order, so sequential partition writes
        // line up with the strided addresses the engine computes.
        match self.update.as_mut() {
            Some(update) => update.write(data).map_err(|e| {
                warn!("ota write failed: {e:?}");
                StoreError::WriteFailed
            }),
            None => Err(StoreError::WriteFailed),
        }
    }

    fn checksum_slot(&mut self, _addr: u32, _size: u32) -> Result<Vec<u8>, StoreError> {
        // The IDF validates the image at finalize.
        Ok(Vec::new())
    }

    fn close_slot(&mut self, _addr: u32) -> Result<(), StoreError> {
        Ok(())
    }

    fn attempt(&mut self, bc_slot: u32, vm_slot: u32) -> Result<(), StoreError> {
        let update = self.update.take().ok_or(StoreError::AttemptFailed)?;
        let mut completed = update.finalize().map_err(|e| {
            warn!("ota finalize failed: {e:?}");
            StoreError::AttemptFailed
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("set boot partition failed: {e:?}");
            StoreError::AttemptFailed
        })?;
        info!("boot partition switched (bc slot {bc_slot}, vm slot {vm_slot})");
        Ok(())
    }

    fn accept(&mut self) -> Result<(), StoreError> {
        esp_ota::mark_app_valid().map_err(|e| {
            warn!("mark_app_valid failed: {e:?}");
            StoreError::AcceptFailed
        })
    }
}
