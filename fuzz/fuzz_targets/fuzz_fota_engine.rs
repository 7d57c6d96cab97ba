//! Fuzz target: `FotaEngine::handle`
//!
//! Interprets the fuzz input as a stream of newline-separated JSON frames
//! and pushes every object at the FOTA state machine over a permissive
//! in-memory store. The engine must never panic and must sit at `Idle`
//! right after any non-probe error.
//!
//! cargo fuzz run fuzz_fota_engine

#![no_main]

use admlink::agent::ports::{FOTA_RECORD_WORDS, FotaRecord, FotaStore, StoreError};
use admlink::fota::{FotaEngine, FotaGate};
use libfuzzer_sys::fuzz_target;

struct LenientFlash;

impl FotaStore for LenientFlash {
    fn get_record(&mut self) -> Result<FotaRecord, StoreError> {
        let mut words = [0u32; FOTA_RECORD_WORDS];
        words[0] = 1;
        words[1] = 2;
        words[4] = 3;
        words[8] = 16;
        Ok(FotaRecord(words))
    }

    fn find_bytecode_slot(&mut self) -> i64 {
        0x1000
    }

    fn find_vm_slot(&mut self) -> i64 {
        0x8000
    }

    fn erase_slot(&mut self, _addr: u32, _size: u32) -> Result<(), StoreError> {
        Ok(())
    }

    fn write_slot(&mut self, _addr: u32, _data: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    fn checksum_slot(&mut self, _addr: u32, _size: u32) -> Result<Vec<u8>, StoreError> {
        Ok(vec![0xCD])
    }

    fn close_slot(&mut self, _addr: u32) -> Result<(), StoreError> {
        Ok(())
    }

    fn attempt(&mut self, _bc: u32, _vm: u32) -> Result<(), StoreError> {
        Ok(())
    }

    fn accept(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut engine = FotaEngine::new();
    let mut flash = LenientFlash;
    let gate = FotaGate::new(None);

    for line in data.split(|&b| b == b'\n') {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(line) else {
            continue;
        };
        if let serde_json::Value::Object(msg) = value {
            let _ = engine.handle(&msg, &mut flash, &gate);
        }
    }
});
