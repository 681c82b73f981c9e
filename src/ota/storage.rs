// Flash-backed storage target: OTA app slots and the SPIFFS data partition

use core::ffi::c_void;
use esp_idf_svc::ota::{EspOta, EspOtaUpdate};
use esp_idf_sys::{
    esp_ota_get_next_update_partition, esp_partition_erase_range, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write, gpio_mode_t_GPIO_MODE_OUTPUT,
    gpio_reset_pin, gpio_set_direction, gpio_set_level, EspError, ESP_ERR_NOT_FOUND,
};
use md5::{Digest, Md5};
use update_core::integrity::MD5_HEX_LEN;
use update_core::storage::reject_staged;
use update_core::{ActivityLed, StorageError, StorageTarget, TargetKind, WriteSession};

const FLASH_SECTOR_SIZE: u64 = 4096;

fn storage_error(e: EspError, fallback: i32) -> StorageError {
    log::error!("Flash operation failed: {}", e);
    if e.code() == ESP_ERR_NOT_FOUND as i32 {
        StorageError::new(StorageError::NO_PARTITION)
    } else {
        StorageError::new(fallback)
    }
}

fn check(code: i32, fallback: i32) -> Result<(), StorageError> {
    EspError::convert(code).map_err(|e| storage_error(e, fallback))
}

/// Raw data partition (SPIFFS image slot).
#[derive(Clone, Copy)]
struct DataPartition(*const esp_partition_t);

impl DataPartition {
    fn find() -> Option<Self> {
        let partition = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                core::ptr::null(),
            )
        };
        (!partition.is_null()).then_some(Self(partition))
    }

    fn size(&self) -> u64 {
        unsafe { (*self.0).size as u64 }
    }

    fn erase(&self, len: u64) -> Result<(), StorageError> {
        let aligned = len.div_ceil(FLASH_SECTOR_SIZE) * FLASH_SECTOR_SIZE;
        let aligned = aligned.min(self.size());
        check(
            unsafe { esp_partition_erase_range(self.0, 0, aligned as usize) },
            StorageError::ERASE,
        )
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        check(
            unsafe { esp_partition_write(self.0, offset as usize, bytes.as_ptr() as *const c_void, bytes.len()) },
            StorageError::WRITE,
        )
    }
}

fn set_led(led: Option<ActivityLed>, lit: bool) {
    if let Some(led) = led {
        if let Err(e) = EspError::convert(unsafe { gpio_set_level(led.pin, led.level(lit)) }) {
            log::warn!("Activity LED on GPIO{}: {}", led.pin, e);
        }
    }
}

pub struct EspStorage {
    ota: EspOta,
    data: Option<DataPartition>,
    led: Option<ActivityLed>,
}

impl EspStorage {
    pub fn new() -> anyhow::Result<Self> {
        let ota = EspOta::new()?;
        let data = DataPartition::find();
        if data.is_none() {
            log::info!("No SPIFFS partition, data updates disabled");
        }
        Ok(Self { ota, data, led: None })
    }

    /// Light `led` while image bytes are being written.
    pub fn with_activity_led(mut self, led: Option<ActivityLed>) -> anyhow::Result<Self> {
        if let Some(led) = led {
            EspError::convert(unsafe { gpio_reset_pin(led.pin) })?;
            EspError::convert(unsafe { gpio_set_direction(led.pin, gpio_mode_t_GPIO_MODE_OUTPUT) })?;
            log::info!("Flash activity LED on GPIO{}", led.pin);
        }
        self.led = led;
        set_led(led, false);
        Ok(self)
    }

    /// Confirm the running image so the bootloader does not roll it back.
    pub fn mark_running_slot_valid(&mut self) -> anyhow::Result<()> {
        self.ota.mark_running_slot_valid()?;
        Ok(())
    }

    fn next_app_slot_size(&self) -> Option<u64> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return None;
        }
        Some(unsafe { (*partition).size as u64 })
    }
}

impl StorageTarget for EspStorage {
    type Session<'a> = EspWriteSession<'a>;

    fn capacity_for(&self, kind: TargetKind) -> Option<u64> {
        match kind {
            TargetKind::Executable => self.next_app_slot_size(),
            TargetKind::AuxiliaryData => self.data.map(|p| p.size()),
        }
    }

    fn begin_write(&mut self, kind: TargetKind, size: u64) -> Result<EspWriteSession<'_>, StorageError> {
        if size == 0 {
            return Err(StorageError::new(StorageError::SIZE));
        }
        let capacity = self
            .capacity_for(kind)
            .filter(|c| *c > 0)
            .ok_or(StorageError::new(StorageError::NO_PARTITION))?;
        if size > capacity {
            return Err(StorageError::new(StorageError::SPACE));
        }

        let sink = match kind {
            TargetKind::Executable => {
                let update = self
                    .ota
                    .initiate_update()
                    .map_err(|e| storage_error(e, StorageError::ERASE))?;
                Sink::App(update)
            }
            TargetKind::AuxiliaryData => {
                let partition = self.data.ok_or(StorageError::new(StorageError::NO_PARTITION))?;
                log::info!("Erasing {} bytes of the data partition", size);
                partition.erase(size)?;
                Sink::Data(partition)
            }
        };

        Ok(EspWriteSession {
            sink,
            size,
            written: 0,
            hasher: Md5::new(),
            expected_md5: None,
            led: self.led,
        })
    }
}

enum Sink<'a> {
    App(EspOtaUpdate<'a>),
    Data(DataPartition),
}

impl Sink<'_> {
    /// Leave the target unbootable/unmountable rather than half written.
    fn discard(self) -> Result<(), StorageError> {
        match self {
            Sink::App(update) => update.abort().map_err(|e| storage_error(e, StorageError::ABORTED)),
            Sink::Data(partition) => partition.erase(FLASH_SECTOR_SIZE),
        }
    }
}

pub struct EspWriteSession<'a> {
    sink: Sink<'a>,
    size: u64,
    written: u64,
    hasher: Md5,
    expected_md5: Option<String>,
    led: Option<ActivityLed>,
}

impl EspWriteSession<'_> {
    fn reject(self, error: i32) -> Result<(), StorageError> {
        reject_staged(|| self.sink.discard(), error)
    }
}

impl WriteSession for EspWriteSession<'_> {
    fn set_checksum(&mut self, md5_hex: &str) -> Result<(), StorageError> {
        if self.written > 0 || md5_hex.len() != MD5_HEX_LEN || !md5_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::new(StorageError::BAD_ARGUMENT));
        }
        self.expected_md5 = Some(md5_hex.to_ascii_lowercase());
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, StorageError> {
        if self.written + bytes.len() as u64 > self.size {
            return Err(StorageError::new(StorageError::SPACE));
        }

        set_led(self.led, true);
        let result = match &mut self.sink {
            Sink::App(update) => update.write(bytes).map_err(|e| storage_error(e, StorageError::WRITE)),
            Sink::Data(partition) => partition.write(self.written, bytes),
        };
        set_led(self.led, false);
        result?;

        self.hasher.update(bytes);
        self.written += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn finalize(self) -> Result<(), StorageError> {
        if self.written != self.size {
            log::error!("Image incomplete: {} of {} bytes", self.written, self.size);
            return self.reject(StorageError::SIZE);
        }

        let actual = hex::encode(self.hasher.clone().finalize());
        if let Some(expected) = &self.expected_md5 {
            if *expected != actual {
                log::error!("MD5 mismatch: expected {}, calculated {}", expected, actual);
                return self.reject(StorageError::CHECKSUM_MISMATCH);
            }
        }
        log::info!("Image MD5 {}", actual);

        match self.sink {
            Sink::App(update) => update.complete().map_err(|e| storage_error(e, StorageError::ACTIVATE)),
            Sink::Data(_) => Ok(()),
        }
    }

    fn abort(self) -> Result<(), StorageError> {
        log::warn!("Discarding staged image after {} bytes", self.written);
        self.sink.discard()
    }
}
