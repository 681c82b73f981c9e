//! Boot image header layout for the ESP32 family.
//! Only the leading fields are needed to vet an incoming image.

/// First byte of every bootable application image.
pub const ESP_IMAGE_MAGIC: u8 = 0xE9;

/// Bytes needed to parse an [`ImageHeader`].
pub const IMAGE_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    Qio,
    Qout,
    Dio,
    Dout,
    Unknown(u8),
}

impl From<u8> for SpiMode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => SpiMode::Qio,
            1 => SpiMode::Qout,
            2 => SpiMode::Dio,
            3 => SpiMode::Dout,
            other => SpiMode::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u8,
    pub segment_count: u8,
    pub spi_mode: SpiMode,
    /// High nibble: flash size code, low nibble: flash frequency code.
    pub flash_config: u8,
}

impl ImageHeader {
    /// Parse the leading bytes of an image. `None` if fewer than
    /// [`IMAGE_HEADER_LEN`] bytes are given.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < IMAGE_HEADER_LEN {
            return None;
        }
        Some(Self {
            magic: bytes[0],
            segment_count: bytes[1],
            spi_mode: SpiMode::from(bytes[2]),
            flash_config: bytes[3],
        })
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == ESP_IMAGE_MAGIC
    }

    pub fn flash_size_code(&self) -> u8 {
        (self.flash_config & 0xF0) >> 4
    }

    /// Flash chip size the image was built for, in bytes.
    pub fn flash_size(&self) -> Option<u64> {
        flash_size_from_code(self.flash_size_code())
    }
}

/// Size code 0..=7 maps to 1, 2, 4 ... 128 MiB.
pub fn flash_size_from_code(code: u8) -> Option<u64> {
    if code > 7 {
        return None;
    }
    Some((1024 * 1024) << code)
}
