//! Intel-HEX firmware image loader
//!
//! Parses `.hex` files into contiguous memory blocks ready for DFU
//! download. Only the four record types produced by firmware builds are
//! consumed: data (`00`), end-of-file (`01`) and extended linear address
//! (`04`); everything else is ignored.
//!
//! The trailing per-record checksum byte is **not** validated, matching the
//! tooling this loader replaces. A corrupt image that still decodes as hex
//! will be flashed as-is, so pair this with the post-write verification
//! pass rather than relying on the file format to catch transfer damage.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Record type: data bytes at an address.
const RECORD_DATA: u32 = 0x00;
/// Record type: end of file.
const RECORD_EOF: u32 = 0x01;
/// Record type: upper 16 bits for subsequent data records.
const RECORD_EXT_LINEAR: u32 = 0x04;

/// One contiguous run of firmware bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Absolute start address (extended linear base applied).
    pub address: u32,
    /// The bytes to be written at `address`.
    pub data: Vec<u8>,
}

impl DataBlock {
    /// Number of bytes in the block.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the block carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A parsed firmware image.
///
/// Blocks appear in file order; well-formed hex files emit records in
/// ascending address order, so blocks are sorted and non-overlapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Contiguous runs of bytes, merged across adjacent data records.
    pub blocks: Vec<DataBlock>,
    /// Sum of all block lengths.
    pub total_bytes: usize,
}

impl FirmwareImage {
    /// Load and parse an Intel-HEX file.
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    /// Parse Intel-HEX text.
    ///
    /// Lines not starting with `:` are skipped. Parsing stops at the first
    /// end-of-file record.
    pub fn parse_str(text: &str) -> Result<Self> {
        let mut blocks: Vec<DataBlock> = Vec::new();
        let mut current: Option<DataBlock> = None;
        let mut extended_base: u32 = 0;

        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw_line.trim();
            if !line.starts_with(':') {
                continue;
            }

            let byte_count = hex_field(line, lineno, 1, 3)?;
            let address = hex_field(line, lineno, 3, 7)?;
            let record_type = hex_field(line, lineno, 7, 9)?;
            let data_end = 9 + byte_count as usize * 2;

            match record_type {
                RECORD_DATA => {
                    let data = decode_data(line, lineno, 9, data_end)?;
                    let full_address = extended_base + address;

                    match current.as_mut() {
                        Some(block)
                            if block.address as u64 + block.len() as u64
                                == full_address as u64 =>
                        {
                            block.data.extend_from_slice(&data);
                        }
                        _ => {
                            if let Some(block) = current.take() {
                                blocks.push(block);
                            }
                            current = Some(DataBlock {
                                address: full_address,
                                data,
                            });
                        }
                    }
                }
                RECORD_EOF => {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    break;
                }
                RECORD_EXT_LINEAR => {
                    let value = hex_field(line, lineno, 9, data_end)?;
                    extended_base = value << 16;
                }
                _ => {}
            }
        }

        // A file without an EOF record still yields whatever was read.
        if let Some(block) = current.take() {
            blocks.push(block);
        }

        let total_bytes = blocks.iter().map(DataBlock::len).sum();
        log::debug!(
            "parsed hex image: {} blocks, {} bytes",
            blocks.len(),
            total_bytes
        );

        Ok(FirmwareImage {
            blocks,
            total_bytes,
        })
    }
}

/// Decode the ASCII-hex characters at `line[start..end]` as one number.
fn hex_field(line: &str, lineno: usize, start: usize, end: usize) -> Result<u32> {
    let field = line.get(start..end).ok_or_else(|| Error::HexFormat {
        line: lineno,
        reason: "record truncated".into(),
    })?;
    u32::from_str_radix(field, 16).map_err(|_| Error::HexFormat {
        line: lineno,
        reason: format!("invalid hex digits {field:?}"),
    })
}

/// Decode the data field `line[start..end]` into bytes.
fn decode_data(line: &str, lineno: usize, start: usize, end: usize) -> Result<Vec<u8>> {
    let field = line.get(start..end).ok_or_else(|| Error::HexFormat {
        line: lineno,
        reason: "record truncated".into(),
    })?;
    let mut data = Vec::with_capacity(field.len() / 2);
    for i in (0..field.len()).step_by(2) {
        // Pair boundaries can land inside a multi-byte character.
        let pair = field.get(i..i + 2).ok_or_else(|| Error::HexFormat {
            line: lineno,
            reason: format!("invalid hex digits {field:?}"),
        })?;
        let byte = u8::from_str_radix(pair, 16).map_err(|_| Error::HexFormat {
            line: lineno,
            reason: format!("invalid hex digits {pair:?}"),
        })?;
        data.push(byte);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_parses_to_one_block() {
        let image = FirmwareImage::parse_str(
            ":10000000000102030405060708090A0B0C0D0E0F78\n:00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.blocks[0].address, 0);
        assert_eq!(image.blocks[0].len(), 16);
        assert_eq!(image.total_bytes, 16);
        assert_eq!(image.blocks[0].data[0], 0x00);
        assert_eq!(image.blocks[0].data[15], 0x0F);
    }

    #[test]
    fn contiguous_records_merge_into_one_block() {
        let image = FirmwareImage::parse_str(
            ":020000040800F2\n\
             :1000000000112233445566778899AABBCCDDEEFFF8\n\
             :10001000FFEEDDCCBBAA99887766554433221100E8\n\
             :00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.blocks[0].address, 0x0800_0000);
        assert_eq!(image.blocks[0].len(), 32);
        assert_eq!(image.total_bytes, 32);
    }

    #[test]
    fn address_gap_starts_a_new_block() {
        let image = FirmwareImage::parse_str(
            ":040000001122334452\n:04002000AABBCCDDCE\n:00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 2);
        assert_eq!(image.blocks[0].address, 0);
        assert_eq!(image.blocks[1].address, 0x20);
        assert_eq!(image.total_bytes, 8);
    }

    #[test]
    fn extended_linear_address_offsets_following_records() {
        let image = FirmwareImage::parse_str(
            ":020000040800F2\n:0410000001020304E2\n:00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks[0].address, 0x0800_1000);
    }

    #[test]
    fn eof_record_stops_parsing() {
        let image = FirmwareImage::parse_str(
            ":040000001122334452\n:00000001FF\n:04000000AABBCCDDEE\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.total_bytes, 4);
    }

    #[test]
    fn non_record_lines_are_skipped() {
        let image = FirmwareImage::parse_str(
            "; a comment\n\n:040000001122334452\n:00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 1);
    }

    #[test]
    fn unknown_record_types_are_ignored() {
        // 03 (start segment address) and 05 (start linear address)
        let image = FirmwareImage::parse_str(
            ":0400000300003800C1\n\
             :040000001122334452\n\
             :04000005080001519D\n\
             :00000001FF\n",
        )
        .unwrap();
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.total_bytes, 4);
    }

    #[test]
    fn checksum_byte_is_not_validated() {
        // Correct checksum would be 0x52.
        let image = FirmwareImage::parse_str(":040000001122334400\n:00000001FF\n");
        assert!(image.is_ok());
    }

    #[test]
    fn truncated_record_is_a_format_error() {
        let err = FirmwareImage::parse_str(":10000000AABB\n").unwrap_err();
        match err {
            Error::HexFormat { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_hex_digits_are_a_format_error() {
        let err = FirmwareImage::parse_str(":04000000GG22334452\n").unwrap_err();
        assert!(matches!(err, Error::HexFormat { line: 1, .. }));
    }

    #[test]
    fn multibyte_character_in_data_field_is_a_format_error() {
        // The euro sign spans three bytes; slicing the data field into
        // hex pairs must not land between them.
        let err = FirmwareImage::parse_str(":02000000A\u{20AC}00\n").unwrap_err();
        assert!(matches!(err, Error::HexFormat { line: 1, .. }));

        let err = FirmwareImage::parse_str(":02000000\u{20AC}A00\n").unwrap_err();
        assert!(matches!(err, Error::HexFormat { line: 1, .. }));
    }

    #[test]
    fn data_round_trips_through_the_image() {
        let original: Vec<u8> = (0u8..=255).collect();
        let mut hex = String::new();
        for (i, chunk) in original.chunks(16).enumerate() {
            let addr = i * 16;
            hex.push_str(&format!(":10{addr:04X}00"));
            for byte in chunk {
                hex.push_str(&format!("{byte:02X}"));
            }
            hex.push_str("00\n"); // checksum ignored
        }
        hex.push_str(":00000001FF\n");

        let image = FirmwareImage::parse_str(&hex).unwrap();
        assert_eq!(image.blocks.len(), 1);
        let flattened: Vec<u8> = image.blocks.iter().flat_map(|b| b.data.clone()).collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn missing_eof_still_yields_parsed_blocks() {
        let image = FirmwareImage::parse_str(":040000001122334452\n").unwrap();
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.total_bytes, 4);
    }
}
