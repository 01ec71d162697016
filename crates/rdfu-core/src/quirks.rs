//! Chip identification and quirk lookup
//!
//! Bootloader behavior differs across MCU families in ways the DFU class
//! spec does not capture. Rather than scattering conditionals through the
//! protocol driver, each known family gets one [`ChipProfile`] row keyed by
//! the sector-layout signature of its flash descriptor; adding support for
//! a new part means adding a row here.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Protocol deviations a chip profile can opt into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Quirks: u32 {
        /// The part may sit in dfuDNBUSY past the advertised poll timeout
        /// during page erase (seen on H743 rev V). Recover with a CLRSTATUS
        /// cycle and accept dfuIDLE as the erase's terminal state.
        const ERASE_BUSY_RETRY = 1 << 0;
    }
}

/// MCU family inferred from the flash descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuFamily {
    /// STM32F7 series (F722/F745 class parts)
    Stm32F7,
    /// STM32F4 series (F405/F407 class parts)
    Stm32F4,
    /// STM32H7 series (H743/H750 class parts)
    Stm32H7,
    /// Artery AT32F435
    At32F435,
    /// Descriptor did not match any known signature
    Unknown,
}

impl fmt::Display for McuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stm32F7 => write!(f, "STM32F7 family (F722/F745)"),
            Self::Stm32F4 => write!(f, "STM32F4 family (F405/F407)"),
            Self::Stm32H7 => write!(f, "STM32H7 family (H743/H750)"),
            Self::At32F435 => write!(f, "AT32F435 family"),
            Self::Unknown => write!(f, "unknown MCU family"),
        }
    }
}

/// One row of the chip table: a family, its quirks, and the descriptor
/// signatures that identify it.
#[derive(Debug, Clone, Copy)]
pub struct ChipProfile {
    /// Inferred MCU family.
    pub family: McuFamily,
    /// Quirks the protocol driver must honor for this part.
    pub quirks: Quirks,
    signatures: &'static [&'static str],
}

/// Known chip profiles. Signatures list both the zero-padded and short
/// size spellings seen in the wild.
const PROFILES: &[ChipProfile] = &[
    ChipProfile {
        family: McuFamily::Stm32F7,
        quirks: Quirks::empty(),
        signatures: &["04*016Kg,01*64Kg,03*128Kg", "04*016Kg,01*064Kg,03*128Kg"],
    },
    ChipProfile {
        family: McuFamily::Stm32F4,
        quirks: Quirks::empty(),
        signatures: &["04*016Kg,01*64Kg,07*128Kg", "04*016Kg,01*064Kg,07*128Kg"],
    },
    ChipProfile {
        family: McuFamily::Stm32H7,
        quirks: Quirks::ERASE_BUSY_RETRY,
        signatures: &["16*128Kg"],
    },
    ChipProfile {
        family: McuFamily::At32F435,
        quirks: Quirks::empty(),
        signatures: &["512*002Kg"],
    },
];

impl ChipProfile {
    /// Profile returned when no signature matches.
    pub const UNKNOWN: ChipProfile = ChipProfile {
        family: McuFamily::Unknown,
        quirks: Quirks::empty(),
        signatures: &[],
    };

    /// Match a flash descriptor string against the known signatures.
    pub fn identify(descriptor: &str) -> ChipProfile {
        for profile in PROFILES {
            if profile
                .signatures
                .iter()
                .any(|sig| descriptor.contains(sig))
            {
                log::debug!("descriptor matched {}", profile.family);
                return *profile;
            }
        }
        ChipProfile::UNKNOWN
    }
}
