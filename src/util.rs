//! utility stuff

pub(crate) static CRC_X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Computes the CRC-16/X-25 checksum of `bytes`.
///
/// This is the checksum used by the SML transport protocol, both for whole
/// files and for individual messages.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC_X25.checksum(bytes)
}
