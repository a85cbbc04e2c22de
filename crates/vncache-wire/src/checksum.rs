/// Checksum algorithms a node may advertise. Only `Fnv1a` is implemented;
/// the rest are reserved wire values a client must be able to name even
/// though it refuses to verify against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    Fnv1a,
    Crc32,
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumType::Fnv1a => "fnv1a",
            ChecksumType::Crc32 => "crc32",
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fnv1a" => Some(ChecksumType::Fnv1a),
            "crc32" => Some(ChecksumType::Crc32),
            "md5" => Some(ChecksumType::Md5),
            "sha1" => Some(ChecksumType::Sha1),
            "sha256" => Some(ChecksumType::Sha256),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_implemented(self) -> bool {
        matches!(self, ChecksumType::Fnv1a)
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over 64 bits.
#[must_use]
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Encode an FNV-1a digest as padded RFC 4648 base32, 16 characters wide
/// for the 8-byte digest (unpadded would be 13, short of the wire width).
#[must_use]
pub fn checksum_base32(data: &[u8]) -> String {
    let digest = fnv1a64(data).to_be_bytes();
    base32::encode(base32::Alphabet::Rfc4648 { padding: true }, &digest)
}

/// Compare a payload's freshly computed checksum against one reported on
/// the wire (`ChecksumValue`). Only `ChecksumType::Fnv1a` is actually
/// checked; any other advertised algorithm is treated as unverifiable and
/// this function returns `false` so callers fail closed.
#[must_use]
pub fn verify_checksum(algo: ChecksumType, expected_base32: &str, payload: &[u8]) -> bool {
    if algo != ChecksumType::Fnv1a {
        return false;
    }
    checksum_base32(payload) == expected_base32
}
