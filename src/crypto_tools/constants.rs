// Domain separation constants for hash function calls
pub const CHAUM_PEDERSEN_PROOF_TAG: u8 = 0x00;
pub const SHARE_ENCRYPTION_TAG: u8 = 0x01;
pub const ENCRYPTED_SHARES_HASH_TAG: u8 = 0x02;
pub const COMMITMENTS_HASH_TAG: u8 = 0x03;
pub const DISTRIBUTED_SHARES_HASH_TAG: u8 = 0x04;
pub const MASTER_PUBLIC_KEY_HASH_TAG: u8 = 0x05;

/// Hash-to-curve input for the fixed G1 base point `h1`.
pub const H1_BASE_MSG: &[u8] = b"ethdkg h1 base point";
pub const H1_BASE_DST: &[u8] = b"ETHDKG-V01-CS01-with-BLS12381G1_XMD:SHA-256_SSWU_RO_";
