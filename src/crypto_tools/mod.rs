pub mod bls;
pub mod cipher;
pub mod constants;
pub mod hash;
pub mod vss;
pub mod zkp;
