//! Versioned bincode encoding for records stored in the key-value store
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{DkgError, DkgResult};

const RECORD_VERSION: u16 = 0;

pub fn encode<T: Serialize>(payload: &T) -> DkgResult<Vec<u8>> {
    serialize(&VersionedRecord {
        version: RECORD_VERSION,
        payload: serialize(payload)?,
    })
}

pub fn serialize<T: ?Sized>(value: &T) -> DkgResult<Vec<u8>>
where
    T: serde::Serialize,
{
    bincode::serialize(value).map_err(|err| {
        error!("record encoding failure: {}", err);
        DkgError::Encoding(err.to_string())
    })
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DkgResult<T> {
    let record: VersionedRecord = bincode::deserialize(bytes).map_err(|err| {
        warn!("record envelope unreadable: {}", err);
        DkgError::Encoding(err.to_string())
    })?;
    if record.version != RECORD_VERSION {
        warn!(
            "encoding version {}, expected {}",
            record.version, RECORD_VERSION
        );
        return Err(DkgError::Encoding(format!(
            "unsupported encoding version {}",
            record.version
        )));
    }
    bincode::deserialize(&record.payload).map_err(|err| {
        warn!("record payload unreadable: {}", err);
        DkgError::Encoding(err.to_string())
    })
}

#[derive(Serialize, Deserialize)]
struct VersionedRecord {
    version: u16,
    payload: Vec<u8>,
}
