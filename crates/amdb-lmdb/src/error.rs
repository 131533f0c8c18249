use amdb_core::AmdbError;
use libc::c_int;

/// Translate an LMDB failure into the amdb error taxonomy.
///
/// Resource exhaustion maps to [`AmdbError::Capacity`]; callers are expected
/// to grow the map or open fewer handles, never to retry blindly.
pub fn map_store_err(err: lmdb::Error) -> AmdbError {
    match err {
        lmdb::Error::MapFull
        | lmdb::Error::DbsFull
        | lmdb::Error::ReadersFull
        | lmdb::Error::TxnFull
        | lmdb::Error::CursorFull
        | lmdb::Error::PageFull
        | lmdb::Error::TlsFull => AmdbError::Capacity(err.to_string()),
        lmdb::Error::NotFound => AmdbError::NotFound(err.to_string()),
        lmdb::Error::Other(code) if code == libc::EACCES || code == libc::EROFS => {
            AmdbError::ReadOnly(err.to_string())
        }
        other => AmdbError::Store(other.to_string()),
    }
}

/// Check a raw return code from the C API.
pub(crate) fn check_rc(rc: c_int) -> amdb_core::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(map_store_err(lmdb::Error::from_err_code(rc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_family() {
        for err in [
            lmdb::Error::MapFull,
            lmdb::Error::DbsFull,
            lmdb::Error::ReadersFull,
            lmdb::Error::TxnFull,
        ] {
            assert!(map_store_err(err).is_capacity());
        }
    }

    #[test]
    fn test_other_codes() {
        assert!(map_store_err(lmdb::Error::NotFound).is_not_found());
        assert!(matches!(
            map_store_err(lmdb::Error::Other(libc::EACCES)),
            AmdbError::ReadOnly(_)
        ));
        assert!(matches!(
            map_store_err(lmdb::Error::Corrupted),
            AmdbError::Store(_)
        ));
    }

    #[test]
    fn test_check_rc() {
        assert!(check_rc(0).is_ok());
        assert!(check_rc(lmdb_sys::MDB_MAP_FULL).unwrap_err().is_capacity());
    }
}
