//! Maps [`EngineError`] onto the exact reply strings the text protocol uses.
//!
//! Every command shares the same four failure replies (not-logged-in,
//! permission-denied, not-formatted, and a catch-all "operation failed"
//! message); only the wording of the success and catch-all strings differs
//! per command, so each command passes its own pair to [`status`].

use ufs::EngineError;

/// Turns a command's `Result` into its reply body, using `ok` on success and
/// `fail` for [`EngineError::Generic`] (the generic "the operation failed"
/// case particular to that command).
pub fn status(result: Result<(), EngineError>, ok: &str, fail: &str) -> Vec<u8> {
    match result {
        Ok(()) => ok.as_bytes().to_vec(),
        Err(EngineError::NotLoggedIn) => b"Please login first".to_vec(),
        Err(EngineError::PermissionDenied) => b"Permission denied".to_vec(),
        Err(EngineError::NotFormatted) => b"Not formatted".to_vec(),
        Err(EngineError::Generic(_)) => fail.as_bytes().to_vec(),
    }
}

pub fn perm_str(perm: u16) -> &'static str {
    match perm {
        0 => "---",
        1 => "r--",
        2 => "rw-",
        _ => "???",
    }
}

pub fn type_str(typ: ufs::types::InodeType) -> &'static str {
    match typ {
        ufs::types::InodeType::Dir => "DIR",
        ufs::types::InodeType::File => "FILE",
        ufs::types::InodeType::Free => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_error_uses_the_caller_supplied_message() {
        let got = status(Err(EngineError::Generic("whatever".into())), "ok", "custom failure");
        assert_eq!(got, b"custom failure");
    }

    #[test]
    fn well_known_errors_always_use_the_shared_wording() {
        assert_eq!(status(Err(EngineError::NotLoggedIn), "ok", "fail"), b"Please login first");
        assert_eq!(status(Err(EngineError::PermissionDenied), "ok", "fail"), b"Permission denied");
        assert_eq!(status(Err(EngineError::NotFormatted), "ok", "fail"), b"Not formatted");
    }
}
