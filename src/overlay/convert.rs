use crate::error::FsError;
use crate::overlay::types::FileStat;
use std::fs::Metadata;
use std::io;
use std::time::UNIX_EPOCH;

/// Map a backing-store failure onto the caller-facing error taxonomy.
pub(crate) fn io_error_to_fs(e: &io::Error) -> FsError {
    // The raw OS error is the most accurate source when present
    if let Some(code) = e.raw_os_error() {
        return errno_to_fs(code);
    }

    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound,
        io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
        io::ErrorKind::InvalidInput => FsError::InvalidArgument,
        io::ErrorKind::WriteZero => FsError::StorageFull,
        _ => FsError::MediaError,
    }
}

pub(crate) fn errno_to_fs(code: i32) -> FsError {
    match code {
        libc::ENOENT => FsError::NotFound,
        libc::EEXIST => FsError::AlreadyExists,
        libc::EISDIR => FsError::NotAFile,
        libc::ENOTDIR => FsError::NotADirectory,
        libc::EACCES | libc::EPERM => FsError::PermissionDenied,
        libc::EBADF | libc::EROFS => FsError::AccessDenied,
        libc::ENOSPC => FsError::StorageFull,
        libc::EFBIG => FsError::FileTooLarge,
        libc::ENFILE | libc::EMFILE => FsError::NoHandleSlot,
        libc::EINVAL => FsError::InvalidArgument,
        _ => FsError::MediaError,
    }
}

pub(crate) fn metadata_to_stat(meta: &Metadata) -> FileStat {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    FileStat {
        size: if meta.is_dir() { 0 } else { meta.len() },
        is_dir: meta.is_dir(),
        mode: permission_bits(meta),
        modified,
    }
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(libc::ENOENT, FsError::NotFound)]
    #[case(libc::EEXIST, FsError::AlreadyExists)]
    #[case(libc::EISDIR, FsError::NotAFile)]
    #[case(libc::ENOTDIR, FsError::NotADirectory)]
    #[case(libc::EACCES, FsError::PermissionDenied)]
    #[case(libc::EPERM, FsError::PermissionDenied)]
    #[case(libc::EBADF, FsError::AccessDenied)]
    #[case(libc::EROFS, FsError::AccessDenied)]
    #[case(libc::ENOSPC, FsError::StorageFull)]
    #[case(libc::EFBIG, FsError::FileTooLarge)]
    #[case(libc::EMFILE, FsError::NoHandleSlot)]
    #[case(libc::EINVAL, FsError::InvalidArgument)]
    #[case(libc::EIO, FsError::MediaError)]
    fn test_errno_mapping(#[case] code: i32, #[case] expected: FsError) {
        let err = io::Error::from_raw_os_error(code);
        assert_eq!(io_error_to_fs(&err), expected);
    }

    #[test]
    fn test_kind_fallback_without_os_code() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error_to_fs(&err), FsError::NotFound);
        let err = io::Error::new(io::ErrorKind::Other, "odd");
        assert_eq!(io_error_to_fs(&err), FsError::MediaError);
    }

    #[test]
    fn test_metadata_to_stat() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.bin");
        std::fs::write(&file, b"12345").unwrap();

        let stat = metadata_to_stat(&std::fs::metadata(&file).unwrap());
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);
        assert!(stat.modified > 0);

        let stat = metadata_to_stat(&std::fs::metadata(dir.path()).unwrap());
        assert!(stat.is_dir);
        assert_eq!(stat.size, 0);
    }
}
