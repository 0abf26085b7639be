mod common;

use common::Workspace;
use redirectfs::overlay::{FilesystemLayer, HandleTable, LayerError, RedirectLayer};
use redirectfs::{FsError, LayerMode, LayerSpec, OpenMode};

const CLIENT: u32 = 1;

#[test]
fn test_handle_from_one_layer_is_unknown_to_another() {
    let ws = Workspace::new();
    ws.write_mod("a.txt", b"a");
    let other = ws.extra_dir("other");
    common::write_file(&other.join("a.txt"), b"b");

    let first = RedirectLayer::new(&LayerSpec::new(
        "first",
        "/vol/content",
        ws.mod_str(),
        LayerMode::Replace,
    ))
    .unwrap();
    let second = RedirectLayer::new(&LayerSpec::new(
        "second",
        "/vol/content",
        other.to_str().unwrap(),
        LayerMode::Replace,
    ))
    .unwrap();

    let from_first = first.open_file("/vol/content/a.txt", OpenMode::Read).unwrap();
    let from_second = second.open_file("/vol/content/a.txt", OpenMode::Read).unwrap();
    assert_ne!(from_first, from_second);

    assert_eq!(
        second.close_file(from_first),
        Err(LayerError::ForceParentLayer)
    );
    assert_eq!(
        second.read_file(from_first, 1, None),
        Err(LayerError::ForceParentLayer)
    );
    assert!(first.close_file(from_first).is_ok());
    assert!(second.close_file(from_second).is_ok());
}

#[test]
fn test_tables_never_share_handles() {
    let a: HandleTable<u8> = HandleTable::new(4);
    let b: HandleTable<u8> = HandleTable::new(4);
    let h = a.insert(1).unwrap();
    assert!(a.is_valid(h));
    assert!(!b.is_valid(h));
    assert_eq!(b.remove(h).unwrap_err(), FsError::InvalidHandle);
}

#[test]
fn test_double_close_through_session() {
    let ws = Workspace::new();
    ws.write_mod("a.txt", b"a");
    let session = ws.session();
    session
        .add_layer("content", "/vol/content", ws.mod_str(), LayerMode::Replace)
        .unwrap();

    let h = session
        .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
        .unwrap();
    assert_eq!(session.close_file(CLIENT, h), Ok(()));
    assert_eq!(
        session.close_file(CLIENT, h).unwrap_err(),
        FsError::InvalidHandle
    );

    // The table is still usable afterwards
    let again = session
        .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
        .unwrap();
    assert_ne!(again, h, "a reused slot gets a new generation");
    assert_eq!(session.close_file(CLIENT, again), Ok(()));
}

#[test]
fn test_native_handles_pass_through_layers() {
    let ws = Workspace::new();
    ws.write_native("/vol/save/n.txt", b"native");
    let session = ws.session();
    session
        .add_layer("content", "/vol/content", ws.mod_str(), LayerMode::Replace)
        .unwrap();

    let h = session
        .open_file(CLIENT, "/vol/save/n.txt", OpenMode::Read)
        .unwrap();
    assert_eq!(session.stat_file(CLIENT, h).unwrap().size, 6);
    assert_eq!(session.read_file(CLIENT, h, 0, None).unwrap(), Vec::<u8>::new());
    assert_eq!(session.read_file(CLIENT, h, 100, None).unwrap(), b"native");
    assert!(session.is_eof(CLIENT, h).unwrap());
    session.close_file(CLIENT, h).unwrap();
}

#[test]
fn test_handle_limit_reports_no_slot() {
    let ws = Workspace::new();
    ws.write_mod("a.txt", b"a");
    let session = ws.session();
    session
        .add_layer_spec(
            LayerSpec::new("content", "/vol/content", ws.mod_str(), LayerMode::Replace)
                .max_handles(2),
        )
        .unwrap();

    let h1 = session
        .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
        .unwrap();
    let _h2 = session
        .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
        .unwrap();
    assert_eq!(
        session
            .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
            .unwrap_err(),
        FsError::NoHandleSlot
    );

    session.close_file(CLIENT, h1).unwrap();
    assert!(session
        .open_file(CLIENT, "/vol/content/a.txt", OpenMode::Read)
        .is_ok());
}
