//! Transfer operations against a real user root.

use http::StatusCode;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use treesync::local::{LocalPathResolver, MemoryLockManager, PermanentRemoval, TrashRemoval};
use treesync::transfer::UPLOAD_TEMP_PREFIX;
use treesync::{
    map_error, CopyMoveKind, CopyMoveRequest, Destination, LockDepth, LockManager, MakeKind,
    MakeRequest, PathResolver, RemovalPolicy, ServerConfig, SyncError, SyncUser, TransferOps,
    UploadRequest,
};

const MTIME: i64 = 1_600_000_000;

fn user(id: u64, login: &str) -> SyncUser {
    SyncUser {
        id,
        login: login.to_string(),
        client_id: Some("desktop".to_string()),
    }
}

struct Fixture {
    tmp: TempDir,
    resolver: Arc<LocalPathResolver>,
    locks: Arc<MemoryLockManager>,
    ops: TransferOps,
}

impl Fixture {
    fn new() -> Self {
        Self::with(ServerConfig::default(), Arc::new(PermanentRemoval))
    }

    fn with(config: ServerConfig, removal: Arc<dyn RemovalPolicy>) -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("alice")).unwrap();
        let resolver = Arc::new(LocalPathResolver::new(tmp.path()));
        let locks = Arc::new(MemoryLockManager::new());
        let ops = TransferOps::new(Arc::new(config), resolver.clone(), locks.clone(), removal);
        Self {
            tmp,
            resolver,
            locks,
            ops,
        }
    }

    fn root(&self) -> std::path::PathBuf {
        self.tmp.path().join("alice")
    }

    async fn dest(&self, path: &str) -> Destination {
        let segments: Vec<String> = path.split('/').map(str::to_string).collect();
        self.resolver
            .resolve(&user(1, "alice"), &segments)
            .await
            .unwrap()
            .unwrap()
    }
}

fn mtime_of(path: &Path) -> i64 {
    let md = fs::metadata(path).unwrap();
    filetime::FileTime::from_last_modification_time(&md).unix_seconds()
}

fn leftover_temps(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(UPLOAD_TEMP_PREFIX))
        .collect()
}

#[tokio::test]
async fn test_upload_with_matching_checksum() {
    let fx = Fixture::new();
    let dest = fx.dest("docs/report.txt").await;
    let body = b"quarterly numbers";
    let req = UploadRequest {
        checksum: Some(blake3::hash(body).to_hex().to_string()),
        size: body.len() as u64,
        mtime: MTIME,
    };

    let identity = fx
        .ops
        .upload(&user(1, "alice"), &dest, &req, &mut &body[..])
        .await
        .unwrap();

    let written = fx.root().join("docs/report.txt");
    assert_eq!(fs::read(&written).unwrap(), body);
    assert_eq!(mtime_of(&written), MTIME);
    assert_ne!(identity.ino, 0);
    assert_eq!(identity.mtime, None);
    assert!(leftover_temps(&fx.root().join("docs")).is_empty());
    assert!(fx.locks.is_empty().await);
}

#[tokio::test]
async fn test_upload_checksum_mismatch_keeps_old_content() {
    let fx = Fixture::new();
    fs::write(fx.root().join("notes.txt"), "original").unwrap();
    let dest = fx.dest("notes.txt").await;
    let req = UploadRequest {
        checksum: Some(blake3::hash(b"something else").to_hex().to_string()),
        size: 8,
        mtime: MTIME,
    };

    let err = fx
        .ops
        .upload(&user(1, "alice"), &dest, &req, &mut &b"tampered"[..])
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Integrity(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fs::read_to_string(fx.root().join("notes.txt")).unwrap(), "original");
    assert!(leftover_temps(&fx.root()).is_empty());
    assert!(fx.locks.is_empty().await);
}

#[tokio::test]
async fn test_upload_checksum_takes_precedence_over_size() {
    let fx = Fixture::new();
    let dest = fx.dest("both.txt").await;
    let body = b"twelve bytes";
    let req = UploadRequest {
        checksum: Some(blake3::hash(body).to_hex().to_string()),
        size: 999,
        mtime: MTIME,
    };

    fx.ops
        .upload(&user(1, "alice"), &dest, &req, &mut &body[..])
        .await
        .unwrap();
    assert_eq!(fs::read(fx.root().join("both.txt")).unwrap(), body);
}

#[tokio::test]
async fn test_upload_size_mismatch() {
    let fx = Fixture::new();
    let dest = fx.dest("short.bin").await;
    let req = UploadRequest {
        checksum: None,
        size: 100,
        mtime: MTIME,
    };

    let err = fx
        .ops
        .upload(&user(1, "alice"), &dest, &req, &mut &b"only a few bytes"[..])
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Integrity(_)));
    assert!(!fx.root().join("short.bin").exists());
    assert!(leftover_temps(&fx.root()).is_empty());
}

#[tokio::test]
async fn test_upload_blocked_by_foreign_lock() {
    let fx = Fixture::new();
    let dest = fx.dest("shared.txt").await;
    let (ok, _) = fx
        .locks
        .create_or_refresh(&user(2, "bob"), &dest, LockDepth::Zero, None)
        .await
        .unwrap();
    assert!(ok);

    let req = UploadRequest {
        checksum: None,
        size: 4,
        mtime: MTIME,
    };
    let err = fx
        .ops
        .upload(&user(1, "alice"), &dest, &req, &mut &b"mine"[..])
        .await
        .unwrap_err();

    match &err {
        SyncError::LockConflict { lock } => assert_eq!(lock.owner_login, "bob"),
        other => panic!("unexpected {:?}", other),
    }
    let (status, message) = map_error(&dest, &err);
    assert_eq!(status, StatusCode::LOCKED);
    assert!(message.contains("bob"));
    assert!(!fx.root().join("shared.txt").exists());
    // Bob's lock is untouched
    assert_eq!(fx.locks.len().await, 1);
}

#[tokio::test]
async fn test_upload_onto_directory_is_rejected() {
    let fx = Fixture::new();
    fs::create_dir(fx.root().join("folder")).unwrap();
    let dest = fx.dest("folder").await;
    let req = UploadRequest {
        checksum: None,
        size: 1,
        mtime: MTIME,
    };

    let err = fx
        .ops
        .upload(&user(1, "alice"), &dest, &req, &mut &b"x"[..])
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_make_file_and_directory() {
    let fx = Fixture::new();
    let alice = user(1, "alice");

    let dir = fx.dest("new/dir").await;
    let id = fx
        .ops
        .make(
            &alice,
            &dir,
            &MakeRequest {
                kind: MakeKind::Directory,
                mtime: MTIME,
            },
        )
        .await
        .unwrap();
    assert!(fx.root().join("new/dir").is_dir());
    assert_eq!(mtime_of(&fx.root().join("new/dir")), MTIME);
    assert_ne!(id.ino, 0);

    let file = fx.dest("new/dir/empty.txt").await;
    fx.ops
        .make(
            &alice,
            &file,
            &MakeRequest {
                kind: MakeKind::File,
                mtime: MTIME + 5,
            },
        )
        .await
        .unwrap();
    let path = fx.root().join("new/dir/empty.txt");
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(mtime_of(&path), MTIME + 5);
}

#[tokio::test]
async fn test_make_directory_replaces_file() {
    let fx = Fixture::new();
    fs::write(fx.root().join("thing"), "was a file").unwrap();
    let dest = fx.dest("thing").await;

    fx.ops
        .make(
            &user(1, "alice"),
            &dest,
            &MakeRequest {
                kind: MakeKind::Directory,
                mtime: MTIME,
            },
        )
        .await
        .unwrap();
    assert!(fx.root().join("thing").is_dir());
}

#[tokio::test]
async fn test_copy_with_and_without_declared_mtime() {
    let fx = Fixture::new();
    let alice = user(1, "alice");
    fs::create_dir_all(fx.root().join("src/nested")).unwrap();
    fs::write(fx.root().join("src/nested/a.txt"), "a").unwrap();
    let source = fx.dest("src").await;

    let declared = fx
        .ops
        .copy_move(
            &alice,
            &source,
            CopyMoveKind::Copy,
            &CopyMoveRequest {
                destination: "/copy1".to_string(),
                mtime: Some(MTIME),
            },
        )
        .await
        .unwrap();
    assert_eq!(declared.mtime, Some(MTIME));
    assert_eq!(
        fs::read_to_string(fx.root().join("copy1/nested/a.txt")).unwrap(),
        "a"
    );

    let observed = fx
        .ops
        .copy_move(
            &alice,
            &source,
            CopyMoveKind::Copy,
            &CopyMoveRequest {
                destination: "/copy2".to_string(),
                mtime: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(observed.mtime, Some(mtime_of(&fx.root().join("copy2"))));
    assert!(fx.root().join("src/nested/a.txt").exists());
}

#[tokio::test]
async fn test_move_overwrites_target() {
    let fx = Fixture::new();
    fs::write(fx.root().join("from.txt"), "fresh").unwrap();
    fs::write(fx.root().join("to.txt"), "stale").unwrap();
    let source = fx.dest("from.txt").await;
    let ino_before = std::os::unix::fs::MetadataExt::ino(&fs::metadata(fx.root().join("from.txt")).unwrap());

    let id = fx
        .ops
        .copy_move(
            &user(1, "alice"),
            &source,
            CopyMoveKind::Move,
            &CopyMoveRequest {
                destination: "to.txt".to_string(),
                mtime: None,
            },
        )
        .await
        .unwrap();

    assert!(!fx.root().join("from.txt").exists());
    assert_eq!(fs::read_to_string(fx.root().join("to.txt")).unwrap(), "fresh");
    assert_eq!(id.ino, ino_before);
}

#[tokio::test]
async fn test_copy_into_itself_is_rejected() {
    let fx = Fixture::new();
    fs::create_dir(fx.root().join("loop")).unwrap();
    let source = fx.dest("loop").await;

    let err = fx
        .ops
        .copy_move(
            &user(1, "alice"),
            &source,
            CopyMoveKind::Copy,
            &CopyMoveRequest {
                destination: "loop/inner".to_string(),
                mtime: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_copy_or_move_over_ancestor_is_rejected() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.root().join("a/b")).unwrap();
    fs::write(fx.root().join("a/b/keep.txt"), "keep").unwrap();
    fs::write(fx.root().join("a/other.txt"), "other").unwrap();
    let source = fx.dest("a/b").await;

    for kind in [CopyMoveKind::Copy, CopyMoveKind::Move] {
        let err = fx
            .ops
            .copy_move(
                &user(1, "alice"),
                &source,
                kind,
                &CopyMoveRequest {
                    destination: "a".to_string(),
                    mtime: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{:?}", kind);
    }

    assert_eq!(fs::read_to_string(fx.root().join("a/b/keep.txt")).unwrap(), "keep");
    assert_eq!(fs::read_to_string(fx.root().join("a/other.txt")).unwrap(), "other");
}

#[tokio::test]
async fn test_move_of_locked_source_conflicts() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.root().join("project/src")).unwrap();
    fs::write(fx.root().join("project/src/main.rs"), "fn main() {}").unwrap();
    let locked = fx.dest("project/src/main.rs").await;
    fx.locks
        .create_or_refresh(&user(2, "bob"), &locked, LockDepth::Zero, None)
        .await
        .unwrap();

    let source = fx.dest("project").await;
    let err = fx
        .ops
        .copy_move(
            &user(1, "alice"),
            &source,
            CopyMoveKind::Move,
            &CopyMoveRequest {
                destination: "renamed".to_string(),
                mtime: None,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::LOCKED);
    assert!(fx.root().join("project/src/main.rs").exists());
}

#[tokio::test]
async fn test_delete_permanently() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.root().join("old/deep")).unwrap();
    fs::write(fx.root().join("old/deep/f"), "f").unwrap();
    let dest = fx.dest("old").await;

    fx.ops.delete(&user(1, "alice"), &dest).await.unwrap();
    assert!(!fx.root().join("old").exists());

    let err = fx.ops.delete(&user(1, "alice"), &dest).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_into_trash() {
    let trash = TempDir::new().unwrap();
    let fx = Fixture::with(
        ServerConfig::default(),
        Arc::new(TrashRemoval::new(trash.path())),
    );
    fs::write(fx.root().join("draft.md"), "draft").unwrap();
    let dest = fx.dest("draft.md").await;

    fx.ops.delete(&user(1, "alice"), &dest).await.unwrap();

    assert!(!fx.root().join("draft.md").exists());
    assert_eq!(fs::read_dir(trash.path().join("alice")).unwrap().count(), 1);
}

#[tokio::test]
async fn test_touch_ignores_locks_unless_strict() {
    let fx = Fixture::new();
    fs::write(fx.root().join("busy.txt"), "busy").unwrap();
    let dest = fx.dest("busy.txt").await;
    fx.locks
        .create_or_refresh(&user(2, "bob"), &dest, LockDepth::Zero, None)
        .await
        .unwrap();

    fx.ops.touch(&user(1, "alice"), &dest, MTIME).await.unwrap();
    assert_eq!(mtime_of(&fx.root().join("busy.txt")), MTIME);

    let strict = Fixture::with(
        ServerConfig {
            strict_touch_locking: true,
            ..Default::default()
        },
        Arc::new(PermanentRemoval),
    );
    fs::write(strict.root().join("busy.txt"), "busy").unwrap();
    let dest = strict.dest("busy.txt").await;
    strict
        .locks
        .create_or_refresh(&user(2, "bob"), &dest, LockDepth::Zero, None)
        .await
        .unwrap();

    let err = strict
        .ops
        .touch(&user(1, "alice"), &dest, MTIME)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn test_touch_missing_entry() {
    let fx = Fixture::new();
    let dest = fx.dest("ghost").await;
    let err = fx.ops.touch(&user(1, "alice"), &dest, MTIME).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_file_and_directory() {
    let fx = Fixture::new();
    fs::write(fx.root().join("song.ogg"), "la la la").unwrap();
    fs::create_dir(fx.root().join("album")).unwrap();

    let mut download = fx
        .ops
        .download(&user(1, "alice"), &fx.dest("song.ogg").await)
        .await
        .unwrap();
    assert_eq!(download.size, 8);
    let mut content = String::new();
    download.file.read_to_string(&mut content).await.unwrap();
    assert_eq!(content, "la la la");

    let err = fx
        .ops
        .download(&user(1, "alice"), &fx.dest("album").await)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}
