//! Store communication failures surface once and are never retried.

use gitkv_store::{
    Applied, Condition, Keyspace, ObjectId, Page, PackExt, PackSource, PackStore, PagingState,
    Ref, RefStore, Row, Session, SessionError, SessionResult, StorageError, StoreConfig,
    TableSchema,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Accepts schema provisioning, then fails every data call while `down` is set.
#[derive(Default)]
struct FlakySession {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakySession {
    fn fail<T>(&self) -> SessionResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SessionError::Unavailable("all hosts tried".into()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Session for FlakySession {
    fn create_keyspace(&self, _keyspace: &Keyspace) -> SessionResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return self.fail();
        }
        Ok(())
    }

    fn create_table(&self, _keyspace: &Keyspace, _schema: &TableSchema) -> SessionResult<()> {
        Ok(())
    }

    fn select(&self, _: &Keyspace, _: &str, _: &str) -> SessionResult<Vec<Row>> {
        self.fail()
    }

    fn scan(&self, _: &Keyspace, _: &str, _: Option<&PagingState>, _: usize) -> SessionResult<Page> {
        self.fail()
    }

    fn insert(&self, _: &Keyspace, _: &str, _: Row) -> SessionResult<()> {
        self.fail()
    }

    fn delete(&self, _: &Keyspace, _: &str, _: &str) -> SessionResult<()> {
        self.fail()
    }

    fn insert_if_not_exists(&self, _: &Keyspace, _: &str, _: Row) -> SessionResult<Applied> {
        self.fail()
    }

    fn update_if(&self, _: &Keyspace, _: &str, _: Row, _: &[Condition]) -> SessionResult<Applied> {
        self.fail()
    }

    fn delete_if(&self, _: &Keyspace, _: &str, _: &str, _: &[Condition]) -> SessionResult<Applied> {
        self.fail()
    }
}

fn keyspace() -> Keyspace {
    Keyspace::new("flaky").unwrap()
}

#[test]
fn provisioning_failure_is_transport_error() {
    let session = Arc::new(FlakySession::default());
    session.down.store(true, Ordering::SeqCst);

    let err = RefStore::new(keyspace(), session.clone(), StoreConfig::default()).unwrap_err();
    assert!(err.is_transport());
    let err = PackStore::new(keyspace(), session, StoreConfig::default()).unwrap_err();
    assert!(err.is_transport());
}

#[test]
fn ref_operations_surface_transport_errors_once() {
    let session = Arc::new(FlakySession::default());
    let store = RefStore::new(keyspace(), session.clone(), StoreConfig::default()).unwrap();
    let r = Ref::unpeeled("refs/heads/main", ObjectId::ZERO);

    assert!(store.get("refs/heads/main").unwrap_err().is_transport());
    assert_eq!(session.calls(), 1);

    assert!(store.put_if_absent("refs/heads/main", &r).unwrap_err().is_transport());
    assert_eq!(session.calls(), 2);

    assert!(store.replace("refs/heads/main", &r, &r).unwrap_err().is_transport());
    assert!(store.remove("refs/heads/main", &r).unwrap_err().is_transport());
    assert_eq!(session.calls(), 4);

    let results: Vec<_> = store.values().collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(StorageError::Transport(_))));
    assert_eq!(session.calls(), 5);
}

#[test]
fn pack_operations_surface_transport_errors_once() {
    let session = Arc::new(FlakySession::default());
    let store = PackStore::new(keyspace(), session.clone(), StoreConfig::default()).unwrap();
    let mut desc = store.new_pack(PackSource::Insert);
    desc.record_file(PackExt::PACK, 10);

    assert!(store.list_packs().unwrap_err().is_transport());
    assert!(store.read_file(&desc, PackExt::PACK).unwrap_err().is_transport());
    assert!(store
        .write_file(&desc, PackExt::PACK, bytes::Bytes::from_static(b"x"))
        .unwrap_err()
        .is_transport());

    // The first failing insert stops the commit.
    let other = store.new_pack(PackSource::Insert);
    let err = store.commit(&[desc, other], &[]).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(session.calls(), 4);

    let io: std::io::Error = err.into();
    assert_eq!(io.kind(), std::io::ErrorKind::Other);
}
