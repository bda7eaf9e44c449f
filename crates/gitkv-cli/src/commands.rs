//! CLI command implementations.
//!
//! Commands write their output to the given writer and return `anyhow`
//! errors with context for the top level to print.

use crate::config::CliError;
use anyhow::{anyhow, bail, Context, Result};
use gitkv_dfs::{
    DfsOutputStream, DfsRepository, KvRepository, ObjDatabase, RefDatabase, RepositoryRegistry,
};
use gitkv_store::{ObjectId, PackDescription, PackExt, PackSource, Ref};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

fn open(registry: &RepositoryRegistry, repo: &str) -> Result<Arc<KvRepository>> {
    registry
        .open(repo)
        .with_context(|| format!("cannot open repository {repo}"))
}

fn parse_id(hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).with_context(|| format!("invalid object id {hex}"))
}

fn write_ref(out: &mut impl Write, r: &Ref) -> io::Result<()> {
    match r.symbolic_target() {
        Some(target) => {
            let leaf = r
                .leaf()
                .object_id()
                .map(|id| id.to_hex())
                .unwrap_or_else(|| "unresolved".to_string());
            writeln!(out, "{leaf} {}\t-> {target}", r.name())
        }
        None => match r.peeled_object_id() {
            Some(peeled) if r.peeled_object_id() != r.object_id() => {
                writeln!(
                    out,
                    "{} {}\t^{peeled}",
                    r.object_id().map(|id| id.to_hex()).unwrap_or_default(),
                    r.name()
                )
            }
            _ => writeln!(
                out,
                "{} {}",
                r.object_id().map(|id| id.to_hex()).unwrap_or_default(),
                r.name()
            ),
        },
    }
}

/// Lists every reference.
pub fn refs(registry: &RepositoryRegistry, repo: &str, out: &mut impl Write) -> Result<()> {
    let repo = open(registry, repo)?;
    let cache = repo.ref_database().scan_all_refs()?;
    for r in cache.refs() {
        write_ref(out, r)?;
    }
    Ok(())
}

/// Shows one reference.
pub fn show_ref(
    registry: &RepositoryRegistry,
    repo: &str,
    name: &str,
    out: &mut impl Write,
) -> Result<()> {
    let repo = open(registry, repo)?;
    let r = repo
        .ref_database()
        .exact_ref(name)?
        .ok_or_else(|| anyhow!("reference {name} not found"))?;
    write_ref(out, &r)?;
    Ok(())
}

/// Points `name` at `new_id`.
///
/// With `old` the update only happens while the reference still points at
/// that id. Without it the reference is created or overwritten.
pub fn update_ref(
    registry: &RepositoryRegistry,
    repo: &str,
    name: &str,
    new_id: &str,
    old: Option<&str>,
    peeled: Option<&str>,
) -> Result<()> {
    let repo = open(registry, repo)?;
    let new_id = parse_id(new_id)?;
    let new_ref = match peeled {
        Some(peeled) => Ref::peeled_tag(name, new_id, parse_id(peeled)?),
        None => Ref::unpeeled(name, new_id),
    };

    let refs = repo.ref_database();
    let current = refs.exact_ref(name)?;
    if let Some(old) = old {
        let old = parse_id(old)?;
        let matches = current
            .as_ref()
            .is_some_and(|c| !c.is_symbolic() && c.object_id() == Some(old));
        if !matches {
            bail!("reference {name} is not at {old}");
        }
    }

    if !refs.compare_and_put(current.as_ref(), &new_ref)? {
        bail!("reference {name} was updated concurrently");
    }
    tracing::info!(name, id = %new_id, "updated reference");
    Ok(())
}

/// Makes `name` a symbolic reference to `target`.
pub fn symbolic_ref(registry: &RepositoryRegistry, repo: &str, name: &str, target: &str) -> Result<()> {
    let repo = open(registry, repo)?;
    let refs = repo.ref_database();
    let current = refs.exact_ref(name)?;
    if !refs.compare_and_put(current.as_ref(), &Ref::symbolic(name, target))? {
        bail!("reference {name} was updated concurrently");
    }
    Ok(())
}

/// Deletes one reference.
pub fn delete_ref(registry: &RepositoryRegistry, repo: &str, name: &str) -> Result<()> {
    let repo = open(registry, repo)?;
    let refs = repo.ref_database();
    let current = refs
        .exact_ref(name)?
        .ok_or_else(|| anyhow!("reference {name} not found"))?;
    if !refs.compare_and_remove(&current)? {
        bail!("reference {name} was updated concurrently");
    }
    Ok(())
}

/// Lists committed packs.
pub fn packs(registry: &RepositoryRegistry, repo: &str, out: &mut impl Write) -> Result<()> {
    let repo = open(registry, repo)?;
    for desc in repo.obj_database().list_packs()? {
        let files: Vec<String> = desc
            .file_sizes()
            .map(|(ext, size)| format!("{ext}={size}"))
            .collect();
        writeln!(
            out,
            "{}\t{}\tobjects={}\t{}",
            desc.name(),
            desc.source(),
            desc.object_count(),
            files.join(",")
        )?;
    }
    Ok(())
}

fn find_pack(repo: &KvRepository, pack: &str) -> Result<PackDescription> {
    repo.obj_database()
        .list_packs()?
        .into_iter()
        .find(|d| d.name() == pack)
        .ok_or_else(|| anyhow!("pack {pack} not found"))
}

/// Copies the raw bytes of one pack file to `out`.
pub fn cat_pack(
    registry: &RepositoryRegistry,
    repo: &str,
    pack: &str,
    ext: &str,
    out: &mut impl Write,
) -> Result<()> {
    let repo = open(registry, repo)?;
    let ext = PackExt::lookup(ext).ok_or_else(|| anyhow!("unknown pack extension {ext}"))?;
    let desc = find_pack(&repo, pack)?;
    let mut channel = repo
        .obj_database()
        .open_file(&desc, ext)
        .with_context(|| format!("cannot open {}", desc.file_name(ext)))?;
    io::copy(&mut channel, out)?;
    Ok(())
}

/// Imports files as one new received pack and returns its name.
///
/// Each file's extension selects the pack extension, so no two files may
/// share one. Files are rolled back if any write or the commit fails.
pub fn import_pack(registry: &RepositoryRegistry, repo: &str, files: &[PathBuf]) -> Result<String> {
    if files.is_empty() {
        bail!("no files to import");
    }
    let mut seen: HashMap<PackExt, &PathBuf> = HashMap::new();
    let mut inputs = Vec::with_capacity(files.len());
    for path in files {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| anyhow!("{} has no extension", path.display()))?;
        let ext = PackExt::lookup_or_register(ext)?;
        if let Some(first) = seen.insert(ext, path) {
            return Err(CliError::DuplicateExtension {
                ext: ext.to_string(),
                first: first.clone(),
                second: path.clone(),
            }
            .into());
        }
        inputs.push((path, ext));
    }

    let repo = open(registry, repo)?;
    let objects = repo.obj_database();
    let mut desc = objects.new_pack(PackSource::Receive)?;

    let written = inputs.iter().try_for_each(|&(path, ext)| -> Result<()> {
        let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;

        let mut stream = objects.write_file(&desc, ext)?;
        stream.write_all(&data)?;
        DfsOutputStream::close(&mut stream)?;
        desc.record_file(ext, data.len() as u64);
        Ok(())
    });

    let committed = written.and_then(|()| {
        objects
            .commit_pack(std::slice::from_ref(&desc), &[])
            .map_err(Into::into)
    });
    if let Err(e) = committed {
        if let Err(rollback) = objects.rollback_pack(std::slice::from_ref(&desc)) {
            tracing::warn!(pack = desc.name(), error = %rollback, "rollback failed");
        }
        return Err(e);
    }
    tracing::info!(pack = desc.name(), files = files.len(), "imported pack");
    Ok(desc.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitkv_store::{MemorySession, SessionStats, StoreConfig};
    use pretty_assertions::assert_eq;

    const A: &str = "1111111111111111111111111111111111111111";
    const B: &str = "2222222222222222222222222222222222222222";

    fn registry() -> RepositoryRegistry {
        RepositoryRegistry::new(Arc::new(MemorySession::new()), StoreConfig::default())
    }

    fn output(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_update_and_show_ref() {
        let registry = registry();
        update_ref(&registry, "repo", "refs/heads/main", A, None, None).unwrap();
        symbolic_ref(&registry, "repo", "HEAD", "refs/heads/main").unwrap();

        let shown = output(|out| show_ref(&registry, "repo", "HEAD", out));
        assert_eq!(shown, format!("{A} HEAD\t-> refs/heads/main\n"));

        let listed = output(|out| refs(&registry, "repo", out));
        assert_eq!(
            listed,
            format!("{A} HEAD\t-> refs/heads/main\n{A} refs/heads/main\n")
        );
    }

    #[test]
    fn test_update_ref_checks_old_value() {
        let registry = registry();
        update_ref(&registry, "repo", "refs/heads/main", A, None, None).unwrap();
        assert!(update_ref(&registry, "repo", "refs/heads/main", B, Some(B), None).is_err());
        update_ref(&registry, "repo", "refs/heads/main", B, Some(A), None).unwrap();

        let shown = output(|out| show_ref(&registry, "repo", "refs/heads/main", out));
        assert_eq!(shown, format!("{B} refs/heads/main\n"));
    }

    #[test]
    fn test_delete_ref() {
        let registry = registry();
        update_ref(&registry, "repo", "refs/tags/v1", A, None, Some(B)).unwrap();
        delete_ref(&registry, "repo", "refs/tags/v1").unwrap();
        assert!(delete_ref(&registry, "repo", "refs/tags/v1").is_err());
        assert!(show_ref(&registry, "repo", "refs/tags/v1", &mut Vec::<u8>::new()).is_err());
    }

    #[test]
    fn test_import_and_cat_pack() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("incoming.pack");
        let idx = dir.path().join("incoming.idx");
        std::fs::write(&pack, b"PACK data").unwrap();
        std::fs::write(&idx, b"index").unwrap();

        let registry = registry();
        let name = import_pack(&registry, "repo", &[pack, idx]).unwrap();
        assert!(name.ends_with("-RECEIVE"));

        let listed = output(|out| packs(&registry, "repo", out));
        assert!(listed.starts_with(&name));
        assert!(listed.contains("pack=9"));
        assert!(listed.contains("idx=5"));

        let bytes = output(|out| cat_pack(&registry, "repo", &name, "pack", out));
        assert_eq!(bytes, "PACK data");
    }

    #[test]
    fn test_import_rejects_repeated_extension() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.pack");
        let second = dir.path().join("b.pack");
        std::fs::write(&first, b"PACK one").unwrap();
        std::fs::write(&second, b"PACK two").unwrap();

        let session = Arc::new(MemorySession::new());
        let registry = RepositoryRegistry::new(session.clone(), StoreConfig::default());
        let err = import_pack(&registry, "repo", &[first, second]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::DuplicateExtension { ext, .. }) if ext == "pack"
        ));
        assert_eq!(session.stats(), SessionStats::default());
        assert_eq!(output(|out| packs(&registry, "repo", out)), "");
    }

    #[test]
    fn test_import_missing_file_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("ok.pack");
        std::fs::write(&pack, b"PACK").unwrap();
        let missing = dir.path().join("missing.idx");

        let registry = registry();
        assert!(import_pack(&registry, "repo", &[pack, missing]).is_err());
        assert_eq!(output(|out| packs(&registry, "repo", out)), "");
    }
}
