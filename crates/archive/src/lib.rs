use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::{debug, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

use convert_common::classify;
use convert_common::item::Item;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArchiveKind {
    Tar,
    TarGz,
    TarXz,
}

fn detect_kind_from_name(name: &str) -> Option<ArchiveKind> {
    let n = name.to_lowercase();
    // Compound extensions must be checked before simple ones
    if n.ends_with(".tar.gz") || n.ends_with(".tgz") { return Some(ArchiveKind::TarGz); }
    if n.ends_with(".tar.xz") || n.ends_with(".txz") { return Some(ArchiveKind::TarXz); }
    if n.ends_with(".tar")                           { return Some(ArchiveKind::Tar);   }
    None
}

/// Unpack a container item into its member items.
///
/// Returns an empty list when `item` is not a container or when the archive
/// cannot be read; neither case is an error for the caller.  Members are
/// classified on their own and share nothing with `item`.  Nested archives
/// come back as ordinary members.
///
/// Members are returned in directory-walk order (sorted by file name within
/// each directory), which says nothing about their content.
pub fn expand(item: &Item) -> Vec<Item> {
    expand_in(item, &std::env::temp_dir())
}

/// Paths of the regular files in a container, read from the tar headers only.
///
/// Nothing is written to disk and no member is classified, so handlers can
/// look for telltale member names before paying for [`expand`].  Empty when
/// `item` is not a container or its headers cannot be read.
pub fn member_names(item: &Item) -> Vec<String> {
    let Some(kind) = detect_kind_from_name(item.name()) else {
        return vec![];
    };
    let source = Cursor::new(item.bytes());
    let listed = match kind {
        ArchiveKind::Tar   => entry_names(tar::Archive::new(source)),
        ArchiveKind::TarGz => entry_names(tar::Archive::new(GzDecoder::new(source))),
        ArchiveKind::TarXz => entry_names(tar::Archive::new(XzDecoder::new(source))),
    };
    listed.unwrap_or_else(|e| {
        debug!("could not list '{}': {e:#}", item.display_path());
        vec![]
    })
}

fn entry_names<R: Read>(mut archive: tar::Archive<R>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in archive.entries().context("reading tar entries")? {
        let entry = entry.context("reading tar header")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().context("decoding member path")?;
        names.push(path.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// [`expand`], re-applied to nested containers up to `max_depth` levels.
/// Members of a nested container get the container's path as a prefix.
pub fn expand_recursive(item: &Item, max_depth: usize) -> Vec<Item> {
    let mut out = Vec::new();
    for member in expand(item) {
        if member.is_container() && max_depth > 0 {
            let prefix = member.display_path();
            out.push(member.clone());
            for inner in expand_recursive(&member, max_depth - 1) {
                let path = join_path(&prefix, inner.path());
                out.push(inner.with_path(&path));
            }
        } else {
            out.push(member);
        }
    }
    out
}

fn expand_in(item: &Item, temp_root: &Path) -> Vec<Item> {
    let Some(kind) = detect_kind_from_name(item.name()) else {
        return vec![];
    };
    match unpack_members(item, kind, temp_root) {
        Ok(members) => {
            debug!("expanded '{}' into {} member(s)", item.display_path(), members.len());
            members
        }
        Err(e) => {
            warn!("could not expand '{}': {e:#}", item.display_path());
            vec![]
        }
    }
}

fn unpack_members(item: &Item, kind: ArchiveKind, temp_root: &Path) -> Result<Vec<Item>> {
    // Removed when `dir` drops, on every path out of this function.
    let dir = tempfile::Builder::new()
        .prefix("convert-expand-")
        .tempdir_in(temp_root)
        .context("creating extraction directory")?;

    let source = Cursor::new(item.bytes());
    match kind {
        ArchiveKind::Tar   => unpack(tar::Archive::new(source), dir.path())?,
        ArchiveKind::TarGz => unpack(tar::Archive::new(GzDecoder::new(source)), dir.path())?,
        ArchiveKind::TarXz => unpack(tar::Archive::new(XzDecoder::new(source)), dir.path())?,
    }
    Ok(collect_members(dir.path()))
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(false);
    // `unpack` refuses members that would land outside `dest`.
    archive.unpack(dest).context("unpacking tar archive")
}

fn collect_members(root: &Path) -> Vec<Item> {
    let mut members = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => { warn!("skipping unreadable member: {e}"); continue; }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let bytes = match std::fs::read(entry.path()) {
            Ok(b) => b,
            Err(e) => { warn!("skipping member '{}': {e}", rel.display()); continue; }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = rel
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        let mime = classify::classify(&bytes, &name).mime_type;
        members.push(Item::member(bytes, &name, &dir, &mime));
    }
    members
}

fn join_path(prefix: &str, rest: &str) -> String {
    if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}
