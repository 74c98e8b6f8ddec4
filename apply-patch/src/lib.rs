//! Parsing, verification and atomic application of model-proposed patches.
//!
//! Two input envelopes are supported: the freeform `*** Begin Patch` format
//! ([`parse_freeform`]) and conventional unified diffs ([`parse_unified`]).
//! Both produce the same ordered list of [`PatchChange`] values, which are
//! then verified against the current state of the filesystem ([`verify`]) and
//! applied all-or-nothing ([`apply`]): new contents are staged in sibling
//! tempfiles and only renamed over their targets once every stage succeeded.
//! A failure mid-apply rolls back every change that already landed.

mod parser;
mod seek_sequence;
mod unified;

use std::io;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

pub use parser::ParseError;
pub use parser::parse_freeform;
pub use unified::parse_unified;

use seek_sequence::seek_sequence;

/// A single file operation parsed out of a patch envelope. Paths are exactly
/// as written in the patch; callers resolve them to absolute paths before
/// verification.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchChange {
    Add { path: PathBuf, content: String },
    Delete { path: PathBuf },
    Update { path: PathBuf, chunks: Vec<UpdateChunk> },
}

impl PatchChange {
    pub fn path(&self) -> &Path {
        match self {
            PatchChange::Add { path, .. }
            | PatchChange::Delete { path }
            | PatchChange::Update { path, .. } => path,
        }
    }

    /// Rebuild the change with a resolved target path.
    pub fn with_path(self, path: PathBuf) -> Self {
        match self {
            PatchChange::Add { content, .. } => PatchChange::Add { path, content },
            PatchChange::Delete { .. } => PatchChange::Delete { path },
            PatchChange::Update { chunks, .. } => PatchChange::Update { path, chunks },
        }
    }
}

/// A contiguous block of an update. `old_lines` must match the target file
/// byte-for-byte; they are replaced by `new_lines`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateChunk {
    /// Optional single line of context used to narrow down the position of
    /// the chunk before `old_lines` are matched.
    pub change_context: Option<String>,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
    /// When true, `old_lines` must sit at the very end of the file.
    pub is_end_of_file: bool,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Pre-apply verification failed; nothing was written.
    #[error("patch verification failed for {}: {reason}", path.display())]
    Verify { path: PathBuf, reason: String },
    /// I/O failure while staging or applying; completed work was rolled back.
    #[error("patch apply failed for {} (rolled back): {source}", path.display())]
    Apply {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("patch contains no file operations")]
    Empty,
}

/// Outcome of one applied change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub created: bool,
}

#[derive(Debug)]
enum PlannedOp {
    /// Write `content` to the target, which `created` says did not exist.
    Write { content: String, created: bool },
    Delete,
}

#[derive(Debug)]
struct PlannedChange {
    path: PathBuf,
    op: PlannedOp,
    /// Prior file contents, for rollback. `None` when the target is new.
    prior: Option<Vec<u8>>,
}

/// A verified patch, ready to apply. Holding one guarantees that at
/// verification time every add target was absent, every update/delete target
/// existed, and every update chunk matched its file exactly.
#[derive(Debug)]
pub struct PatchPlan {
    changes: Vec<PlannedChange>,
}

impl PatchPlan {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Verify `changes` against the current filesystem state and compute the new
/// contents of every touched file. Targets must already be resolved to
/// absolute paths. Returns the first failure with its path and reason.
pub fn verify(changes: &[PatchChange]) -> Result<PatchPlan, PatchError> {
    if changes.is_empty() {
        return Err(PatchError::Empty);
    }

    let mut seen: Vec<&Path> = Vec::with_capacity(changes.len());
    let mut planned = Vec::with_capacity(changes.len());
    for change in changes {
        let path = change.path();
        if seen.contains(&path) {
            return Err(PatchError::Verify {
                path: path.to_path_buf(),
                reason: "path appears more than once in the patch".to_string(),
            });
        }
        seen.push(path);

        match change {
            PatchChange::Add { path, content } => {
                if path.exists() {
                    return Err(PatchError::Verify {
                        path: path.clone(),
                        reason: "add target already exists".to_string(),
                    });
                }
                planned.push(PlannedChange {
                    path: path.clone(),
                    op: PlannedOp::Write {
                        content: content.clone(),
                        created: true,
                    },
                    prior: None,
                });
            }
            PatchChange::Delete { path } => {
                if !path.is_file() {
                    return Err(PatchError::Verify {
                        path: path.clone(),
                        reason: "delete target does not exist".to_string(),
                    });
                }
                let prior = std::fs::read(path).map_err(|source| PatchError::Apply {
                    path: path.clone(),
                    source,
                })?;
                planned.push(PlannedChange {
                    path: path.clone(),
                    op: PlannedOp::Delete,
                    prior: Some(prior),
                });
            }
            PatchChange::Update { path, chunks } => {
                if !path.is_file() {
                    return Err(PatchError::Verify {
                        path: path.clone(),
                        reason: "update target does not exist".to_string(),
                    });
                }
                let original =
                    std::fs::read_to_string(path).map_err(|source| PatchError::Apply {
                        path: path.clone(),
                        source,
                    })?;
                let new_content = apply_chunks(&original, path, chunks)?;
                planned.push(PlannedChange {
                    path: path.clone(),
                    op: PlannedOp::Write {
                        content: new_content,
                        created: false,
                    },
                    prior: Some(original.into_bytes()),
                });
            }
        }
    }

    Ok(PatchPlan { changes: planned })
}

/// Apply a verified plan atomically. Either every change lands on disk or,
/// after a mid-apply failure, none does.
pub fn apply(plan: PatchPlan) -> Result<Vec<ChangeResult>, PatchError> {
    apply_with_renamer(plan, &|from, to| std::fs::rename(from, to))
}

/// Rename hook is injectable so tests can force a mid-apply failure.
fn apply_with_renamer(
    plan: PatchPlan,
    rename: &dyn Fn(&Path, &Path) -> io::Result<()>,
) -> Result<Vec<ChangeResult>, PatchError> {
    // Stage 1: write every new content to a sibling tempfile. No target is
    // touched yet, so a failure here only needs tempfile cleanup.
    let mut staged: Vec<Option<PathBuf>> = Vec::with_capacity(plan.changes.len());
    for change in &plan.changes {
        match &change.op {
            PlannedOp::Write { content, created } => {
                if *created
                    && let Some(parent) = change.path.parent()
                    && !parent.as_os_str().is_empty()
                    && let Err(source) = std::fs::create_dir_all(parent)
                {
                    remove_staged(&staged);
                    return Err(PatchError::Apply {
                        path: change.path.clone(),
                        source,
                    });
                }
                let tmp = tmp_sibling(&change.path);
                if let Err(source) = std::fs::write(&tmp, content) {
                    remove_staged(&staged);
                    return Err(PatchError::Apply {
                        path: change.path.clone(),
                        source,
                    });
                }
                staged.push(Some(tmp));
            }
            PlannedOp::Delete => staged.push(None),
        }
    }

    // Stage 2: rename tempfiles over their targets and unlink deletions, in
    // patch order. On failure, undo everything that already landed and remove
    // the tempfiles that have not been consumed yet.
    let mut completed: Vec<&PlannedChange> = Vec::with_capacity(plan.changes.len());
    for (idx, change) in plan.changes.iter().enumerate() {
        let result = match (&change.op, &staged[idx]) {
            (PlannedOp::Write { .. }, Some(tmp)) => rename(tmp, &change.path),
            (PlannedOp::Delete, _) => std::fs::remove_file(&change.path),
            (PlannedOp::Write { .. }, None) => Err(io::Error::other("tempfile missing")),
        };
        if let Err(source) = result {
            rollback(&completed);
            remove_staged(&staged[idx..]);
            return Err(PatchError::Apply {
                path: change.path.clone(),
                source,
            });
        }
        completed.push(change);
    }

    Ok(plan
        .changes
        .iter()
        .map(|change| match &change.op {
            PlannedOp::Write { content, created } => ChangeResult {
                path: change.path.clone(),
                bytes_written: content.len() as u64,
                created: *created,
            },
            PlannedOp::Delete => ChangeResult {
                path: change.path.clone(),
                bytes_written: 0,
                created: false,
            },
        })
        .collect())
}

/// Undo completed renames and deletions, newest first. Best effort: a file
/// that cannot be restored is skipped so the rest of the rollback still runs.
fn rollback(completed: &[&PlannedChange]) {
    for change in completed.iter().rev() {
        match (&change.op, &change.prior) {
            (PlannedOp::Write { created: true, .. }, _) => {
                let _ = std::fs::remove_file(&change.path);
            }
            (PlannedOp::Write { created: false, .. }, Some(prior))
            | (PlannedOp::Delete, Some(prior)) => {
                let _ = std::fs::write(&change.path, prior);
            }
            _ => {}
        }
    }
}

fn remove_staged(staged: &[Option<PathBuf>]) {
    for tmp in staged.iter().flatten() {
        let _ = std::fs::remove_file(tmp);
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let suffix: u32 = rand::rng().random();
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".lincona-tmp-{suffix:08x}"));
    path.with_file_name(name)
}

/// Compute the new contents of a file after applying `chunks` in order. Every
/// chunk must match the file byte-for-byte at or after the position where the
/// previous chunk matched.
fn apply_chunks(original: &str, path: &Path, chunks: &[UpdateChunk]) -> Result<String, PatchError> {
    let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
    // Drop the empty element produced by the final newline so line counts
    // match standard diff behaviour.
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    let mut cursor = 0;
    let mut replacements: Vec<(usize, usize, Vec<String>)> = Vec::new();
    for chunk in chunks {
        if let Some(context) = &chunk.change_context {
            match seek_sequence(&lines, std::slice::from_ref(context), cursor, false) {
                Some(idx) => cursor = idx + 1,
                None => {
                    return Err(PatchError::Verify {
                        path: path.to_path_buf(),
                        reason: format!("context line '{context}' not found"),
                    });
                }
            }
        }

        if chunk.old_lines.is_empty() {
            // Pure insertion at the end of the file.
            replacements.push((lines.len(), 0, chunk.new_lines.clone()));
            continue;
        }

        // The last element of `old_lines` is often an empty string standing
        // for the file's final newline, which is not present in `lines`; retry
        // without it if the literal pattern does not match.
        let mut pattern: &[String] = &chunk.old_lines;
        let mut replacement: &[String] = &chunk.new_lines;
        let mut found = seek_sequence(&lines, pattern, cursor, chunk.is_end_of_file);
        if found.is_none() && pattern.last().is_some_and(String::is_empty) {
            pattern = &pattern[..pattern.len() - 1];
            if replacement.last().is_some_and(String::is_empty) {
                replacement = &replacement[..replacement.len() - 1];
            }
            found = seek_sequence(&lines, pattern, cursor, chunk.is_end_of_file);
        }

        match found {
            Some(idx) => {
                replacements.push((idx, pattern.len(), replacement.to_vec()));
                cursor = idx + pattern.len();
            }
            None => {
                return Err(PatchError::Verify {
                    path: path.to_path_buf(),
                    reason: format!("expected lines {:?} not found", chunk.old_lines),
                });
            }
        }
    }

    // Apply in reverse so earlier replacements do not shift later indices.
    for (start, old_len, new_segment) in replacements.iter().rev() {
        let start = *start;
        let end = (start + old_len).min(lines.len());
        lines.splice(start..end, new_segment.iter().cloned());
    }

    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn wrap(body: &str) -> String {
        format!("*** Begin Patch\n{body}\n*** End Patch")
    }

    fn resolve_into(dir: &Path, changes: Vec<PatchChange>) -> Vec<PatchChange> {
        changes
            .into_iter()
            .map(|c| {
                let abs = dir.join(c.path());
                c.with_path(abs)
            })
            .collect()
    }

    #[test]
    fn add_creates_file_with_contents() {
        let dir = tempdir().unwrap();
        let patch = wrap("*** Add File: add.txt\n+ab\n+cd");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        let results = apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(
            results,
            vec![ChangeResult {
                path: dir.path().join("add.txt"),
                bytes_written: 6,
                created: true,
            }]
        );
        assert_eq!(fs::read_to_string(dir.path().join("add.txt")).unwrap(), "ab\ncd\n");
    }

    #[test]
    fn add_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let patch = wrap("*** Add File: nested/deep/add.txt\n+x");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/deep/add.txt")).unwrap(),
            "x\n"
        );
    }

    #[test]
    fn update_replaces_matched_lines() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("u.txt");
        fs::write(&target, "foo\nbar\nbaz\n").unwrap();
        let patch = wrap("*** Update File: u.txt\n@@\n foo\n-bar\n+qux\n baz");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "foo\nqux\nbaz\n");
    }

    #[test]
    fn update_with_context_line_skips_earlier_match() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("c.txt");
        fs::write(&target, "val = 1\nsection_b\nval = 1\n").unwrap();
        let patch = wrap("*** Update File: c.txt\n@@ section_b\n-val = 1\n+val = 2");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "val = 1\nsection_b\nval = 2\n"
        );
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("d.txt");
        fs::write(&target, "gone\n").unwrap();
        let patch = wrap("*** Delete File: d.txt");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn verify_rejects_existing_add_target() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "here\n").unwrap();
        let patch = wrap("*** Add File: a.txt\n+clobber");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        match verify(&changes) {
            Err(PatchError::Verify { path, reason }) => {
                assert_eq!(path, dir.path().join("a.txt"));
                assert!(reason.contains("already exists"));
            }
            other => panic!("expected verify error, got {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_missing_update_target() {
        let dir = tempdir().unwrap();
        let patch = wrap("*** Update File: missing.txt\n@@\n-a\n+b");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        assert!(matches!(verify(&changes), Err(PatchError::Verify { .. })));
    }

    #[test]
    fn verify_rejects_context_mismatch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("m.txt"), "actual\n").unwrap();
        let patch = wrap("*** Update File: m.txt\n@@\n-expected\n+replacement");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        match verify(&changes) {
            Err(PatchError::Verify { reason, .. }) => assert!(reason.contains("not found")),
            other => panic!("expected verify error, got {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_whitespace_fuzz() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("w.txt"), "line with trailing   \n").unwrap();
        let patch = wrap("*** Update File: w.txt\n@@\n-line with trailing\n+changed");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        assert!(matches!(verify(&changes), Err(PatchError::Verify { .. })));
    }

    #[test]
    fn verify_rejects_duplicate_targets() {
        let dir = tempdir().unwrap();
        let patch = wrap("*** Add File: twice.txt\n+one\n*** Add File: twice.txt\n+two");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        match verify(&changes) {
            Err(PatchError::Verify { reason, .. }) => {
                assert!(reason.contains("more than once"));
            }
            other => panic!("expected verify error, got {other:?}"),
        }
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(matches!(verify(&[]), Err(PatchError::Empty)));
    }

    #[test]
    fn unified_diff_applies_like_freeform() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("s.txt");
        fs::write(&target, "alpha\nbeta\ngamma\n").unwrap();
        let diff = "--- a/s.txt\n\
                    +++ b/s.txt\n\
                    @@ -1,3 +1,3 @@\n \
                    alpha\n\
                    -beta\n\
                    +BETA\n \
                    gamma\n";
        let changes = resolve_into(dir.path(), parse_unified(diff).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "alpha\nBETA\ngamma\n");
    }

    /// Mid-apply rename failure must leave the filesystem exactly as it was:
    /// the already-renamed update is rolled back and the add never lands.
    #[test]
    fn mid_apply_failure_rolls_back_everything() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, "foo\n").unwrap();
        let b = dir.path().join("b.txt");

        let patch = wrap(
            "*** Update File: a.txt\n@@\n-foo\n+bar\n*** Add File: b.txt\n+hi",
        );
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        let plan = verify(&changes).unwrap();

        let fail_for = b.clone();
        let result = apply_with_renamer(plan, &move |from, to| {
            if to == fail_for {
                Err(io::Error::other("simulated rename failure"))
            } else {
                std::fs::rename(from, to)
            }
        });

        assert!(matches!(result, Err(PatchError::Apply { .. })));
        assert_eq!(fs::read_to_string(&a).unwrap(), "foo\n");
        assert!(!b.exists());
        // No stray tempfiles either.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("lincona-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn rollback_restores_deleted_files() {
        let dir = tempdir().unwrap();
        let keep = dir.path().join("keep.txt");
        fs::write(&keep, "precious\n").unwrap();
        let add = dir.path().join("late.txt");

        let patch = wrap("*** Delete File: keep.txt\n*** Add File: late.txt\n+x");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        let plan = verify(&changes).unwrap();

        let fail_for = add.clone();
        let result = apply_with_renamer(plan, &move |from, to| {
            if to == fail_for {
                Err(io::Error::other("simulated rename failure"))
            } else {
                std::fs::rename(from, to)
            }
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&keep).unwrap(), "precious\n");
        assert!(!add.exists());
    }

    #[test]
    fn end_of_file_chunk_only_matches_at_eof() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("e.txt");
        fs::write(&target, "x\ny\nx\n").unwrap();
        let patch = wrap("*** Update File: e.txt\n@@\n-x\n+z\n*** End of File");
        let changes = resolve_into(dir.path(), parse_freeform(&patch).unwrap());
        apply(verify(&changes).unwrap()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "x\ny\nz\n");
    }
}
