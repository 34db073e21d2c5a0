//! The rule-evaluation engine

use crate::rule::{Action, Rule, RuleError};
use async_trait::async_trait;
use fsw_core::{Event, Task, TaskId};
use nix::unistd::{Gid, Group, Uid, User};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Resolved ownership to apply to a path
type Owner = (Option<Uid>, Option<Gid>);

/// Ordered rule chain, first match wins
///
/// Stateless: every invocation re-evaluates the chain against the given
/// path. Exposed to schedulers through the [`Task`] implementation, which
/// offloads the filesystem work to a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct FileManager {
    rules: Vec<Rule>,
}

impl FileManager {
    /// Build a manager over an ordered rule list
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Append a rule to the end of the chain
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// The rule chain, in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Apply the first matching rule to `pathname`
    ///
    /// No matching rule is a no-op. A matching rule whose action fails
    /// returns that failure; later rules are never consulted.
    pub fn run(&self, pathname: &Path, task_id: TaskId) -> Result<(), RuleError> {
        let path_str = pathname.to_string_lossy();
        let Some(rule) = self.rules.iter().find(|r| r.matches(&path_str)) else {
            debug!("{task_id}: path '{}' matches no rule in ruleset", path_str);
            return Ok(());
        };

        match rule.action {
            Action::Delete => self.delete(rule, pathname, task_id),
            Action::Copy | Action::Move => self.relocate(rule, pathname, &path_str, task_id),
        }
    }

    fn delete(&self, rule: &Rule, path: &Path, task_id: TaskId) -> Result<(), RuleError> {
        info!("{task_id}: delete '{}'", path.display());

        if path.is_dir() {
            if rule.rec {
                fs::remove_dir_all(path)?;
            } else {
                // Refuses non-empty directories
                fs::remove_dir(path)?;
            }
        } else {
            fs::remove_file(path)?;
        }

        Ok(())
    }

    fn relocate(
        &self,
        rule: &Rule,
        path: &Path,
        path_str: &str,
        task_id: TaskId,
    ) -> Result<(), RuleError> {
        let dst_str = rule.render_dst(path_str);
        if dst_str.is_empty() {
            return Err(RuleError::EmptyDestination);
        }
        let dst = PathBuf::from(dst_str);

        if dst.exists() {
            if !rule.overwrite {
                return Err(RuleError::DestinationExists(dst));
            }
            debug!("{task_id}: replacing existing destination '{}'", dst.display());
            if dst.is_dir() {
                fs::remove_dir_all(&dst)?;
            } else {
                fs::remove_file(&dst)?;
            }
        }

        let owner = resolve_owner(rule)?;

        if let Some(dst_dir) = dst.parent() {
            if !dst_dir.as_os_str().is_empty() && !dst_dir.is_dir() {
                if !rule.auto_create {
                    return Err(RuleError::MissingDestinationDir(dst_dir.to_path_buf()));
                }
                let first_created = first_missing_ancestor(dst_dir);
                info!("{task_id}: create directory '{}'", dst_dir.display());
                fs::create_dir_all(dst_dir)?;
                apply_modes(&first_created, rule, &owner, task_id)?;
            }
        }

        info!(
            "{task_id}: {} '{}' to '{}'",
            rule.action.verb(),
            path.display(),
            dst.display()
        );

        match rule.action {
            Action::Copy => copy_path(path, &dst)?,
            Action::Move => fs::rename(path, &dst)?,
            Action::Delete => unreachable!(),
        }

        apply_modes(&dst, rule, &owner, task_id)
    }
}

#[async_trait]
impl Task for FileManager {
    async fn run(&self, event: Event, task_id: TaskId) -> anyhow::Result<()> {
        let manager = self.clone();
        let pathname = event.pathname;
        tokio::task::spawn_blocking(move || manager.run(&pathname, task_id)).await??;
        Ok(())
    }
}

/// Topmost ancestor of `dir` that does not exist yet
///
/// Used to apply directory mode and ownership to the whole freshly
/// created chain after `create_dir_all`.
fn first_missing_ancestor(dir: &Path) -> PathBuf {
    let mut first = dir.to_path_buf();
    while let Some(parent) = first.parent() {
        if parent.is_dir() || parent.as_os_str().is_empty() {
            break;
        }
        first = parent.to_path_buf();
    }
    first
}

/// Copy a file, or a directory tree recursively
fn copy_path(src: &Path, dst: &Path) -> Result<(), RuleError> {
    if src.is_dir() {
        fs::create_dir(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_path(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

/// Resolve the rule's user/group names to ids, if any are configured
fn resolve_owner(rule: &Rule) -> Result<Option<Owner>, RuleError> {
    if rule.user.is_none() && rule.group.is_none() {
        return Ok(None);
    }

    let uid = match &rule.user {
        Some(name) => Some(
            User::from_name(name)?
                .ok_or_else(|| RuleError::UnknownUser(name.clone()))?
                .uid,
        ),
        None => None,
    };
    let gid = match &rule.group {
        Some(name) => Some(
            Group::from_name(name)?
                .ok_or_else(|| RuleError::UnknownGroup(name.clone()))?
                .gid,
        ),
        None => None,
    };

    Ok(Some((uid, gid)))
}

/// Apply the configured mode and ownership to `path`
///
/// Directories are walked: directories get `dirmode`, files `filemode`,
/// both get the resolved ownership. Settings that are not configured
/// leave the respective attribute untouched.
fn apply_modes(
    path: &Path,
    rule: &Rule,
    owner: &Option<Owner>,
    task_id: TaskId,
) -> Result<(), RuleError> {
    if path.is_dir() {
        set_mode_and_owner(path, rule.dirmode, owner, task_id)?;

        let work_on_dirs = rule.dirmode.is_some() || owner.is_some();
        let work_on_files = rule.filemode.is_some() || owner.is_some();
        if !work_on_dirs && !work_on_files {
            return Ok(());
        }

        for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                if work_on_dirs {
                    set_mode_and_owner(entry.path(), rule.dirmode, owner, task_id)?;
                }
            } else if work_on_files {
                set_mode_and_owner(entry.path(), rule.filemode, owner, task_id)?;
            }
        }
        Ok(())
    } else {
        set_mode_and_owner(path, rule.filemode, owner, task_id)
    }
}

fn set_mode_and_owner(
    path: &Path,
    mode: Option<u32>,
    owner: &Option<Owner>,
    task_id: TaskId,
) -> Result<(), RuleError> {
    if let Some(mode) = mode {
        debug!("{task_id}: chmod {:o} '{}'", mode, path.display());
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    if let Some((uid, gid)) = owner {
        debug!("{task_id}: chown '{}'", path.display());
        nix::unistd::chown(path, *uid, *gid)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn task_id() -> TaskId {
        Uuid::new_v4()
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_no_matching_rule_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("keep.txt");
        fs::write(&file, b"data").unwrap();

        let manager =
            FileManager::new(vec![Rule::new(Action::Delete, r".*\.tmp$").unwrap()]);
        manager.run(&file, task_id()).unwrap();

        assert!(file.exists());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"data").unwrap();

        // Both rules match; only the first (move) must be applied
        let moved = temp.path().join("a.done");
        let manager = FileManager::new(vec![
            Rule::new(Action::Move, r"^(.*)\.tmp$")
                .unwrap()
                .with_dst("${1}.done"),
            Rule::new(Action::Delete, r".*\.tmp$").unwrap(),
        ]);
        manager.run(&file, task_id()).unwrap();

        assert!(!file.exists());
        assert!(moved.exists());
    }

    #[test]
    fn test_delete_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"data").unwrap();

        let manager =
            FileManager::new(vec![Rule::new(Action::Delete, r".*\.tmp$").unwrap()]);
        manager.run(&file, task_id()).unwrap();

        assert!(!file.exists());
    }

    #[test]
    fn test_delete_nonempty_dir_requires_rec() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("spool");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("inner.txt"), b"data").unwrap();

        let manager =
            FileManager::new(vec![Rule::new(Action::Delete, r".*/spool$").unwrap()]);
        assert!(manager.run(&dir, task_id()).is_err());
        assert!(dir.exists());

        let manager = FileManager::new(vec![Rule::new(Action::Delete, r".*/spool$")
            .unwrap()
            .with_rec(true)]);
        manager.run(&dir, task_id()).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_delete_empty_dir_without_rec() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("empty");
        fs::create_dir(&dir).unwrap();

        let manager =
            FileManager::new(vec![Rule::new(Action::Delete, r".*/empty$").unwrap()]);
        manager.run(&dir, task_id()).unwrap();

        assert!(!dir.exists());
    }

    #[test]
    fn test_move_renders_destination_from_captures() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("report.csv");
        fs::write(&file, b"x").unwrap();

        let manager = FileManager::new(vec![Rule::new(
            Action::Move,
            r"^(?P<dir>.*)/(?P<name>[^/]+)\.csv$",
        )
        .unwrap()
        .with_dst("$dir/archive/$name.csv")
        .with_auto_create(true)]);
        manager.run(&file, task_id()).unwrap();

        assert!(!file.exists());
        assert!(temp.path().join("archive/report.csv").exists());
    }

    #[test]
    fn test_move_without_auto_create_fails_on_missing_dir() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"x").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Move, r"^(.*)/a\.tmp$")
            .unwrap()
            .with_dst("${1}/missing/a.tmp")]);
        let err = manager.run(&file, task_id()).unwrap_err();

        assert!(matches!(err, RuleError::MissingDestinationDir(_)));
        assert!(file.exists());
    }

    #[test]
    fn test_auto_create_applies_dirmode_to_created_chain() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"x").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Move, r"^(.*)/a\.tmp$")
            .unwrap()
            .with_dst("${1}/one/two/a.tmp")
            .with_auto_create(true)
            .with_dirmode(0o700)
            .with_filemode(0o600)]);
        manager.run(&file, task_id()).unwrap();

        assert_eq!(mode_of(&temp.path().join("one")), 0o700);
        assert_eq!(mode_of(&temp.path().join("one/two")), 0o700);
        assert_eq!(mode_of(&temp.path().join("one/two/a.tmp")), 0o600);
    }

    #[test]
    fn test_overwrite_false_leaves_destination_untouched() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.tmp");
        let dst = temp.path().join("a.done");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Move, r"^(.*)\.tmp$")
            .unwrap()
            .with_dst("${1}.done")]);
        let err = manager.run(&src, task_id()).unwrap_err();

        assert!(matches!(err, RuleError::DestinationExists(_)));
        assert!(src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"old");
    }

    #[test]
    fn test_overwrite_true_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.tmp");
        let dst = temp.path().join("a.done");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Move, r"^(.*)\.tmp$")
            .unwrap()
            .with_dst("${1}.done")
            .with_overwrite(true)]);
        manager.run(&src, task_id()).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn test_copy_keeps_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.tmp");
        fs::write(&src, b"data").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Copy, r"^(.*)\.tmp$")
            .unwrap()
            .with_dst("${1}.bak")]);
        manager.run(&src, task_id()).unwrap();

        assert!(src.exists());
        assert_eq!(fs::read(temp.path().join("a.bak")).unwrap(), b"data");
    }

    #[test]
    fn test_copy_directory_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("f1"), b"1").unwrap();
        fs::write(src.join("sub/f2"), b"2").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Copy, r"^(.*)/tree$")
            .unwrap()
            .with_dst("${1}/tree.bak")]);
        manager.run(&src, task_id()).unwrap();

        assert_eq!(fs::read(temp.path().join("tree.bak/f1")).unwrap(), b"1");
        assert_eq!(fs::read(temp.path().join("tree.bak/sub/f2")).unwrap(), b"2");
        assert!(src.exists());
    }

    #[test]
    fn test_empty_rendered_destination_is_an_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"x").unwrap();

        // dst_re left empty renders an empty destination
        let manager =
            FileManager::new(vec![Rule::new(Action::Move, r"^.*$").unwrap()]);
        let err = manager.run(&file, task_id()).unwrap_err();

        assert!(matches!(err, RuleError::EmptyDestination));
        assert!(file.exists());
    }

    #[test]
    fn test_unknown_user_is_an_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.tmp");
        fs::write(&file, b"x").unwrap();

        let manager = FileManager::new(vec![Rule::new(Action::Move, r"^(.*)\.tmp$")
            .unwrap()
            .with_dst("${1}.done")
            .with_user("no-such-user-exists")]);
        let err = manager.run(&file, task_id()).unwrap_err();

        assert!(matches!(err, RuleError::UnknownUser(_)));
    }
}
