//! [`Shell`]: a nestable context of aliases, environment scopes, directory
//! scopes, and per-command defaults that [`Command`] values can be built
//! against.
//!
//! Unlike [`Command`]/[`Pipeline`], which are immutable values, `Shell` is a
//! mutable, long-lived object: scopes are entered and left in strict LIFO
//! order, enforced by the borrow checker rather than a runtime stack
//! assertion (see [`EnvScope`]/[`DirScope`]).

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};

use crate::command::Command;

#[derive(Clone, Copy, Default)]
struct Defaults {
    glob: Option<bool>,
    checked: Option<bool>,
    merge_env: Option<bool>,
}

/// A nestable context: an alias table, a stack of environment-override
/// scopes, a stack of working-directory scopes, and command-option
/// defaults.
///
/// `Shell` itself holds no subprocess state; it only resolves the inputs a
/// [`Command`] is built with. Build commands against it with
/// [`command`](Self::command), which looks the name up in the alias table
/// (a single, non-recursive step), then overlays the active environment and
/// directory scopes and the shell's defaults.
pub struct Shell {
    aliases: HashMap<String, Vec<OsString>>,
    envstack: Vec<Vec<(OsString, Option<OsString>)>>,
    dirstack: Vec<PathBuf>,
    defaults: Defaults,
}

impl Default for Shell {
    fn default() -> Shell {
        Shell::new()
    }
}

impl Shell {
    /// Creates an empty shell context: no aliases, no active scopes, no
    /// defaults beyond [`Command::new`]'s own.
    pub fn new() -> Shell {
        Shell {
            aliases: HashMap::new(),
            envstack: Vec::new(),
            dirstack: Vec::new(),
            defaults: Defaults::default(),
        }
    }

    /// Registers (or replaces) an alias: `name` resolves to `argv` the next
    /// time it's passed to [`command`](Self::command). Alias lookup is a
    /// single, non-recursive step -- if `argv[0]` is itself a registered
    /// alias, it is not expanded again.
    pub fn alias<S, I, T>(&mut self, name: S, argv: I)
    where
        S: AsRef<str>,
        I: IntoIterator<Item = T>,
        T: AsRef<OsStr>,
    {
        let argv: Vec<OsString> = argv.into_iter().map(|t| t.as_ref().to_owned()).collect();
        self.aliases.insert(name.as_ref().to_owned(), argv);
    }

    /// Sets the `glob` default applied to commands built through this shell,
    /// unless overridden on the returned [`Command`] itself.
    pub fn set_default_glob(&mut self, value: bool) -> &mut Self {
        self.defaults.glob = Some(value);
        self
    }

    /// Sets the `checked` default applied to commands built through this
    /// shell.
    pub fn set_default_checked(&mut self, value: bool) -> &mut Self {
        self.defaults.checked = Some(value);
        self
    }

    /// Sets the `merge_env` default applied to commands built through this
    /// shell.
    pub fn set_default_merge_env(&mut self, value: bool) -> &mut Self {
        self.defaults.merge_env = Some(value);
        self
    }

    /// Pushes a new environment-override scope and returns a guard that
    /// pops it on drop.
    ///
    /// A `None` value means "unset this variable", overriding both earlier
    /// scopes and (if `merge_env` is in effect) the inherited process
    /// environment.
    ///
    /// Scopes nest through the returned guard rather than through `self`
    /// directly: the guard borrows `self` mutably, so a caller physically
    /// cannot enter another top-level scope, or drop an outer guard, before
    /// an inner one entered through it is dropped first. That makes
    /// out-of-order enter/leave a compile error rather than a runtime panic.
    pub fn enter_env<I, K, V>(&mut self, vars: I) -> EnvScope<'_>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let frame = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.map(|v| v.as_ref().to_owned())))
            .collect();
        self.envstack.push(frame);
        EnvScope { shell: self }
    }

    /// Pushes a new working-directory scope and returns a guard that pops
    /// it on drop. A relative `dir` is joined onto the current top of the
    /// stack (or the process's own working directory, if the stack is
    /// empty) and lexically normalized; `.`/`..` components are resolved
    /// without touching the filesystem.
    pub fn enter_dir<P: AsRef<Path>>(&mut self, dir: P) -> DirScope<'_> {
        let dir = dir.as_ref();
        let resolved = if dir.is_absolute() {
            normalize(dir)
        } else {
            let base = self.dirstack.last().cloned().unwrap_or_else(|| PathBuf::from("."));
            normalize(&base.join(dir))
        };
        self.dirstack.push(resolved);
        DirScope { shell: self }
    }

    /// Builds a [`Command`] for `name`, resolving it against the alias
    /// table, then overlaying the active environment/directory scopes and
    /// this shell's defaults.
    ///
    /// If `name` is not a registered alias, the command is simply
    /// `Command::new(name)`.
    pub fn command<S: AsRef<str>>(&self, name: S) -> Command {
        let name = name.as_ref();
        let mut cmd = match self.aliases.get(name) {
            Some(argv) if !argv.is_empty() => {
                let mut iter = argv.iter();
                let mut cmd = Command::new(iter.next().unwrap());
                cmd = cmd.args(iter);
                cmd
            }
            _ => Command::new(name),
        };

        if let Some(cwd) = self.resolve_cwd() {
            cmd = cmd.cwd(cwd);
        }
        for (key, value) in self.resolve_env() {
            cmd = match value {
                Some(value) => cmd.env(key, value),
                None => cmd.env_remove(key),
            };
        }
        if let Some(glob) = self.defaults.glob {
            cmd = cmd.glob(glob);
        }
        if let Some(true) = self.defaults.checked {
            cmd = cmd.checked();
        }
        if let Some(merge_env) = self.defaults.merge_env {
            cmd = cmd.merge_env(merge_env);
        }
        cmd
    }

    fn resolve_cwd(&self) -> Option<PathBuf> {
        self.dirstack.last().cloned()
    }

    /// Left-folds the envstack: later frames override earlier ones by key.
    fn resolve_env(&self) -> Vec<(OsString, Option<OsString>)> {
        let mut merged: Vec<(OsString, Option<OsString>)> = Vec::new();
        for frame in &self.envstack {
            for (key, value) in frame {
                match merged.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = value.clone(),
                    None => merged.push((key.clone(), value.clone())),
                }
            }
        }
        merged
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// RAII guard for an environment scope pushed by [`Shell::enter_env`]. Pops
/// the scope when dropped.
pub struct EnvScope<'a> {
    shell: &'a mut Shell,
}

impl Drop for EnvScope<'_> {
    fn drop(&mut self) {
        self.shell.envstack.pop();
    }
}

impl Deref for EnvScope<'_> {
    type Target = Shell;
    fn deref(&self) -> &Shell {
        self.shell
    }
}

impl DerefMut for EnvScope<'_> {
    fn deref_mut(&mut self) -> &mut Shell {
        self.shell
    }
}

/// RAII guard for a working-directory scope pushed by [`Shell::enter_dir`].
/// Pops the scope when dropped.
pub struct DirScope<'a> {
    shell: &'a mut Shell,
}

impl Drop for DirScope<'_> {
    fn drop(&mut self) {
        self.shell.dirstack.pop();
    }
}

impl Deref for DirScope<'_> {
    type Target = Shell;
    fn deref(&self) -> &Shell {
        self.shell
    }
}

impl DerefMut for DirScope<'_> {
    fn deref_mut(&mut self) -> &mut Shell {
        self.shell
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolves_to_registered_argv() {
        let mut shell = Shell::new();
        shell.alias("ll", ["ls", "-la"]);
        let cmd = shell.command("ll");
        assert_eq!(format!("{cmd:?}"), "ls -la");
    }

    #[test]
    fn unaliased_name_passes_through() {
        let shell = Shell::new();
        let cmd = shell.command("true");
        assert_eq!(format!("{cmd:?}"), "true");
    }

    #[test]
    fn alias_is_not_expanded_recursively() {
        let mut shell = Shell::new();
        shell.alias("inner", ["true"]);
        shell.alias("outer", ["inner"]);
        let cmd = shell.command("outer");
        assert_eq!(format!("{cmd:?}"), "inner");
    }

    #[test]
    fn nested_env_scopes_are_lifo() {
        let mut shell = Shell::new();
        {
            let mut outer = shell.enter_env([("A", Some("1")), ("B", Some("2"))]);
            assert_eq!(outer.resolve_env().len(), 2);
            {
                let inner = outer.enter_env([("A", Some("override")), ("C", None::<&str>)]);
                let resolved = inner.resolve_env();
                assert!(resolved.contains(&(OsString::from("A"), Some(OsString::from("override")))));
                assert!(resolved.contains(&(OsString::from("C"), None)));
                assert!(resolved.contains(&(OsString::from("B"), Some(OsString::from("2")))));
            }
            // inner scope popped; A reverts to the outer scope's value.
            let resolved = outer.resolve_env();
            assert!(resolved.contains(&(OsString::from("A"), Some(OsString::from("1")))));
            assert!(!resolved.iter().any(|(k, _)| k == "C"));
        }
        assert!(shell.resolve_env().is_empty());
    }

    #[test]
    fn dir_scopes_join_relative_paths() {
        let mut shell = Shell::new();
        {
            let outer = shell.enter_dir("/tmp/work");
            assert_eq!(outer.resolve_cwd(), Some(PathBuf::from("/tmp/work")));
            {
                let inner = outer.enter_dir("sub/../nested");
                assert_eq!(inner.resolve_cwd(), Some(PathBuf::from("/tmp/work/nested")));
            }
            assert_eq!(outer.resolve_cwd(), Some(PathBuf::from("/tmp/work")));
        }
        assert_eq!(shell.resolve_cwd(), None);
    }
}
