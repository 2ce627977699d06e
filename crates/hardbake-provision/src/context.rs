//! Build state threaded through directive execution.
//!
//! A [`BuildContext`] is moved into each directive and handed back with the
//! layer that directive produced. A failing directive drops the context, so
//! nothing from a half-applied step survives.

use std::collections::BTreeSet;

use hardbake_common::error::Result;
use hardbake_common::types::Sha256Hash;
use hardbake_image::layer::{self, LayerDiff};
use hardbake_image::{ImageConfig, ImageManifest, LayerRecord, LayerStore};
use hardbake_recipe::{AccountKind, Directive};

use crate::accounts::{AccountDb, AccountError, AddOutcome};
use crate::error::ProvisionErrorKind;

const PASSWD: &str = "etc/passwd";
const GROUP: &str = "etc/group";
const ACCOUNT_FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Accumulated state of an image under construction.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Account database as of the last applied directive.
    pub accounts: AccountDb,
    /// Directories present in the filesystem, without leading `/`.
    pub dirs: BTreeSet<String>,
    /// Runtime configuration as of the last applied directive.
    pub config: ImageConfig,
    /// Uid of the active identity.
    pub active_uid: u32,
    /// Cache key of the last applied directive.
    pub chain_key: Sha256Hash,
    /// Base layers followed by one record per applied directive.
    pub layers: Vec<LayerRecord>,
    base_digest: Sha256Hash,
}

impl BuildContext {
    /// Reads the state of a base image out of its layers. Later layers win
    /// for account files; directories accumulate.
    ///
    /// # Errors
    ///
    /// Returns an error if a base layer is missing, corrupt or holds a
    /// malformed account database.
    pub fn from_base(base: &ImageManifest, store: &dyn LayerStore) -> Result<Self> {
        let base_digest = base.digest()?;
        let mut passwd = None;
        let mut group = None;
        let mut dirs = BTreeSet::new();

        for record in &base.layers {
            let blob = store.fetch(&record.digest)?;
            if let Some(contents) = layer::read_file(&blob, PASSWD)? {
                passwd = Some(String::from_utf8_lossy(&contents).into_owned());
            }
            if let Some(contents) = layer::read_file(&blob, GROUP)? {
                group = Some(String::from_utf8_lossy(&contents).into_owned());
            }
            dirs.extend(layer::directories(&blob)?);
        }

        let accounts = AccountDb::parse(passwd.as_deref(), group.as_deref())?;
        let active_uid = match accounts.resolve_user(&base.config.user) {
            Some(user) => user.uid,
            None => {
                tracing::warn!(
                    user = %base.config.user,
                    "base user not found in account database, assuming root"
                );
                0
            }
        };
        tracing::debug!(
            layers = base.layers.len(),
            dirs = dirs.len(),
            user = %base.config.user,
            "loaded base image state"
        );

        Ok(Self {
            accounts,
            dirs,
            config: base.config.clone(),
            active_uid,
            chain_key: base_digest.clone(),
            layers: base.layers.clone(),
            base_digest,
        })
    }

    /// Whether later directives still run with superuser rights.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.active_uid == 0
    }

    /// Applies one directive, returning the updated context and the
    /// filesystem changes it made.
    ///
    /// # Errors
    ///
    /// Returns the failure kind; the context is consumed either way.
    pub fn apply(
        mut self,
        directive: &Directive,
    ) -> std::result::Result<(Self, LayerDiff), ProvisionErrorKind> {
        let mut diff = LayerDiff::new();
        if directive.creates_identity() {
            self.require_privilege(directive)?;
        }
        match directive {
            Directive::Label { key, value } => {
                let _ = self.config.labels.insert(key.clone(), value.clone());
            }
            Directive::Workdir { path } => {
                let cleaned = clean_absolute(path).ok_or_else(|| ProvisionErrorKind::InvalidPath {
                    path: path.clone(),
                })?;
                let mut prefix = String::new();
                for component in cleaned.split('/').filter(|c| !c.is_empty()) {
                    if !prefix.is_empty() {
                        prefix.push('/');
                    }
                    prefix.push_str(component);
                    if self.dirs.insert(prefix.clone()) {
                        diff.add_dir(&prefix, DIR_MODE);
                    }
                }
                self.config.workdir = cleaned;
            }
            Directive::GroupCreate { name, kind } => {
                match self.accounts.add_group(name, *kind).map_err(into_kind)? {
                    AddOutcome::Created(gid) => {
                        tracing::info!(group = %name, gid, kind = %kind, "group created");
                        diff.add_file(GROUP, ACCOUNT_FILE_MODE, self.accounts.render_group());
                    }
                    AddOutcome::AlreadyPresent => {
                        tracing::debug!(group = %name, "group already present");
                    }
                }
            }
            Directive::UserCreate { name, group, kind } => {
                match self
                    .accounts
                    .add_user(name, group, *kind)
                    .map_err(|e| match e {
                        AccountError::MissingGroup { group } => {
                            ProvisionErrorKind::MissingDependency {
                                group,
                                user: name.clone(),
                            }
                        }
                        other => into_kind(other),
                    })? {
                    AddOutcome::Created(uid) => {
                        tracing::info!(user = %name, uid, group = %group, kind = %kind, "user created");
                        diff.add_file(PASSWD, ACCOUNT_FILE_MODE, self.accounts.render_passwd());
                        if *kind == AccountKind::Normal {
                            self.add_home(name, &mut diff);
                        }
                    }
                    AddOutcome::AlreadyPresent => {
                        tracing::debug!(user = %name, "user already present");
                    }
                }
            }
            Directive::UserSwitch { name } => {
                let uid = self
                    .accounts
                    .resolve_user(name)
                    .map(|u| u.uid)
                    .ok_or_else(|| ProvisionErrorKind::UnknownAccount { name: name.clone() })?;
                if uid == 0 && !self.is_privileged() {
                    return Err(ProvisionErrorKind::PrivilegeEscalation {
                        reason: format!(
                            "cannot switch back to privileged account \"{name}\" after dropping to uid {}",
                            self.active_uid
                        ),
                    });
                }
                tracing::info!(user = %name, uid, "switched identity");
                self.active_uid = uid;
                self.config.user.clone_from(name);
            }
            Directive::Cmd { argv } => {
                self.config.cmd.clone_from(argv);
            }
        }
        Ok((self, diff))
    }

    /// Records the layer a directive produced.
    pub fn push_layer(&mut self, key: Sha256Hash, record: LayerRecord) {
        self.chain_key = key;
        self.layers.push(record);
    }

    /// Finishes the build.
    #[must_use]
    pub fn into_manifest(self) -> ImageManifest {
        ImageManifest {
            layers: self.layers,
            config: self.config,
            parent: Some(self.base_digest),
        }
    }

    fn require_privilege(&self, directive: &Directive) -> std::result::Result<(), ProvisionErrorKind> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(ProvisionErrorKind::PrivilegeEscalation {
                reason: format!(
                    "`{directive}` needs root but the active identity is uid {}",
                    self.active_uid
                ),
            })
        }
    }

    fn add_home(&mut self, name: &str, diff: &mut LayerDiff) {
        let Some(user) = self.accounts.user(name) else {
            return;
        };
        let home = layer::normalize_path(&user.home);
        let (uid, gid) = (user.uid, user.gid);
        if let Some(parent) = std::path::Path::new(&home).parent() {
            let parent = parent.to_string_lossy().into_owned();
            if !parent.is_empty() && self.dirs.insert(parent.clone()) {
                diff.add_dir(&parent, DIR_MODE);
            }
        }
        let _ = self.dirs.insert(home.clone());
        diff.add_owned_dir(&home, DIR_MODE, uid, gid);
    }
}

fn into_kind(err: AccountError) -> ProvisionErrorKind {
    match err {
        AccountError::NameConflict { name, reason } => {
            ProvisionErrorKind::NameConflict { name, reason }
        }
        AccountError::MissingGroup { group } => ProvisionErrorKind::MissingDependency {
            group,
            user: String::new(),
        },
        AccountError::Exhausted(kind) => ProvisionErrorKind::IdsExhausted(kind),
    }
}

/// Lexically cleans an absolute path. Returns `None` for relative paths.
fn clean_absolute(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            other => parts.push(other),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardbake_image::memory::MemoryStore;

    fn base(store: &MemoryStore) -> ImageManifest {
        let mut diff = LayerDiff::new();
        diff.add_file(
            PASSWD,
            0o644,
            "root:x:0:0:root:/root:/bin/bash\nnobody:x:65534:65534::/nonexistent:/usr/sbin/nologin\n",
        );
        diff.add_file(GROUP, 0o644, "root:x:0:\nnogroup:x:65534:\n");
        diff.add_dir("usr/local", 0o755);
        let blob = diff.to_tar().expect("tar");
        let digest = store.store(&blob).expect("store");
        ImageManifest {
            layers: vec![LayerRecord {
                digest,
                size_bytes: blob.len() as u64,
                created_by: "IMPORT test".into(),
                empty: false,
            }],
            config: ImageConfig::default(),
            parent: None,
        }
    }

    fn context() -> BuildContext {
        let store = MemoryStore::new();
        let manifest = base(&store);
        BuildContext::from_base(&manifest, &store).expect("context")
    }

    fn group(name: &str) -> Directive {
        Directive::GroupCreate {
            name: name.into(),
            kind: AccountKind::System,
        }
    }

    fn user(name: &str, group: &str) -> Directive {
        Directive::UserCreate {
            name: name.into(),
            group: group.into(),
            kind: AccountKind::System,
        }
    }

    fn switch(name: &str) -> Directive {
        Directive::UserSwitch { name: name.into() }
    }

    #[test]
    fn from_base_reads_accounts_and_dirs() {
        let ctx = context();
        assert!(ctx.accounts.user("nobody").is_some());
        assert!(ctx.dirs.contains("usr"));
        assert!(ctx.dirs.contains("usr/local"));
        assert!(ctx.is_privileged());
        assert_eq!(ctx.layers.len(), 1);
    }

    #[test]
    fn from_base_without_account_files_has_root_only() {
        let store = MemoryStore::new();
        let blob = LayerDiff::new().to_tar().expect("tar");
        let digest = store.store(&blob).expect("store");
        let manifest = ImageManifest {
            layers: vec![LayerRecord {
                digest,
                size_bytes: blob.len() as u64,
                created_by: "IMPORT empty".into(),
                empty: true,
            }],
            config: ImageConfig::default(),
            parent: None,
        };
        let ctx = BuildContext::from_base(&manifest, &store).expect("context");
        assert_eq!(ctx.accounts, AccountDb::root_only());
    }

    #[test]
    fn from_base_missing_layer_fails() {
        let manifest = base(&MemoryStore::new());
        assert!(BuildContext::from_base(&manifest, &MemoryStore::new()).is_err());
    }

    #[test]
    fn workdir_creates_missing_components() {
        let (ctx, diff) = context()
            .apply(&Directive::Workdir {
                path: "/usr/local/app/./bin/..".into(),
            })
            .expect("apply");
        assert_eq!(ctx.config.workdir, "/usr/local/app");
        let paths: Vec<&str> = diff.entries().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["usr/local/app"]);
    }

    #[test]
    fn workdir_existing_directory_is_empty_diff() {
        let (ctx, diff) = context()
            .apply(&Directive::Workdir {
                path: "/usr".into(),
            })
            .expect("apply");
        assert_eq!(ctx.config.workdir, "/usr");
        assert!(diff.is_empty());
    }

    #[test]
    fn relative_workdir_is_invalid() {
        let err = context()
            .apply(&Directive::Workdir { path: "app".into() })
            .unwrap_err();
        assert!(matches!(err, ProvisionErrorKind::InvalidPath { .. }));
    }

    #[test]
    fn group_then_user_writes_account_files() {
        let (ctx, diff) = context().apply(&group("appgroup")).expect("group");
        let entries: Vec<&str> = diff.entries().map(|(p, _)| p).collect();
        assert_eq!(entries, vec![GROUP]);

        let (ctx, diff) = ctx.apply(&user("appuser", "appgroup")).expect("user");
        let entries: Vec<&str> = diff.entries().map(|(p, _)| p).collect();
        assert_eq!(entries, vec![PASSWD]);
        let created = ctx.accounts.user("appuser").expect("user");
        assert_eq!(created.uid, 100);
        assert_eq!(created.gid, 100);
    }

    #[test]
    fn recreating_group_is_noop() {
        let (ctx, _) = context().apply(&group("appgroup")).expect("group");
        let before = ctx.accounts.clone();
        let (ctx, diff) = ctx.apply(&group("appgroup")).expect("again");
        assert!(diff.is_empty());
        assert_eq!(ctx.accounts, before);
    }

    #[test]
    fn user_without_group_is_missing_dependency() {
        let err = context().apply(&user("appuser", "appgroup")).unwrap_err();
        assert!(matches!(
            err,
            ProvisionErrorKind::MissingDependency { ref group, ref user }
                if group == "appgroup" && user == "appuser"
        ));
    }

    #[test]
    fn normal_user_gets_owned_home() {
        let (ctx, _) = context()
            .apply(&Directive::GroupCreate {
                name: "dev".into(),
                kind: AccountKind::Normal,
            })
            .expect("group");
        let (_, diff) = ctx
            .apply(&Directive::UserCreate {
                name: "alice".into(),
                group: "dev".into(),
                kind: AccountKind::Normal,
            })
            .expect("user");
        let home = diff
            .entries()
            .find(|(p, _)| *p == "home/alice")
            .map(|(_, e)| e.clone());
        assert_eq!(
            home,
            Some(layer::DiffEntry::Dir {
                mode: 0o755,
                uid: 1000,
                gid: 1000,
            })
        );
    }

    #[test]
    fn switch_sets_user_and_drops_privilege() {
        let (ctx, _) = context().apply(&group("g")).expect("group");
        let (ctx, _) = ctx.apply(&user("svc", "g")).expect("user");
        let (ctx, diff) = ctx.apply(&switch("svc")).expect("switch");
        assert!(diff.is_empty());
        assert_eq!(ctx.config.user, "svc");
        assert!(!ctx.is_privileged());
    }

    #[test]
    fn switch_to_unknown_account_fails() {
        let err = context().apply(&switch("ghost")).unwrap_err();
        assert!(matches!(err, ProvisionErrorKind::UnknownAccount { .. }));
    }

    #[test]
    fn account_creation_after_drop_is_escalation() {
        let (ctx, _) = context().apply(&group("g")).expect("group");
        let (ctx, _) = ctx.apply(&user("svc", "g")).expect("user");
        let (ctx, _) = ctx.apply(&switch("svc")).expect("switch");
        let err = ctx.apply(&group("other")).unwrap_err();
        assert!(matches!(err, ProvisionErrorKind::PrivilegeEscalation { .. }));
    }

    #[test]
    fn switch_back_to_root_is_escalation() {
        let (ctx, _) = context().apply(&switch("nobody")).expect("switch");
        let err = ctx.apply(&switch("root")).unwrap_err();
        assert!(matches!(err, ProvisionErrorKind::PrivilegeEscalation { .. }));
    }

    #[test]
    fn switch_between_unprivileged_accounts_is_allowed() {
        let (ctx, _) = context().apply(&group("g")).expect("group");
        let (ctx, _) = ctx.apply(&user("svc", "g")).expect("user");
        let (ctx, _) = ctx.apply(&switch("nobody")).expect("switch");
        let (ctx, _) = ctx.apply(&switch("svc")).expect("switch");
        assert_eq!(ctx.config.user, "svc");
    }

    #[test]
    fn label_and_cmd_update_config() {
        let (ctx, diff) = context()
            .apply(&Directive::Label {
                key: "maintainer".into(),
                value: "ops@example.com".into(),
            })
            .expect("label");
        assert!(diff.is_empty());
        let (ctx, _) = ctx
            .apply(&Directive::Cmd {
                argv: vec!["java".into()],
            })
            .expect("cmd");
        assert_eq!(ctx.config.cmd, vec!["java".to_string()]);
        assert_eq!(
            ctx.config.labels.get("maintainer").map(String::as_str),
            Some("ops@example.com")
        );
    }

    #[test]
    fn clean_absolute_handles_dots() {
        assert_eq!(clean_absolute("/"), Some("/".into()));
        assert_eq!(clean_absolute("/a//b/"), Some("/a/b".into()));
        assert_eq!(clean_absolute("/../a"), Some("/a".into()));
        assert_eq!(clean_absolute("a/b"), None);
    }
}
