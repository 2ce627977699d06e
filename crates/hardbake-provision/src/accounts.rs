//! The image's account database (`/etc/passwd` and `/etc/group`).
//!
//! Parsed from the base image's layers, mutated by account directives and
//! rendered back into the layer each directive produces.

use std::collections::HashSet;
use std::fmt::Write;

use hardbake_common::constants::{
    DEFAULT_SHELL, FIRST_NORMAL_ID, FIRST_SYSTEM_ID, LAST_NORMAL_ID, LAST_SYSTEM_ID,
    NOLOGIN_SHELL, SYSTEM_HOME,
};
use hardbake_common::error::{HardbakeError, Result};
use hardbake_recipe::{AccountKind, KnownAccounts};

/// One line of `/etc/group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Password field, normally `x`.
    pub password: String,
    /// Numeric group id.
    pub gid: u32,
    /// Supplementary members.
    pub members: Vec<String>,
}

/// One line of `/etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    /// Login name.
    pub name: String,
    /// Password field, normally `x`.
    pub password: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Comment field.
    pub gecos: String,
    /// Home directory.
    pub home: String,
    /// Login shell.
    pub shell: String,
}

impl UserEntry {
    /// Whether this account is the superuser.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}

/// Result of an add operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new entry was written with this id.
    Created(u32),
    /// An identical entry already existed; nothing changed.
    AlreadyPresent,
}

/// Why an add operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// The name exists with incompatible attributes.
    NameConflict {
        /// Conflicting name.
        name: String,
        /// What is incompatible.
        reason: String,
    },
    /// The primary group of a new user does not exist.
    MissingGroup {
        /// Missing group.
        group: String,
    },
    /// No id is free in the requested range.
    Exhausted(AccountKind),
}

/// Classifies a numeric id the way Debian's `adduser` does.
#[must_use]
pub const fn kind_of(id: u32) -> AccountKind {
    if id >= FIRST_NORMAL_ID && id <= LAST_NORMAL_ID {
        AccountKind::Normal
    } else {
        AccountKind::System
    }
}

/// `/etc/passwd` and `/etc/group` held in memory, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDb {
    groups: Vec<GroupEntry>,
    users: Vec<UserEntry>,
}

impl AccountDb {
    /// The database of an image that only has `root`.
    #[must_use]
    pub fn root_only() -> Self {
        Self {
            groups: vec![GroupEntry {
                name: "root".into(),
                password: "x".into(),
                gid: 0,
                members: Vec::new(),
            }],
            users: vec![UserEntry {
                name: "root".into(),
                password: "x".into(),
                uid: 0,
                gid: 0,
                gecos: "root".into(),
                home: "/root".into(),
                shell: "/bin/sh".into(),
            }],
        }
    }

    /// Parses the contents of `/etc/passwd` and `/etc/group`. A missing
    /// file falls back to the `root`-only entries for that file.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::Parse` for lines with the wrong number of
    /// fields or non-numeric ids.
    pub fn parse(passwd: Option<&str>, group: Option<&str>) -> Result<Self> {
        let fallback = Self::root_only();
        let users = match passwd {
            Some(text) => parse_lines(text, 7, |f| {
                Ok(UserEntry {
                    name: f[0].to_string(),
                    password: f[1].to_string(),
                    uid: parse_id(f[2])?,
                    gid: parse_id(f[3])?,
                    gecos: f[4].to_string(),
                    home: f[5].to_string(),
                    shell: f[6].to_string(),
                })
            })?,
            None => fallback.users,
        };
        let groups = match group {
            Some(text) => parse_lines(text, 4, |f| {
                Ok(GroupEntry {
                    name: f[0].to_string(),
                    password: f[1].to_string(),
                    gid: parse_id(f[2])?,
                    members: f[3]
                        .split(',')
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect(),
                })
            })?,
            None => fallback.groups,
        };
        Ok(Self { groups, users })
    }

    /// Renders `/etc/passwd`.
    #[must_use]
    pub fn render_passwd(&self) -> String {
        let mut out = String::new();
        for u in &self.users {
            let _ = writeln!(
                out,
                "{}:{}:{}:{}:{}:{}:{}",
                u.name, u.password, u.uid, u.gid, u.gecos, u.home, u.shell
            );
        }
        out
    }

    /// Renders `/etc/group`.
    #[must_use]
    pub fn render_group(&self) -> String {
        let mut out = String::new();
        for g in &self.groups {
            let _ = writeln!(
                out,
                "{}:{}:{}:{}",
                g.name,
                g.password,
                g.gid,
                g.members.join(",")
            );
        }
        out
    }

    /// Looks up a group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Looks up a user by name.
    #[must_use]
    pub fn user(&self, name: &str) -> Option<&UserEntry> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Looks up a user by name or numeric uid.
    #[must_use]
    pub fn resolve_user(&self, name_or_uid: &str) -> Option<&UserEntry> {
        self.user(name_or_uid).or_else(|| {
            let uid: u32 = name_or_uid.parse().ok()?;
            self.users.iter().find(|u| u.uid == uid)
        })
    }

    /// Names present in the database, for pre-execution validation.
    #[must_use]
    pub fn known(&self) -> KnownAccounts {
        KnownAccounts {
            users: self.users.iter().map(|u| u.name.clone()).collect(),
            groups: self.groups.iter().map(|g| g.name.clone()).collect(),
        }
    }

    /// Adds a group.
    ///
    /// # Errors
    ///
    /// Returns `NameConflict` if the name exists with a different kind and
    /// `Exhausted` if no id is free.
    pub fn add_group(
        &mut self,
        name: &str,
        kind: AccountKind,
    ) -> std::result::Result<AddOutcome, AccountError> {
        if let Some(existing) = self.group(name) {
            let existing_kind = kind_of(existing.gid);
            if existing_kind == kind {
                return Ok(AddOutcome::AlreadyPresent);
            }
            return Err(AccountError::NameConflict {
                name: name.to_string(),
                reason: format!(
                    "a {existing_kind} group with gid {} already exists, cannot create a {kind} group",
                    existing.gid
                ),
            });
        }

        let used: HashSet<u32> = self.groups.iter().map(|g| g.gid).collect();
        let gid = allocate(kind, &used)?;
        self.groups.push(GroupEntry {
            name: name.to_string(),
            password: "x".into(),
            gid,
            members: Vec::new(),
        });
        Ok(AddOutcome::Created(gid))
    }

    /// Adds a user whose primary group is `group`.
    ///
    /// # Errors
    ///
    /// Returns `MissingGroup` if the group does not exist, `NameConflict` if
    /// the user exists with a different kind or primary group, and
    /// `Exhausted` if no id is free.
    pub fn add_user(
        &mut self,
        name: &str,
        group: &str,
        kind: AccountKind,
    ) -> std::result::Result<AddOutcome, AccountError> {
        let gid = self
            .group(group)
            .map(|g| g.gid)
            .ok_or_else(|| AccountError::MissingGroup {
                group: group.to_string(),
            })?;

        if let Some(existing) = self.user(name) {
            let existing_kind = kind_of(existing.uid);
            if existing_kind == kind && existing.gid == gid {
                return Ok(AddOutcome::AlreadyPresent);
            }
            let reason = if existing_kind == kind {
                format!(
                    "user already exists with primary gid {}, not {gid} ({group})",
                    existing.gid
                )
            } else {
                format!(
                    "a {existing_kind} user with uid {} already exists, cannot create a {kind} user",
                    existing.uid
                )
            };
            return Err(AccountError::NameConflict {
                name: name.to_string(),
                reason,
            });
        }

        let used: HashSet<u32> = self.users.iter().map(|u| u.uid).collect();
        let uid = allocate(kind, &used)?;
        let (home, shell) = match kind {
            AccountKind::System => (SYSTEM_HOME.to_string(), NOLOGIN_SHELL.to_string()),
            AccountKind::Normal => (format!("/home/{name}"), DEFAULT_SHELL.to_string()),
        };
        self.users.push(UserEntry {
            name: name.to_string(),
            password: "x".into(),
            uid,
            gid,
            gecos: String::new(),
            home,
            shell,
        });
        Ok(AddOutcome::Created(uid))
    }
}

fn allocate(kind: AccountKind, used: &HashSet<u32>) -> std::result::Result<u32, AccountError> {
    let (first, last) = match kind {
        AccountKind::System => (FIRST_SYSTEM_ID, LAST_SYSTEM_ID),
        AccountKind::Normal => (FIRST_NORMAL_ID, LAST_NORMAL_ID),
    };
    (first..=last)
        .find(|id| !used.contains(id))
        .ok_or(AccountError::Exhausted(kind))
}

fn parse_id(field: &str) -> Result<u32> {
    field.parse().map_err(|_| HardbakeError::Config {
        message: format!("invalid numeric id in account database: \"{field}\""),
    })
}

fn parse_lines<T>(
    text: &str,
    fields: usize,
    build: impl Fn(&[&str]) -> Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != fields {
            return Err(HardbakeError::Parse {
                line: idx + 1,
                message: format!(
                    "expected {fields} fields in account entry, got {}",
                    parts.len()
                ),
            });
        }
        out.push(build(&parts).map_err(|e| HardbakeError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBIAN_PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n";
    const DEBIAN_GROUP: &str = "root:x:0:\ndaemon:x:1:\nstaff:x:50:\nusers:x:100:\nnogroup:x:65534:\n";

    fn debian() -> AccountDb {
        AccountDb::parse(Some(DEBIAN_PASSWD), Some(DEBIAN_GROUP)).expect("parse")
    }

    #[test]
    fn parse_and_render_roundtrip() {
        let db = debian();
        assert_eq!(db.render_passwd(), DEBIAN_PASSWD);
        assert_eq!(db.render_group(), DEBIAN_GROUP);
    }

    #[test]
    fn parse_missing_files_fall_back_to_root() {
        let db = AccountDb::parse(None, None).expect("parse");
        assert_eq!(db, AccountDb::root_only());
    }

    #[test]
    fn parse_rejects_short_line() {
        let err = AccountDb::parse(Some("root:x:0:0\n"), None).unwrap_err();
        assert!(matches!(err, HardbakeError::Parse { line: 1, .. }), "got: {err}");
    }

    #[test]
    fn parse_rejects_non_numeric_id() {
        assert!(AccountDb::parse(None, Some("root:x:zero:\n")).is_err());
    }

    #[test]
    fn system_group_takes_first_free_system_gid() {
        let mut db = debian();
        // gid 100 is taken by "users"
        assert_eq!(
            db.add_group("appgroup", AccountKind::System),
            Ok(AddOutcome::Created(101))
        );
        assert!(db.render_group().ends_with("appgroup:x:101:\n"));
    }

    #[test]
    fn system_user_gets_no_home_and_no_shell() {
        let mut db = debian();
        let _ = db.add_group("appgroup", AccountKind::System).expect("group");
        assert_eq!(
            db.add_user("appuser", "appgroup", AccountKind::System),
            Ok(AddOutcome::Created(100))
        );
        let user = db.user("appuser").expect("user");
        assert_eq!(user.gid, 101);
        assert_eq!(user.home, "/nonexistent");
        assert_eq!(user.shell, "/usr/sbin/nologin");
        assert!(!user.is_privileged());
    }

    #[test]
    fn normal_user_gets_home_and_shell() {
        let mut db = AccountDb::root_only();
        let _ = db.add_group("dev", AccountKind::Normal).expect("group");
        assert_eq!(
            db.add_user("alice", "dev", AccountKind::Normal),
            Ok(AddOutcome::Created(1000))
        );
        let user = db.user("alice").expect("user");
        assert_eq!(user.home, "/home/alice");
        assert_eq!(user.shell, "/bin/sh");
    }

    #[test]
    fn same_kind_group_is_idempotent() {
        let mut db = debian();
        let _ = db.add_group("appgroup", AccountKind::System).expect("group");
        let before = db.clone();
        assert_eq!(
            db.add_group("appgroup", AccountKind::System),
            Ok(AddOutcome::AlreadyPresent)
        );
        assert_eq!(db, before);
    }

    #[test]
    fn system_group_over_normal_group_conflicts() {
        let mut db = AccountDb::root_only();
        let _ = db.add_group("appgroup", AccountKind::Normal).expect("group");
        let err = db.add_group("appgroup", AccountKind::System).unwrap_err();
        assert!(matches!(err, AccountError::NameConflict { ref name, .. } if name == "appgroup"));
    }

    #[test]
    fn user_in_missing_group_is_rejected() {
        let mut db = AccountDb::root_only();
        let err = db.add_user("appuser", "appgroup", AccountKind::System).unwrap_err();
        assert_eq!(
            err,
            AccountError::MissingGroup {
                group: "appgroup".into()
            }
        );
    }

    #[test]
    fn user_with_other_primary_group_conflicts() {
        let mut db = debian();
        let _ = db.add_group("a", AccountKind::System).expect("group");
        let _ = db.add_group("b", AccountKind::System).expect("group");
        let _ = db.add_user("svc", "a", AccountKind::System).expect("user");
        assert!(matches!(
            db.add_user("svc", "b", AccountKind::System),
            Err(AccountError::NameConflict { .. })
        ));
        assert_eq!(
            db.add_user("svc", "a", AccountKind::System),
            Ok(AddOutcome::AlreadyPresent)
        );
    }

    #[test]
    fn resolve_user_by_uid() {
        let db = debian();
        assert_eq!(db.resolve_user("0").map(|u| u.name.as_str()), Some("root"));
        assert_eq!(db.resolve_user("daemon").map(|u| u.uid), Some(1));
        assert!(db.resolve_user("4242").is_none());
    }

    #[test]
    fn kind_classification() {
        assert_eq!(kind_of(0), AccountKind::System);
        assert_eq!(kind_of(999), AccountKind::System);
        assert_eq!(kind_of(1000), AccountKind::Normal);
        assert_eq!(kind_of(65534), AccountKind::System);
    }

    #[test]
    fn known_lists_names() {
        let known = debian().known();
        assert!(known.users.contains("nobody"));
        assert!(known.groups.contains("nogroup"));
    }
}
