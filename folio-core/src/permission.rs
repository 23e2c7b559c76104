//! Typed `resource:action` permissions.
//!
//! Permissions travel as strings (`"posts:update"`, `"*:read"`, `"*:*"`) in
//! tokens and in the distributed permission cache, and are parsed into
//! [`Permission`] at the boundary. Matching happens only on the typed form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PermissionError;

/// Resource half of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `*` - matches every resource.
    Any,
    Posts,
    Comments,
    Projects,
    Users,
    Analytics,
    Media,
    Settings,
    Cache,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Any => "*",
            ResourceKind::Posts => "posts",
            ResourceKind::Comments => "comments",
            ResourceKind::Projects => "projects",
            ResourceKind::Users => "users",
            ResourceKind::Analytics => "analytics",
            ResourceKind::Media => "media",
            ResourceKind::Settings => "settings",
            ResourceKind::Cache => "cache",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" => ResourceKind::Any,
            "posts" => ResourceKind::Posts,
            "comments" => ResourceKind::Comments,
            "projects" => ResourceKind::Projects,
            "users" => ResourceKind::Users,
            "analytics" => ResourceKind::Analytics,
            "media" => ResourceKind::Media,
            "settings" => ResourceKind::Settings,
            "cache" => ResourceKind::Cache,
            _ => {
                return Err(PermissionError::UnknownResource {
                    value: s.to_string(),
                })
            }
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action half of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `*` - matches every action.
    Any,
    Create,
    Read,
    Update,
    Delete,
    Publish,
    Manage,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Any => "*",
            ActionKind::Create => "create",
            ActionKind::Read => "read",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Publish => "publish",
            ActionKind::Manage => "manage",
        }
    }
}

impl FromStr for ActionKind {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" => ActionKind::Any,
            "create" => ActionKind::Create,
            "read" => ActionKind::Read,
            "update" => ActionKind::Update,
            "delete" => ActionKind::Delete,
            "publish" => ActionKind::Publish,
            "manage" => ActionKind::Manage,
            _ => {
                return Err(PermissionError::UnknownAction {
                    value: s.to_string(),
                })
            }
        })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `resource:action` grant or requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    pub resource: ResourceKind,
    pub action: ActionKind,
}

impl Permission {
    /// `*:*`
    pub const ALL: Permission = Permission {
        resource: ResourceKind::Any,
        action: ActionKind::Any,
    };

    pub const fn new(resource: ResourceKind, action: ActionKind) -> Self {
        Self { resource, action }
    }

    /// Whether this granted permission satisfies `required`.
    ///
    /// A wildcard on either half of the grant matches anything on that half;
    /// a wildcard in the requirement is only satisfied by a wildcard grant.
    pub fn grants(&self, required: &Permission) -> bool {
        let resource_ok =
            self.resource == ResourceKind::Any || self.resource == required.resource;
        let action_ok = self.action == ActionKind::Any || self.action == required.action;
        resource_ok && action_ok
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (resource, action) =
            trimmed
                .split_once(':')
                .ok_or_else(|| PermissionError::InvalidFormat {
                    value: s.to_string(),
                })?;
        Ok(Self {
            resource: resource.parse()?,
            action: action.parse()?,
        })
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// The effective permissions of an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    pub fn new(permissions: Vec<Permission>) -> Self {
        let mut set = Self(Vec::with_capacity(permissions.len()));
        for permission in permissions {
            set.insert(permission);
        }
        set
    }

    /// Parse string grants, collecting the ones that fail to parse.
    ///
    /// Token and cache payloads are external input; one bad entry must not
    /// discard the rest.
    pub fn parse_lossy<I, S>(values: I) -> (Self, Vec<PermissionError>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        let mut rejected = Vec::new();
        for value in values {
            match value.as_ref().parse::<Permission>() {
                Ok(permission) => set.insert(permission),
                Err(e) => rejected.push(e),
            }
        }
        (set, rejected)
    }

    pub fn insert(&mut self, permission: Permission) {
        if !self.0.contains(&permission) {
            self.0.push(permission);
        }
    }

    /// Whether any grant in the set satisfies `required`.
    pub fn allows(&self, required: &Permission) -> bool {
        self.0.iter().any(|granted| granted.grants(required))
    }

    /// Whether at least one of `required` is satisfied.
    pub fn allows_any(&self, required: &[Permission]) -> bool {
        required.iter().any(|permission| self.allows(permission))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Permission::to_string).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perm(s: &str) -> Permission {
        s.parse().expect("test permission should parse")
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(
            perm("posts:update"),
            Permission::new(ResourceKind::Posts, ActionKind::Update)
        );
        assert_eq!(perm("*:*"), Permission::ALL);
        assert_eq!(perm("*:read").to_string(), "*:read");
        assert!("posts".parse::<Permission>().is_err());
        assert!("blogs:read".parse::<Permission>().is_err());
        assert!("posts:frobnicate".parse::<Permission>().is_err());
    }

    #[test]
    fn test_full_wildcard_matches_everything() {
        let set = PermissionSet::new(vec![Permission::ALL]);
        assert!(set.allows(&perm("posts:create")));
        assert!(set.allows(&perm("users:delete")));
        assert!(set.allows(&perm("cache:manage")));
    }

    #[test]
    fn test_resource_wildcard() {
        let set = PermissionSet::new(vec![perm("posts:*")]);
        assert!(set.allows(&perm("posts:create")));
        assert!(set.allows(&perm("posts:delete")));
        assert!(!set.allows(&perm("users:create")));
    }

    #[test]
    fn test_action_wildcard() {
        let set = PermissionSet::new(vec![perm("*:read")]);
        assert!(set.allows(&perm("posts:read")));
        assert!(set.allows(&perm("analytics:read")));
        assert!(!set.allows(&perm("posts:update")));
    }

    #[test]
    fn test_exact_match() {
        let set = PermissionSet::new(vec![perm("posts:read")]);
        assert!(set.allows(&perm("posts:read")));
        assert!(!set.allows(&perm("posts:update")));
    }

    #[test]
    fn test_wildcard_requirement_needs_wildcard_grant() {
        let set = PermissionSet::new(vec![perm("posts:read")]);
        assert!(!set.allows(&perm("posts:*")));
        let set = PermissionSet::new(vec![perm("posts:*")]);
        assert!(set.allows(&perm("posts:*")));
    }

    #[test]
    fn test_allows_any() {
        let set = PermissionSet::new(vec![perm("posts:create"), perm("posts:read")]);
        assert!(set.allows_any(&[perm("users:delete"), perm("posts:read")]));
        assert!(!set.allows_any(&[perm("users:delete")]));
        assert!(!set.allows_any(&[]));
    }

    #[test]
    fn test_parse_lossy_keeps_valid_entries() {
        let (set, rejected) = PermissionSet::parse_lossy(["posts:read", "bogus", "media:*"]);
        assert_eq!(set.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert!(set.allows(&perm("media:delete")));
    }

    #[test]
    fn test_set_deduplicates() {
        let set = PermissionSet::new(vec![perm("posts:read"), perm("posts:read")]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_serde_as_strings() -> Result<(), serde_json::Error> {
        let set = PermissionSet::new(vec![perm("posts:*"), perm("comments:read")]);
        let json = serde_json::to_string(&set)?;
        assert_eq!(json, r#"["posts:*","comments:read"]"#);
        let back: PermissionSet = serde_json::from_str(&json)?;
        assert_eq!(back, set);
        Ok(())
    }

    fn resource_strategy() -> impl Strategy<Value = ResourceKind> {
        prop_oneof![
            Just(ResourceKind::Posts),
            Just(ResourceKind::Comments),
            Just(ResourceKind::Projects),
            Just(ResourceKind::Users),
            Just(ResourceKind::Analytics),
            Just(ResourceKind::Media),
            Just(ResourceKind::Settings),
            Just(ResourceKind::Cache),
        ]
    }

    fn action_strategy() -> impl Strategy<Value = ActionKind> {
        prop_oneof![
            Just(ActionKind::Create),
            Just(ActionKind::Read),
            Just(ActionKind::Update),
            Just(ActionKind::Delete),
            Just(ActionKind::Publish),
            Just(ActionKind::Manage),
        ]
    }

    proptest! {
        #[test]
        fn prop_full_wildcard_grants_all(r in resource_strategy(), a in action_strategy()) {
            prop_assert!(Permission::ALL.grants(&Permission::new(r, a)));
        }

        #[test]
        fn prop_resource_wildcard_scoped_to_resource(
            granted in resource_strategy(),
            r in resource_strategy(),
            a in action_strategy(),
        ) {
            let grant = Permission::new(granted, ActionKind::Any);
            prop_assert_eq!(grant.grants(&Permission::new(r, a)), granted == r);
        }

        #[test]
        fn prop_exact_grant_only_matches_itself(
            gr in resource_strategy(),
            ga in action_strategy(),
            r in resource_strategy(),
            a in action_strategy(),
        ) {
            let grant = Permission::new(gr, ga);
            prop_assert_eq!(grant.grants(&Permission::new(r, a)), gr == r && ga == a);
        }
    }
}
