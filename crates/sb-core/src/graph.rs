//! # Resource Graph
//!
//! Names, in one place, which collections hang below which resource.
//! The cascade executor derives its fan-out from this table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::Collection;
use crate::error::AppError;

/// Reference from a Comment to its Story and from a Reply to its Comment.
pub const RESOURCE_FIELD: &str = "resourceId";
/// Reference from a Flag to whatever it flags.
pub const FLAGGED_FIELD: &str = "flaggedResource";
/// Ownership field matched by author-scoped updates and deletes.
pub const AUTHOR_FIELD: &str = "authorUsername";

/// Deletable content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Story,
    Comment,
    Reply,
}

/// One dependent collection of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    pub collection: Collection,
    /// Field in the child document referencing the parent `_id`.
    pub field: &'static str,
    /// Set when the child is itself a content node with children.
    pub kind: Option<ResourceKind>,
}

const STORY_CHILDREN: &[ChildLink] = &[
    ChildLink {
        collection: Collection::Comments,
        field: RESOURCE_FIELD,
        kind: Some(ResourceKind::Comment),
    },
    ChildLink {
        collection: Collection::Flags,
        field: FLAGGED_FIELD,
        kind: None,
    },
];

const COMMENT_CHILDREN: &[ChildLink] = &[
    ChildLink {
        collection: Collection::Replies,
        field: RESOURCE_FIELD,
        kind: Some(ResourceKind::Reply),
    },
    ChildLink {
        collection: Collection::Flags,
        field: FLAGGED_FIELD,
        kind: None,
    },
];

const REPLY_CHILDREN: &[ChildLink] = &[ChildLink {
    collection: Collection::Flags,
    field: FLAGGED_FIELD,
    kind: None,
}];

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Story, ResourceKind::Comment, ResourceKind::Reply];

    pub const fn collection(self) -> Collection {
        match self {
            ResourceKind::Story => Collection::Stories,
            ResourceKind::Comment => Collection::Comments,
            ResourceKind::Reply => Collection::Replies,
        }
    }

    pub const fn children(self) -> &'static [ChildLink] {
        match self {
            ResourceKind::Story => STORY_CHILDREN,
            ResourceKind::Comment => COMMENT_CHILDREN,
            ResourceKind::Reply => REPLY_CHILDREN,
        }
    }

    /// Kind a newly created node of this kind must reference.
    pub const fn parent(self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Story => None,
            ResourceKind::Comment => Some(ResourceKind::Story),
            ResourceKind::Reply => Some(ResourceKind::Comment),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Story => "story",
            ResourceKind::Comment => "comment",
            ResourceKind::Reply => "reply",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "story" => Ok(ResourceKind::Story),
            "comment" => Ok(ResourceKind::Comment),
            "reply" => Ok(ResourceKind::Reply),
            other => Err(AppError::Validation(format!("unknown resource kind '{other}'"))),
        }
    }
}

/// How far below the root a cascade reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeDepth {
    /// The direct children of the deleted resource and the flags raised on
    /// those children. Grandchildren such as a comment's replies survive.
    #[default]
    Shallow,
    /// Every descendant reachable through the children table.
    Transitive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_are_disjoint_collections() {
        for kind in ResourceKind::ALL {
            let mut seen: Vec<Collection> = kind.children().iter().map(|l| l.collection).collect();
            seen.push(kind.collection());
            let before = seen.len();
            seen.sort();
            seen.dedup();
            assert_eq!(before, seen.len(), "{kind} fans out to a collection twice");
        }
    }

    #[test]
    fn test_parent_child_agree() {
        for kind in ResourceKind::ALL {
            for link in kind.children() {
                if let Some(child) = link.kind {
                    assert_eq!(child.parent(), Some(kind));
                    assert_eq!(child.collection(), link.collection);
                }
            }
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Story".parse::<ResourceKind>().unwrap(), ResourceKind::Story);
        assert!("flag".parse::<ResourceKind>().is_err());
    }
}
