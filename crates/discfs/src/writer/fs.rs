//! The in-memory tree a writer accumulates before emission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// POSIX-ish metadata attached to a tree node. Unset fields fall back to the
/// writer's defaults at emission time.
#[derive(Debug, Clone, Default)]
pub struct NodeMetadata {
  pub mode: Option<u32>,
  pub uid: Option<u32>,
  pub gid: Option<u32>,
  pub links: Option<u32>,
  pub created: Option<DateTime<Utc>>,
  pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeKind {
  Directory,
  File { size: u64 },
  Symlink { target: String },
}

impl NodeKind {
  fn describes(&self, other: &NodeKind) -> bool {
    std::mem::discriminant(self) == std::mem::discriminant(other)
  }
}

#[derive(Debug)]
pub(crate) struct TreeNode {
  pub(crate) kind: NodeKind,
  pub(crate) metadata: NodeMetadata,
  /// Children in raw-name ascending order.
  pub(crate) children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
  fn new(kind: NodeKind, metadata: NodeMetadata) -> Self {
    Self {
      kind,
      metadata,
      children: BTreeMap::new(),
    }
  }
}

/// The write tree, rooted at the volume root directory.
#[derive(Debug)]
pub(crate) struct Tree {
  pub(crate) root: TreeNode,
}

impl Tree {
  pub(crate) fn new() -> Self {
    Self {
      root: TreeNode::new(NodeKind::Directory, NodeMetadata::default()),
    }
  }

  fn split_path(path: &str) -> Result<Vec<&str>> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

    if components.is_empty() {
      return Err(Error::InvalidArgument {
        name: "path",
        message: format!("{path:?} names no entry"),
      });
    }
    if components.iter().any(|c| *c == "." || *c == "..") {
      return Err(Error::InvalidArgument {
        name: "path",
        message: format!("{path:?} contains a relative component"),
      });
    }

    Ok(components)
  }

  /// Insert a node, creating intermediate directories. Re-inserting an
  /// existing node of the same kind updates its metadata only; changing a
  /// node's kind is rejected.
  pub(crate) fn insert(
    &mut self,
    path: &str,
    kind: NodeKind,
    metadata: Option<NodeMetadata>,
  ) -> Result<()> {
    let components = Self::split_path(path)?;
    let (leaf, parents) = components.split_last().unwrap();

    let mut current = &mut self.root;
    for component in parents {
      let child = current
        .children
        .entry(component.to_string())
        .or_insert_with(|| TreeNode::new(NodeKind::Directory, NodeMetadata::default()));

      if child.kind != NodeKind::Directory {
        return Err(Error::InvalidArgument {
          name: "path",
          message: format!("{component:?} in {path:?} is not a directory"),
        });
      }

      current = child;
    }

    if current.kind != NodeKind::Directory {
      return Err(Error::InvalidArgument {
        name: "path",
        message: format!("parent of {path:?} is not a directory"),
      });
    }

    match current.children.get_mut(*leaf) {
      Some(existing) => {
        if !existing.kind.describes(&kind) {
          return Err(Error::InvalidArgument {
            name: "path",
            message: format!("{path:?} already exists with a different type"),
          });
        }
        if let Some(metadata) = metadata {
          existing.metadata = metadata;
        }
      }
      None => {
        current
          .children
          .insert(leaf.to_string(), TreeNode::new(kind, metadata.unwrap_or_default()));
      }
    }

    Ok(())
  }
}

/// A flattened view of the tree for layout: nodes indexed in depth-first
/// order, children kept in raw-name order. The root is node 0.
pub(crate) struct FlatTree {
  pub(crate) nodes: Vec<FlatNode>,
}

pub(crate) struct FlatNode {
  pub(crate) parent: usize,
  pub(crate) name: String,
  pub(crate) path: String,
  pub(crate) kind: NodeKind,
  pub(crate) metadata: NodeMetadata,
  pub(crate) children: Vec<usize>,
}

impl FlatTree {
  pub(crate) fn from_tree(tree: &Tree) -> Self {
    let mut nodes = vec![FlatNode {
      parent: 0,
      name: String::new(),
      path: "/".to_string(),
      kind: NodeKind::Directory,
      metadata: tree.root.metadata.clone(),
      children: Vec::new(),
    }];

    fn descend(nodes: &mut Vec<FlatNode>, node: &TreeNode, id: usize) {
      for (name, child) in &node.children {
        let child_id = nodes.len();
        let path = if nodes[id].path == "/" {
          format!("/{name}")
        } else {
          format!("{}/{name}", nodes[id].path)
        };

        nodes.push(FlatNode {
          parent: id,
          name: name.clone(),
          path,
          kind: child.kind.clone(),
          metadata: child.metadata.clone(),
          children: Vec::new(),
        });
        nodes[id].children.push(child_id);

        descend(nodes, child, child_id);
      }
    }

    descend(&mut nodes, &tree.root, 0);
    Self { nodes }
  }

  pub(crate) fn is_directory(&self, id: usize) -> bool {
    self.nodes[id].kind == NodeKind::Directory
  }
}
