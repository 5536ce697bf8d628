//! Materialising a traversal as an in-memory tree.
//!
//! [`crate::Walker::make_tree`] installs a consumer that files every
//! delivered path into a [`FileTree`], creating attribute-less placeholder
//! nodes for intermediate directories the walk never reported (common when
//! only certain file types are being collected). Recoverable errors are
//! recorded rather than aborting the walk.

use camino::{Utf8Path, Utf8PathBuf};

use crate::attr::Attributes;
use crate::result::{WalkError, WalkResult};

/// A node in the tree: one file, directory, or container entry.
/// Children keep their insertion order, which is the traversal order.
#[derive(Debug)]
pub struct FileTreeNode {
    name: String,
    path: Utf8PathBuf,
    attr: Option<Attributes>,
    children: Vec<FileTreeNode>,
}

impl FileTreeNode {
    fn new(path: Utf8PathBuf, attr: Option<Attributes>) -> FileTreeNode {
        let name = path.file_name().unwrap_or_default().to_owned();
        FileTreeNode {
            name,
            path,
            attr,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// `None` for placeholder nodes the walk never delivered directly.
    pub fn attributes(&self) -> Option<&Attributes> {
        self.attr.as_ref()
    }

    pub fn children(&self) -> &[FileTreeNode] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&FileTreeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }
}

/// An error the walk reported while the tree was being built.
#[derive(Debug)]
pub struct ErrorRecord {
    pub path: Utf8PathBuf,
    pub message: String,
    pub cause: Option<WalkError>,
    /// The path of the tree node the failing entry had already produced,
    /// if any; resolve it with [`FileTree::node`].
    pub node: Option<Utf8PathBuf>,
}

/// The result of [`crate::Walker::make_tree`]: a node tree rooted at the
/// walked path, plus the list of recoverable errors met along the way.
#[derive(Debug)]
pub struct FileTree {
    root: FileTreeNode,
    errors: Vec<ErrorRecord>,
}

impl FileTree {
    pub(crate) fn new(root_path: &Utf8Path) -> FileTree {
        FileTree {
            root: FileTreeNode::new(root_path.to_owned(), None),
            errors: Vec::new(),
        }
    }

    pub fn root(&self) -> &FileTreeNode {
        &self.root
    }

    /// Looks a node up by the display path the walk reported it under.
    pub fn node(&self, path: &Utf8Path) -> Option<&FileTreeNode> {
        if path == self.root.path {
            return Some(&self.root);
        }
        let relative = path.strip_prefix(&self.root.path).ok()?;
        let mut current = &self.root;
        for component in relative.components() {
            current = current.child(component.as_str())?;
        }
        Some(current)
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn errors_found(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Files a delivered path into the tree. Intermediate nodes appear as
    /// placeholders; delivering the same path twice is an error (and a sign
    /// the walk visited something twice).
    pub(crate) fn add_path(&mut self, path: &Utf8Path, attr: &Attributes) -> WalkResult<()> {
        if path == self.root.path {
            if self.root.attr.is_some() {
                return Err(WalkError::DuplicatePath(path.to_owned()));
            }
            self.root.attr = Some(attr.clone());
            return Ok(());
        }

        let relative = path
            .strip_prefix(&self.root.path)
            .map_err(|_| WalkError::Hierarchy(format!("'{path}' is outside the walked root")))?
            .to_owned();

        let mut walked = self.root.path.clone();
        let mut current = &mut self.root;
        let count = relative.components().count();
        for (index, component) in relative.components().enumerate() {
            let name = component.as_str();
            if name == ".." {
                return Err(WalkError::Hierarchy(format!(
                    "parent dir (..) found in path '{path}'"
                )));
            }
            walked.push(name);
            let last = index + 1 == count;

            let next = match current.child_index(name) {
                Some(i) => {
                    if last {
                        let node = &mut current.children[i];
                        if node.attr.is_some() {
                            return Err(WalkError::DuplicatePath(path.to_owned()));
                        }
                        // Completing a placeholder created for a deeper
                        // descendant seen earlier.
                        node.attr = Some(attr.clone());
                        return Ok(());
                    }
                    i
                }
                None => {
                    let node_attr = if last { Some(attr.clone()) } else { None };
                    current
                        .children
                        .push(FileTreeNode::new(walked.clone(), node_attr));
                    if last {
                        return Ok(());
                    }
                    current.children.len() - 1
                }
            };
            let node = current;
            current = &mut node.children[next];
        }
        Ok(())
    }

    pub(crate) fn add_error(
        &mut self,
        path: &Utf8Path,
        message: &str,
        cause: Option<WalkError>,
    ) {
        let node = self.node(path).map(|n| n.path().to_owned());
        self.errors.push(ErrorRecord {
            path: path.to_owned(),
            message: message.to_owned(),
            cause,
            node,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, AttrValue, FileType};

    fn attrs(t: FileType) -> Attributes {
        let mut a = Attributes::new();
        a.put(Attr::Type, Some(AttrValue::Type(t)));
        a
    }

    #[test]
    fn placeholders_fill_in_later() {
        let mut tree = FileTree::new(Utf8Path::new("R"));
        tree.add_path(Utf8Path::new("R/d1/deep/file"), &attrs(FileType::RegularFile))
            .unwrap();

        // d1 and deep exist as placeholders.
        let d1 = tree.node(Utf8Path::new("R/d1")).unwrap();
        assert!(d1.attributes().is_none());
        assert_eq!(d1.name(), "d1");

        // Reporting d1 later completes the stub.
        tree.add_path(Utf8Path::new("R/d1"), &attrs(FileType::Directory))
            .unwrap();
        let d1 = tree.node(Utf8Path::new("R/d1")).unwrap();
        assert_eq!(d1.attributes().unwrap().file_type(), Some(FileType::Directory));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut tree = FileTree::new(Utf8Path::new("R"));
        tree.add_path(Utf8Path::new("R/a"), &attrs(FileType::RegularFile))
            .unwrap();
        let again = tree.add_path(Utf8Path::new("R/a"), &attrs(FileType::RegularFile));
        assert!(matches!(again, Err(WalkError::DuplicatePath(_))));
    }

    #[test]
    fn children_keep_insertion_order() {
        let mut tree = FileTree::new(Utf8Path::new("R"));
        for name in ["zebra", "apple", "mango"] {
            tree.add_path(
                &Utf8PathBuf::from(format!("R/{name}")),
                &attrs(FileType::RegularFile),
            )
            .unwrap();
        }
        let names: Vec<&str> = tree.root().children().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["zebra", "apple", "mango"]);
    }

    #[test]
    fn errors_accumulate() {
        let mut tree = FileTree::new(Utf8Path::new("R"));
        assert!(!tree.errors_found());
        tree.add_error(Utf8Path::new("R/bad"), "cannot open", None);
        assert!(tree.errors_found());
        assert_eq!(tree.errors().len(), 1);
        assert_eq!(tree.errors()[0].path, "R/bad");
        // No node was ever delivered for the failing path.
        assert!(tree.errors()[0].node.is_none());

        tree.add_path(Utf8Path::new("R/half/done"), &attrs(FileType::RegularFile))
            .unwrap();
        tree.add_error(Utf8Path::new("R/half/done"), "read failed later", None);
        assert_eq!(
            tree.errors()[1].node.as_deref(),
            Some(Utf8Path::new("R/half/done"))
        );
    }

    #[test]
    fn outside_paths_are_hierarchy_errors() {
        let mut tree = FileTree::new(Utf8Path::new("R"));
        let result = tree.add_path(Utf8Path::new("elsewhere/x"), &attrs(FileType::RegularFile));
        assert!(matches!(result, Err(WalkError::Hierarchy(_))));
    }
}
