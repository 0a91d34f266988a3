//! Pure functions over trees in the object store: build, walk, look up,
//! replace subtrees, and zip several trees against each other.
//!
//! Everything here works on IDs and shares unchanged subtrees, so the
//! cost of an edit is one write per level of the touched spine, and the
//! cost of a comparison skips any subtree with the same ID on all sides.

use anyhow::{Result, anyhow, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};

use crate::hashing::ObjectId;
use crate::object::{FileEntry, Kind, Node, Object, Tree};
use crate::store::{ObjectStore, Txn};

/// Object sinks the builders can write through - the store itself or an
/// open transaction.
pub trait PutObject {
    fn put_object(&self, object: &Object) -> Result<ObjectId>;
}

impl PutObject for ObjectStore {
    fn put_object(&self, object: &Object) -> Result<ObjectId> {
        self.put(object)
    }
}

impl PutObject for Txn<'_> {
    fn put_object(&self, object: &Object) -> Result<ObjectId> {
        self.put(object)
    }
}

/// Splits a relative path into its components,
/// refusing anything that could escape the tree.
pub fn components(path: &Utf8Path) -> Result<Vec<&str>> {
    use camino::Utf8Component;
    let mut comps = Vec::new();
    for c in path.components() {
        match c {
            Utf8Component::Normal(n) => comps.push(n),
            Utf8Component::CurDir => {}
            _ => return Err(crate::error::HoardError::PathEscape(path.to_owned()).into()),
        }
    }
    Ok(comps)
}

/// Builds a tree from `(path, entry)` pairs pre-sorted by path,
/// returning the root ID.
///
/// Keeps a stack of in-progress directories; when the input leaves a
/// directory, it's finalized and written. One store write per unique
/// subtree touched.
pub fn build_sorted<P, I>(store: &P, items: I) -> Result<ObjectId>
where
    P: PutObject,
    I: IntoIterator<Item = (Utf8PathBuf, FileEntry)>,
{
    // stack[0] is the nameless root.
    let mut stack: Vec<(String, Tree)> = vec![(String::new(), Tree::new())];
    let mut open_dirs: Vec<String> = Vec::new();
    let mut previous: Option<Utf8PathBuf> = None;

    fn pop_dir<P: PutObject>(store: &P, stack: &mut Vec<(String, Tree)>) -> Result<()> {
        let (name, tree) = stack.pop().expect("Popped the root");
        let id = store.put_object(&Object::Tree(tree))?;
        let (_, parent) = stack.last_mut().expect("Popped the root");
        ensure!(
            parent.insert(name.clone(), Node::tree(id)).is_none(),
            "Duplicate tree entries at {name}"
        );
        Ok(())
    }

    for (path, entry) in items {
        ensure!(
            previous.as_deref().is_none_or(|p| p < &*path),
            "Paths out of order at {path}"
        );
        let comps = components(&path)?;
        let Some((name, dirs)) = comps.split_last() else {
            bail!("Empty path in tree input");
        };

        let common = open_dirs
            .iter()
            .zip(dirs.iter())
            .take_while(|(open, new)| open.as_str() == **new)
            .count();
        while open_dirs.len() > common {
            pop_dir(store, &mut stack)?;
            open_dirs.pop();
        }
        for dir in &dirs[common..] {
            stack.push(((*dir).to_owned(), Tree::new()));
            open_dirs.push((*dir).to_owned());
        }

        let id = store.put_object(&Object::File(entry))?;
        let (_, tree) = stack.last_mut().expect("Popped the root");
        ensure!(
            tree.insert((*name).to_owned(), Node::file(id)).is_none(),
            "Duplicate tree entries at {path}"
        );
        previous = Some(path);
    }
    while stack.len() > 1 {
        pop_dir(store, &mut stack)?;
    }
    let (_, root) = stack.pop().unwrap();
    store.put_object(&Object::Tree(root))
}

/// Finds the node at `path`, or None if nothing's there.
/// An empty path names the root tree itself.
pub fn lookup(store: &ObjectStore, root: Option<ObjectId>, path: &Utf8Path) -> Result<Option<Node>> {
    let comps = components(path)?;
    let Some(mut tree_id) = root else {
        return Ok(None);
    };
    let Some((name, dirs)) = comps.split_last() else {
        return Ok(Some(Node::tree(tree_id)));
    };
    for dir in dirs {
        let tree = store.read_tree(&tree_id)?;
        match tree.get(*dir) {
            Some(node) if node.kind == Kind::Tree => tree_id = node.id,
            _ => return Ok(None),
        }
    }
    Ok(store.read_tree(&tree_id)?.get(*name).copied())
}

/// The ID of the subtree at `path`, if there is one.
pub fn subtree_id(
    store: &ObjectStore,
    root: Option<ObjectId>,
    path: &Utf8Path,
) -> Result<Option<ObjectId>> {
    Ok(lookup(store, root, path)?
        .filter(|n| n.kind == Kind::Tree)
        .map(|n| n.id))
}

/// Sets or removes the node at `path`, rebuilding only the spine and
/// sharing everything else. Directories emptied by a removal are pruned.
///
/// Returns the new root, or None if the whole tree emptied out.
pub fn replace<P: PutObject>(
    store: &ObjectStore,
    sink: &P,
    root: Option<ObjectId>,
    path: &Utf8Path,
    node: Option<Node>,
) -> Result<Option<ObjectId>> {
    let comps = components(path)?;
    set_at(store, sink, root, &comps, node)
}

/// Like [`replace`], but for roots that must always exist (`HEAD`):
/// an emptied tree becomes the canonical empty tree.
pub fn replace_in_root<P: PutObject>(
    store: &ObjectStore,
    sink: &P,
    root: ObjectId,
    path: &Utf8Path,
    node: Option<Node>,
) -> Result<ObjectId> {
    match replace(store, sink, Some(root), path, node)? {
        Some(id) => Ok(id),
        None => sink.put_object(&Object::Tree(Tree::new())),
    }
}

fn set_at<P: PutObject>(
    store: &ObjectStore,
    sink: &P,
    tree_id: Option<ObjectId>,
    comps: &[&str],
    node: Option<Node>,
) -> Result<Option<ObjectId>> {
    let Some((first, rest)) = comps.split_first() else {
        // Replacing the root itself; only trees make sense here.
        return match node {
            Some(n) if n.kind == Kind::Tree => Ok(Some(n.id)),
            Some(_) => Err(anyhow!("Can't replace a tree root with a file")),
            None => Ok(None),
        };
    };
    let mut tree = match tree_id {
        Some(id) => store.read_tree(&id)?,
        None => Tree::new(),
    };
    if rest.is_empty() {
        match node {
            Some(n) => {
                tree.insert((*first).to_owned(), n);
            }
            None => {
                tree.remove(*first);
            }
        }
    } else {
        let child = match tree.get(*first) {
            Some(n) if n.kind == Kind::Tree => Some(n.id),
            Some(_) => bail!("{first} is not a directory"),
            None => None,
        };
        match set_at(store, sink, child, rest, node)? {
            Some(id) => {
                tree.insert((*first).to_owned(), Node::tree(id));
            }
            None => {
                tree.remove(*first);
            }
        }
    }
    if tree.is_empty() {
        Ok(None)
    } else {
        Ok(Some(sink.put_object(&Object::Tree(tree))?))
    }
}

/// Visits every entry under `root` in path order.
/// The action sees directories before their contents.
pub fn walk<F>(store: &ObjectStore, root: Option<ObjectId>, prefix: &Utf8Path, v: &mut F) -> Result<()>
where
    F: FnMut(&Utf8Path, &Node) -> Result<()>,
{
    let Some(root) = root else {
        return Ok(());
    };
    let tree = store.read_tree(&root)?;
    for (name, node) in &tree {
        let path = prefix.join(name);
        v(&path, node)?;
        if node.kind == Kind::Tree {
            walk(store, Some(node.id), &path, v)?;
        }
    }
    Ok(())
}

/// Visits every file under `root` in path order.
pub fn walk_files<F>(
    store: &ObjectStore,
    root: Option<ObjectId>,
    prefix: &Utf8Path,
    v: &mut F,
) -> Result<()>
where
    F: FnMut(&Utf8Path, FileEntry) -> Result<()>,
{
    walk(store, root, prefix, &mut |path, node| {
        if node.kind == Kind::File {
            v(path, store.read_file(&node.id)?)?;
        }
        Ok(())
    })
}

/// Whether to recurse into a zipped directory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Visit {
    Descend,
    Skip,
}

/// Zips any number of trees together, visiting the union of their entries
/// in path order.
///
/// The visitor gets each entry's nodes, side by side (None where a side
/// lacks it), and steers descent into directories. Subtrees with the same
/// ID on every side short-circuit: the entry is still visited, but
/// nothing below it is. If the roots themselves all match, nothing is
/// visited at all.
pub fn zip<F>(
    store: &ObjectStore,
    prefix: &Utf8Path,
    roots: &[Option<ObjectId>],
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(&Utf8Path, &[Option<Node>]) -> Result<Visit>,
{
    assert!(!roots.is_empty());
    if roots.iter().all(|r| *r == roots[0]) {
        return Ok(());
    }
    zip_trees(store, prefix, roots, visit)
}

fn zip_trees<F>(
    store: &ObjectStore,
    prefix: &Utf8Path,
    roots: &[Option<ObjectId>],
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(&Utf8Path, &[Option<Node>]) -> Result<Visit>,
{
    let trees = roots
        .iter()
        .map(|r| match r {
            Some(id) => store.read_tree(id),
            None => Ok(Tree::new()),
        })
        .collect::<Result<Vec<_>>>()?;

    let names = trees
        .iter()
        .flat_map(|t| t.keys())
        .collect::<std::collections::BTreeSet<_>>();

    for name in names {
        let nodes = trees
            .iter()
            .map(|t| t.get(name.as_str()).copied())
            .collect::<Vec<_>>();
        let path = prefix.join(name);

        let all_same = nodes.iter().all(|n| *n == nodes[0]);
        let any_dir = nodes.iter().flatten().any(|n| n.kind == Kind::Tree);

        let verdict = visit(&path, &nodes)?;
        if any_dir && !all_same && verdict == Visit::Descend {
            let subtrees = nodes
                .iter()
                .map(|n| match n {
                    Some(n) if n.kind == Kind::Tree => Some(n.id),
                    _ => None,
                })
                .collect::<Vec<_>>();
            zip_trees(store, &path, &subtrees, visit)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::empty_tree_id;

    fn entry(contents: &[u8]) -> FileEntry {
        FileEntry {
            hash: ObjectId::hash(contents),
            size: contents.len() as u64,
        }
    }

    fn sample_tree(store: &ObjectStore) -> Result<ObjectId> {
        build_sorted(
            store,
            [
                (Utf8PathBuf::from("test.me.1"), entry(b"gsadfs")),
                (Utf8PathBuf::from("wat/test.me.2"), entry(b"gsadf3dq")),
                (Utf8PathBuf::from("wat/test.me.3"), entry(b"afaswewfas")),
            ],
        )
    }

    #[test]
    fn builds_deterministically() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let first = sample_tree(&store)?;
        let second = sample_tree(&store)?;
        assert_eq!(first, second);

        let other_store = ObjectStore::in_memory()?;
        assert_eq!(first, sample_tree(&other_store)?);
        Ok(())
    }

    #[test]
    fn empty_input_builds_the_empty_tree() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let root = build_sorted(&store, [])?;
        assert_eq!(root, empty_tree_id());
        Ok(())
    }

    #[test]
    fn rejects_unsorted_input() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let unsorted = build_sorted(
            &store,
            [
                (Utf8PathBuf::from("wat/test.me.2"), entry(b"b")),
                (Utf8PathBuf::from("test.me.1"), entry(b"a")),
            ],
        );
        assert!(unsorted.is_err());
        Ok(())
    }

    #[test]
    fn looks_up_files_and_dirs() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let root = sample_tree(&store)?;

        let file = lookup(&store, Some(root), Utf8Path::new("wat/test.me.2"))?.unwrap();
        assert_eq!(file.kind, Kind::File);
        assert_eq!(store.read_file(&file.id)?, entry(b"gsadf3dq"));

        let dir = lookup(&store, Some(root), Utf8Path::new("wat"))?.unwrap();
        assert_eq!(dir.kind, Kind::Tree);
        assert_eq!(
            subtree_id(&store, Some(root), Utf8Path::new("wat"))?,
            Some(dir.id)
        );

        assert_eq!(lookup(&store, Some(root), Utf8Path::new("nope"))?, None);
        assert_eq!(
            lookup(&store, Some(root), Utf8Path::new(""))?,
            Some(Node::tree(root))
        );
        Ok(())
    }

    #[test]
    fn replace_shares_untouched_subtrees() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let root = sample_tree(&store)?;
        let wat_before = subtree_id(&store, Some(root), Utf8Path::new("wat"))?;

        let file = store.put(&Object::File(entry(b"new stuff")))?;
        let new_root = replace(
            &store,
            &store,
            Some(root),
            Utf8Path::new("test.me.4"),
            Some(Node::file(file)),
        )?
        .unwrap();

        assert_ne!(new_root, root);
        // The untouched subtree is shared, not rebuilt.
        assert_eq!(
            subtree_id(&store, Some(new_root), Utf8Path::new("wat"))?,
            wat_before
        );
        Ok(())
    }

    #[test]
    fn removal_prunes_empty_dirs() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let root = sample_tree(&store)?;

        let smaller =
            replace(&store, &store, Some(root), Utf8Path::new("wat/test.me.2"), None)?.unwrap();
        assert!(lookup(&store, Some(smaller), Utf8Path::new("wat"))?.is_some());

        let smallest =
            replace(&store, &store, Some(smaller), Utf8Path::new("wat/test.me.3"), None)?.unwrap();
        assert_eq!(lookup(&store, Some(smallest), Utf8Path::new("wat"))?, None);

        // Removing the last file empties the tree entirely.
        assert_eq!(
            replace(&store, &store, Some(smallest), Utf8Path::new("test.me.1"), None)?,
            None
        );
        Ok(())
    }

    #[test]
    fn zip_short_circuits_identical_trees() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let root = sample_tree(&store)?;

        let mut visits = 0;
        zip(
            &store,
            Utf8Path::new(""),
            &[Some(root), Some(root)],
            &mut |_, _| {
                visits += 1;
                Ok(Visit::Descend)
            },
        )?;
        assert_eq!(visits, 0);
        Ok(())
    }

    #[test]
    fn zip_walks_the_union() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let left = sample_tree(&store)?;
        let right = build_sorted(
            &store,
            [
                (Utf8PathBuf::from("test.me.1"), entry(b"gsadfs")),
                (Utf8PathBuf::from("wat/test.me.3"), entry(b"changed!")),
                (Utf8PathBuf::from("wat/test.me.4"), entry(b"brand new")),
            ],
        )?;

        let mut seen = Vec::new();
        zip(
            &store,
            Utf8Path::new(""),
            &[Some(left), Some(right)],
            &mut |path, nodes| {
                let shape = nodes.iter().map(|n| n.is_some()).collect::<Vec<_>>();
                seen.push((path.to_owned(), shape));
                Ok(Visit::Descend)
            },
        )?;

        assert_eq!(
            seen,
            vec![
                (Utf8PathBuf::from("test.me.1"), vec![true, true]),
                (Utf8PathBuf::from("wat"), vec![true, true]),
                (Utf8PathBuf::from("wat/test.me.2"), vec![true, false]),
                (Utf8PathBuf::from("wat/test.me.3"), vec![true, true]),
                (Utf8PathBuf::from("wat/test.me.4"), vec![false, true]),
            ]
        );
        Ok(())
    }

    #[test]
    fn zip_skips_on_request() -> Result<()> {
        let store = ObjectStore::in_memory()?;
        let left = sample_tree(&store)?;
        let right = build_sorted(
            &store,
            [(Utf8PathBuf::from("wat/test.me.3"), entry(b"changed!"))],
        )?;

        let mut seen = Vec::new();
        zip(
            &store,
            Utf8Path::new(""),
            &[Some(left), Some(right)],
            &mut |path, _| {
                seen.push(path.to_owned());
                if path == "wat" {
                    Ok(Visit::Skip)
                } else {
                    Ok(Visit::Descend)
                }
            },
        )?;
        assert_eq!(
            seen,
            vec![Utf8PathBuf::from("test.me.1"), Utf8PathBuf::from("wat")]
        );
        Ok(())
    }
}
