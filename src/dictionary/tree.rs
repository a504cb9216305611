//! The packed system dictionary.
//!
//! The dictionary ships as two files. The index tree file is an array of
//! dense 8-byte records in BFS order describing a trie keyed by packed
//! syllables. The dictionary blob is a concatenation of NUL-terminated
//! UTF-8 phrases addressed by offsets from the tree's leaf records.
//!
//! Record layout, little-endian:
//!
//! ```text
//! bytes [0..2)  key        0 marks a leaf
//! bytes [2..5)  child_begin (internal) or phrase_offset (leaf)
//! bytes [5..8)  child_end   (internal) or phrase_freq   (leaf)
//! ```
//!
//! Record 0 is the root; its key field holds the total node count. Within
//! a child list, leaves come first sorted by descending frequency,
//! followed by internal nodes in ascending key order.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use binary_layout::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::zhuyin::Syllable;

use super::{
    DictEntries, Dictionary, DictionaryInfo, DictionaryMut, DuplicatePhraseError, Phrase, Phrases,
};

pub const TREE_FILE_NAME: &str = "index_tree.dat";
pub const DICT_FILE_NAME: &str = "dictionary.dat";

define_layout!(tree_node, LittleEndian, {
    key: u16,
    lo: [u8; 3],
    hi: [u8; 3],
});

const NODE_SIZE: usize = 8;
const MAX_U24: u32 = 0xFF_FFFF;

fn u24_read(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
}

fn u24_write(value: u32) -> [u8; 3] {
    [
        (value & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        ((value >> 16) & 0xFF) as u8,
    ]
}

#[derive(Error, Debug)]
pub enum TreeDictionaryError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("corrupt dictionary: {0}")]
    Corrupt(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeNode {
    Internal {
        key: u16,
        child_begin: usize,
        child_end: usize,
    },
    Leaf {
        phrase_offset: usize,
        phrase_freq: u32,
    },
}

/// A read-only view of the packed system dictionary.
#[derive(Debug)]
pub struct TreeDictionary {
    tree: Vec<u8>,
    dict: Vec<u8>,
    info: DictionaryInfo,
}

thread_local! {
    static OPEN_DICTIONARIES: RefCell<HashMap<PathBuf, Weak<TreeDictionary>>> =
        RefCell::new(HashMap::new());
}

impl TreeDictionary {
    /// Opens the dictionary pair from a system data directory.
    pub fn open<P: AsRef<Path>>(sys_path: P) -> Result<TreeDictionary, TreeDictionaryError> {
        let sys_path = sys_path.as_ref();
        let tree = fs::read(sys_path.join(TREE_FILE_NAME))?;
        let dict = fs::read(sys_path.join(DICT_FILE_NAME))?;
        debug!(
            path = %sys_path.display(),
            tree_len = tree.len(),
            dict_len = dict.len(),
            "opening system dictionary"
        );
        Self::from_bytes(tree, dict)
    }

    /// Opens the dictionary pair, sharing one allocation per path.
    ///
    /// Engines on the same thread opening the same directory receive the
    /// same handle. The data is dropped when the last handle goes away.
    pub fn open_shared<P: AsRef<Path>>(
        sys_path: P,
    ) -> Result<Rc<TreeDictionary>, TreeDictionaryError> {
        let canonical = sys_path.as_ref().canonicalize()?;
        if let Some(shared) = OPEN_DICTIONARIES.with(|dicts| {
            dicts
                .borrow()
                .get(&canonical)
                .and_then(|weak| weak.upgrade())
        }) {
            return Ok(shared);
        }
        let shared = Rc::new(Self::open(&canonical)?);
        OPEN_DICTIONARIES.with(|dicts| {
            dicts
                .borrow_mut()
                .insert(canonical, Rc::downgrade(&shared));
        });
        Ok(shared)
    }

    /// Builds the view over in-memory file images, validating structure.
    pub fn from_bytes(tree: Vec<u8>, dict: Vec<u8>) -> Result<TreeDictionary, TreeDictionaryError> {
        let dictionary = TreeDictionary {
            tree,
            dict,
            info: DictionaryInfo::default(),
        };
        dictionary.validate()?;
        Ok(dictionary)
    }

    fn validate(&self) -> Result<(), TreeDictionaryError> {
        if self.tree.len() % NODE_SIZE != 0 {
            warn!("tree file size is not a record multiple");
            return Err(TreeDictionaryError::Corrupt(
                "tree file size is not a record multiple",
            ));
        }
        let node_count = self.tree.len() / NODE_SIZE;
        if node_count == 0 {
            return Err(TreeDictionaryError::Corrupt("tree file is empty"));
        }
        let root = tree_node::View::new(&self.tree[0..NODE_SIZE]);
        if usize::from(root.key().read()) != node_count {
            warn!(
                declared = root.key().read(),
                actual = node_count,
                "tree root node count mismatch"
            );
            return Err(TreeDictionaryError::Corrupt("root node count mismatch"));
        }
        // walk every record once, checking ranges and leaf offsets
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            match self.node(index) {
                TreeNode::Internal {
                    child_begin,
                    child_end,
                    ..
                } => {
                    if child_begin > child_end || child_end > node_count {
                        return Err(TreeDictionaryError::Corrupt(
                            "child range out of bounds",
                        ));
                    }
                    if child_begin == 0 && child_end > 0 {
                        // a range covering the root would cycle the walk
                        return Err(TreeDictionaryError::Corrupt(
                            "child range includes the root",
                        ));
                    }
                    let mut last_key = 0;
                    for child in child_begin..child_end {
                        if let TreeNode::Internal { key, .. } = self.node(child) {
                            if key <= last_key && last_key != 0 {
                                return Err(TreeDictionaryError::Corrupt(
                                    "child keys out of order",
                                ));
                            }
                            last_key = key;
                            stack.push(child);
                        } else if last_key != 0 {
                            return Err(TreeDictionaryError::Corrupt(
                                "leaf after internal node in child list",
                            ));
                        } else {
                            stack.push(child);
                        }
                    }
                }
                TreeNode::Leaf { phrase_offset, .. } => {
                    if self.phrase_at(phrase_offset).is_none() {
                        return Err(TreeDictionaryError::Corrupt(
                            "phrase offset past the dictionary blob",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn node(&self, index: usize) -> TreeNode {
        let record = &self.tree[index * NODE_SIZE..(index + 1) * NODE_SIZE];
        let view = tree_node::View::new(record);
        let key = view.key().read();
        let lo = u24_read(view.lo());
        let hi = u24_read(view.hi());
        if key == 0 && index != 0 {
            TreeNode::Leaf {
                phrase_offset: lo as usize,
                phrase_freq: hi,
            }
        } else {
            TreeNode::Internal {
                key,
                child_begin: lo as usize,
                child_end: hi as usize,
            }
        }
    }

    fn phrase_at(&self, offset: usize) -> Option<&str> {
        let tail = self.dict.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// Walks the trie and returns the child range matched by the phone
    /// sequence.
    fn lookup_range(&self, syllables: &[Syllable]) -> Option<(usize, usize)> {
        let (mut begin, mut end) = match self.node(0) {
            TreeNode::Internal {
                child_begin,
                child_end,
                ..
            } => (child_begin, child_end),
            TreeNode::Leaf { .. } => return None,
        };
        for syllable in syllables {
            let phone = syllable.to_u16();
            if phone == 0 {
                return None;
            }
            // leaves carry key 0, so the whole range stays sorted by key
            // and a plain binary search lands on internal nodes only
            let mut lo = begin;
            let mut hi = end;
            let mut found = None;
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let key = match self.node(mid) {
                    TreeNode::Internal { key, .. } => key,
                    TreeNode::Leaf { .. } => 0,
                };
                if key < phone {
                    lo = mid + 1;
                } else if key > phone {
                    hi = mid;
                } else {
                    found = Some(mid);
                    break;
                }
            }
            let index = found?;
            match self.node(index) {
                TreeNode::Internal {
                    child_begin,
                    child_end,
                    ..
                } => {
                    begin = child_begin;
                    end = child_end;
                }
                TreeNode::Leaf { .. } => return None,
            }
        }
        Some((begin, end))
    }

    fn leaves(&self, begin: usize, end: usize) -> impl Iterator<Item = Phrase> + '_ {
        (begin..end)
            .map(|index| self.node(index))
            .take_while(|node| matches!(node, TreeNode::Leaf { .. }))
            .filter_map(|node| match node {
                TreeNode::Leaf {
                    phrase_offset,
                    phrase_freq,
                } => self
                    .phrase_at(phrase_offset)
                    .map(|phrase| Phrase::new(phrase, phrase_freq)),
                TreeNode::Internal { .. } => None,
            })
    }

    fn collect_entries(
        &self,
        prefix: &mut Vec<Syllable>,
        begin: usize,
        end: usize,
        out: &mut Vec<(Vec<Syllable>, Phrase)>,
    ) {
        for phrase in self.leaves(begin, end) {
            out.push((prefix.clone(), phrase));
        }
        for index in begin..end {
            if let TreeNode::Internal {
                key,
                child_begin,
                child_end,
            } = self.node(index)
            {
                if let Ok(syllable) = Syllable::try_from(key) {
                    prefix.push(syllable);
                    self.collect_entries(prefix, child_begin, child_end, out);
                    prefix.pop();
                }
            }
        }
    }
}

impl Dictionary for TreeDictionary {
    fn lookup_phrase(&self, syllables: &[Syllable]) -> Phrases {
        match self.lookup_range(syllables) {
            Some((begin, end)) => Box::new(self.leaves(begin, end)),
            None => Box::new(std::iter::empty()),
        }
    }

    fn entries(&self) -> DictEntries {
        let mut out = vec![];
        if let TreeNode::Internal {
            child_begin,
            child_end,
            ..
        } = self.node(0)
        {
            self.collect_entries(&mut vec![], child_begin, child_end, &mut out);
        }
        Box::new(out.into_iter())
    }

    fn about(&self) -> DictionaryInfo {
        self.info.clone()
    }

    fn as_mut_dict(&mut self) -> Option<&mut dyn DictionaryMut> {
        None
    }
}

#[derive(Default, Debug)]
struct BuilderNode {
    children: BTreeMap<u16, BuilderNode>,
    phrases: Vec<(String, u32)>,
}

/// Builds the packed dictionary pair from phrase entries.
#[derive(Default, Debug)]
pub struct TreeDictionaryBuilder {
    root: BuilderNode,
    info: DictionaryInfo,
}

impl TreeDictionaryBuilder {
    pub fn new() -> TreeDictionaryBuilder {
        Default::default()
    }

    pub fn set_info(&mut self, info: DictionaryInfo) {
        self.info = info;
    }

    pub fn insert(
        &mut self,
        syllables: &[Syllable],
        phrase: &str,
        freq: u32,
    ) -> Result<(), DuplicatePhraseError> {
        let mut node = &mut self.root;
        for syllable in syllables {
            node = node.children.entry(syllable.to_u16()).or_default();
        }
        if node.phrases.iter().any(|(p, _)| p == phrase) {
            return Err(DuplicatePhraseError);
        }
        node.phrases.push((phrase.to_owned(), freq.min(MAX_U24)));
        Ok(())
    }

    /// Serializes the trie into the on-disk image pair.
    pub fn build(&self) -> (Vec<u8>, Vec<u8>) {
        // flatten the trie so the BFS below can use plain indexes
        let mut arena: Vec<(u16, &BuilderNode)> = vec![(0, &self.root)];
        let mut cursor = 0;
        while cursor < arena.len() {
            let node = arena[cursor].1;
            for (&key, child) in &node.children {
                arena.push((key, child));
            }
            cursor += 1;
        }

        // arena ids in BFS order happen to be dense already; lay out the
        // record file by walking them again and allocating child blocks
        let total: usize = arena
            .iter()
            .map(|(_, node)| 1 + node.phrases.len())
            .sum::<usize>();
        let mut records = vec![0u8; total * NODE_SIZE];
        let mut blob = vec![];
        let mut offsets: HashMap<String, u32> = HashMap::new();

        let mut slot_of = vec![0usize; arena.len()];
        let mut next_free = 1;
        let mut queue = std::collections::VecDeque::from([0usize]);
        let mut arena_children: Vec<Vec<usize>> = vec![vec![]; arena.len()];
        {
            let mut cursor = 0;
            let mut child_id = 1;
            while cursor < arena.len() {
                for _ in &arena[cursor].1.children {
                    arena_children[cursor].push(child_id);
                    child_id += 1;
                }
                cursor += 1;
            }
        }

        while let Some(id) = queue.pop_front() {
            let (key, node) = arena[id];
            let slot = slot_of[id];
            let child_begin = next_free;

            let mut phrases = node.phrases.clone();
            phrases.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (phrase, freq) in &phrases {
                let offset = *offsets.entry(phrase.clone()).or_insert_with(|| {
                    let offset = blob.len() as u32;
                    blob.extend_from_slice(phrase.as_bytes());
                    blob.push(0);
                    offset
                });
                let record = &mut records[next_free * NODE_SIZE..(next_free + 1) * NODE_SIZE];
                record[0..2].copy_from_slice(&0u16.to_le_bytes());
                record[2..5].copy_from_slice(&u24_write(offset));
                record[5..8].copy_from_slice(&u24_write(*freq));
                next_free += 1;
            }
            for &child_id in &arena_children[id] {
                slot_of[child_id] = next_free;
                next_free += 1;
                queue.push_back(child_id);
            }
            let child_end = next_free;

            let record = &mut records[slot * NODE_SIZE..(slot + 1) * NODE_SIZE];
            let record_key = if id == 0 { total as u16 } else { key };
            record[0..2].copy_from_slice(&record_key.to_le_bytes());
            record[2..5].copy_from_slice(&u24_write(child_begin as u32));
            record[5..8].copy_from_slice(&u24_write(child_end as u32));
        }

        (records, blob)
    }

    /// Writes `index_tree.dat` and `dictionary.dat` into a directory.
    pub fn write_to_dir<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let (tree, dict) = self.build();
        fs::write(path.as_ref().join(TREE_FILE_NAME), tree)?;
        fs::write(path.as_ref().join(DICT_FILE_NAME), dict)?;
        Ok(())
    }
}
