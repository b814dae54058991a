use std::collections::HashMap;

use crate::docx::comments::CommentRecord;
use crate::docx::package::ContainerError;
use crate::docx::xml::{find_attr_any, XmlPart};

/// A root comment and its reply tree. Replies keep source appearance order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thread {
    pub record: CommentRecord,
    pub replies: Vec<Thread>,
}

impl Thread {
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&Thread> = self.replies.iter().collect();
        while let Some(t) = stack.pop() {
            count += 1;
            stack.extend(t.replies.iter());
        }
        count
    }

    /// Pre-order walk: the node itself, then each reply subtree in stored order.
    pub fn walk(&self) -> Vec<&CommentRecord> {
        let mut out = Vec::with_capacity(1 + self.descendant_count());
        let mut stack: Vec<&Thread> = vec![self];
        while let Some(t) = stack.pop() {
            out.push(&t.record);
            stack.extend(t.replies.iter().rev());
        }
        out
    }
}

/// What happened to the extended-comments linkage pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackLinkage {
    /// Part absent.
    Absent,
    /// Part present but unreadable; direct linkage stands.
    Skipped,
    /// Part read; this many records were re-parented.
    Applied(usize),
}

/// Parent/child `threadKey` pairs from the extended-comments part, in source order.
pub fn extended_links(part: &XmlPart) -> Vec<(String, String)> {
    part.events
        .iter()
        .filter(|ev| ev.is_open("commentEx"))
        .filter_map(|ev| ev.open_tag())
        .filter_map(|(_, attrs)| {
            let child = find_attr_any(attrs, &["w15:paraId"], "paraId")?;
            let parent = find_attr_any(attrs, &["w15:paraIdParent"], "paraIdParent")?;
            if child.is_empty() || parent.is_empty() {
                return None;
            }
            Some((child.to_string(), parent.to_string()))
        })
        .collect()
}

struct Forest {
    records: Vec<CommentRecord>,
    by_id: HashMap<u32, usize>,
    linked_parent: Vec<Option<usize>>,
    replies: Vec<Vec<usize>>,
    top_level: Vec<usize>,
}

impl Forest {
    fn new(records: Vec<CommentRecord>) -> Self {
        let n = records.len();
        let mut by_id = HashMap::with_capacity(n);
        for (idx, r) in records.iter().enumerate() {
            by_id.entry(r.id).or_insert(idx);
        }
        Self {
            records,
            by_id,
            linked_parent: vec![None; n],
            replies: vec![Vec::new(); n],
            top_level: Vec::new(),
        }
    }

    /// True when `parent` already sits below `child`, or is `child`.
    fn would_cycle(&self, child: usize, parent: usize) -> bool {
        let mut cur = Some(parent);
        while let Some(idx) = cur {
            if idx == child {
                return true;
            }
            cur = self.linked_parent[idx];
        }
        false
    }

    fn attach(&mut self, child: usize, parent: usize) {
        self.linked_parent[child] = Some(parent);
        self.replies[parent].push(child);
    }

    fn link_direct(&mut self) {
        let declared: Vec<Option<usize>> = self
            .records
            .iter()
            .map(|r| r.parent_id.and_then(|pid| self.by_id.get(&pid).copied()))
            .collect();
        let refused = closing_links(&declared);
        for (idx, parent) in declared.into_iter().enumerate() {
            match parent {
                Some(p) if !refused[idx] => self.attach(idx, p),
                // Roots, orphans and self/cyclic references stay at top level.
                _ => self.top_level.push(idx),
            }
        }
    }

    fn link_fallback(&mut self, links: &[(String, String)]) -> usize {
        let resolved: Vec<(usize, usize)> = {
            let mut by_key: HashMap<&str, usize> = HashMap::new();
            for (idx, r) in self.records.iter().enumerate() {
                if let Some(k) = r.thread_key.as_deref() {
                    by_key.entry(k).or_insert(idx);
                }
            }
            links
                .iter()
                .filter_map(|(c, p)| Some((*by_key.get(c.as_str())?, *by_key.get(p.as_str())?)))
                .collect()
        };

        let mut linked = 0usize;
        for (child, parent) in resolved {
            // Direct linkage, or an earlier fallback pair, already decided this record.
            if self.records[child].parent_id.is_some() || self.would_cycle(child, parent) {
                continue;
            }
            self.records[child].parent_id = Some(self.records[parent].id);
            self.attach(child, parent);
            self.top_level.retain(|&i| i != child);
            linked += 1;
        }
        linked
    }

    fn sort_top_level(&mut self) {
        let root_order: HashMap<usize, usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.parent_id.is_none())
            .enumerate()
            .map(|(pos, (idx, _))| (idx, pos))
            .collect();
        // Stable: orphans (not roots by declaration) keep their relative order at the end.
        self.top_level
            .sort_by_key(|idx| root_order.get(idx).copied().unwrap_or(usize::MAX));
    }

    fn into_threads(self) -> Vec<Thread> {
        let Forest {
            records,
            replies,
            top_level,
            ..
        } = self;
        let mut slots: Vec<Option<CommentRecord>> = records.into_iter().map(Some).collect();
        top_level
            .iter()
            .filter_map(|&idx| take_tree(idx, &mut slots, &replies))
            .collect()
    }
}

/// Linking in index order refuses the link that would close a cycle, which is
/// the one from the highest index on that cycle. Each record has at most one
/// declared parent, so every cycle is found by one walk per record.
fn closing_links(declared: &[Option<usize>]) -> Vec<bool> {
    const UNSEEN: usize = usize::MAX;
    let mut walk_of = vec![UNSEEN; declared.len()];
    let mut refused = vec![false; declared.len()];
    for start in 0..declared.len() {
        let mut cur = Some(start);
        while let Some(idx) = cur {
            if walk_of[idx] == start {
                // Back on this walk's own path: `idx` starts the cycle.
                let mut last = idx;
                let mut node = declared[idx];
                while let Some(n) = node.filter(|&n| n != idx) {
                    last = last.max(n);
                    node = declared[n];
                }
                refused[last] = true;
                break;
            }
            if walk_of[idx] != UNSEEN {
                break;
            }
            walk_of[idx] = start;
            cur = declared[idx];
        }
    }
    refused
}

struct Frame {
    idx: usize,
    next_reply: usize,
    node: Thread,
}

fn take_tree(
    root: usize,
    slots: &mut [Option<CommentRecord>],
    replies: &[Vec<usize>],
) -> Option<Thread> {
    let record = slots[root].take()?;
    let mut stack = vec![Frame {
        idx: root,
        next_reply: 0,
        node: Thread {
            record,
            replies: Vec::new(),
        },
    }];
    while let Some(top) = stack.last_mut() {
        if let Some(&child) = replies[top.idx].get(top.next_reply) {
            top.next_reply += 1;
            if let Some(record) = slots[child].take() {
                stack.push(Frame {
                    idx: child,
                    next_reply: 0,
                    node: Thread {
                        record,
                        replies: Vec::new(),
                    },
                });
            }
            continue;
        }
        let done = stack.pop()?;
        match stack.last_mut() {
            Some(parent) => parent.node.replies.push(done.node),
            None => return Some(done.node),
        }
    }
    None
}

/// Links records into threads: direct `parent_id` first, then the
/// extended-comments pairs for records the direct pass left unparented.
///
/// `extended` is the result of opening the extended-comments part; any
/// failure there only disables the fallback pass.
pub fn build_threads(
    records: Vec<CommentRecord>,
    extended: Result<XmlPart, ContainerError>,
) -> (Vec<Thread>, FallbackLinkage) {
    let mut forest = Forest::new(records);
    forest.link_direct();

    let fallback = match extended {
        Ok(part) => {
            let links = extended_links(&part);
            FallbackLinkage::Applied(forest.link_fallback(&links))
        }
        Err(ContainerError::PartNotFound { .. }) => FallbackLinkage::Absent,
        Err(ContainerError::MalformedContainer { .. }) => FallbackLinkage::Skipped,
    };

    forest.sort_top_level();
    (forest.into_threads(), fallback)
}

/// Depth-first lines for one thread: `[1] author: text` for the root, then
/// `author: text` per reply with no depth marker.
pub fn serialize_thread(thread: &Thread, unknown_author: &str) -> Vec<String> {
    thread
        .walk()
        .into_iter()
        .enumerate()
        .map(|(i, rec)| {
            let author = rec.author.as_deref().unwrap_or(unknown_author);
            if i == 0 {
                format!("[1] {author}: {}", rec.text)
            } else {
                format!("{author}: {}", rec.text)
            }
        })
        .collect()
}

pub fn thread_text(thread: &Thread, unknown_author: &str) -> String {
    serialize_thread(thread, unknown_author).join("\n")
}
