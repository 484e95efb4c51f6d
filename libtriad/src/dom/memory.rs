//! In-memory DOM host
//!
//! A small element tree with enough selector support for views to be
//! exercised without a browser: compound selectors (`tag#id.class[attr=v]`),
//! descendant combinators and comma-separated groups. Markup passed to
//! `set_html` is stored as opaque text and never parsed into nodes.
//!
//! Events are fired with [`MemoryDom::fire`] and bubble from the target to
//! the root. At each element delegated handlers run before direct ones, and
//! a handler detached earlier in the same dispatch is skipped.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

use super::{DomEvent, DomHandler, DomHost, ElementSet, Selection};

/// Index of an element in a [`MemoryDom`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Default, Clone, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
}

impl Compound {
    fn parse(input: &str) -> Option<Self> {
        fn ident(chars: &[char], pos: &mut usize) -> String {
            let start = *pos;
            while *pos < chars.len() && (chars[*pos].is_alphanumeric() || "-_".contains(chars[*pos])) {
                *pos += 1;
            }
            chars[start..*pos].iter().collect()
        }

        let chars: Vec<char> = input.chars().collect();
        let mut compound = Compound::default();
        let mut pos = 0;

        if chars.first() == Some(&'*') {
            pos = 1;
        } else {
            let tag = ident(&chars, &mut pos);
            if !tag.is_empty() {
                compound.tag = Some(tag.to_lowercase());
            }
        }

        while pos < chars.len() {
            let marker = chars[pos];
            pos += 1;
            match marker {
                '#' => {
                    let id = ident(&chars, &mut pos);
                    if id.is_empty() {
                        return None;
                    }
                    compound.id = Some(id);
                }
                '.' => {
                    let class = ident(&chars, &mut pos);
                    if class.is_empty() {
                        return None;
                    }
                    compound.classes.push(class);
                }
                '[' => {
                    let close = chars[pos..].iter().position(|&c| c == ']')? + pos;
                    let body: String = chars[pos..close].iter().collect();
                    let (name, value) = body.split_once('=')?;
                    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                    compound.attrs.push((name.trim().to_string(), value.to_string()));
                    pos = close + 1;
                }
                _ => return None,
            }
        }

        Some(compound)
    }

    fn matches(&self, node: &Node) -> bool {
        self.tag.as_ref().map_or(true, |tag| *tag == node.tag)
            && self
                .id
                .as_ref()
                .map_or(true, |id| node.attrs.get("id") == Some(id))
            && self.classes.iter().all(|class| node.classes.contains(class))
            && self
                .attrs
                .iter()
                .all(|(name, value)| node.attrs.get(name) == Some(value))
    }
}

/// Parsed selector: groups of descendant chains
#[derive(Debug, Clone)]
struct Selector {
    groups: Vec<Vec<Compound>>,
}

impl Selector {
    /// `None` for selectors this host does not understand
    fn parse(input: &str) -> Option<Self> {
        let mut groups = Vec::new();
        for group in input.split(',') {
            let chain = group
                .split_whitespace()
                .map(Compound::parse)
                .collect::<Option<Vec<_>>>()?;
            if chain.is_empty() {
                return None;
            }
            groups.push(chain);
        }
        Some(Self { groups })
    }
}

struct Delegation {
    selector: String,
    event_type: String,
    handler: DomHandler,
}

struct Node {
    tag: String,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    parent: Option<NodeId>,
    html: String,
    direct: Vec<(String, DomHandler)>,
    delegated: Vec<Delegation>,
}

impl Node {
    fn new(compound: Compound, parent: Option<NodeId>) -> Self {
        let mut attrs: BTreeMap<String, String> = compound.attrs.into_iter().collect();
        if let Some(id) = compound.id {
            attrs.insert("id".to_string(), id);
        }
        Self {
            tag: compound.tag.unwrap_or_else(|| "div".to_string()),
            classes: compound.classes,
            attrs,
            parent,
            html: String::new(),
            direct: Vec::new(),
            delegated: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    fn chain_matches(&self, id: NodeId, chain: &[Compound]) -> bool {
        let Some((last, rest)) = chain.split_last() else {
            return false;
        };
        match self.node(id) {
            Some(node) if last.matches(node) => {}
            _ => return false,
        }

        let mut ancestor = self.parent(id);
        for compound in rest.iter().rev() {
            loop {
                let Some(candidate) = ancestor else {
                    return false;
                };
                ancestor = self.parent(candidate);
                if self.node(candidate).is_some_and(|node| compound.matches(node)) {
                    break;
                }
            }
        }
        true
    }

    fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        selector
            .groups
            .iter()
            .any(|chain| self.chain_matches(id, chain))
    }

    fn select(&self, selector: &str) -> Vec<NodeId> {
        let Some(selector) = Selector::parse(selector) else {
            tracing::debug!(selector, "unsupported selector matches nothing");
            return Vec::new();
        };
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|&id| self.matches(id, &selector))
            .collect()
    }

    /// Target first, root last
    fn path(&self, target: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.node(target).map(|_| target);
        while let Some(id) = current {
            path.push(id);
            current = self.parent(id);
        }
        path
    }
}

/// In-memory document with a `body` root
#[derive(Clone)]
pub struct MemoryDom {
    tree: Rc<RefCell<Tree>>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let body = Compound {
            tag: Some("body".to_string()),
            ..Compound::default()
        };
        let tree = Tree {
            nodes: vec![Node::new(body, None)],
        };
        Self {
            tree: Rc::new(RefCell::new(tree)),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append an element described like a compound selector, e.g.
    /// `button#save.btn.primary[name=login]`
    ///
    /// `None` if the parent does not exist or the description is malformed.
    pub fn append(&self, parent: NodeId, element: &str) -> Option<NodeId> {
        let compound = Compound::parse(element.trim())?;
        let mut tree = self.tree.borrow_mut();
        tree.node(parent)?;
        let id = NodeId(tree.nodes.len());
        tree.nodes.push(Node::new(compound, Some(parent)));
        Some(id)
    }

    /// Fire an event on every element matching `selector`
    ///
    /// Returns the number of handler invocations.
    pub fn fire(&self, selector: &str, event_type: &str, detail: Value) -> usize {
        let targets = self.tree.borrow().select(selector);
        targets
            .into_iter()
            .map(|target| self.fire_at(target, event_type, detail.clone()))
            .sum()
    }

    /// Fire an event on one element and let it bubble
    pub fn fire_at(&self, target: NodeId, event_type: &str, detail: Value) -> usize {
        let event = DomEvent::new(event_type, detail);
        let path = self.tree.borrow().path(target);
        let mut invoked = 0;

        for (depth, &current) in path.iter().enumerate() {
            let delegations: Vec<(String, DomHandler)> = match self.tree.borrow().node(current) {
                Some(node) => node
                    .delegated
                    .iter()
                    .filter(|d| d.event_type == event_type)
                    .map(|d| (d.selector.clone(), Rc::clone(&d.handler)))
                    .collect(),
                None => continue,
            };

            for (selector, handler) in delegations {
                let Some(parsed) = Selector::parse(&selector) else {
                    continue;
                };
                for &candidate in &path[..depth] {
                    if !self.is_delegated(current, &selector, event_type, &handler) {
                        break;
                    }
                    if self.tree.borrow().matches(candidate, &parsed) {
                        handler(&event, &self.selection(vec![candidate]));
                        invoked += 1;
                    }
                }
            }

            let direct: Vec<DomHandler> = match self.tree.borrow().node(current) {
                Some(node) => node
                    .direct
                    .iter()
                    .filter(|(t, _)| t == event_type)
                    .map(|(_, h)| Rc::clone(h))
                    .collect(),
                None => continue,
            };

            for handler in direct {
                if self.is_direct(current, event_type, &handler) {
                    handler(&event, &self.selection(vec![current]));
                    invoked += 1;
                }
            }
        }

        invoked
    }

    fn is_direct(&self, id: NodeId, event_type: &str, handler: &DomHandler) -> bool {
        self.tree.borrow().node(id).is_some_and(|node| {
            node.direct
                .iter()
                .any(|(t, h)| t == event_type && Rc::ptr_eq(h, handler))
        })
    }

    fn is_delegated(&self, id: NodeId, selector: &str, event_type: &str, handler: &DomHandler) -> bool {
        self.tree.borrow().node(id).is_some_and(|node| {
            node.delegated.iter().any(|d| {
                d.selector == selector && d.event_type == event_type && Rc::ptr_eq(&d.handler, handler)
            })
        })
    }

    fn selection(&self, nodes: Vec<NodeId>) -> Selection {
        Rc::new(MemorySelection {
            tree: Rc::clone(&self.tree),
            nodes,
        })
    }

    /// Direct plus delegated handlers attached anywhere in the document
    pub fn listener_count(&self) -> usize {
        self.tree
            .borrow()
            .nodes
            .iter()
            .map(|node| node.direct.len() + node.delegated.len())
            .sum()
    }

    /// Contents of the first element matching `selector`
    pub fn html(&self, selector: &str) -> Option<String> {
        let tree = self.tree.borrow();
        let first = tree.select(selector).into_iter().next()?;
        tree.node(first).map(|node| node.html.clone())
    }
}

impl DomHost for MemoryDom {
    fn select(&self, selector: &str) -> Selection {
        let nodes = self.tree.borrow().select(selector);
        self.selection(nodes)
    }
}

impl std::fmt::Debug for MemoryDom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDom")
            .field("nodes", &self.tree.borrow().nodes.len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Elements of a [`MemoryDom`]
pub struct MemorySelection {
    tree: Rc<RefCell<Tree>>,
    nodes: Vec<NodeId>,
}

impl MemorySelection {
    fn each(&self, mut f: impl FnMut(&mut Node)) {
        let mut tree = self.tree.borrow_mut();
        for &id in &self.nodes {
            if let Some(node) = tree.node_mut(id) {
                f(node);
            }
        }
    }
}

impl ElementSet for MemorySelection {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn on(&self, event_type: &str, handler: DomHandler) {
        self.each(|node| node.direct.push((event_type.to_string(), Rc::clone(&handler))));
    }

    fn off(&self, event_type: &str, handler: &DomHandler) {
        self.each(|node| {
            node.direct
                .retain(|(t, h)| !(t == event_type && Rc::ptr_eq(h, handler)))
        });
    }

    fn delegate(&self, selector: &str, event_type: &str, handler: DomHandler) {
        self.each(|node| {
            node.delegated.push(Delegation {
                selector: selector.to_string(),
                event_type: event_type.to_string(),
                handler: Rc::clone(&handler),
            })
        });
    }

    fn undelegate(&self, selector: &str, event_type: &str, handler: &DomHandler) {
        self.each(|node| {
            node.delegated.retain(|d| {
                !(d.selector == selector && d.event_type == event_type && Rc::ptr_eq(&d.handler, handler))
            })
        });
    }

    fn set_html(&self, html: &str) {
        self.each(|node| node.html = html.to_string());
    }

    fn html(&self) -> String {
        let tree = self.tree.borrow();
        self.nodes
            .first()
            .and_then(|&id| tree.node(id))
            .map(|node| node.html.clone())
            .unwrap_or_default()
    }

    fn attr(&self, name: &str) -> Option<String> {
        let tree = self.tree.borrow();
        let node = tree.node(*self.nodes.first()?)?;
        match name {
            "class" if !node.classes.is_empty() => Some(node.classes.join(" ")),
            _ => node.attrs.get(name).cloned(),
        }
    }
}
