//! Scripted in-memory page.
//!
//! `MemoryPage` holds a flat arena of nodes that declare the CSS selectors they
//! answer to. Clicks, key presses, navigations and uploads trigger declared
//! [`Effect`]s, and every driver call is appended to a journal so callers can
//! check exactly which node was touched. Time is read from the tokio clock.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::dom::{CloneRebind, FileInputSpec, NodeRef, NodeState, QuerySpec};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::{Cdp, BOUND_MARKER_ATTR};

const PROMOTE_DEPTH: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

impl NodeKey {
    fn node_ref(self) -> NodeRef {
        NodeRef(format!("mem-{}", self.0))
    }
}

/// DOM change triggered by an interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Show(NodeKey),
    Hide(NodeKey),
    /// Show the node once `Duration` has passed from the moment the effect fires.
    ShowAfter(NodeKey, Duration),
    Attach(NodeKey),
    Detach(NodeKey),
    Enable(NodeKey),
    Disable(NodeKey),
    Navigate(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    Navigate { url: String },
    Click { node: NodeKey },
    ForwardedClick { from: NodeKey, input: NodeKey },
    Clear { node: NodeKey },
    Type { node: NodeKey, text: String },
    Files { node: NodeKey, files: Vec<PathBuf> },
    Key { key: String },
    Inject { node: NodeKey },
    Replace { original: NodeKey, clone: NodeKey },
    Close,
}

/// Declarative description of one element.
#[derive(Clone, Debug)]
pub struct MemoryNode {
    tag: String,
    text: String,
    selectors: Vec<String>,
    attrs: BTreeMap<String, String>,
    shown: bool,
    enabled: bool,
    attached: bool,
    appear_after: Option<Duration>,
    visible_from: Option<Instant>,
    parent: Option<NodeKey>,
    on_click: Vec<Effect>,
    on_files: Vec<Effect>,
    forward_to: Option<String>,
    failing_clicks: u32,
    value: String,
    files: Vec<PathBuf>,
}

impl MemoryNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: String::new(),
            selectors: Vec::new(),
            attrs: BTreeMap::new(),
            shown: true,
            enabled: true,
            attached: true,
            appear_after: None,
            visible_from: None,
            parent: None,
            on_click: Vec::new(),
            on_files: Vec::new(),
            forward_to: None,
            failing_clicks: 0,
            value: String::new(),
            files: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// A CSS selector this node matches.
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.shown = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Not part of the document until an [`Effect::Attach`] fires.
    pub fn detached(mut self) -> Self {
        self.attached = false;
        self
    }

    /// Becomes visible `delay` after it is added to the page.
    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appear_after = Some(delay);
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    /// Effect fired when files are set on this (file input) node.
    pub fn on_files(mut self, effect: Effect) -> Self {
        self.on_files.push(effect);
        self
    }

    /// The next `count` clicks fail with a driver I/O error.
    pub fn failing_clicks(mut self, count: u32) -> Self {
        self.failing_clicks = count;
        self
    }

    fn matches_css(&self, selector: &str) -> bool {
        if self.selectors.iter().any(|s| s == selector) {
            return true;
        }
        if let Some(id) = selector.strip_prefix('#') {
            return self.attrs.get("id").map(String::as_str) == Some(id);
        }
        self.attrs
            .iter()
            .any(|(name, value)| selector == format!("[{}=\"{}\"]", name, value))
    }

    fn is_clickable(&self) -> bool {
        matches!(self.tag.as_str(), "button" | "a")
            || self.attrs.get("role").map(String::as_str) == Some("button")
            || !self.on_click.is_empty()
    }
}

struct PageState {
    url: String,
    nodes: Vec<MemoryNode>,
    routes: Vec<(String, Effect)>,
    keys: HashMap<String, Vec<Effect>>,
    on_inject: Vec<Effect>,
    journal: Vec<JournalEntry>,
    failing_queries: u32,
    closed: bool,
}

impl PageState {
    fn key_of(&self, node: &NodeRef) -> Option<NodeKey> {
        let index = node.as_str().strip_prefix("mem-")?.parse::<usize>().ok()?;
        (index < self.nodes.len()).then_some(NodeKey(index))
    }

    fn is_attached(&self, key: NodeKey) -> bool {
        let mut cur = Some(key);
        while let Some(k) = cur {
            let node = &self.nodes[k.0];
            if !node.attached {
                return false;
            }
            cur = node.parent;
        }
        true
    }

    fn is_visible(&self, key: NodeKey) -> bool {
        let node = &self.nodes[key.0];
        self.is_attached(key)
            && node.shown
            && node.visible_from.map_or(true, |at| Instant::now() >= at)
    }

    fn live(&self, node: &NodeRef) -> Result<NodeKey, AdapterError> {
        if self.closed {
            return Err(AdapterError::io("page is closed"));
        }
        match self.key_of(node) {
            Some(key) if self.is_attached(key) => Ok(key),
            Some(_) => Err(AdapterError::stale(format!("node {node} is no longer attached"))),
            None => Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("unknown node {node}"))),
        }
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed {
            Err(AdapterError::io("page is closed"))
        } else {
            Ok(())
        }
    }

    fn attached_keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        (0..self.nodes.len())
            .map(NodeKey)
            .filter(|k| self.is_attached(*k))
    }

    fn children_of(&self, parent: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        (0..self.nodes.len())
            .map(NodeKey)
            .filter(move |k| self.nodes[k.0].parent == Some(parent))
    }

    fn apply(&mut self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::Show(k) => {
                    let node = &mut self.nodes[k.0];
                    node.shown = true;
                    node.visible_from = None;
                }
                Effect::Hide(k) => self.nodes[k.0].shown = false,
                Effect::ShowAfter(k, delay) => {
                    let node = &mut self.nodes[k.0];
                    node.shown = true;
                    node.visible_from = Some(Instant::now() + *delay);
                }
                Effect::Attach(k) => self.nodes[k.0].attached = true,
                Effect::Detach(k) => self.nodes[k.0].attached = false,
                Effect::Enable(k) => self.nodes[k.0].enabled = true,
                Effect::Disable(k) => self.nodes[k.0].enabled = false,
                Effect::Navigate(url) => self.navigate_to(url.clone()),
            }
        }
    }

    fn navigate_to(&mut self, url: String) {
        let fired: Vec<Effect> = self
            .routes
            .iter()
            .filter(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, effect)| effect.clone())
            .collect();
        self.journal.push(JournalEntry::Navigate { url: url.clone() });
        self.url = url;
        self.apply(&fired);
    }

    fn push(&mut self, mut node: MemoryNode) -> NodeKey {
        if let Some(delay) = node.appear_after.take() {
            node.visible_from = Some(Instant::now() + delay);
        }
        self.nodes.push(node);
        NodeKey(self.nodes.len() - 1)
    }
}

/// Deterministic [`Cdp`] implementation backed by a scripted node arena.
pub struct MemoryPage {
    state: Mutex<PageState>,
}

impl MemoryPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                nodes: Vec::new(),
                routes: Vec::new(),
                keys: HashMap::new(),
                on_inject: Vec::new(),
                journal: Vec::new(),
                failing_queries: 0,
                closed: false,
            }),
        }
    }

    pub fn add(&self, node: MemoryNode) -> NodeKey {
        self.state.lock().push(node)
    }

    pub fn add_child(&self, parent: NodeKey, mut node: MemoryNode) -> NodeKey {
        node.parent = Some(parent);
        self.state.lock().push(node)
    }

    /// Append a click effect to an already-added node.
    pub fn on_click(&self, key: NodeKey, effect: Effect) {
        self.state.lock().nodes[key.0].on_click.push(effect);
    }

    /// Fire `effect` whenever a navigation targets a URL containing `pattern`.
    pub fn on_navigate(&self, pattern: impl Into<String>, effect: Effect) {
        self.state.lock().routes.push((pattern.into(), effect));
    }

    pub fn on_key(&self, key: impl Into<String>, effect: Effect) {
        self.state
            .lock()
            .keys
            .entry(key.into())
            .or_default()
            .push(effect);
    }

    /// The next `count` queries fail the way a query does while the page's
    /// execution context is being torn down by a navigation.
    pub fn fail_next_queries(&self, count: u32) {
        self.state.lock().failing_queries = count;
    }

    /// Fire `effect` right after a file input is injected.
    pub fn on_inject(&self, effect: Effect) {
        self.state.lock().on_inject.push(effect);
    }

    pub fn node_ref(&self, key: NodeKey) -> NodeRef {
        key.node_ref()
    }

    pub fn key_of(&self, node: &NodeRef) -> Option<NodeKey> {
        self.state.lock().key_of(node)
    }

    pub fn is_attached(&self, key: NodeKey) -> bool {
        self.state.lock().is_attached(key)
    }

    pub fn value_of(&self, key: NodeKey) -> String {
        self.state.lock().nodes[key.0].value.clone()
    }

    pub fn files_of(&self, key: NodeKey) -> Vec<PathBuf> {
        self.state.lock().nodes[key.0].files.clone()
    }

    /// Attached node carrying the binder marker, if any.
    pub fn marked_node(&self) -> Option<NodeKey> {
        let state = self.state.lock();
        let found = state
            .attached_keys()
            .find(|k| state.nodes[k.0].attrs.contains_key(BOUND_MARKER_ATTR));
        found
    }

    /// Attached node whose `id` attribute equals `id`.
    pub fn node_by_id(&self, id: &str) -> Option<NodeKey> {
        let state = self.state.lock();
        let found = state
            .attached_keys()
            .find(|k| state.nodes[k.0].attrs.get("id").map(String::as_str) == Some(id));
        found
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Cdp for MemoryPage {
    async fn navigate(&self, url: &str, _deadline: Duration) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.navigate_to(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.url.clone())
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<NodeRef>, AdapterError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(AdapterError::io(
                "evaluate failed: Cannot find context with specified id",
            ));
        }
        let keys: Vec<NodeKey> = match spec {
            QuerySpec::Css { selector } => state
                .attached_keys()
                .filter(|k| state.nodes[k.0].matches_css(selector))
                .collect(),
            QuerySpec::Text {
                text,
                exact,
                promote_clickable,
            } => {
                let needle = text.trim();
                let hit = |k: NodeKey| {
                    let own = &state.nodes[k.0].text;
                    if *exact {
                        own.trim() == needle
                    } else {
                        own.contains(needle)
                    }
                };
                let mut out: Vec<NodeKey> = Vec::new();
                for key in state.attached_keys().filter(|k| hit(*k)) {
                    if state.children_of(key).any(|c| state.is_attached(c) && hit(c)) {
                        continue;
                    }
                    let mut chosen = key;
                    if *promote_clickable {
                        let mut cur = Some(key);
                        for _ in 0..=PROMOTE_DEPTH {
                            match cur {
                                Some(k) if state.nodes[k.0].is_clickable() => {
                                    chosen = k;
                                    break;
                                }
                                Some(k) => cur = state.nodes[k.0].parent,
                                None => break,
                            }
                        }
                    }
                    if !out.contains(&chosen) {
                        out.push(chosen);
                    }
                }
                out
            }
        };
        Ok(keys.into_iter().map(NodeKey::node_ref).collect())
    }

    async fn inspect(&self, node: &NodeRef) -> Result<NodeState, AdapterError> {
        let state = self.state.lock();
        let key = state.live(node)?;
        let n = &state.nodes[key.0];
        Ok(NodeState {
            tag: n.tag.clone(),
            visible: state.is_visible(key),
            enabled: n.enabled,
            text: n.text.clone(),
            marker: n.attrs.get(BOUND_MARKER_ATTR).cloned(),
        })
    }

    async fn click(&self, node: &NodeRef) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        let key = state.live(node)?;
        if state.nodes[key.0].failing_clicks > 0 {
            state.nodes[key.0].failing_clicks -= 1;
            return Err(AdapterError::io(format!("click on {node} was intercepted")));
        }
        state.journal.push(JournalEntry::Click { node: key });

        if let Some(target) = state.nodes[key.0].forward_to.clone() {
            let input = state
                .attached_keys()
                .find(|k| state.nodes[k.0].attrs.get("id") == Some(&target));
            if let Some(input) = input {
                state
                    .journal
                    .push(JournalEntry::ForwardedClick { from: key, input });
            }
        }

        let effects = state.nodes[key.0].on_click.clone();
        state.apply(&effects);
        Ok(())
    }

    async fn clear_text(&self, node: &NodeRef) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        let key = state.live(node)?;
        state.nodes[key.0].value.clear();
        state.journal.push(JournalEntry::Clear { node: key });
        Ok(())
    }

    async fn type_text(&self, node: &NodeRef, text: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        let key = state.live(node)?;
        state.nodes[key.0].value.push_str(text);
        state.journal.push(JournalEntry::Type {
            node: key,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_input_files(
        &self,
        node: &NodeRef,
        files: &[PathBuf],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        let key = state.live(node)?;
        if state.nodes[key.0].tag != "input" {
            return Err(AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("node {node} is not a file input")));
        }
        state.nodes[key.0].files = files.to_vec();
        state.journal.push(JournalEntry::Files {
            node: key,
            files: files.to_vec(),
        });
        let effects = state.nodes[key.0].on_files.clone();
        state.apply(&effects);
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.journal.push(JournalEntry::Key {
            key: key.to_string(),
        });
        let effects = state.keys.get(key).cloned().unwrap_or_default();
        state.apply(&effects);
        Ok(())
    }

    async fn inject_file_input(&self, spec: &FileInputSpec) -> Result<NodeRef, AdapterError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let prior: Vec<NodeKey> = state
            .attached_keys()
            .filter(|k| state.nodes[k.0].attrs.get("id") == Some(&spec.id))
            .collect();
        for k in prior {
            state.nodes[k.0].attached = false;
        }
        let key = state.push(
            MemoryNode::new("input")
                .attr("id", spec.id.clone())
                .attr("type", "file")
                .attr("accept", spec.accept.clone())
                .hidden(),
        );
        state.journal.push(JournalEntry::Inject { node: key });
        let effects = state.on_inject.clone();
        state.apply(&effects);
        Ok(key.node_ref())
    }

    async fn replace_with_clone(
        &self,
        node: &NodeRef,
        rebind: &CloneRebind,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        let original = state.live(node)?;
        let mut clone = state.nodes[original.0].clone();
        clone.on_click.clear();
        clone.failing_clicks = 0;
        clone.forward_to = Some(rebind.forward_to.clone());
        clone
            .attrs
            .insert(BOUND_MARKER_ATTR.to_string(), rebind.marker.clone());
        let clone_key = state.push(clone);

        let children: Vec<NodeKey> = state.children_of(original).collect();
        for child in children {
            state.nodes[child.0].parent = Some(clone_key);
        }
        state.nodes[original.0].attached = false;
        state.journal.push(JournalEntry::Replace {
            original,
            clone: clone_key,
        });
        Ok(())
    }

    async fn page_text(&self) -> Result<String, AdapterError> {
        let state = self.state.lock();
        state.ensure_open()?;
        let text = state
            .attached_keys()
            .filter(|k| state.is_visible(*k) && !state.nodes[k.0].text.is_empty())
            .map(|k| state.nodes[k.0].text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AdapterError> {
        let state = self.state.lock();
        state.ensure_open()?;
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(state.url.as_bytes());
        Ok(bytes)
    }

    async fn content(&self) -> Result<String, AdapterError> {
        let state = self.state.lock();
        state.ensure_open()?;
        let mut html = format!("<!-- {} -->\n<html><body>\n", state.url);
        for key in state.attached_keys() {
            let n = &state.nodes[key.0];
            let attrs: String = n
                .attrs
                .iter()
                .map(|(k, v)| format!(" {}=\"{}\"", k, v))
                .collect();
            html.push_str(&format!("<{tag}{attrs}>{}</{tag}>\n", n.text, tag = n.tag));
        }
        html.push_str("</body></html>\n");
        Ok(html)
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.journal.push(JournalEntry::Close);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css(sel: &str) -> QuerySpec {
        QuerySpec::css(sel)
    }

    #[tokio::test]
    async fn css_query_matches_declared_and_derived_selectors() {
        let page = MemoryPage::new("https://example.test/");
        let a = page.add(MemoryNode::new("button").selector("button._a").attr("id", "next"));
        let _b = page.add(MemoryNode::new("div").selector("div.x"));

        let by_decl = page.query(&css("button._a")).await.unwrap();
        assert_eq!(by_decl, vec![page.node_ref(a)]);
        let by_id = page.query(&css("#next")).await.unwrap();
        assert_eq!(by_id, vec![page.node_ref(a)]);
        assert!(page.query(&css("span")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_query_promotes_to_clickable_ancestor() {
        let page = MemoryPage::new("https://example.test/");
        let button = page.add(MemoryNode::new("div").attr("role", "button").text("Create"));
        let span = page.add_child(button, MemoryNode::new("span").text("Create"));

        let plain = QuerySpec::Text {
            text: "Create".into(),
            exact: true,
            promote_clickable: false,
        };
        assert_eq!(page.query(&plain).await.unwrap(), vec![page.node_ref(span)]);

        let promoted = QuerySpec::Text {
            text: "Create".into(),
            exact: true,
            promote_clickable: true,
        };
        assert_eq!(
            page.query(&promoted).await.unwrap(),
            vec![page.node_ref(button)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn show_after_respects_tokio_clock() {
        let page = MemoryPage::new("https://example.test/");
        let next = page.add(MemoryNode::new("button").selector("button.next").hidden());
        let trigger = page.add(
            MemoryNode::new("button")
                .selector("button.go")
                .on_click(Effect::ShowAfter(next, Duration::from_secs(3))),
        );

        page.click(&page.node_ref(trigger)).await.unwrap();
        let state = page.inspect(&page.node_ref(next)).await.unwrap();
        assert!(!state.visible);

        tokio::time::advance(Duration::from_secs(3)).await;
        let state = page.inspect(&page.node_ref(next)).await.unwrap();
        assert!(state.visible);
    }

    #[tokio::test]
    async fn replaced_node_goes_stale_and_clone_forwards_clicks() {
        let page = MemoryPage::new("https://example.test/");
        let select = page.add(MemoryNode::new("button").selector("button.select").text("Select"));
        let input = page
            .inject_file_input(&FileInputSpec {
                id: "picker".into(),
                accept: "video/mp4".into(),
            })
            .await
            .unwrap();

        let original = page.node_ref(select);
        page.replace_with_clone(
            &original,
            &CloneRebind {
                marker: "m-1".into(),
                forward_to: "picker".into(),
            },
        )
        .await
        .unwrap();

        let err = page.inspect(&original).await.unwrap_err();
        assert!(err.is_stale());

        let found = page.query(&css("button.select")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_ne!(found[0], original);
        let state = page.inspect(&found[0]).await.unwrap();
        assert_eq!(state.marker.as_deref(), Some("m-1"));

        page.click(&found[0]).await.unwrap();
        let input_key = page.key_of(&input).unwrap();
        assert!(page
            .journal()
            .iter()
            .any(|e| matches!(e, JournalEntry::ForwardedClick { input, .. } if *input == input_key)));
    }

    #[tokio::test]
    async fn injecting_twice_keeps_a_single_input() {
        let page = MemoryPage::new("https://example.test/");
        let spec = FileInputSpec {
            id: "picker".into(),
            accept: "video/mp4".into(),
        };
        page.inject_file_input(&spec).await.unwrap();
        page.inject_file_input(&spec).await.unwrap();
        assert_eq!(page.query(&css("#picker")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_page_rejects_calls() {
        let page = MemoryPage::new("https://example.test/");
        page.close().await.unwrap();
        assert!(page.is_closed());
        assert!(page.current_url().await.is_err());
    }
}
