//! Active-channel extraction from the XML UI-hierarchy dump.
//!
//! The target app lays the on-screen metadata out as consecutive sibling
//! `node` elements: the channel name immediately followed by a
//! "Go to <name>'s profile" link. We find the first profile link in the
//! tree and report the label of the sibling directly before it.

use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Why a UI dump could not be parsed into a tree. Never escalated past this
/// module: the caller degrades the channel signal to unknown.
#[derive(Debug, Error)]
enum UiDumpError {
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),
    #[error("bad attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("document truncated: unclosed element at end of input")]
    Truncated,
}

fn profile_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Ellipsis suffix is optional: long names get truncated on screen.
        Regex::new(r"^Go to .+?'s profile(?:\.\.\.)?$").expect("static pattern")
    })
}

/// One element of the parsed UI hierarchy. Only the tag name, the free-text
/// label, and child order matter for the sibling lookup.
#[derive(Debug)]
struct UiNode {
    tag: String,
    label: String,
    children: Vec<UiNode>,
}

impl UiNode {
    fn is_widget(&self) -> bool {
        self.tag.eq_ignore_ascii_case("node")
    }
}

/// Returns the label of the sibling immediately preceding the first
/// "Go to <name>'s profile" link in the UI hierarchy.
///
/// Elements are visited in document order; within each element only direct
/// `node` children count as siblings. The first profile link found decides
/// the outcome: if it has no preceding sibling the result is `None`, and no
/// further candidates are considered.
///
/// Malformed XML is logged and yields `None` — the channel degrades to
/// unknown, it never escalates.
pub fn channel_before_profile_link(xml: &str) -> Option<String> {
    let root = match parse_tree(xml) {
        Ok(root) => root?,
        Err(e) => {
            warn!("UI hierarchy dump is not well-formed XML: {e}");
            return None;
        }
    };
    find_preceding_sibling(&root)
}

/// Pre-order walk over every element as a potential parent.
fn find_preceding_sibling(node: &UiNode) -> Option<String> {
    let widgets: Vec<&UiNode> = node.children.iter().filter(|c| c.is_widget()).collect();
    for (i, child) in widgets.iter().enumerate() {
        if profile_link_re().is_match(&child.label) {
            // First match decides: a link with no preceding sibling means
            // the channel name is simply not on screen.
            return if i > 0 {
                Some(widgets[i - 1].label.clone())
            } else {
                None
            };
        }
    }
    node.children.iter().find_map(find_preceding_sibling)
}

/// Parses the dump into a [`UiNode`] tree.
///
/// Returns `Ok(None)` for a document with no root element (empty input) and
/// `Err` for anything not well-formed.
fn parse_tree(xml: &str) -> Result<Option<UiNode>, UiDumpError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<UiNode> = Vec::new();
    let mut root: Option<UiNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(make_node(&start)?);
            }
            Event::Empty(start) => {
                let node = make_node(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                // check_end_names is on by default, so a mismatched close
                // tag has already surfaced as Err from read_event.
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Eof => break,
            // Text, comments, declarations and PIs carry no widgets.
            _ => {}
        }
    }

    if !stack.is_empty() {
        // Unclosed elements at EOF: the dump was truncated mid-transfer.
        return Err(UiDumpError::Truncated);
    }
    Ok(root)
}

fn make_node(start: &quick_xml::events::BytesStart<'_>) -> Result<UiNode, UiDumpError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let label = match start.try_get_attribute("text")? {
        Some(attr) => attr.unescape_value()?.into_owned(),
        None => String::new(),
    };
    Ok(UiNode {
        tag,
        label,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [UiNode], root: &mut Option<UiNode>, node: UiNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        // Completed element with empty stack is the document root; keep the
        // first one (well-formed documents only have one).
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
