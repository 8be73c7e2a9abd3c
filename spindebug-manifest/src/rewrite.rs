//! Boundary-scanning rewriter for trigger and component sections.
//!
//! A section's extent is only known once the next header (or EOF) is seen, so
//! lines are buffered per section and rewritten as a whole when it closes.
//!
//! ```text
//! [[trigger.http]]         ─┐ Section::Trigger
//! component = "web"         │
//! route = "/..."           ─┘
//! [component.web]          ─┐ Section::Component
//! source = "web.wasm"      ─┘
//! ```

use std::sync::OnceLock;

use regex::Regex;

use spindebug_core::ShimSource;

/// Header of the trigger section every matched trigger is forced to.
pub const COMMAND_TRIGGER_HEADER: &str = "[[trigger.command]]";

const SOURCE_PREFIX: &str = "source = ";

fn trigger_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[\[trigger\.(\w+)\]\]$").expect("trigger header pattern"))
}

fn component_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[component\..*\]$").expect("component header pattern"))
}

fn table_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[.*\]$").expect("table header pattern"))
}

/// A header outside the trigger tree, e.g. `[application]` or `[variables]`.
///
/// Trigger sub-tables (`[trigger.http.executor]`) belong to the trigger
/// element above them and stay inside its section.
fn closes_section(line: &str) -> bool {
    table_header().is_match(line) && !line.trim_start_matches('[').starts_with("trigger.")
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// A buffered section, header line first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section<'a> {
    Trigger(Vec<&'a str>),
    Component(Vec<&'a str>),
}

impl<'a> Section<'a> {
    /// Open a section if `line` is a trigger or component header.
    pub fn open(line: &'a str) -> Option<Self> {
        if trigger_header().is_match(line) {
            Some(Section::Trigger(vec![line]))
        } else if component_header().is_match(line) {
            Some(Section::Component(vec![line]))
        } else {
            None
        }
    }

    fn push(&mut self, line: &'a str) {
        match self {
            Section::Trigger(lines) | Section::Component(lines) => lines.push(line),
        }
    }

    /// Rewrite the section for `component`; returns the output lines and
    /// whether anything matched.
    fn rewrite(&self, component: &str, shim: &ShimSource) -> (Vec<String>, bool) {
        match self {
            Section::Trigger(lines) => rewrite_trigger(lines, component),
            Section::Component(lines) => rewrite_component(lines, component, shim),
        }
    }
}

/// A trigger bound to `component` collapses to a bare command trigger; every
/// kind-specific field (route, channel, ...) is dropped.
fn rewrite_trigger(lines: &[&str], component: &str) -> (Vec<String>, bool) {
    let assignment = format!("component = \"{component}\"");
    if !lines.iter().any(|line| *line == assignment) {
        return (owned(lines), false);
    }
    (
        vec![COMMAND_TRIGGER_HEADER.to_string(), assignment, String::new()],
        true,
    )
}

/// Only the `source = ` line of the exact `[component.<name>]` section changes.
fn rewrite_component(lines: &[&str], component: &str, shim: &ShimSource) -> (Vec<String>, bool) {
    let header = format!("[component.{component}]");
    if !lines.iter().any(|line| *line == header) {
        return (owned(lines), false);
    }
    let debug_source = format!(
        "source = {{ url = \"{}\", digest = \"{}\" }}",
        shim.url, shim.digest
    );
    let rewritten = lines
        .iter()
        .map(|line| {
            if line.starts_with(SOURCE_PREFIX) {
                debug_source.clone()
            } else {
                (*line).to_string()
            }
        })
        .collect();
    (rewritten, true)
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| (*line).to_string()).collect()
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Output of [`rewrite_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub document: String,
    pub triggers_rewritten: usize,
    pub components_rewritten: usize,
}

impl Rewritten {
    pub fn changed(&self) -> bool {
        self.triggers_rewritten + self.components_rewritten > 0
    }
}

/// Rewrite `document` so `component` runs the default debug shim under a
/// command trigger.
pub fn rewrite(document: &str, component: &str) -> String {
    rewrite_with(document, component, &ShimSource::default()).document
}

/// [`rewrite`] with an explicit shim.
pub fn rewrite_with(document: &str, component: &str, shim: &ShimSource) -> Rewritten {
    let newline = if document.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = Emitter {
        buf: String::with_capacity(document.len() + shim.url.len() + 64),
        newline,
        triggers: 0,
        components: 0,
    };

    let mut open: Option<Section<'_>> = None;
    for line in document.lines() {
        if let Some(section) = Section::open(line) {
            if let Some(done) = open.take() {
                out.flush(&done, component, shim);
            }
            open = Some(section);
        } else if closes_section(line) {
            // Unrelated tables end the open section and pass through.
            if let Some(done) = open.take() {
                out.flush(&done, component, shim);
            }
            out.line(line);
        } else if let Some(section) = open.as_mut() {
            section.push(line);
        } else {
            out.line(line);
        }
    }
    if let Some(done) = open.take() {
        out.flush(&done, component, shim);
    }

    tracing::debug!(
        component,
        triggers = out.triggers,
        components = out.components,
        "manifest rewritten"
    );
    Rewritten {
        document: out.buf,
        triggers_rewritten: out.triggers,
        components_rewritten: out.components,
    }
}

struct Emitter {
    buf: String,
    newline: &'static str,
    triggers: usize,
    components: usize,
}

impl Emitter {
    fn line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push_str(self.newline);
    }

    fn flush(&mut self, section: &Section<'_>, component: &str, shim: &ShimSource) {
        let (lines, matched) = section.rewrite(component, shim);
        if matched {
            match section {
                Section::Trigger(_) => self.triggers += 1,
                Section::Component(_) => self.components += 1,
            }
        }
        for line in &lines {
            self.line(line);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
