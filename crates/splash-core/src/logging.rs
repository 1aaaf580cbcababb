//! Logging and debugging facilities for Splash.
//!
//! Splash uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in the application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("splash_core=debug,splash_net=info")
//!     .init();
//! ```
//!
//! Use [`GraphDebug`] to print the object graph of a root:
//!
//! ```
//! use splash_core::{GraphDebug, ObjectKind, RootObject};
//!
//! let root = RootObject::new("world");
//! root.register_kind(ObjectKind::new("camera"));
//! root.register_kind(ObjectKind::new("image"));
//! root.create_object("camera", "cam").unwrap();
//! root.create_object("image", "img").unwrap();
//! root.link("cam", "img");
//!
//! let output = GraphDebug::new(&root).format_all();
//! assert!(output.contains("cam"));
//! assert!(output.contains("img"));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::object::{GraphObject, ObjectId};
use crate::root::RootObject;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Attribute validation.
    pub const ATTRIBUTE: &str = "splash_core::attribute";
    /// Object model.
    pub const OBJECT: &str = "splash_core::object";
    /// Root object registry and propagation.
    pub const ROOT: &str = "splash_core::root";
    /// Task queues.
    pub const TASK: &str = "splash_core::task";
    /// Link transport.
    pub const LINK: &str = "splash_net::link";
}

/// Style options for graph visualization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
}

/// Configuration for graph debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    pub show_ids: bool,
    pub show_types: bool,
    /// List attribute names and values under each object.
    pub show_attributes: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: false,
            show_types: true,
            show_attributes: false,
            max_depth: None,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_ids: true,
            show_attributes: true,
            ..Default::default()
        }
    }

    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_types: false,
            ..Default::default()
        }
    }
}

/// Renders the object graph of a root as a tree.
///
/// Objects without parents are the tree roots; each object's children are
/// the objects it links to. An object linked from several parents appears
/// under each of them. Cycles are cut at the first repeated object.
pub struct GraphDebug<'a> {
    root: &'a RootObject,
    options: TreeFormatOptions,
}

impl<'a> GraphDebug<'a> {
    pub fn new(root: &'a RootObject) -> Self {
        Self::with_options(root, TreeFormatOptions::default())
    }

    pub fn with_options(root: &'a RootObject, options: TreeFormatOptions) -> Self {
        Self { root, options }
    }

    /// Format every object, starting from those without parents.
    pub fn format_all(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "{} ({} objects):",
            self.root.name(),
            self.root.object_count()
        );

        let mut tops: Vec<_> = self
            .root
            .objects()
            .into_iter()
            .filter(|object| object.parents().is_empty())
            .collect();
        tops.sort_by(|a, b| a.name().cmp(b.name()));

        if tops.is_empty() {
            output.push_str("  (empty)\n");
        }
        for (i, object) in tops.iter().enumerate() {
            let mut path = Vec::new();
            self.format_node(object, 0, i + 1 == tops.len(), &mut path, &mut output);
        }
        output
    }

    /// Format the subtree below the named object.
    pub fn format_subtree(&self, name: &str) -> Option<String> {
        let object = self.root.get_object(name)?;
        let mut output = String::new();
        self.format_node(&object, 0, true, &mut Vec::new(), &mut output);
        Some(output)
    }

    fn format_node(
        &self,
        object: &GraphObject,
        depth: usize,
        is_last: bool,
        path: &mut Vec<ObjectId>,
        output: &mut String,
    ) {
        if self.options.max_depth.is_some_and(|max| depth > max) {
            return;
        }

        output.push_str(&self.prefix(depth, is_last));
        output.push_str(object.name());
        if self.options.show_ids {
            let _ = write!(output, " [{}]", object.id().as_raw());
        }
        if self.options.show_types {
            let _ = write!(output, " ({})", object.type_name());
        }

        if path.contains(&object.id()) {
            output.push_str(" (cycle)\n");
            return;
        }
        output.push('\n');

        if self.options.show_attributes {
            let indent = self.indent(depth + 1);
            for name in object.attributes_list() {
                let values = object.get_attribute(&name).unwrap_or_default();
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                let _ = writeln!(output, "{indent}.{name} = [{}]", rendered.join(", "));
            }
        }

        path.push(object.id());
        let mut children: Vec<_> = object
            .linked_objects()
            .into_iter()
            .filter_map(|id| self.root.object_by_id(id))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        let count = children.len();
        for (i, child) in children.iter().enumerate() {
            self.format_node(child, depth + 1, i + 1 == count, path, output);
        }
        path.pop();
    }

    fn prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }
        let connector = match (self.options.style, is_last) {
            (TreeStyle::Ascii, false) => "+-- ",
            (TreeStyle::Ascii, true) => "`-- ",
            (TreeStyle::Unicode, false) => "\u{251c}\u{2500}\u{2500} ",
            (TreeStyle::Unicode, true) => "\u{2514}\u{2500}\u{2500} ",
        };
        format!("{}{}", self.indent(depth - 1), connector)
    }

    fn indent(&self, depth: usize) -> String {
        let branch = match self.options.style {
            TreeStyle::Ascii => "|   ",
            TreeStyle::Unicode => "\u{2502}   ",
        };
        branch.repeat(depth)
    }
}

impl fmt::Display for GraphDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_all())
    }
}
