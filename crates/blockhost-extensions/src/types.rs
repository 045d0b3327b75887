//! Extension metadata model — raw (author-declared) and canonical forms.
//!
//! Extensions describe themselves with a loosely-shaped metadata object:
//! optional fields, shorthand menu forms, separator markers mixed into the
//! block list.  The normalizer (see [`crate::normalize`]) turns that raw form
//! into the canonical form the host runtime consumes: every default applied,
//! every menu resolved to an items source, every executable block carrying a
//! bound invoker.
//!
//! Raw types round-trip through serde using the author-facing `camelCase`
//! naming; canonical types carry bound callables and are compared ignoring
//! them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;
use crate::invoke::{BlockInvoker, MenuGenerator};

/// The block-list marker an author uses to insert a palette separator.
pub const SEPARATOR: &str = "---";

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Where an extension executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Environment {
    /// In an isolated worker, reachable only through the RPC boundary.
    Sandboxed,
    /// In-process, sharing memory with the host.
    Unsandboxed,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandboxed => write!(f, "sandboxed"),
            Self::Unsandboxed => write!(f, "unsandboxed"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = ExtensionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sandboxed" => Ok(Self::Sandboxed),
            "unsandboxed" => Ok(Self::Unsandboxed),
            other => Err(ExtensionError::InvalidEnvironment {
                value: other.to_owned(),
            }),
        }
    }
}

/// The shape and palette behavior of a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    /// A stack block with no return value.
    #[default]
    Command,
    /// A round block reporting a value.
    Reporter,
    /// A hexagonal block reporting a boolean.
    Boolean,
    /// A hat block that starts a script; never executes a function itself.
    Event,
    /// A palette button; carries no opcode.
    Button,
    /// A C-shaped block that conditionally runs its branch.
    Conditional,
    /// A C-shaped block that repeatedly runs its branch.
    Loop,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Reporter => write!(f, "reporter"),
            Self::Boolean => write!(f, "boolean"),
            Self::Event => write!(f, "event"),
            Self::Button => write!(f, "button"),
            Self::Conditional => write!(f, "conditional"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

/// The editor input type of a block argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgumentType {
    #[default]
    String,
    Number,
    Boolean,
    Angle,
    Color,
    Matrix,
    Note,
    Image,
}

/// One declared block argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArgumentSpec {
    /// Editor input type.
    #[serde(rename = "type")]
    pub kind: ArgumentType,

    /// Value pre-filled in the editor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Name of the menu backing this argument, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw (author-declared) metadata
// ---------------------------------------------------------------------------

/// Extension metadata exactly as the author supplies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawExtensionInfo {
    /// Declared extension id; must be purely alphanumeric.
    pub id: String,

    /// Display name; defaults to the id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Declared blocks, possibly containing separator markers.
    pub blocks: Vec<RawBlockEntry>,

    /// Declared menus, possibly in shorthand form.
    pub menus: HashMap<String, RawMenu>,

    /// Target types this extension applies to; defaults to empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_types: Option<Vec<String>>,
}

/// One entry of the raw block list: a marker string or a block declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBlockEntry {
    /// A bare string; `"---"` is the separator marker.
    Marker(String),
    /// A block declaration.
    Block(Box<RawBlock>),
}

/// One declared block, before defaulting and validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Name of the function to execute; defaults to the opcode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_all_threads: Option<bool>,

    pub arguments: HashMap<String, ArgumentSpec>,

    /// Whether the block's effective shape is carried per call in a mutation
    /// payload rather than fixed at registration time.
    pub is_dynamic: bool,
}

/// A declared menu: either the full descriptor form or the shorthand where
/// the whole entry is the items value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMenu {
    Descriptor(RawMenuDescriptor),
    Shorthand(RawMenuItems),
}

/// The full menu descriptor form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMenuDescriptor {
    /// Whether reporter blocks may be dropped onto this menu's slot.
    #[serde(default)]
    pub accept_reporters: bool,

    pub items: RawMenuItems,
}

/// A menu's items source: a fixed list, or the name of a function on the
/// extension that produces the list at menu-open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMenuItems {
    Func(String),
    List(Vec<RawMenuItem>),
}

/// One raw menu item: a plain string used as both label and value, or an
/// explicit `(text, value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMenuItem {
    Text(String),
    Entry(RawMenuEntry),
}

/// The explicit `(text, value)` raw menu item form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMenuEntry {
    pub text: String,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Canonical metadata
// ---------------------------------------------------------------------------

/// Fully defaulted, validated extension metadata ready for runtime
/// registration.  Never mutated after construction; re-normalization always
/// builds a fresh object.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionMetadata {
    pub id: String,
    pub name: String,
    pub blocks: Vec<PaletteEntry>,
    pub menus: HashMap<String, MenuDescriptor>,
    pub target_types: Vec<String>,
}

/// One entry of the canonical palette.
#[derive(Debug, Clone, PartialEq)]
pub enum PaletteEntry {
    Separator,
    Block(BlockDescriptor),
}

/// A fully-populated canonical block descriptor.
///
/// Invariant: every descriptor whose type is not [`BlockType::Event`] or
/// [`BlockType::Button`] has a non-empty, sanitized `opcode` and a bound
/// `invoke`.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    /// Sanitized opcode; empty only for buttons.
    pub opcode: String,
    pub text: String,
    pub block_type: BlockType,
    pub terminal: bool,
    pub block_all_threads: bool,
    pub arguments: HashMap<String, ArgumentSpec>,
    pub is_dynamic: bool,
    /// Resolved target function name; `None` for event blocks.
    pub func: Option<String>,
    /// Bound invocation path; `None` for event blocks and buttons.
    pub invoke: Option<BlockInvoker>,
}

impl PartialEq for BlockDescriptor {
    // Bound invokers have no meaningful identity; equality is structural
    // over the declared fields.
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode
            && self.text == other.text
            && self.block_type == other.block_type
            && self.terminal == other.terminal
            && self.block_all_threads == other.block_all_threads
            && self.arguments == other.arguments
            && self.is_dynamic == other.is_dynamic
            && self.func == other.func
    }
}

/// A canonical menu: a fixed ordered item list or a bound generator.
#[derive(Debug, Clone)]
pub enum MenuDescriptor {
    Static {
        accept_reporters: bool,
        items: Vec<MenuItem>,
    },
    Dynamic {
        accept_reporters: bool,
        /// Name of the extension function the generator calls.
        func: String,
        generator: MenuGenerator,
    },
}

impl PartialEq for MenuDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Static {
                    accept_reporters: a,
                    items: i,
                },
                Self::Static {
                    accept_reporters: b,
                    items: j,
                },
            ) => a == b && i == j,
            (
                Self::Dynamic {
                    accept_reporters: a,
                    func: f,
                    ..
                },
                Self::Dynamic {
                    accept_reporters: b,
                    func: g,
                    ..
                },
            ) => a == b && f == g,
            _ => false,
        }
    }
}

/// A resolved `(label, value)` menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub text: String,
    pub value: Value,
}

/// The per-call effective shape of a block, as passed to handlers and across
/// the RPC boundary.  For dynamic blocks this is extracted from the call's
/// mutation payload; otherwise it mirrors the static descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockInfo {
    pub opcode: String,
    pub text: String,
    pub block_type: BlockType,
    pub is_dynamic: bool,
}

impl From<&BlockDescriptor> for BlockInfo {
    fn from(descriptor: &BlockDescriptor) -> Self {
        Self {
            opcode: descriptor.opcode.clone(),
            text: descriptor.text.clone(),
            block_type: descriptor.block_type,
            is_dynamic: descriptor.is_dynamic,
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical -> raw
// ---------------------------------------------------------------------------

impl ExtensionMetadata {
    /// Re-express canonical metadata in the raw serde form.
    ///
    /// Used for display/persistence and to state the normalizer's fixed-point
    /// property: normalizing `to_raw()` of a canonical object yields an equal
    /// canonical object.
    pub fn to_raw(&self) -> RawExtensionInfo {
        RawExtensionInfo {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            blocks: self.blocks.iter().map(PaletteEntry::to_raw).collect(),
            menus: self
                .menus
                .iter()
                .map(|(name, menu)| (name.clone(), menu.to_raw()))
                .collect(),
            target_types: Some(self.target_types.clone()),
        }
    }

    /// Look up a non-separator block by opcode.
    pub fn block(&self, opcode: &str) -> Option<&BlockDescriptor> {
        self.blocks.iter().find_map(|entry| match entry {
            PaletteEntry::Block(descriptor) if descriptor.opcode == opcode => Some(descriptor),
            _ => None,
        })
    }
}

impl PaletteEntry {
    fn to_raw(&self) -> RawBlockEntry {
        match self {
            Self::Separator => RawBlockEntry::Marker(SEPARATOR.to_owned()),
            Self::Block(descriptor) => RawBlockEntry::Block(Box::new(RawBlock {
                opcode: if descriptor.opcode.is_empty() {
                    None
                } else {
                    Some(descriptor.opcode.clone())
                },
                block_type: Some(descriptor.block_type),
                text: Some(descriptor.text.clone()),
                func: descriptor.func.clone(),
                terminal: Some(descriptor.terminal),
                block_all_threads: Some(descriptor.block_all_threads),
                arguments: descriptor.arguments.clone(),
                is_dynamic: descriptor.is_dynamic,
            })),
        }
    }
}

impl MenuDescriptor {
    fn to_raw(&self) -> RawMenu {
        match self {
            Self::Static {
                accept_reporters,
                items,
            } => RawMenu::Descriptor(RawMenuDescriptor {
                accept_reporters: *accept_reporters,
                items: RawMenuItems::List(
                    items
                        .iter()
                        .map(|item| {
                            RawMenuItem::Entry(RawMenuEntry {
                                text: item.text.clone(),
                                value: item.value.clone(),
                            })
                        })
                        .collect(),
                ),
            }),
            Self::Dynamic {
                accept_reporters,
                func,
                ..
            } => RawMenu::Descriptor(RawMenuDescriptor {
                accept_reporters: *accept_reporters,
                items: RawMenuItems::Func(func.clone()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
