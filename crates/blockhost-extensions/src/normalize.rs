//! Metadata normalizer.
//!
//! Pure transformation from author-declared [`RawExtensionInfo`] to the
//! canonical [`ExtensionMetadata`] the host runtime consumes.  Normalization
//! never mutates its input and always builds a fresh object, so republishing
//! can never alias previously published metadata.
//!
//! Failure containment: an invalid extension id aborts the whole
//! normalization, but a malformed individual block is logged and dropped —
//! one bad block must never cost the extension its registration.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ExtensionError, Result};
use crate::invoke::{bind_block, bind_menu, BindContext};
use crate::types::{
    BlockDescriptor, BlockInfo, BlockType, ExtensionMetadata, MenuDescriptor, MenuItem,
    PaletteEntry, RawBlock, RawBlockEntry, RawExtensionInfo, RawMenu, RawMenuItem, RawMenuItems,
    SEPARATOR,
};

static EXTENSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9]+$").expect("static pattern compiles"));

/// Strip characters that are unsafe in the host's attribute-encoded block
/// representation.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '<' | '"' | '&')).collect()
}

/// Normalize raw extension metadata into canonical form, binding every
/// executable block and every dynamic menu to its invocation path.
pub fn normalize(ctx: &BindContext, raw: &RawExtensionInfo) -> Result<ExtensionMetadata> {
    if !EXTENSION_ID.is_match(&raw.id) {
        return Err(ExtensionError::InvalidId { id: raw.id.clone() });
    }

    let id = raw.id.clone();
    let name = raw.name.clone().unwrap_or_else(|| id.clone());

    let mut blocks = Vec::with_capacity(raw.blocks.len());
    for (index, entry) in raw.blocks.iter().enumerate() {
        match entry {
            RawBlockEntry::Marker(marker) if marker == SEPARATOR => {
                blocks.push(PaletteEntry::Separator);
            }
            RawBlockEntry::Marker(marker) => {
                tracing::warn!(
                    extension = %id,
                    index,
                    marker = %marker,
                    "dropping unrecognized block marker"
                );
            }
            RawBlockEntry::Block(block) => match prepare_block(ctx, &id, index, block) {
                Ok(descriptor) => blocks.push(PaletteEntry::Block(descriptor)),
                Err(error) => {
                    tracing::warn!(
                        extension = %id,
                        index,
                        opcode = ?block.opcode,
                        error = %error,
                        "dropping malformed block"
                    );
                }
            },
        }
    }

    let mut menus = HashMap::with_capacity(raw.menus.len());
    for (menu_name, menu) in &raw.menus {
        menus.insert(menu_name.clone(), prepare_menu(ctx, &id, menu_name, menu));
    }

    Ok(ExtensionMetadata {
        id,
        name,
        blocks,
        menus,
        target_types: raw.target_types.clone().unwrap_or_default(),
    })
}

/// Default, sanitize, and bind one declared block.
fn prepare_block(
    ctx: &BindContext,
    extension_id: &str,
    index: usize,
    raw: &RawBlock,
) -> Result<BlockDescriptor> {
    let block_type = raw.block_type.unwrap_or_default();
    let opcode = sanitize(raw.opcode.as_deref().unwrap_or(""));
    let text = raw.text.clone().unwrap_or_else(|| opcode.clone());
    let terminal = raw.terminal.unwrap_or(false);
    let block_all_threads = raw.block_all_threads.unwrap_or(false);

    let (opcode, func, invoke) = match block_type {
        BlockType::Event => {
            if raw.func.is_some() {
                tracing::warn!(
                    extension = %extension_id,
                    opcode = %opcode,
                    "event blocks never execute a function; ignoring func"
                );
            }
            (opcode, None, None)
        }

        BlockType::Button => {
            if raw.opcode.is_some() {
                tracing::warn!(
                    extension = %extension_id,
                    index,
                    "buttons carry no opcode; ignoring it"
                );
            }
            (String::new(), raw.func.as_deref().map(sanitize), None)
        }

        _ => {
            if opcode.is_empty() {
                return Err(ExtensionError::MissingOpcode {
                    extension: extension_id.to_owned(),
                    index,
                });
            }
            let func = raw
                .func
                .as_deref()
                .map(sanitize)
                .unwrap_or_else(|| opcode.clone());
            let info = BlockInfo {
                opcode: opcode.clone(),
                text: text.clone(),
                block_type,
                is_dynamic: raw.is_dynamic,
            };
            let invoke = bind_block(ctx, extension_id, info, &func);
            (opcode, Some(func), Some(invoke))
        }
    };

    Ok(BlockDescriptor {
        opcode,
        text,
        block_type,
        terminal,
        block_all_threads,
        arguments: raw.arguments.clone(),
        is_dynamic: raw.is_dynamic,
        func,
        invoke,
    })
}

/// Unwrap menu shorthand and resolve the items source.  A function-name
/// items string is replaced by a bound generator; downstream consumers never
/// see the string form.
fn prepare_menu(
    ctx: &BindContext,
    extension_id: &str,
    menu_name: &str,
    raw: &RawMenu,
) -> MenuDescriptor {
    let (accept_reporters, items) = match raw {
        RawMenu::Descriptor(descriptor) => (descriptor.accept_reporters, &descriptor.items),
        RawMenu::Shorthand(items) => (false, items),
    };

    match items {
        RawMenuItems::List(list) => MenuDescriptor::Static {
            accept_reporters,
            items: list.iter().map(canonical_menu_item).collect(),
        },
        RawMenuItems::Func(func) => MenuDescriptor::Dynamic {
            accept_reporters,
            func: func.clone(),
            generator: bind_menu(ctx, extension_id, menu_name, func),
        },
    }
}

fn canonical_menu_item(item: &RawMenuItem) -> MenuItem {
    match item {
        RawMenuItem::Text(text) => MenuItem {
            text: text.clone(),
            value: serde_json::Value::String(text.clone()),
        },
        RawMenuItem::Entry(entry) => MenuItem {
            text: entry.text.clone(),
            value: entry.value.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
