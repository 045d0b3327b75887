//! Host runtime interface.
//!
//! The visual-programming runtime that consumes registered extensions is an
//! external collaborator; this module specifies it at its interface.  The
//! registry publishes canonical metadata through [`HostRuntime`] and the menu
//! generator queries it for the currently-edited target and for
//! message-formatting contexts.
//!
//! [`SimpleRuntime`] is an in-memory implementation backing the demo binary;
//! tests typically supply their own recording implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ExtensionMetadata;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// An execution target: the entity a block executes against or a menu is
/// opened for (a sprite, the stage, or an equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub name: String,
    pub is_stage: bool,
}

/// A message-formatting context scoped to one target.
///
/// Menu labels pass through [`MessageContext::format`] before they are shown,
/// so extensions can declare translatable message keys.
pub trait MessageContext: Send + Sync {
    /// Format a message for display.
    fn format(&self, message: &str) -> String;
}

/// A [`MessageContext`] that returns messages unchanged.
pub struct IdentityMessages;

impl MessageContext for IdentityMessages {
    fn format(&self, message: &str) -> String {
        message.to_owned()
    }
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The host runtime's registration and lookup surface, as consumed by the
/// extension registry.
pub trait HostRuntime: Send + Sync {
    /// Publish a freshly-normalized block/menu set.
    fn register_primitives(&self, metadata: &ExtensionMetadata) -> Result<()>;

    /// Republish the block/menu set of an already-registered extension.
    fn refresh_primitives(&self, metadata: &ExtensionMetadata) -> Result<()>;

    /// The target currently selected in the editor, if any.
    fn editing_target(&self) -> Option<Target>;

    /// The stage target, if the project has one.
    fn stage_target(&self) -> Option<Target>;

    /// A message-formatting context scoped to the given target.
    fn message_context(&self, target: &Target) -> Arc<dyn MessageContext>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Minimal in-memory [`HostRuntime`] holding published palettes and a flat
/// target list.  Suitable for demos and tooling; not a real editor.
pub struct SimpleRuntime {
    inner: Mutex<SimpleRuntimeState>,
}

#[derive(Default)]
struct SimpleRuntimeState {
    palettes: HashMap<String, ExtensionMetadata>,
    targets: Vec<Target>,
    editing: Option<String>,
}

impl SimpleRuntime {
    /// Create a runtime with no targets and no palettes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimpleRuntimeState::default()),
        }
    }

    /// Add a target to the project.
    pub fn add_target(&self, target: Target) {
        self.lock().targets.push(target);
    }

    /// Select the target the editor is focused on.
    pub fn set_editing_target(&self, id: impl Into<String>) {
        self.lock().editing = Some(id.into());
    }

    /// The published palette for an extension id, if any.
    pub fn palette(&self, id: &str) -> Option<ExtensionMetadata> {
        self.lock().palettes.get(id).cloned()
    }

    /// Ids of every published palette.
    pub fn palette_ids(&self) -> Vec<String> {
        self.lock().palettes.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimpleRuntimeState> {
        self.inner.lock().expect("runtime state lock poisoned")
    }
}

impl Default for SimpleRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime for SimpleRuntime {
    fn register_primitives(&self, metadata: &ExtensionMetadata) -> Result<()> {
        tracing::info!(
            id = %metadata.id,
            blocks = metadata.blocks.len(),
            menus = metadata.menus.len(),
            "primitives registered"
        );
        self.lock()
            .palettes
            .insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    fn refresh_primitives(&self, metadata: &ExtensionMetadata) -> Result<()> {
        tracing::info!(id = %metadata.id, "primitives refreshed");
        self.lock()
            .palettes
            .insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    fn editing_target(&self) -> Option<Target> {
        let state = self.lock();
        let editing = state.editing.as_deref()?;
        state.targets.iter().find(|t| t.id == editing).cloned()
    }

    fn stage_target(&self) -> Option<Target> {
        self.lock().targets.iter().find(|t| t.is_stage).cloned()
    }

    fn message_context(&self, _target: &Target) -> Arc<dyn MessageContext> {
        Arc::new(IdentityMessages)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
