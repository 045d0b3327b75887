//! Shared test doubles for in-crate unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::Result;
use crate::invoke::{BlockArguments, BlockContext};
use crate::loader::{BlockHandler, Extension, MenuHandler};
use crate::runtime::{HostRuntime, IdentityMessages, MessageContext, Target};
use crate::types::{BlockInfo, ExtensionMetadata, RawExtensionInfo, RawMenuItem};

pub(crate) fn sprite(id: &str) -> Target {
    Target {
        id: id.to_owned(),
        name: format!("Sprite {id}"),
        is_stage: false,
    }
}

pub(crate) fn stage() -> Target {
    Target {
        id: "stage".into(),
        name: "Stage".into(),
        is_stage: true,
    }
}

/// [`HostRuntime`] double that records every publish call.
pub(crate) struct RecordingRuntime {
    registered: Mutex<Vec<String>>,
    refreshed: Mutex<Vec<String>>,
    palettes: Mutex<HashMap<String, ExtensionMetadata>>,
    targets: Mutex<Vec<Target>>,
    editing: Mutex<Option<String>>,
    message_prefix: Option<String>,
}

impl RecordingRuntime {
    pub(crate) fn new() -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            refreshed: Mutex::new(Vec::new()),
            palettes: Mutex::new(HashMap::new()),
            targets: Mutex::new(Vec::new()),
            editing: Mutex::new(None),
            message_prefix: None,
        }
    }

    /// Make `message_context` prepend a marker, so tests can observe that
    /// labels went through formatting.
    pub(crate) fn with_message_prefix(mut self, prefix: &str) -> Self {
        self.message_prefix = Some(prefix.to_owned());
        self
    }

    pub(crate) fn add_target(&self, target: Target) {
        self.targets.lock().unwrap().push(target);
    }

    pub(crate) fn set_editing_target(&self, id: &str) {
        *self.editing.lock().unwrap() = Some(id.to_owned());
    }

    pub(crate) fn registered_ids(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    pub(crate) fn refreshed_ids(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }

    pub(crate) fn palette(&self, id: &str) -> Option<ExtensionMetadata> {
        self.palettes.lock().unwrap().get(id).cloned()
    }
}

struct PrefixMessages {
    prefix: String,
}

impl MessageContext for PrefixMessages {
    fn format(&self, message: &str) -> String {
        format!("{}{}", self.prefix, message)
    }
}

impl HostRuntime for RecordingRuntime {
    fn register_primitives(&self, metadata: &ExtensionMetadata) -> Result<()> {
        self.registered.lock().unwrap().push(metadata.id.clone());
        self.palettes
            .lock()
            .unwrap()
            .insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    fn refresh_primitives(&self, metadata: &ExtensionMetadata) -> Result<()> {
        self.refreshed.lock().unwrap().push(metadata.id.clone());
        self.palettes
            .lock()
            .unwrap()
            .insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    fn editing_target(&self) -> Option<Target> {
        let editing = self.editing.lock().unwrap().clone()?;
        self.targets
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == editing)
            .cloned()
    }

    fn stage_target(&self) -> Option<Target> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.is_stage)
            .cloned()
    }

    fn message_context(&self, _target: &Target) -> Arc<dyn MessageContext> {
        match &self.message_prefix {
            Some(prefix) => Arc::new(PrefixMessages {
                prefix: prefix.clone(),
            }),
            None => Arc::new(IdentityMessages),
        }
    }
}

/// [`Extension`] double with mutable info and explicit capability tables.
pub(crate) struct TableExtension {
    info: Mutex<RawExtensionInfo>,
    handlers: Mutex<HashMap<String, BlockHandler>>,
    menus: Mutex<HashMap<String, MenuHandler>>,
}

impl TableExtension {
    pub(crate) fn new(info: RawExtensionInfo) -> Self {
        Self {
            info: Mutex::new(info),
            handlers: Mutex::new(HashMap::new()),
            menus: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_handler<F>(self, func: &str, handler: F) -> Self
    where
        F: Fn(&BlockArguments, &BlockContext, &BlockInfo) -> Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(func.to_owned(), Arc::new(handler));
        self
    }

    pub(crate) fn with_menu<F>(self, func: &str, handler: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<Vec<RawMenuItem>> + Send + Sync + 'static,
    {
        self.menus
            .lock()
            .unwrap()
            .insert(func.to_owned(), Arc::new(handler));
        self
    }

    /// Swap the declared info, as a self-mutating extension would on reload.
    pub(crate) fn set_info(&self, info: RawExtensionInfo) {
        *self.info.lock().unwrap() = info;
    }
}

impl Extension for TableExtension {
    fn get_info(&self) -> RawExtensionInfo {
        self.info.lock().unwrap().clone()
    }

    fn handler(&self, func: &str) -> Option<BlockHandler> {
        self.handlers.lock().unwrap().get(func).cloned()
    }

    fn menu_handler(&self, func: &str) -> Option<MenuHandler> {
        self.menus.lock().unwrap().get(func).cloned()
    }
}
