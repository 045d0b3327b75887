//! Sample extension bundled with the demo command.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use blockhost_extensions::{BlockHandler, Extension, MenuHandler, RawExtensionInfo, RawMenuItem};

/// A small in-process extension exercising the main metadata features:
/// several block types, a separator, a static menu, and a dynamic menu.
pub struct GreeterExtension {
    handlers: HashMap<String, BlockHandler>,
    menus: HashMap<String, MenuHandler>,
}

impl GreeterExtension {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, BlockHandler> = HashMap::new();
        handlers.insert(
            "greet".into(),
            Arc::new(|args, _context, _info| {
                let name = args
                    .get("NAME")
                    .and_then(Value::as_str)
                    .unwrap_or("world");
                Ok(json!(format!("hello, {name}!")))
            }),
        );
        handlers.insert(
            "greetingCount".into(),
            Arc::new(|_args, _context, _info| Ok(json!(3))),
        );

        let mut menus: HashMap<String, MenuHandler> = HashMap::new();
        menus.insert(
            "languages".into(),
            Arc::new(|target_id| {
                let mut items = vec![
                    RawMenuItem::Text("english".into()),
                    RawMenuItem::Text("french".into()),
                ];
                if target_id.is_some() {
                    items.push(RawMenuItem::Text("klingon".into()));
                }
                Ok(items)
            }),
        );

        Self { handlers, menus }
    }
}

impl Default for GreeterExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for GreeterExtension {
    fn get_info(&self) -> RawExtensionInfo {
        serde_json::from_value(json!({
            "id": "greeter",
            "name": "Greeter",
            "blocks": [
                {
                    "opcode": "greet",
                    "text": "say hello to [NAME]",
                    "arguments": {
                        "NAME": { "type": "string", "defaultValue": "world" }
                    }
                },
                {
                    "opcode": "greetingCount",
                    "blockType": "reporter",
                    "text": "greetings sent"
                },
                "---",
                { "opcode": "whenGreeted", "blockType": "event", "text": "when greeted" }
            ],
            "menus": {
                "tones": ["cheerful", "formal"],
                "languages": "languages"
            }
        }))
        .expect("sample metadata is well-formed")
    }

    fn handler(&self, func: &str) -> Option<BlockHandler> {
        self.handlers.get(func).cloned()
    }

    fn menu_handler(&self, func: &str) -> Option<MenuHandler> {
        self.menus.get(func).cloned()
    }
}
