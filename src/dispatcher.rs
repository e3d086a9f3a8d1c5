//! Context-menu actions.
//!
//! A right-click on the terminal produces a screen context (a JSON object
//! describing what is under the pointer). Recognizers decide which actions
//! apply to that context; each applicable action becomes a menu item.

use anyhow::{Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Recognizer {
    pub id: String,
    /// Screen-context key that must be present.
    pub key: String,
    /// If set, the key's value must equal this string.
    #[serde(default)]
    pub equals: Option<String>,
    /// Id of the action to offer.
    pub action: String,
}

impl Recognizer {
    pub fn matches(&self, context: &Value) -> bool {
        let Some(found) = context.get(&self.key) else {
            return false;
        };
        match &self.equals {
            None => true,
            Some(expected) => match found {
                Value::String(s) => s == expected,
                other => &other.to_string() == expected,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Action {
    pub id: String,
    /// Label shown in the context menu.
    pub name: String,
    /// Plugin the action is delivered to, if any.
    #[serde(default)]
    pub target: Option<String>,
}

pub trait ActionDispatcher {
    fn recognizers(&self, context: &Value) -> Vec<Recognizer>;
    fn action(&self, recognizer: &Recognizer) -> Option<Action>;
    fn invoke(&self, action: &Action, context: &Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextMenuItem {
    pub text: String,
    pub action: Action,
}

/// One item per recognizer that resolves to an action, in recognizer order.
pub fn build_context_menu<D: ActionDispatcher + ?Sized>(
    dispatcher: &D,
    context: &Value,
) -> Vec<ContextMenuItem> {
    dispatcher
        .recognizers(context)
        .iter()
        .filter_map(|r| dispatcher.action(r))
        .map(|action| ContextMenuItem {
            text: action.name.clone(),
            action,
        })
        .collect()
}

/// Recognizers and actions loaded from the `[dispatcher]` section of the
/// app config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecognizerTable {
    pub recognizers: Vec<Recognizer>,
    pub actions: Vec<Action>,
}

impl ActionDispatcher for RecognizerTable {
    fn recognizers(&self, context: &Value) -> Vec<Recognizer> {
        self.recognizers
            .iter()
            .filter(|r| r.matches(context))
            .cloned()
            .collect()
    }

    fn action(&self, recognizer: &Recognizer) -> Option<Action> {
        self.actions.iter().find(|a| a.id == recognizer.action).cloned()
    }

    /// Local stand-in for the host desktop's dispatcher. Nothing receives
    /// the action here: a registered action is logged with its target plugin
    /// and context, an unregistered one is an error.
    fn invoke(&self, action: &Action, context: &Value) -> Result<()> {
        if !self.actions.iter().any(|a| a.id == action.id) {
            bail!("unknown action {}", action.id);
        }
        info!(
            target: "dispatcher",
            action = %action.id,
            target_plugin = action.target.as_deref().unwrap_or("-"),
            context = %context,
            "Invoking action"
        );
        Ok(())
    }
}
