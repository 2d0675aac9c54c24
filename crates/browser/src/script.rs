//! YAML action scripts.
//!
//! ```yaml
//! - actions:
//!     - action:
//!         name: setValue
//!         args:
//!           xpath: //input[@name="q"]
//!           value: 42
//! ```
//!
//! A script is either a list of such entries or a single one. Scalar values
//! keep their source text, so `42`, `0x1F` or `1.10` reach the page exactly
//! as written. Parsing is all-or-nothing: a malformed document, an unknown
//! action name or a missing argument rejects the whole script before any
//! step runs.

use std::{fmt, marker::PhantomData, str::FromStr};

use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, SeqAccess, Visitor, value::MapAccessDeserializer},
};

use crate::{error::BrowserError, locator::Locator, types::ScrollDirection};

/// The closed set of step names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionName {
    Click,
    SetValue,
    SetValueAndEnter,
    DropdownSelect,
    Hover,
    Scroll,
    FailNoElement,
    FailAmbiguous,
}

impl ActionName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::SetValue => "setValue",
            Self::SetValueAndEnter => "setValueAndEnter",
            Self::DropdownSelect => "dropdownSelect",
            Self::Hover => "hover",
            Self::Scroll => "scroll",
            Self::FailNoElement => "failNoElement",
            Self::FailAmbiguous => "failAmbiguous",
        }
    }
}

impl FromStr for ActionName {
    type Err = BrowserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "click" => Self::Click,
            "setValue" => Self::SetValue,
            "setValueAndEnter" => Self::SetValueAndEnter,
            "dropdownSelect" => Self::DropdownSelect,
            "hover" => Self::Hover,
            "scroll" => Self::Scroll,
            "failNoElement" => Self::FailNoElement,
            "failAmbiguous" => Self::FailAmbiguous,
            other => return Err(BrowserError::UnknownAction(other.to_string())),
        })
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click {
        locator: Locator,
    },
    SetValue {
        locator: Locator,
        value: String,
        enter: bool,
    },
    DropdownSelect {
        locator: Locator,
        value: String,
    },
    Hover {
        locator: Locator,
    },
    Scroll {
        locator: Option<Locator>,
        direction: ScrollDirection,
    },
    FailNoElement {
        message: String,
    },
    FailAmbiguous {
        message: String,
    },
}

impl Action {
    pub fn name(&self) -> ActionName {
        match self {
            Self::Click { .. } => ActionName::Click,
            Self::SetValue { enter: false, .. } => ActionName::SetValue,
            Self::SetValue { enter: true, .. } => ActionName::SetValueAndEnter,
            Self::DropdownSelect { .. } => ActionName::DropdownSelect,
            Self::Hover { .. } => ActionName::Hover,
            Self::Scroll { .. } => ActionName::Scroll,
            Self::FailNoElement { .. } => ActionName::FailNoElement,
            Self::FailAmbiguous { .. } => ActionName::FailAmbiguous,
        }
    }

    fn from_raw(raw: RawAction<ArgValue>) -> Result<Self, BrowserError> {
        let name: ActionName = raw.name.parse()?;
        let RawArgs { xpath, value } = raw.args;
        let locator = || Locator::new(xpath.clone().unwrap_or_default());
        let scalar = |value: Option<ArgValue>| match value {
            None => Ok(None),
            Some(ArgValue::Scalar(text)) => Ok(Some(text)),
            Some(ArgValue::Collection(text)) => Err(BrowserError::InvalidArguments {
                action: name.to_string(),
                reason: format!("'value' must be a scalar, got {text}"),
            }),
        };
        let required = |value: Option<ArgValue>| {
            scalar(value)?.ok_or_else(|| BrowserError::InvalidArguments {
                action: name.to_string(),
                reason: "missing 'value'".into(),
            })
        };
        let message = |value: Option<ArgValue>| value.map(ArgValue::into_text).unwrap_or_default();

        Ok(match name {
            ActionName::Click => Self::Click { locator: locator() },
            ActionName::SetValue | ActionName::SetValueAndEnter => Self::SetValue {
                locator: locator(),
                value: required(value)?,
                enter: name == ActionName::SetValueAndEnter,
            },
            ActionName::DropdownSelect => Self::DropdownSelect {
                locator: locator(),
                value: required(value)?,
            },
            ActionName::Hover => Self::Hover { locator: locator() },
            ActionName::Scroll => Self::Scroll {
                locator: xpath.clone().filter(|x| !x.trim().is_empty()).map(Locator::new),
                direction: scalar(value)?
                    .as_deref()
                    .map(str::parse::<ScrollDirection>)
                    .transpose()?
                    .unwrap_or_default(),
            },
            ActionName::FailNoElement => Self::FailNoElement {
                message: message(value),
            },
            ActionName::FailAmbiguous => Self::FailAmbiguous {
                message: message(value),
            },
        })
    }
}

/// An argument value as written: a scalar's source text, or a collection
/// rendered back to YAML.
enum ArgValue {
    Scalar(String),
    Collection(String),
}

impl ArgValue {
    fn into_text(self) -> String {
        match self {
            Self::Scalar(text) | Self::Collection(text) => text,
        }
    }

    fn from_node(node: serde_yaml::Value) -> Self {
        match node {
            serde_yaml::Value::String(s) => Self::Scalar(s),
            serde_yaml::Value::Bool(b) => Self::Scalar(b.to_string()),
            serde_yaml::Value::Number(n) => Self::Scalar(n.to_string()),
            serde_yaml::Value::Null => Self::Scalar(String::new()),
            other => Self::Collection(
                serde_yaml::to_string(&other)
                    .map(|s| s.trim_end().to_string())
                    .unwrap_or_else(|_| format!("{other:?}")),
            ),
        }
    }
}

/// Entries of a script, over the type its `value` arguments are read as.
struct ScriptDocument<V>(Vec<ScriptEntry<V>>);

// Not `#[serde(untagged)]`: buffered content re-reads plain scalars as
// numbers, and `value` must reach `V` straight from the parser.
impl<'de, V: Deserialize<'de>> Deserialize<'de> for ScriptDocument<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for DocumentVisitor<V> {
            type Value = ScriptDocument<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of `actions` entries or a single entry")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = seq.next_element()? {
                    entries.push(entry);
                }
                Ok(ScriptDocument(entries))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let entry = ScriptEntry::deserialize(MapAccessDeserializer::new(map))?;
                Ok(ScriptDocument(vec![entry]))
            }
        }

        deserializer.deserialize_any(DocumentVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
struct ScriptEntry<V> {
    actions: Vec<RawStep<V>>,
}

#[derive(Deserialize)]
struct RawStep<V> {
    action: RawAction<V>,
}

#[derive(Deserialize)]
struct RawAction<V> {
    name: String,
    #[serde(default = "RawArgs::empty")]
    args: RawArgs<V>,
}

#[derive(Deserialize)]
struct RawArgs<V> {
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default = "Option::default")]
    value: Option<V>,
}

impl<V> RawArgs<V> {
    fn empty() -> Self {
        Self {
            xpath: None,
            value: None,
        }
    }
}

impl<V> RawAction<V> {
    fn map_value(self, f: impl Fn(V) -> ArgValue) -> RawAction<ArgValue> {
        RawAction {
            name: self.name,
            args: RawArgs {
                xpath: self.args.xpath,
                value: self.args.value.map(f),
            },
        }
    }
}

impl<V> ScriptDocument<V> {
    fn into_actions(self, f: impl Fn(V) -> ArgValue) -> Result<Vec<Action>, BrowserError> {
        self.0
            .into_iter()
            .flat_map(|entry| entry.actions)
            .map(|step| Action::from_raw(step.action.map_value(&f)))
            .collect()
    }
}

/// Parse a whole script into its ordered steps.
///
/// Values are read as raw scalar text. A document whose values include a
/// list or mapping is read a second time with those rendered as YAML, which
/// only the fail actions accept; plain numbers in that second reading are
/// re-rendered by YAML.
pub fn parse_script(script: &str) -> Result<Vec<Action>, BrowserError> {
    match serde_yaml::from_str::<ScriptDocument<String>>(script) {
        Ok(document) => document.into_actions(ArgValue::Scalar),
        Err(strict) => match serde_yaml::from_str::<ScriptDocument<serde_yaml::Value>>(script) {
            Ok(document) => document.into_actions(ArgValue::from_node),
            Err(_) => Err(BrowserError::ScriptParse(strict.to_string())),
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const SEARCH: &str = r#"
- actions:
    - action:
        name: setValueAndEnter
        args:
          xpath: //input[@name="q"]
          value: 0042
    - action:
        name: scroll
        args:
          value: up
- actions:
    - action:
        name: click
        args:
          xpath: /html/body/iframe/html/body//button
"#;

    #[test]
    fn parses_steps_in_document_order() {
        let actions = parse_script(SEARCH).unwrap();
        assert_eq!(actions, vec![
            Action::SetValue {
                locator: Locator::new(r#"//input[@name="q"]"#),
                value: "0042".into(),
                enter: true,
            },
            Action::Scroll {
                locator: None,
                direction: ScrollDirection::Up,
            },
            Action::Click {
                locator: Locator::new("/html/body/iframe/html/body//button"),
            },
        ]);
    }

    #[test]
    fn single_entry_document() {
        let script = "actions:\n  - action:\n      name: hover\n      args:\n        xpath: //a\n";
        let actions = parse_script(script).unwrap();
        assert_eq!(actions, vec![Action::Hover {
            locator: Locator::new("//a")
        }]);
    }

    fn set_value(script: &str) -> String {
        match parse_script(script).unwrap().as_slice() {
            [Action::SetValue { value, .. }] => value.clone(),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[rstest]
    #[case("value: 0042", "0042")]
    #[case("value: -3.50", "-3.50")]
    #[case("value: 1e3", "1e3")]
    #[case("value: 0x1F", "0x1F")]
    #[case("value: 007 # zip code", "007")]
    #[case("value: '1.10'", "1.10")]
    #[case("value: .inf", ".inf")]
    #[case("value: 1_000", "1_000")]
    fn block_values_keep_source_text(#[case] line: &str, #[case] expected: &str) {
        let script = format!(
            "actions:\n  - action:\n      name: setValue\n      args:\n        xpath: //input\n        {line}\n"
        );
        assert_eq!(set_value(&script), expected);
    }

    #[rstest]
    #[case("{xpath: //input, value: 1.10}", "1.10")]
    #[case("{xpath: //input, value: 0x1F}", "0x1F")]
    #[case("{value: 12, xpath: //input}", "12")]
    fn flow_values_keep_source_text(#[case] args: &str, #[case] expected: &str) {
        let script = format!("actions: [{{action: {{name: setValue, args: {args}}}}}]");
        assert_eq!(set_value(&script), expected);
    }

    #[test]
    fn block_scalar_values_are_untouched() {
        let script = "actions:\n  - action:\n      name: setValue\n      args:\n        xpath: //textarea\n        value: |\n          qty: 10\n          note: 0042\n";
        assert_eq!(set_value(script), "qty: 10\nnote: 0042\n");
    }

    #[rstest]
    #[case("args: {}", "")]
    #[case("args: {value: ~}", "")]
    #[case("args: {xpath: //a}", "")]
    #[case("args: {value: gone}", "gone")]
    #[case("args: {value: [a, b]}", "- a\n- b")]
    fn fail_actions_accept_any_value(#[case] args: &str, #[case] expected: &str) {
        let script = format!(
            "- actions:\n    - action:\n        name: failNoElement\n        {args}\n    - action:\n        name: failAmbiguous\n        {args}\n"
        );
        assert_eq!(parse_script(&script).unwrap(), vec![
            Action::FailNoElement {
                message: expected.to_string()
            },
            Action::FailAmbiguous {
                message: expected.to_string()
            },
        ]);
    }

    #[test]
    fn collection_value_outside_fail_actions_is_invalid() {
        let script = "actions: [{action: {name: setValue, args: {xpath: //input, value: [1, 2]}}}]";
        assert!(matches!(
            parse_script(script),
            Err(BrowserError::InvalidArguments { action, .. }) if action == "setValue"
        ));
    }

    #[test]
    fn unknown_action_rejects_whole_script() {
        let script = r#"
actions:
  - action:
      name: click
      args:
        xpath: //a
  - action:
      name: teleport
      args: {}
"#;
        assert!(matches!(
            parse_script(script),
            Err(BrowserError::UnknownAction(name)) if name == "teleport"
        ));
    }

    #[rstest]
    #[case("actions: [")]
    #[case("just a string")]
    #[case("- steps: []")]
    fn malformed_documents_are_parse_errors(#[case] script: &str) {
        assert!(matches!(parse_script(script), Err(BrowserError::ScriptParse(_))));
    }

    #[test]
    fn missing_value_is_invalid_arguments() {
        let script = "actions:\n  - action:\n      name: setValue\n      args:\n        xpath: //input\n";
        assert!(matches!(
            parse_script(script),
            Err(BrowserError::InvalidArguments { action, .. }) if action == "setValue"
        ));
    }

    #[test]
    fn missing_xpath_becomes_empty_locator() {
        let script = "actions:\n  - action:\n      name: click\n      args: {}\n";
        match parse_script(script).unwrap().as_slice() {
            [Action::Click { locator }] => assert!(locator.is_empty()),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn bool_values_keep_their_text() {
        let script = "actions:\n  - action:\n      name: dropdownSelect\n      args:\n        xpath: //select\n        value: true\n";
        assert_eq!(parse_script(script).unwrap(), vec![Action::DropdownSelect {
            locator: Locator::new("//select"),
            value: "true".into(),
        }]);
    }

    #[test]
    fn bad_scroll_direction_is_invalid_arguments() {
        let script = "actions:\n  - action:\n      name: scroll\n      args:\n        value: diagonal\n";
        assert!(matches!(
            parse_script(script),
            Err(BrowserError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn action_names_round_trip() {
        for name in [
            ActionName::Click,
            ActionName::SetValue,
            ActionName::SetValueAndEnter,
            ActionName::DropdownSelect,
            ActionName::Hover,
            ActionName::Scroll,
            ActionName::FailNoElement,
            ActionName::FailAmbiguous,
        ] {
            assert_eq!(name.as_str().parse::<ActionName>().unwrap(), name);
        }
    }
}
