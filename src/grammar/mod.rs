//! Declarative grammars that turn CLI output into [`Record`]s and back.
//!
//! A [`GrammarSpec`] is plain data (usually JSON): the query commands for one
//! resource, the line patterns that extract its fields, the field kinds and
//! defaults, and the command templates that set, unset, add and remove values.
//! [`Grammar::new`] validates and compiles it once; the compiled grammar is
//! immutable and can be shared across devices.
//!
//! # Parsing rules
//!
//! - Lines are trimmed; patterns are tried in declaration order and the first
//!   match wins for a line. Lines no pattern matches are ignored.
//! - A field matched on several lines keeps the value from the last one.
//! - Collection elements keep device order. An element whose key repeats an
//!   earlier one replaces it in place.
//! - Output with no matching line means the resource is absent (`None`).
//! - Values that fail conversion leave their field unset.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::trace;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::session::Privilege;

pub use record::{Record, Value};
pub use template::Template;

pub mod address;
pub mod catalog;
mod record;
mod template;

/// Field specs visible to a template, by name.
pub type Scope = BTreeMap<String, FieldSpec>;

/// How a captured value is converted and validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    /// Boolean spelled with two CLI words.
    Switch {
        #[serde(default = "default_on")]
        on: String,
        #[serde(default = "default_off")]
        off: String,
    },
    /// IPv4 or IPv6 literal.
    Address,
    /// Hostname or address.
    Host,
    /// One of a fixed set of words. Parsing accepts anything the device prints.
    Choice { values: Vec<String> },
}

fn default_on() -> String {
    "on".to_string()
}

fn default_off() -> String {
    "off".to_string()
}

fn default_mutation_privilege() -> Privilege {
    Privilege::Administrator
}

/// A scalar field, or a field of a collection element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Value the device assumes when no line configures the field.
    #[serde(default)]
    pub default: Option<Value>,
    /// Command that sets the field.
    #[serde(default)]
    pub set: Option<String>,
    /// Command that removes the field.
    #[serde(default)]
    pub unset: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            set: None,
            unset: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_set(mut self, template: impl Into<String>) -> Self {
        self.set = Some(template.into());
        self
    }

    pub fn with_unset(mut self, template: impl Into<String>) -> Self {
        self.unset = Some(template.into());
        self
    }

    /// Converts text captured from device output.
    fn capture(&self, text: &str) -> Option<Value> {
        match &self.kind {
            FieldKind::Text | FieldKind::Choice { .. } => Some(Value::Text(text.to_string())),
            FieldKind::Integer => text.parse().ok().map(Value::Int),
            FieldKind::Switch { on, off } => {
                if text == on {
                    Some(Value::Bool(true))
                } else if text == off {
                    Some(Value::Bool(false))
                } else {
                    None
                }
            }
            FieldKind::Address => address::is_address(text).then(|| Value::Text(text.to_string())),
            FieldKind::Host => address::is_host(text).then(|| Value::Text(text.to_string())),
        }
    }

    /// Validates and coerces a caller-supplied value.
    fn coerce(&self, value: &Value) -> Result<Value, String> {
        match (&self.kind, value) {
            (_, Value::Null) => Ok(Value::Null),
            (_, Value::List(_)) => Err("a list is not a scalar".to_string()),
            (FieldKind::Text, Value::Text(_)) => Ok(value.clone()),
            (FieldKind::Text, Value::Int(number)) => Ok(Value::Text(number.to_string())),
            (FieldKind::Integer, _) => value
                .as_int()
                .map(Value::Int)
                .ok_or_else(|| format!("'{value}' is not an integer")),
            (FieldKind::Switch { .. }, Value::Bool(_)) => Ok(value.clone()),
            (FieldKind::Switch { on, off }, Value::Text(text)) => self
                .capture(text)
                .or_else(|| match text.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                })
                .ok_or_else(|| format!("'{text}' is neither '{on}' nor '{off}'")),
            (FieldKind::Address, Value::Text(text)) if address::is_address(text) => {
                Ok(value.clone())
            }
            (FieldKind::Host, Value::Text(text)) if address::is_host(text) => Ok(value.clone()),
            (FieldKind::Choice { values }, Value::Text(text)) if values.contains(text) => {
                Ok(value.clone())
            }
            (FieldKind::Choice { values }, _) => {
                Err(format!("'{value}' is not one of {}", values.join(", ")))
            }
            (kind, _) => Err(format!("'{value}' does not fit {kind:?}")),
        }
    }
}

/// A repeatable sub-record, such as the hosts of a syslog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CollectionSpec {
    pub name: String,
    /// Element fields identifying an element.
    pub key: Vec<String>,
    pub fields: Vec<FieldSpec>,
    /// Command adding one element.
    pub add: String,
    /// Command removing one element.
    pub remove: String,
    #[serde(default)]
    pub derivations: Vec<Derivation>,
}

/// A line pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatternSpec {
    /// Named captures are field names.
    pub regex: String,
    /// Collection the line adds an element to.
    #[serde(default)]
    pub element: Option<String>,
    /// Constant values assigned when the line matches.
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
}

/// A field computed from other fields after matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Derivation {
    /// Host bits of `address` cleared using the `prefix` length.
    NetworkAddress {
        address: String,
        prefix: String,
        output: String,
    },
    PrefixToMask { input: String, output: String },
    MaskToPrefix { input: String, output: String },
    /// `default`, `a.b.c.d/n` or `a.b.c.d/m.m.m.m` into address and prefix length.
    SplitCidr {
        input: String,
        address: String,
        prefix: String,
    },
}

/// Declarative description of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GrammarSpec {
    pub name: String,
    /// Read-only commands whose output holds the resource. Templates over identity fields.
    pub query: Vec<String>,
    #[serde(default)]
    pub query_privilege: Privilege,
    #[serde(default = "default_mutation_privilege")]
    pub mutation_privilege: Privilege,
    /// Fields that tell instances apart, e.g. a route destination.
    #[serde(default)]
    pub identity: Vec<String>,
    /// Field that must be present whenever any line of the resource is.
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    pub patterns: Vec<PatternSpec>,
    #[serde(default)]
    pub derivations: Vec<Derivation>,
    /// Commands removing the whole resource. When empty, deletion removes
    /// elements and unsets fields one by one.
    #[serde(default)]
    pub remove: Vec<String>,
}

impl GrammarSpec {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidGrammar(format!("grammar decode error: {e}")))
    }
}

/// JSON Schema of the grammar document format.
pub fn grammar_json_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(GrammarSpec);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledField {
    pub(crate) spec: FieldSpec,
    pub(crate) set: Option<Template>,
    pub(crate) unset: Option<Template>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledCollection {
    pub(crate) spec: CollectionSpec,
    pub(crate) add: Template,
    pub(crate) remove: Template,
    /// Element fields visible to the element templates, resource fields included.
    pub(crate) scope: Scope,
}

impl CompiledCollection {
    pub(crate) fn name(&self) -> &str {
        &self.spec.name
    }

    /// Key of an element; missing key fields read as `Null`.
    pub(crate) fn key_of(&self, element: &Record) -> Vec<Value> {
        self.spec
            .key
            .iter()
            .map(|name| element.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub(crate) fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.spec.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    regex: Regex,
    element: Option<usize>,
    names: Vec<String>,
    set: Vec<(String, Value)>,
}

/// A compiled, immutable [`GrammarSpec`].
///
/// Cloning is cheap. [`Grammar::bind`] returns a copy scoped to one instance.
#[derive(Debug, Clone)]
pub struct Grammar {
    spec: Arc<GrammarSpec>,
    query: Arc<Vec<Template>>,
    fields: Arc<Vec<CompiledField>>,
    collections: Arc<Vec<CompiledCollection>>,
    patterns: Arc<Vec<CompiledPattern>>,
    remove: Arc<Vec<Template>>,
    scope: Arc<Scope>,
    derived: Arc<BTreeSet<String>>,
    binding: Record,
}

fn invalid(grammar: &str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidGrammar(format!("{grammar}: {reason}"))
}

fn check_template(grammar: &str, source: &str, scope: &Scope) -> Result<Template, EngineError> {
    let template = Template::parse(source)?;
    if let Some(unknown) = template.fields().into_iter().find(|f| !scope.contains_key(*f)) {
        return Err(invalid(
            grammar,
            format!("template '{source}' references unknown field '{unknown}'"),
        ));
    }
    Ok(template)
}

fn check_derivations(
    grammar: &str,
    derivations: &[Derivation],
    scope: &Scope,
    derived: &mut BTreeSet<String>,
) -> Result<(), EngineError> {
    for derivation in derivations {
        for name in derivation.inputs().into_iter().chain(derivation.outputs()) {
            if !scope.contains_key(name) {
                return Err(invalid(grammar, format!("derivation uses unknown field '{name}'")));
            }
        }
        derived.extend(derivation.outputs().into_iter().map(str::to_string));
    }
    Ok(())
}

impl Grammar {
    /// Validates and compiles a grammar document.
    pub fn new(spec: GrammarSpec) -> Result<Grammar, EngineError> {
        let name = spec.name.clone();

        let mut scope = Scope::new();
        for field in &spec.fields {
            if scope.insert(field.name.clone(), field.clone()).is_some() {
                return Err(invalid(&name, format!("duplicate field '{}'", field.name)));
            }
        }
        for collection in &spec.collections {
            if scope.contains_key(&collection.name)
                || spec.collections.iter().filter(|c| c.name == collection.name).count() > 1
            {
                return Err(invalid(&name, format!("duplicate field '{}'", collection.name)));
            }
        }
        for identity in &spec.identity {
            if !scope.contains_key(identity) {
                return Err(invalid(&name, format!("unknown identity field '{identity}'")));
            }
        }
        if let Some(anchor) = spec.anchor.as_ref()
            && !scope.contains_key(anchor)
        {
            return Err(invalid(&name, format!("unknown anchor field '{anchor}'")));
        }

        let mut identity_scope = Scope::new();
        for identity in &spec.identity {
            if let Some(field) = scope.get(identity) {
                identity_scope.insert(identity.clone(), field.clone());
            }
        }

        let query = spec
            .query
            .iter()
            .map(|q| check_template(&name, q, &identity_scope))
            .collect::<Result<Vec<_>, _>>()?;
        if query.is_empty() {
            return Err(invalid(&name, "no query command"));
        }
        let remove = spec
            .remove
            .iter()
            .map(|r| check_template(&name, r, &scope))
            .collect::<Result<Vec<_>, _>>()?;

        let mut derived = BTreeSet::new();
        check_derivations(&name, &spec.derivations, &scope, &mut derived)?;

        let mut fields = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            let set = field
                .set
                .as_deref()
                .map(|t| check_template(&name, t, &scope))
                .transpose()?;
            let unset = field
                .unset
                .as_deref()
                .map(|t| check_template(&name, t, &scope))
                .transpose()?;
            fields.push(CompiledField {
                spec: field.clone(),
                set,
                unset,
            });
        }

        let mut collections = Vec::with_capacity(spec.collections.len());
        for collection in &spec.collections {
            let mut element_scope = scope.clone();
            for field in &collection.fields {
                element_scope.insert(field.name.clone(), field.clone());
            }
            for key in &collection.key {
                if !collection.fields.iter().any(|f| &f.name == key) {
                    return Err(invalid(
                        &name,
                        format!("collection '{}' has unknown key '{key}'", collection.name),
                    ));
                }
            }
            let mut element_derived = BTreeSet::new();
            check_derivations(
                &name,
                &collection.derivations,
                &element_scope,
                &mut element_derived,
            )?;
            collections.push(CompiledCollection {
                add: check_template(&name, &collection.add, &element_scope)?,
                remove: check_template(&name, &collection.remove, &element_scope)?,
                spec: collection.clone(),
                scope: element_scope,
            });
        }

        let mut patterns = Vec::with_capacity(spec.patterns.len());
        for pattern in &spec.patterns {
            let regex = Regex::new(&pattern.regex)
                .map_err(|e| invalid(&name, format!("bad regex '{}': {e}", pattern.regex)))?;
            let element = match pattern.element.as_ref() {
                Some(target) => Some(
                    collections
                        .iter()
                        .position(|c| c.name() == target)
                        .ok_or_else(|| invalid(&name, format!("unknown collection '{target}'")))?,
                ),
                None => None,
            };
            let known = |field: &str| match element {
                Some(idx) => collections[idx].scope.contains_key(field),
                None => scope.contains_key(field),
            };
            let names = regex
                .capture_names()
                .flatten()
                .map(str::to_string)
                .collect::<Vec<_>>();
            for capture in names.iter().chain(pattern.set.keys()) {
                if !known(capture) {
                    return Err(invalid(
                        &name,
                        format!("pattern '{}' names unknown field '{capture}'", pattern.regex),
                    ));
                }
            }
            patterns.push(CompiledPattern {
                regex,
                element,
                names,
                set: pattern
                    .set
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            });
        }

        Ok(Grammar {
            spec: Arc::new(spec),
            query: Arc::new(query),
            fields: Arc::new(fields),
            collections: Arc::new(collections),
            patterns: Arc::new(patterns),
            remove: Arc::new(remove),
            scope: Arc::new(scope),
            derived: Arc::new(derived),
            binding: Record::new(),
        })
    }

    /// Parses and compiles a JSON grammar document.
    pub fn from_json(json: &str) -> Result<Grammar, EngineError> {
        Grammar::new(GrammarSpec::from_json(json)?)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &GrammarSpec {
        &self.spec
    }

    pub fn identity(&self) -> &[String] {
        &self.spec.identity
    }

    /// Identity values this copy is scoped to.
    pub fn binding(&self) -> &Record {
        &self.binding
    }

    pub fn query_privilege(&self) -> Privilege {
        self.spec.query_privilege
    }

    pub fn mutation_privilege(&self) -> Privilege {
        self.spec.mutation_privilege
    }

    pub(crate) fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub(crate) fn collections(&self) -> &[CompiledCollection] {
        &self.collections
    }

    pub(crate) fn remove_templates(&self) -> &[Template] {
        &self.remove
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_identity(&self, field: &str) -> bool {
        self.spec.identity.iter().any(|name| name == field)
    }

    pub fn is_derived(&self, field: &str) -> bool {
        self.derived.contains(field)
    }

    /// Returns a copy scoped to the instance named by the identity fields of `identity`.
    pub fn bind(&self, identity: &Record) -> Result<Grammar, EngineError> {
        let mut binding = Record::new();
        for name in &self.spec.identity {
            let value = identity.get(name).filter(|v| !v.is_null()).ok_or_else(|| {
                EngineError::InvalidRecord(format!(
                    "{}: identity field '{}' is required",
                    self.spec.name, name
                ))
            })?;
            let spec = self.scope.get(name).ok_or_else(|| {
                EngineError::InternalError(format!("identity field '{name}' has no spec"))
            })?;
            let value = spec.coerce(value).map_err(|reason| {
                EngineError::InvalidRecord(format!("{}: {name}: {reason}", self.spec.name))
            })?;
            binding.insert(name.clone(), value);
        }
        let mut bound = self.clone();
        bound.binding = binding;
        Ok(bound)
    }

    /// Fails unless every identity field is bound.
    ///
    /// An unbound grammar with identity fields matches every instance on the
    /// device at once.
    pub fn ensure_bound(&self) -> Result<(), EngineError> {
        match self
            .spec
            .identity
            .iter()
            .find(|name| self.binding.get(name).is_none())
        {
            Some(name) => Err(EngineError::InvalidRecord(format!(
                "{}: not bound to an instance, identity field '{}' is required",
                self.spec.name, name
            ))),
            None => Ok(()),
        }
    }

    /// Query commands, rendered against the binding.
    pub fn query_commands(&self) -> Result<Vec<String>, EngineError> {
        self.query
            .iter()
            .map(|template| template.render(&self.binding, &self.scope))
            .collect()
    }

    /// The record of an absent instance: defaults, empty collections and the binding.
    pub fn empty_record(&self) -> Record {
        let mut record = self.binding.clone();
        for field in self.fields.iter() {
            if let Some(default) = field.spec.default.as_ref() {
                record.0.entry(field.spec.name.clone()).or_insert(default.clone());
            }
        }
        for collection in self.collections.iter() {
            record.insert(collection.name().to_string(), Value::List(Vec::new()));
        }
        record
    }

    fn bound_elsewhere(&self, field: &str, value: &Value) -> bool {
        self.binding
            .get(field)
            .is_some_and(|expected| expected != value)
    }

    /// Parses query output.
    ///
    /// Returns `Ok(None)` when no line belongs to the resource, and
    /// [`EngineError::MalformedOutputError`] when lines matched but the anchor
    /// field is missing.
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> Result<Option<Record>, EngineError> {
        let mut scalars: BTreeMap<String, Value> = BTreeMap::new();
        let mut elements: Vec<Vec<Record>> = vec![Vec::new(); self.collections.len()];
        let mut matched = false;

        'lines: for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            for pattern in self.patterns.iter() {
                let Some(caps) = pattern.regex.captures(line) else {
                    continue;
                };

                let mut own = Vec::new();
                let mut resource = Vec::new();
                for name in &pattern.names {
                    let Some(text) = caps.name(name) else {
                        continue;
                    };
                    let element_spec = pattern
                        .element
                        .and_then(|idx| self.collections[idx].field(name));
                    match element_spec {
                        Some(spec) => {
                            if let Some(value) = spec.capture(text.as_str()) {
                                own.push((name.clone(), value));
                            }
                        }
                        None => {
                            let Some(spec) = self.scope.get(name) else {
                                continue;
                            };
                            let Some(value) = spec.capture(text.as_str()) else {
                                continue;
                            };
                            if self.bound_elsewhere(name, &value) {
                                trace!("{}: skipping line of another instance: {}", self.spec.name, line);
                                continue 'lines;
                            }
                            resource.push((name.clone(), value));
                        }
                    }
                }

                matched = true;
                trace!("{}: matched {:?}", self.spec.name, line);
                scalars.extend(resource);
                match pattern.element {
                    Some(idx) => {
                        let collection = &self.collections[idx];
                        let mut element = Record(own.into_iter().collect());
                        for (name, value) in &pattern.set {
                            element.insert(name.clone(), value.clone());
                        }
                        for field in &collection.spec.fields {
                            if let Some(default) = field.default.as_ref() {
                                element.0.entry(field.name.clone()).or_insert(default.clone());
                            }
                        }
                        for derivation in &collection.spec.derivations {
                            derivation.apply(&mut element.0);
                        }
                        let key = collection.key_of(&element);
                        let list = &mut elements[idx];
                        match list.iter().position(|e| collection.key_of(e) == key) {
                            Some(pos) => list[pos] = element,
                            None => list.push(element),
                        }
                    }
                    None => {
                        scalars.extend(own);
                        for (name, value) in &pattern.set {
                            scalars.insert(name.clone(), value.clone());
                        }
                    }
                }
                continue 'lines;
            }
        }

        if !matched {
            return Ok(None);
        }
        if let Some(anchor) = self.spec.anchor.as_ref()
            && !scalars.contains_key(anchor)
        {
            return Err(EngineError::MalformedOutputError {
                grammar: self.spec.name.clone(),
                reason: format!("'{anchor}' line missing while other lines are present"),
            });
        }

        for (name, value) in self.binding.iter() {
            scalars.entry(name.clone()).or_insert(value.clone());
        }
        for field in self.fields.iter() {
            if let Some(default) = field.spec.default.as_ref() {
                scalars.entry(field.spec.name.clone()).or_insert(default.clone());
            }
        }
        for (collection, list) in self.collections.iter().zip(elements) {
            scalars.insert(collection.name().to_string(), Value::List(list));
        }
        for derivation in &self.spec.derivations {
            derivation.apply(&mut scalars);
        }
        Ok(Some(Record(scalars)))
    }

    /// Validates a desired record and coerces its values to the field kinds.
    pub fn normalize(&self, desired: &Record) -> Result<Record, EngineError> {
        let name = &self.spec.name;
        let mut out = Record::new();
        for (field, value) in desired.iter() {
            if let Some(collection) = self.collections.iter().find(|c| c.name() == field) {
                let items = match value {
                    Value::Null => Vec::new(),
                    Value::List(items) => items
                        .iter()
                        .map(|item| self.normalize_element(collection, item))
                        .collect::<Result<Vec<_>, _>>()?,
                    other => {
                        return Err(EngineError::InvalidRecord(format!(
                            "{name}: '{field}' must be a list, got '{other}'"
                        )));
                    }
                };
                out.insert(field.clone(), Value::List(items));
                continue;
            }
            let spec = self.scope.get(field).ok_or_else(|| {
                EngineError::InvalidRecord(format!("{name}: unknown field '{field}'"))
            })?;
            let value = spec
                .coerce(value)
                .map_err(|reason| EngineError::InvalidRecord(format!("{name}: {field}: {reason}")))?;
            out.insert(field.clone(), value);
        }
        Ok(out)
    }

    fn normalize_element(
        &self,
        collection: &CompiledCollection,
        element: &Record,
    ) -> Result<Record, EngineError> {
        let label = format!("{}.{}", self.spec.name, collection.name());
        let mut out = Record::new();
        for (field, value) in element.iter() {
            let spec = collection.field(field).ok_or_else(|| {
                EngineError::InvalidRecord(format!("{label}: unknown field '{field}'"))
            })?;
            let value = spec
                .coerce(value)
                .map_err(|reason| EngineError::InvalidRecord(format!("{label}: {field}: {reason}")))?;
            out.insert(field.clone(), value);
        }
        for key in &collection.spec.key {
            if out.get(key).is_none_or(Value::is_null) {
                return Err(EngineError::InvalidRecord(format!(
                    "{label}: key field '{key}' is required"
                )));
            }
        }
        Ok(out)
    }
}
