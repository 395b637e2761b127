use super::*;

/// Position of a command inside a [`CommandPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    /// Elements that disappear or get replaced.
    RemoveElements,
    /// Scalar sets and unsets, in field declaration order.
    UpdateScalars,
    /// New and replacement elements, in desired order.
    AddElements,
    /// Whole-resource removal.
    RemoveResource,
}

/// One planned command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedCommand {
    pub phase: PlanPhase,
    /// Field or collection the command changes.
    pub field: String,
    pub command: String,
}

/// Ordered commands that move a device from its current to its desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandPlan {
    /// Resource (grammar) name.
    pub resource: String,
    pub steps: Vec<PlannedCommand>,
}

impl CommandPlan {
    fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Command texts in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.command.clone()).collect()
    }

    /// Appends a command unless the exact text is already planned.
    fn push(&mut self, phase: PlanPhase, field: &str, command: String) {
        if command.is_empty() || self.steps.iter().any(|step| step.command == command) {
            return;
        }
        self.steps.push(PlannedCommand {
            phase,
            field: field.to_string(),
            command,
        });
    }
}

/// Values visible to templates: current, overridden by desired, then the binding.
fn render_context(grammar: &Grammar, current: &Record, desired: Option<&Record>) -> Record {
    let mut context = current.clone();
    if let Some(desired) = desired {
        for (name, value) in desired.iter() {
            if !value.is_null() && !matches!(value, Value::List(_)) {
                context.insert(name.clone(), value.clone());
            }
        }
    }
    for (name, value) in grammar.binding().iter() {
        context.insert(name.clone(), value.clone());
    }
    context
}

fn element_context(context: &Record, element: &Record) -> Record {
    let mut values = context.clone();
    for (name, value) in element.iter() {
        if !value.is_null() {
            values.insert(name.clone(), value.clone());
        }
    }
    values
}

/// Whether the current element disagrees with a field the desired element sets.
fn element_differs(collection: &CompiledCollection, current: &Record, desired: &Record) -> bool {
    desired.iter().any(|(name, wanted)| {
        let default = collection.field(name).and_then(|f| f.default.as_ref());
        let observed = current.get(name).filter(|v| !v.is_null()).or(default);
        if wanted.is_null() {
            observed.is_some() && observed != default
        } else {
            observed != Some(wanted)
        }
    })
}

/// Computes the commands turning `current` into `desired`.
///
/// Keys missing from `desired` are left alone. Identity and derived fields are
/// never diffed.
pub fn diff(grammar: &Grammar, current: &Record, desired: &Record) -> Result<CommandPlan, EngineError> {
    let mut plan = CommandPlan::new(grammar.name());
    let context = render_context(grammar, current, Some(desired));
    let mut replaced: Vec<(usize, Vec<Value>)> = Vec::new();

    for (idx, collection) in grammar.collections().iter().enumerate() {
        let Some(wanted) = desired.get(collection.name()) else {
            continue;
        };
        let wanted = wanted.as_list().unwrap_or(&[]);
        for element in current.list(collection.name()) {
            let key = collection.key_of(element);
            let keep = wanted
                .iter()
                .find(|w| collection.key_of(w) == key)
                .map(|w| !element_differs(collection, element, w));
            match keep {
                Some(true) => continue,
                Some(false) => replaced.push((idx, key)),
                None => {}
            }
            let command = collection
                .remove
                .render(&element_context(&context, element), &collection.scope)?;
            plan.push(PlanPhase::RemoveElements, collection.name(), command);
        }
    }

    for field in grammar.fields() {
        let name = field.spec.name.as_str();
        if grammar.is_identity(name) || grammar.is_derived(name) {
            continue;
        }
        let Some(wanted) = desired.get(name) else {
            continue;
        };
        let default = field.spec.default.as_ref();
        let observed = current.get(name).filter(|v| !v.is_null());

        if wanted.is_null() {
            if observed.is_none() || observed == default {
                continue;
            }
            let command = match (field.unset.as_ref(), field.set.as_ref(), default) {
                (Some(unset), _, _) => unset.render(&context, grammar.scope())?,
                (None, Some(set), Some(default)) => {
                    let mut values = context.clone();
                    values.insert(name, default.clone());
                    set.render(&values, grammar.scope())?
                }
                _ => {
                    return Err(EngineError::InvalidRecord(format!(
                        "{}: field '{name}' cannot be unset",
                        grammar.name()
                    )));
                }
            };
            plan.push(PlanPhase::UpdateScalars, name, command);
            continue;
        }

        if observed == Some(wanted) || (observed.is_none() && default == Some(wanted)) {
            continue;
        }
        let set = field.set.as_ref().ok_or_else(|| {
            EngineError::InvalidRecord(format!(
                "{}: field '{name}' cannot be changed",
                grammar.name()
            ))
        })?;
        plan.push(
            PlanPhase::UpdateScalars,
            name,
            set.render(&context, grammar.scope())?,
        );
    }

    for (idx, collection) in grammar.collections().iter().enumerate() {
        let Some(wanted) = desired.get(collection.name()) else {
            continue;
        };
        let existing = current.list(collection.name());
        for element in wanted.as_list().unwrap_or(&[]) {
            let key = collection.key_of(element);
            let present = existing.iter().any(|e| collection.key_of(e) == key);
            let was_replaced = replaced.iter().any(|(i, k)| *i == idx && *k == key);
            if present && !was_replaced {
                continue;
            }
            let command = collection
                .add
                .render(&element_context(&context, element), &collection.scope)?;
            plan.push(PlanPhase::AddElements, collection.name(), command);
        }
    }

    Ok(plan)
}

/// Commands that remove an existing instance.
///
/// Uses the grammar's `remove` templates, or removes every element and then
/// unsets every non-default scalar.
pub fn removal(grammar: &Grammar, current: &Record) -> Result<CommandPlan, EngineError> {
    let mut plan = CommandPlan::new(grammar.name());
    let context = render_context(grammar, current, None);

    if !grammar.remove_templates().is_empty() {
        for template in grammar.remove_templates() {
            plan.push(
                PlanPhase::RemoveResource,
                grammar.name(),
                template.render(&context, grammar.scope())?,
            );
        }
        return Ok(plan);
    }

    for collection in grammar.collections() {
        for element in current.list(collection.name()) {
            let command = collection
                .remove
                .render(&element_context(&context, element), &collection.scope)?;
            plan.push(PlanPhase::RemoveElements, collection.name(), command);
        }
    }
    for field in grammar.fields() {
        let name = field.spec.name.as_str();
        if grammar.is_identity(name) || grammar.is_derived(name) {
            continue;
        }
        let Some(unset) = field.unset.as_ref() else {
            continue;
        };
        let observed = current.get(name).filter(|v| !v.is_null());
        if observed.is_some() && observed != field.spec.default.as_ref() {
            plan.push(
                PlanPhase::UpdateScalars,
                name,
                unset.render(&context, grammar.scope())?,
            );
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::catalog;

    fn syslog() -> Grammar {
        catalog::grammar("syslog").expect("syslog grammar")
    }

    fn hosts(addresses: &[&str]) -> Value {
        Value::List(
            addresses
                .iter()
                .map(|a| Record::new().with("address", *a).with("port", 514))
                .collect(),
        )
    }

    #[test]
    fn convergent_hosts_remove_before_add() {
        let grammar = syslog();
        let current = grammar
            .empty_record()
            .with("hosts", hosts(&["10.0.0.1", "10.0.0.3"]));
        let desired = Record::new().with(
            "hosts",
            vec![
                Record::new().with("address", "10.0.0.1"),
                Record::new().with("address", "10.0.0.2"),
            ],
        );

        let plan = diff(&grammar, &current, &desired).expect("diff");
        assert_eq!(
            plan.commands(),
            vec!["no syslog host 10.0.0.3", "syslog host 10.0.0.2"]
        );
        assert_eq!(plan.steps[0].phase, PlanPhase::RemoveElements);
        assert_eq!(plan.steps[1].phase, PlanPhase::AddElements);
    }

    #[test]
    fn changed_element_is_replaced() {
        let grammar = syslog();
        let current = grammar.empty_record().with("hosts", hosts(&["10.0.0.1"]));
        let desired = Record::new().with(
            "hosts",
            vec![Record::new().with("address", "10.0.0.1").with("port", 1514)],
        );

        let plan = diff(&grammar, &current, &desired).expect("diff");
        assert_eq!(
            plan.commands(),
            vec!["no syslog host 10.0.0.1", "syslog host 10.0.0.1 1514"]
        );
    }

    #[test]
    fn null_unsets_only_observed_non_default_values() {
        let grammar = syslog();
        let current = grammar
            .empty_record()
            .with("local_address", "192.168.0.1")
            .with("facility", "user");
        let desired = Record::new()
            .with("local_address", Value::Null)
            .with("facility", Value::Null)
            .with("notice", true);

        let plan = diff(&grammar, &current, &desired).expect("diff");
        assert_eq!(
            plan.commands(),
            vec!["no syslog local address", "syslog notice on"]
        );
    }

    #[test]
    fn matching_state_plans_nothing() {
        let grammar = syslog();
        let current = grammar
            .empty_record()
            .with("facility", "local0")
            .with("hosts", hosts(&["10.0.0.1"]));
        let desired = Record::new()
            .with("facility", "local0")
            .with("debug", false)
            .with("hosts", vec![Record::new().with("address", "10.0.0.1")]);

        assert!(diff(&grammar, &current, &desired).expect("diff").is_empty());
    }

    #[test]
    fn shared_set_templates_are_deduplicated() {
        let grammar = catalog::grammar("static_route")
            .expect("grammar")
            .bind(&Record::new().with("destination", "default"))
            .expect("bind");
        let desired = Record::new()
            .with("destination", "default")
            .with("gateway", "192.168.0.1")
            .with("weight", 3);

        let plan = diff(&grammar, &grammar.empty_record(), &desired).expect("diff");
        assert_eq!(
            plan.commands(),
            vec!["ip route default gateway 192.168.0.1 weight 3"]
        );
    }

    #[test]
    fn removal_prefers_resource_templates() {
        let grammar = catalog::grammar("nat_masquerade")
            .expect("grammar")
            .bind(&Record::new().with("descriptor_id", 1000))
            .expect("bind");
        let current = grammar.empty_record().with("type", "masquerade");
        let plan = removal(&grammar, &current).expect("removal");
        assert_eq!(plan.commands(), vec!["no nat descriptor type 1000"]);
        assert_eq!(plan.steps[0].phase, PlanPhase::RemoveResource);

        let syslog = syslog();
        let current = syslog
            .empty_record()
            .with("notice", true)
            .with("local_address", "10.0.0.9")
            .with("hosts", hosts(&["10.0.0.1"]));
        assert_eq!(
            removal(&syslog, &current).expect("removal").commands(),
            vec![
                "no syslog host 10.0.0.1",
                "no syslog local address",
                "no syslog notice"
            ]
        );
    }
}
