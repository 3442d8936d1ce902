//! Builds per-task XML from the hydrated tree and hands each task to the
//! invoker.

use sxd_document::dom::Element;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::constants;
use crate::error::HydrationError;
use crate::error::OrchestrationError;
use crate::event::TaskDescriptor;
use crate::hydration::HydrationEngine;
use crate::invoker::TaskInvoker;
use crate::store::Store;
use crate::xml::attribute_value;
use crate::xml::copy_subtree;
use crate::xml::element_children;
use crate::xml::find_child;
use crate::xml::local_name;
use crate::xml::to_pretty_xml;

/// `project` children that never travel with a task payload.
const PRUNED_PROJECT_CHILDREN: [&str; 5] = ["market", "model", "calculator", "portfolio", "group"];

pub struct TaskDispatcher<'a> {
    store: &'a dyn Store,
    invoker: &'a dyn TaskInvoker,
}

impl<'a> TaskDispatcher<'a> {
    pub fn new(store: &'a dyn Store, invoker: &'a dyn TaskInvoker) -> Self {
        Self { store, invoker }
    }

    /// Hydrate the group one more pass, fan its valuations out as tasks, and
    /// return one descriptor per dispatched task. A single valuation may
    /// multiply into several tasks.
    pub async fn dispatch_group<'d>(
        &self,
        engine: &HydrationEngine<'d>,
        root: Element<'d>,
        group: Element<'d>,
        request_id: &str,
        group_index: usize,
    ) -> Result<Vec<TaskDescriptor>, OrchestrationError> {
        let document = engine.document();

        let hydrated_group = engine
            .hydrate(group, root, None)
            .await?
            .into_iter()
            .next()
            .ok_or(HydrationError::EmptyResult {
                expression: format!("group {group_index}"),
            })?
            .element;

        // Each valuation is hydrated individually; vn:link may turn one into
        // many.
        let mut valuations: Vec<Element<'d>> = Vec::new();
        for valuation in element_children(hydrated_group) {
            if local_name(valuation) != "valuation" {
                continue;
            }
            let items = engine.hydrate(valuation, root, None).await?;
            valuations.extend(items.into_iter().map(|item| item.element));
        }

        let expected = valuations.len();
        let group_name = attribute_value(hydrated_group, "name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("group-{group_index}"));
        info!(
            request_id = %request_id,
            group = group_index,
            group_name = %group_name,
            expected,
            "dispatching group"
        );

        self.store
            .hset(
                &constants::group_state_key(request_id, group_index),
                &[
                    ("expected".into(), expected.to_string()),
                    ("completed".into(), "0".into()),
                    ("failed".into(), "0".into()),
                    ("status".into(), "running".into()),
                ],
            )
            .await?;

        // Task template: the root without any project market/model/calculator/
        // portfolio/group children, then the current group re-attached empty.
        let template = copy_subtree(document.dom(), root);
        let template_project = find_child(template, "project").ok_or_else(|| {
            OrchestrationError::validation("request has no project element to dispatch from")
        })?;
        for child in element_children(template_project) {
            if PRUNED_PROJECT_CHILDREN.contains(&local_name(child)) {
                child.remove_from_parent();
            }
        }
        let group_shell = copy_subtree(document.dom(), hydrated_group);
        for child in element_children(group_shell) {
            if local_name(child) == "valuation" {
                child.remove_from_parent();
            }
        }
        template_project.append_child(group_shell);

        let mut descriptors = Vec::with_capacity(expected);
        for (index, valuation) in valuations.into_iter().enumerate() {
            let task_id = (index + 1).to_string();
            let task_root = copy_subtree(document.dom(), template);
            let task_group = find_child(task_root, "project")
                .and_then(|project| find_child(project, "group"))
                .ok_or_else(|| {
                    OrchestrationError::validation("task template lost its project/group shell")
                })?;
            task_group.append_child(copy_subtree(document.dom(), valuation));

            let xml_key = constants::task_payload_key(request_id, group_index, &task_id);
            let result_key = constants::task_result_key(request_id, group_index, &task_id);
            self.store.set(&xml_key, &to_pretty_xml(task_root)).await?;

            let descriptor = TaskDescriptor {
                request_id: request_id.to_string(),
                group_index,
                group_name: group_name.clone(),
                task_id: task_id.clone(),
                xml_key,
                result_key,
            };
            let dispatch = descriptor.dispatch(1);
            if let Err(err) = self.invoker.invoke(&dispatch).await {
                error!(
                    request_id = %request_id,
                    group = group_index,
                    task_id = %task_id,
                    error = %err,
                    "failed to invoke task processor"
                );
                return Err(err.into());
            }
            debug!(request_id = %request_id, group = group_index, task_id = %task_id, "task dispatched");
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}
