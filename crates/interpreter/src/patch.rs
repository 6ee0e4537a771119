use crate::interpreter::{reconcile_key, Interpreter};
use crate::outcome::{EnvelopeOutcome, PatchOutcome};
use serde_json::Value;
use std::sync::Arc;
use streamui_core::{node_list, Container, Element, Envelope, EnvelopeRoute, Patch, PatchOp};

impl Interpreter {
    /// Applies one add/update/remove scoped to `container`'s subtree.
    /// Addressing failures are logged and reported, never raised.
    pub async fn apply_patch(&self, container: &Container, patch: &Patch) -> PatchOutcome {
        let _pass = container.begin_pass().await;
        match patch.op {
            PatchOp::Add => self.patch_add(container, patch).await,
            PatchOp::Update => self.patch_update(container, patch).await,
            PatchOp::Remove => self.patch_remove(container, patch).await,
        }
    }

    /// Routes a render or patch envelope; anything else is left to the caller.
    pub async fn handle_envelope(&self, container: &Container, envelope: &Envelope) -> EnvelopeOutcome {
        match envelope.route() {
            EnvelopeRoute::Render => {
                EnvelopeOutcome::Rendered(self.render(container, node_list(&envelope.payload)).await)
            }
            EnvelopeRoute::Patch => match Patch::from_value(&envelope.payload) {
                Ok(patch) => EnvelopeOutcome::Patched(self.apply_patch(container, &patch).await),
                Err(e) => {
                    tracing::warn!("Dropping patch envelope: {}", e);
                    EnvelopeOutcome::Patched(PatchOutcome::Invalid(e.to_string()))
                }
            },
            EnvelopeRoute::Event => EnvelopeOutcome::Unhandled,
        }
    }

    async fn patch_add(&self, container: &Container, patch: &Patch) -> PatchOutcome {
        let segments = patch.path_segments();
        let Some(target) = container.resolve_path(&segments) else {
            let path = patch.path.clone().unwrap_or_default();
            tracing::warn!("Add patch path '{}' not found", path);
            return PatchOutcome::PathNotFound(path);
        };
        let _nested = if target.same_as(container) {
            None
        } else {
            Some(target.begin_pass().await)
        };

        if let Some(id) = patch.value.get("id").and_then(Value::as_str) {
            if let Some((parent, existing)) = target.find(id) {
                tracing::warn!("Add patch for existing id '{}'; updating in place", id);
                let _owner = if parent.same_as(&target) || parent.same_as(container) {
                    None
                } else {
                    Some(parent.begin_pass().await)
                };
                return self.update_or_replace(&parent, &existing, &patch.value).await;
            }
        }

        self.registry()
            .ensure_defined(std::slice::from_ref(&patch.value))
            .await;
        let index = target.len();
        let (el, ok) = self
            .construct_raw(&patch.value, reconcile_key(&patch.value, index))
            .await;
        if !ok {
            tracing::debug!("Added node degraded to error leaf");
        }
        target.append(el.clone());
        self.enter(&el).await;
        PatchOutcome::Added
    }

    async fn patch_update(&self, container: &Container, patch: &Patch) -> PatchOutcome {
        let Some(target_id) = patch.target_id.as_deref() else {
            tracing::warn!("Update patch without targetId");
            return PatchOutcome::Invalid("update requires targetId".to_string());
        };
        let Some((parent, el)) = container.find(target_id) else {
            tracing::warn!("Update target '{}' not found", target_id);
            return PatchOutcome::TargetNotFound(target_id.to_string());
        };
        let _nested = if parent.same_as(container) {
            None
        } else {
            Some(parent.begin_pass().await)
        };
        self.update_or_replace(&parent, &el, &patch.value).await
    }

    async fn patch_remove(&self, container: &Container, patch: &Patch) -> PatchOutcome {
        let Some(target_id) = patch.target_id.as_deref() else {
            tracing::warn!("Remove patch without targetId");
            return PatchOutcome::Invalid("remove requires targetId".to_string());
        };
        let Some((parent, el)) = container.find(target_id) else {
            tracing::warn!("Remove target '{}' not found", target_id);
            return PatchOutcome::TargetNotFound(target_id.to_string());
        };
        let _nested = if parent.same_as(container) {
            None
        } else {
            Some(parent.begin_pass().await)
        };
        self.retire(&parent, &el).await;
        PatchOutcome::Removed
    }

    async fn update_or_replace(
        &self,
        parent: &Container,
        el: &Arc<Element>,
        raw: &Value,
    ) -> PatchOutcome {
        self.registry().ensure_defined(std::slice::from_ref(raw)).await;
        if self.resolved_tag(raw) == el.tag() {
            self.update_raw(el, raw).await;
            return PatchOutcome::Updated;
        }

        let (replacement, _) = self.construct_raw(raw, el.reconcile_key()).await;
        parent.place_after(&replacement, Some(el));
        self.enter(&replacement).await;
        self.retire(parent, el).await;
        PatchOutcome::Replaced
    }
}
