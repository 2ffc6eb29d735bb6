// ABOUTME: Engine-agnostic handle to a container created by `run()`.
// ABOUTME: Tracks the started/deleted flags adapters flip on each call.

use super::error::EngineError;
use crate::types::ContainerId;

/// Identity and observed state of one container.
///
/// Only an adapter's `run()` creates handles. After `delete_container()` the
/// handle is dead: every further engine call with it fails with
/// [`EngineError::ContainerNotFound`] before the engine is contacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: ContainerId,
    started: bool,
    deleted: bool,
}

impl ContainerHandle {
    pub(crate) fn created(id: ContainerId) -> Self {
        Self {
            id,
            started: false,
            deleted: false,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Fail fast on a handle whose container has been deleted.
    pub(crate) fn ensure_live(&self) -> Result<&ContainerId, EngineError> {
        if self.deleted {
            return Err(EngineError::ContainerNotFound(format!(
                "{} (already deleted)",
                self.id.short()
            )));
        }
        Ok(&self.id)
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.started = false;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.started = false;
        self.deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ContainerHandle {
        ContainerHandle::created(ContainerId::new("0123456789abcdef0123"))
    }

    #[test]
    fn new_handle_is_neither_started_nor_deleted() {
        let h = handle();
        assert!(!h.is_started());
        assert!(!h.is_deleted());
        assert!(h.ensure_live().is_ok());
    }

    #[test]
    fn stop_then_start_leaves_handle_started() {
        let mut h = handle();
        h.mark_started();
        h.mark_stopped();
        assert!(!h.is_started());
        h.mark_started();
        assert!(h.is_started());
        assert!(!h.is_deleted());
    }

    #[test]
    fn delete_marks_deleted_whether_or_not_started() {
        let mut running = handle();
        running.mark_started();
        running.mark_deleted();
        assert!(running.is_deleted());

        let mut stopped = handle();
        stopped.mark_deleted();
        assert!(stopped.is_deleted());
    }

    #[test]
    fn deleted_handle_fails_with_container_not_found() {
        let mut h = handle();
        h.mark_deleted();
        let err = h.ensure_live().unwrap_err();
        assert!(
            matches!(err, EngineError::ContainerNotFound(ref msg) if msg.contains("0123456789ab")),
            "unexpected error: {err}"
        );
    }
}
