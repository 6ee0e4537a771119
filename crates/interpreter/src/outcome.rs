use streamui_core::RenderStats;

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Added,
    /// The existing element was kept and its data replaced in place.
    Updated,
    /// The new value resolved to a different component, so a fresh element
    /// took the old one's position.
    Replaced,
    Removed,
    TargetNotFound(String),
    PathNotFound(String),
    Invalid(String),
}

impl PatchOutcome {
    pub fn applied(&self) -> bool {
        matches!(
            self,
            PatchOutcome::Added | PatchOutcome::Updated | PatchOutcome::Replaced | PatchOutcome::Removed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeOutcome {
    Rendered(RenderStats),
    Patched(PatchOutcome),
    /// Not a render or patch envelope; the caller forwards it as an event.
    Unhandled,
}
