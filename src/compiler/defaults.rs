//! Container field merge policies
//!
//! Every field the compiler writes onto a container goes through one of these
//! rules. `DefaultIfAbsent` leaves user and previously-synthesized values
//! alone, which is what makes recompiling against prior output a no-op.

use crate::workload::Container;

/// Container fields the compiler assigns fixed values to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerField {
    /// `terminationMessagePath`
    TerminationMessagePath,
    /// `terminationMessagePolicy`
    TerminationMessagePolicy,
    /// `imagePullPolicy`
    ImagePullPolicy,
}

/// How a value is merged into a container field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// Write only when the field is unset or empty
    DefaultIfAbsent,
    /// Always write
    Overwrite,
}

/// Default termination message path
pub const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";

/// Default termination message policy
pub const TERMINATION_MESSAGE_POLICY: &str = "File";

/// Pull policy for pinned images
pub const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Pull policy for floating images
pub const PULL_ALWAYS: &str = "Always";

/// Defaults applied to every synthesized container
pub const CONTAINER_DEFAULTS: [(ContainerField, MergePolicy, &str); 3] = [
    (
        ContainerField::TerminationMessagePath,
        MergePolicy::DefaultIfAbsent,
        TERMINATION_MESSAGE_PATH,
    ),
    (
        ContainerField::TerminationMessagePolicy,
        MergePolicy::DefaultIfAbsent,
        TERMINATION_MESSAGE_POLICY,
    ),
    (
        ContainerField::ImagePullPolicy,
        MergePolicy::DefaultIfAbsent,
        PULL_IF_NOT_PRESENT,
    ),
];

impl ContainerField {
    fn slot<'a>(&self, container: &'a mut Container) -> &'a mut Option<String> {
        match self {
            Self::TerminationMessagePath => &mut container.termination_message_path,
            Self::TerminationMessagePolicy => &mut container.termination_message_policy,
            Self::ImagePullPolicy => &mut container.image_pull_policy,
        }
    }
}

/// Merge `value` into `field` of `container` according to `policy`
pub fn merge(container: &mut Container, field: ContainerField, policy: MergePolicy, value: &str) {
    let slot = field.slot(container);
    let absent = slot.as_deref().map_or(true, str::is_empty);
    if absent || policy == MergePolicy::Overwrite {
        *slot = Some(value.to_string());
    }
}

/// Fill termination message and pull policy fields that are still empty
pub fn apply_container_defaults(container: &mut Container) {
    for (field, policy, value) in CONTAINER_DEFAULTS {
        merge(container, field, policy, value);
    }
}
