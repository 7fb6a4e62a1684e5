use serde::Serialize;

pub const POLICY_REASON_OBSERVER_MAY_NOT_DISPATCH: &str = "observer_may_not_dispatch";
pub const POLICY_REASON_DEVELOPER_WORKERS_ONLY: &str = "developer_may_dispatch_workers_only";
pub const POLICY_REASON_SELF_SCOPED_LANE: &str = "lane_is_self_scoped";
pub const POLICY_REASON_UNKNOWN_TARGET: &str = "unknown_target_group";

/// Lane class, derived from the `group_folder` prefix. Governs image,
/// mounts, secret scope, and delegation authority.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaneClass {
    Main,
    ControllerObserver,
    ControllerDeveloper,
    Worker,
}

impl LaneClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::ControllerObserver => "controller-observer",
            Self::ControllerDeveloper => "controller-developer",
            Self::Worker => "worker",
        }
    }

    /// Classifies a group folder by prefix.
    pub fn for_group(group_folder: &str) -> Self {
        if group_folder == "main" {
            Self::Main
        } else if group_folder.starts_with("controller-observer") {
            Self::ControllerObserver
        } else if group_folder.starts_with("controller-") {
            Self::ControllerDeveloper
        } else {
            Self::Worker
        }
    }
}

/// Result of the delegation-authority matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAuthorization {
    Allow,
    Deny { reason_code: &'static str },
}

/// The authorization matrix: `main` may dispatch to any group,
/// `controller-developer` only to `worker-*` groups, `controller-observer`
/// to none, and every other lane is self-scoped.
pub fn evaluate_dispatch_authorization(
    from_lane: LaneClass,
    from_group: &str,
    target_group: &str,
    target_registered: bool,
) -> DispatchAuthorization {
    if !target_registered {
        return DispatchAuthorization::Deny {
            reason_code: POLICY_REASON_UNKNOWN_TARGET,
        };
    }
    match from_lane {
        LaneClass::Main => DispatchAuthorization::Allow,
        LaneClass::ControllerObserver => DispatchAuthorization::Deny {
            reason_code: POLICY_REASON_OBSERVER_MAY_NOT_DISPATCH,
        },
        LaneClass::ControllerDeveloper => {
            if target_group.starts_with("worker-") {
                DispatchAuthorization::Allow
            } else {
                DispatchAuthorization::Deny {
                    reason_code: POLICY_REASON_DEVELOPER_WORKERS_ONLY,
                }
            }
        }
        LaneClass::Worker => {
            if target_group == from_group {
                // Self-scoped; the validator still refuses self-targeted
                // dispatch, so this never creates a run.
                DispatchAuthorization::Allow
            } else {
                DispatchAuthorization::Deny {
                    reason_code: POLICY_REASON_SELF_SCOPED_LANE,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_lane_classification_by_prefix() {
        assert_eq!(LaneClass::for_group("main"), LaneClass::Main);
        assert_eq!(
            LaneClass::for_group("controller-observer"),
            LaneClass::ControllerObserver
        );
        assert_eq!(
            LaneClass::for_group("controller-developer"),
            LaneClass::ControllerDeveloper
        );
        assert_eq!(LaneClass::for_group("worker-alpha"), LaneClass::Worker);
        assert_eq!(LaneClass::for_group("family-chat"), LaneClass::Worker);
    }

    #[test]
    fn functional_authorization_matrix() {
        assert_eq!(
            evaluate_dispatch_authorization(LaneClass::Main, "main", "worker-alpha", true),
            DispatchAuthorization::Allow
        );
        assert_eq!(
            evaluate_dispatch_authorization(
                LaneClass::Main,
                "main",
                "controller-developer",
                true
            ),
            DispatchAuthorization::Allow
        );
        assert_eq!(
            evaluate_dispatch_authorization(
                LaneClass::ControllerDeveloper,
                "controller-developer",
                "worker-alpha",
                true
            ),
            DispatchAuthorization::Allow
        );
        assert_eq!(
            evaluate_dispatch_authorization(
                LaneClass::ControllerDeveloper,
                "controller-developer",
                "main",
                true
            ),
            DispatchAuthorization::Deny {
                reason_code: POLICY_REASON_DEVELOPER_WORKERS_ONLY
            }
        );
        assert_eq!(
            evaluate_dispatch_authorization(
                LaneClass::ControllerObserver,
                "controller-observer",
                "worker-alpha",
                true
            ),
            DispatchAuthorization::Deny {
                reason_code: POLICY_REASON_OBSERVER_MAY_NOT_DISPATCH
            }
        );
        assert_eq!(
            evaluate_dispatch_authorization(
                LaneClass::Worker,
                "worker-alpha",
                "worker-beta",
                true
            ),
            DispatchAuthorization::Deny {
                reason_code: POLICY_REASON_SELF_SCOPED_LANE
            }
        );
    }

    #[test]
    fn unit_unregistered_target_is_denied_for_every_lane() {
        assert_eq!(
            evaluate_dispatch_authorization(LaneClass::Main, "main", "worker-ghost", false),
            DispatchAuthorization::Deny {
                reason_code: POLICY_REASON_UNKNOWN_TARGET
            }
        );
    }
}
