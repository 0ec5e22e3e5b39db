//! Node Types
//!
//! Power, maintenance and fault state for a managed bare-metal node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Power state as recorded in the datastore or reported by a BMC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Error,
    Unknown,
}

impl PowerState {
    /// Only `on` and `off` are meaningful to the external scheduler.
    pub fn is_notifiable(self) -> bool {
        matches!(self, PowerState::On | PowerState::Off)
    }

    /// Whether this state expresses an intent the hardware can be forced to.
    pub fn is_actionable(self) -> bool {
        self.is_notifiable()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::On => "power on",
            PowerState::Off => "power off",
            PowerState::Error => "error",
            PowerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Explicit power command issued through the operator surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    On,
    Off,
    Reboot,
}

impl PowerAction {
    /// State the node is expected to settle in once the action completes
    pub fn target_state(self) -> PowerState {
        match self {
            PowerAction::On | PowerAction::Reboot => PowerState::On,
            PowerAction::Off => PowerState::Off,
        }
    }
}

/// Automated fault recorded against a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    #[default]
    None,
    /// BMC could not be reached for too many consecutive sync cycles
    PowerFailure,
}

/// Why a node was put into maintenance.
///
/// The tag is what distinguishes automatic from manual maintenance; the
/// detail is free text for humans and never inspected by the conductor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MaintenanceReason {
    OperatorSet(Option<String>),
    PowerFault(Option<String>),
    Other(Option<String>),
}

impl MaintenanceReason {
    pub fn detail(&self) -> Option<&str> {
        match self {
            MaintenanceReason::OperatorSet(d)
            | MaintenanceReason::PowerFault(d)
            | MaintenanceReason::Other(d) => d.as_deref(),
        }
    }

    /// Set by the conductor itself rather than by a person
    pub fn is_automatic(&self) -> bool {
        matches!(self, MaintenanceReason::PowerFault(_))
    }
}

impl fmt::Display for MaintenanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            MaintenanceReason::OperatorSet(_) => "operator",
            MaintenanceReason::PowerFault(_) => "power fault",
            MaintenanceReason::Other(_) => "other",
        };
        match self.detail() {
            Some(detail) => write!(f, "{}: {}", kind, detail),
            None => f.write_str(kind),
        }
    }
}

/// A physical machine under management
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier
    pub id: String,
    /// Last power state written by a conductor
    pub recorded_power_state: PowerState,
    /// Pending intent while a power action is in flight
    #[serde(default)]
    pub target_power_state: Option<PowerState>,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub maintenance_reason: Option<MaintenanceReason>,
    #[serde(default)]
    pub fault: Fault,
    /// Scopes which conductors may own this node
    #[serde(default)]
    pub conductor_group: String,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, conductor_group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            recorded_power_state: PowerState::Unknown,
            target_power_state: None,
            maintenance: false,
            maintenance_reason: None,
            fault: Fault::None,
            conductor_group: conductor_group.into(),
            last_error: None,
        }
    }

    pub fn with_power_state(mut self, state: PowerState) -> Self {
        self.recorded_power_state = state;
        self
    }

    pub fn is_power_faulted(&self) -> bool {
        self.fault == Fault::PowerFailure
    }

    /// Move the node into maintenance because its BMC stopped answering.
    pub fn enter_power_fault(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        self.maintenance = true;
        self.fault = Fault::PowerFailure;
        self.maintenance_reason = Some(MaintenanceReason::PowerFault(Some(detail.clone())));
        self.last_error = Some(detail);
    }

    /// Clear a power fault. Maintenance is lifted only if the fault was the
    /// sole reason for it; returns whether maintenance was cleared.
    pub fn clear_power_fault(&mut self) -> bool {
        self.fault = Fault::None;
        let automatic = self
            .maintenance_reason
            .as_ref()
            .map(MaintenanceReason::is_automatic)
            .unwrap_or(false);
        if automatic {
            self.maintenance = false;
            self.maintenance_reason = None;
            self.last_error = None;
        }
        automatic
    }

    pub fn set_manual_maintenance(&mut self, detail: Option<String>) {
        self.maintenance = true;
        self.maintenance_reason = Some(MaintenanceReason::OperatorSet(detail));
    }

    pub fn clear_maintenance(&mut self) {
        self.maintenance = false;
        self.maintenance_reason = None;
        self.fault = Fault::None;
    }

    /// `fault = power failure` implies `maintenance = true`
    pub fn invariants_hold(&self) -> bool {
        !self.is_power_faulted() || self.maintenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_fault_sets_maintenance() {
        let mut node = Node::new("n1", "");
        node.enter_power_fault("BMC unreachable: 10.0.0.1");
        assert!(node.maintenance);
        assert!(node.is_power_faulted());
        assert!(node.invariants_hold());
        assert_eq!(
            node.maintenance_reason.as_ref().and_then(|r| r.detail()),
            Some("BMC unreachable: 10.0.0.1")
        );
    }

    #[test]
    fn clearing_fault_keeps_operator_maintenance() {
        let mut node = Node::new("n1", "");
        node.enter_power_fault("timeout");
        node.set_manual_maintenance(Some("replacing DIMM".into()));
        assert!(!node.clear_power_fault());
        assert!(node.maintenance);
        assert_eq!(node.fault, Fault::None);
        assert!(matches!(node.maintenance_reason, Some(MaintenanceReason::OperatorSet(_))));
    }

    #[test]
    fn clearing_fault_lifts_automatic_maintenance() {
        let mut node = Node::new("n1", "");
        node.enter_power_fault("timeout");
        assert!(node.clear_power_fault());
        assert!(!node.maintenance);
        assert!(node.maintenance_reason.is_none());
        assert!(node.last_error.is_none());
    }

    #[test]
    fn maintenance_reason_serializes_tagged() {
        let reason = MaintenanceReason::PowerFault(Some("timeout".into()));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "power_fault");
        assert_eq!(json["detail"], "timeout");
    }

    #[test]
    fn only_on_and_off_are_notifiable() {
        assert!(PowerState::On.is_notifiable());
        assert!(PowerState::Off.is_notifiable());
        assert!(!PowerState::Error.is_notifiable());
        assert!(!PowerState::Unknown.is_notifiable());
    }
}
