//! Event fan-out shared by the client relay and the backend bridge.
//!
//! Targets are resolved to a snapshot of connection handles, the message is
//! serialized once, and each handle gets its own non-blocking queue push.
//! A slow client only backs up its own writer task.

use std::collections::BTreeSet;

use super::messages::ServerMessage;
use super::{ConnectionHandle, ConnectionRegistry};
use crate::auth::Role;
use crate::events::alert::SECURITY_ALERTS_CHANNEL;
use crate::events::SecurityAlert;

/// Logical addressee of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Users(BTreeSet<i64>),
    Role(Role),
    Roles(BTreeSet<Role>),
}

/// Outcome of one fan-out, for logging only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Resolve a target to the live connections it addresses.
pub fn resolve(registry: &ConnectionRegistry, target: &TargetSpec) -> Vec<ConnectionHandle> {
    match target {
        TargetSpec::Users(user_ids) => registry.find_by_user_ids(user_ids),
        TargetSpec::Role(role) => registry.find_by_role(role),
        TargetSpec::Roles(roles) => registry.find_by_roles(roles),
    }
}

/// Deliver `message` to every connection matching `target`.
pub fn dispatch(
    registry: &ConnectionRegistry,
    target: &TargetSpec,
    message: &ServerMessage,
) -> DispatchReport {
    let handles = resolve(registry, target);
    let report = deliver(registry, &handles, message);
    tracing::debug!(
        target_spec = ?target,
        matched = report.matched,
        delivered = report.delivered,
        failed = report.failed,
        "Dispatched {}",
        message.kind()
    );
    report
}

/// Send a security alert to admins. Critical alert types reach every admin;
/// the rest only reach admins subscribed to the security alerts channel.
pub fn broadcast_security_alert(
    registry: &ConnectionRegistry,
    alert: &SecurityAlert,
) -> DispatchReport {
    let handles = if alert.is_critical() {
        registry.find_by_role(&Role::Admin)
    } else {
        registry.find_by_role_subscribed(&Role::Admin, SECURITY_ALERTS_CHANNEL)
    };

    let message = ServerMessage::SecurityAlert {
        data: alert.clone(),
    };
    let report = deliver(registry, &handles, &message);
    tracing::info!(
        alert_type = %alert.kind,
        critical = alert.is_critical(),
        delivered = report.delivered,
        "Security alert broadcast"
    );
    report
}

/// Push a serialized message to each handle independently. Handles whose
/// queue is closed are dropped from the registry; the rest still receive.
pub fn deliver(
    registry: &ConnectionRegistry,
    handles: &[ConnectionHandle],
    message: &ServerMessage,
) -> DispatchReport {
    let mut report = DispatchReport {
        matched: handles.len(),
        ..DispatchReport::default()
    };
    if handles.is_empty() {
        return report;
    }

    let frame = match message.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize {}", message.kind());
            report.failed = handles.len();
            return report;
        }
    };

    for handle in handles {
        match handle.send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping connection after failed delivery");
                registry.remove(handle.id);
                report.failed += 1;
            }
        }
    }
    report
}
