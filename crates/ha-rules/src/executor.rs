//! Turns declarative actions into hub calls
//!
//! Every (action, target) pair becomes one hub request. All requests of one
//! execution run concurrently as separate tasks, and the executor waits for
//! them at most `action_timeout`. Requests still running after that keep
//! running in the background; the caller is released regardless.

use futures::stream::{FuturesUnordered, StreamExt};
use ha_core::domains::{self, SCRIPT_DOMAIN};
use ha_core::{Context, DynValue, EntityId, ServiceCall};
use ha_hub::{HubResult, SharedHub};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::action::FluentAction;

/// Tally of one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Hub requests started
    pub issued: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Requests still outstanding when the wait ran out
    pub timed_out: usize,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

/// A single request sent to the hub
#[derive(Debug, Clone)]
enum HubRequest {
    Service(ServiceCall),
    SetState {
        entity_id: EntityId,
        state: DynValue,
        action: FluentAction,
        context: Context,
    },
}

impl HubRequest {
    fn for_action(action: &FluentAction, target: &EntityId, context: &Context) -> Self {
        match action.kind.service() {
            Some(service) => HubRequest::Service(ServiceCall::for_entity(
                domains::service_domain(target.domain()),
                service,
                target,
                action.attributes.clone(),
                context.clone(),
            )),
            None => HubRequest::SetState {
                entity_id: target.clone(),
                state: action.state.clone().unwrap_or_default(),
                action: action.clone(),
                context: context.clone(),
            },
        }
    }

    async fn send(self, hub: SharedHub) -> HubResult<()> {
        match self {
            HubRequest::Service(call) => hub.call_service(call).await,
            HubRequest::SetState {
                entity_id,
                state,
                action,
                context,
            } => hub
                .set_state(&entity_id, state, action.attributes, context)
                .await
                .map(|_| ()),
        }
    }

    fn describe(&self) -> String {
        match self {
            HubRequest::Service(call) => call.service_id(),
            HubRequest::SetState { entity_id, .. } => format!("set_state {entity_id}"),
        }
    }
}

/// Executes actions against the hub with a bounded total wait
#[derive(Clone)]
pub struct ActionExecutor {
    hub: SharedHub,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(hub: SharedHub, timeout: Duration) -> Self {
        Self { hub, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply each action to each target
    #[instrument(skip_all, fields(context_id = %context.id, targets = targets.len(), actions = actions.len()))]
    pub async fn execute(
        &self,
        targets: &[EntityId],
        actions: &[FluentAction],
        context: &Context,
    ) -> ExecutionReport {
        let requests = actions
            .iter()
            .flat_map(|action| {
                targets
                    .iter()
                    .map(move |target| HubRequest::for_action(action, target, context))
            })
            .collect();
        self.run(requests).await
    }

    /// Start each named script; `script.` prefixes are accepted and stripped
    #[instrument(skip_all, fields(context_id = %context.id))]
    pub async fn run_scripts(&self, scripts: &[String], context: &Context) -> ExecutionReport {
        let requests = scripts
            .iter()
            .map(|name| {
                let name = name.strip_prefix("script.").unwrap_or(name);
                HubRequest::Service(ServiceCall::new(
                    SCRIPT_DOMAIN,
                    name,
                    DynValue::Map(Default::default()),
                    context.clone(),
                ))
            })
            .collect();
        self.run(requests).await
    }

    async fn run(&self, requests: Vec<HubRequest>) -> ExecutionReport {
        let mut report = ExecutionReport {
            issued: requests.len(),
            ..Default::default()
        };
        if requests.is_empty() {
            return report;
        }

        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .map(|request| {
                let label = request.describe();
                let handle = tokio::spawn(request.send(self.hub.clone()));
                async move { (label, handle.await) }
            })
            .collect();

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    None => break,
                    Some((label, Ok(Ok(())))) => {
                        debug!(request = %label, "Hub call completed");
                        report.succeeded += 1;
                    }
                    Some((label, Ok(Err(e)))) => {
                        warn!(request = %label, error = %e, "Hub call failed");
                        report.failed += 1;
                    }
                    Some((label, Err(e))) => {
                        error!(request = %label, error = %e, "Hub call task aborted");
                        report.failed += 1;
                    }
                },
                _ = &mut deadline => {
                    report.timed_out = pending.len();
                    warn!(
                        outstanding = report.timed_out,
                        timeout = ?self.timeout,
                        "Hub calls still running after timeout, continuing"
                    );
                    break;
                }
            }
        }

        report
    }
}
