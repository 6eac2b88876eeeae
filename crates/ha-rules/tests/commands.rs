//! Immediate commands, the action executor and scheduled rules

mod common;

use common::{settle, TestHub};
use ha_core::Attributes;
use ha_rules::prelude::*;
use ha_rules::ExecutionReport;
use serde_json::json;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_turn_on_calls_domain_service_with_entity_id() {
    let hub = TestHub::new();
    hub.set("light.kitchen", "off");
    let engine = hub.engine().await;

    let report = engine
        .entity("light.kitchen")
        .unwrap()
        .turn_on()
        .execute()
        .await
        .unwrap();
    assert_eq!(
        report,
        ExecutionReport {
            issued: 1,
            succeeded: 1,
            failed: 0,
            timed_out: 0
        }
    );

    let calls = hub.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].domain, "light");
    assert_eq!(calls[0].service, "turn_on");
    assert_eq!(calls[0].entity_id(), Some("light.kitchen"));
    hub.assert_state("light.kitchen", "on");
}

#[tokio::test(start_paused = true)]
async fn test_chained_actions_with_attributes() {
    let hub = TestHub::new();
    hub.set("light.a", "off");
    hub.set("light.b", "off");
    let engine = hub.engine().await;

    engine
        .entities(["light.a", "light.b"])
        .unwrap()
        .turn_on()
        .with_attribute("brightness", 50)
        .with_attribute("color_name", "red")
        .toggle()
        .execute()
        .await
        .unwrap();

    let turn_on = hub.calls_to("light", "turn_on");
    assert_eq!(turn_on.len(), 2);
    assert!(turn_on.iter().all(|c| c.data["brightness"].as_i64() == Some(50)));
    assert!(turn_on.iter().all(|c| c.data["color_name"] == "red"));

    let toggle = hub.calls_to("light", "toggle");
    assert_eq!(toggle.len(), 2);
    assert!(toggle.iter().all(|c| c.data["brightness"].is_null()));
}

#[tokio::test(start_paused = true)]
async fn test_group_commands_use_homeassistant_domain() {
    let hub = TestHub::new();
    hub.set("group.downstairs", "off");
    let engine = hub.engine().await;

    engine
        .entity("group.downstairs")
        .unwrap()
        .turn_on()
        .execute()
        .await
        .unwrap();

    let calls = hub.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].domain, "homeassistant");
    assert_eq!(calls[0].entity_id(), Some("group.downstairs"));
    hub.assert_state("group.downstairs", "on");
}

#[tokio::test(start_paused = true)]
async fn test_media_transport_verbs() {
    let hub = TestHub::new();
    hub.set("media_player.living_room", "idle");
    let engine = hub.engine().await;
    let player = || engine.entity("media_player.living_room").unwrap();

    player().play().execute().await.unwrap();
    hub.assert_state("media_player.living_room", "playing");
    player().pause().execute().await.unwrap();
    hub.assert_state("media_player.living_room", "paused");
    player().play_pause().execute().await.unwrap();
    hub.assert_state("media_player.living_room", "playing");
    player().stop().execute().await.unwrap();
    hub.assert_state("media_player.living_room", "idle");

    let services: Vec<String> = hub.calls().into_iter().map(|c| c.service).collect();
    assert_eq!(
        services,
        ["media_play", "media_pause", "media_play_pause", "media_stop"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_set_state_action_writes_state_and_attributes() {
    let hub = TestHub::new();
    hub.set("input_text.status", "idle");
    let engine = hub.engine().await;

    engine
        .entity("input_text.status")
        .unwrap()
        .set_state("away")
        .with_attribute("since", "08:00")
        .execute()
        .await
        .unwrap();

    hub.assert_state("input_text.status", "away");
    let state = hub.hub.states().get("input_text.status").unwrap();
    assert_eq!(state.attribute("since"), "08:00");
    assert!(hub.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_selector_command_is_a_snapshot() {
    let hub = TestHub::new();
    hub.set("light.a", "off");
    hub.set("light.b", "on");
    let (engine, _run) = hub.running_engine().await;

    let mut command = engine
        .entities_where(|s| s.domain() == "light")
        .turn_off();
    hub.set("light.c", "on");
    settle().await;

    let targets: Vec<&str> = command.targets().iter().map(|id| id.as_str()).collect();
    assert_eq!(targets, ["light.a", "light.b"]);

    command.execute_and_clear().await.unwrap();
    hub.assert_state("light.c", "on");
    assert_eq!(hub.calls_to("light", "turn_off").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retained_actions_replay_and_cleared_actions_do_not() {
    let hub = TestHub::new();
    hub.set("switch.fan", "off");
    let engine = hub.engine().await;

    let mut command = engine.entity("switch.fan").unwrap().toggle();
    command.execute_retained().await.unwrap();
    command.execute_retained().await.unwrap();
    assert_eq!(hub.calls_to("switch", "toggle").len(), 2);
    hub.assert_state("switch.fan", "off");

    let report = command.execute_and_clear().await.unwrap();
    assert_eq!(report.issued, 1);
    let report = command.execute_and_clear().await.unwrap();
    assert_eq!(report.issued, 0);
    assert_eq!(hub.calls_to("switch", "toggle").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_hub_call_is_abandoned_after_timeout() {
    let hub = TestHub::new();
    hub.set("light.slow", "off");
    hub.set("light.fast", "off");
    hub.slow_service("light", "turn_off", Duration::from_secs(60));
    let engine = hub.engine().await;

    let started = Instant::now();
    let report = engine
        .entities(["light.slow", "light.fast"])
        .unwrap()
        .turn_on()
        .turn_off()
        .execute()
        .await
        .unwrap();

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    assert_eq!(report.issued, 4);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.timed_out, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_call_is_reported_not_raised() {
    let hub = TestHub::new();
    let engine = hub.engine().await;

    // Nobody provides cover services
    let report = engine
        .entity("cover.garage")
        .unwrap()
        .turn_on()
        .execute()
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert!(!report.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_direct_service_event_and_state_calls() {
    let hub = TestHub::new();
    hub.set("light.kitchen", "off");
    let notify = hub.script("notify");
    let engine = hub.engine().await;

    engine
        .call_service("light", "turn_on", json!({"entity_id": "light.kitchen"}))
        .await
        .unwrap();
    hub.assert_state("light.kitchen", "on");

    engine.run_script("script.notify").await.unwrap();
    assert_eq!(notify.load(std::sync::atomic::Ordering::SeqCst), 1);

    let state = engine
        .set_state("sensor.rules_heartbeat", 1, Attributes::new())
        .await
        .unwrap();
    assert_eq!(state.state.as_i64(), Some(1));

    let missing = engine.call_service("light", "flash", json!({})).await;
    assert!(matches!(missing, Err(RuleError::Hub(_))));

    hub.slow_service("light", "turn_off", Duration::from_secs(30));
    let slow = engine
        .call_service("light", "turn_off", json!({"entity_id": "light.kitchen"}))
        .await;
    assert!(matches!(slow, Err(RuleError::Timeout(d)) if d == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_rule_replays_actions() {
    let hub = TestHub::new();
    hub.set("switch.pump", "off");
    let engine = hub.engine().await;

    engine
        .entity("switch.pump")
        .unwrap()
        .toggle()
        .schedule_every(Duration::from_secs(60))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(hub.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    hub.assert_state("switch.pump", "on");
    tokio::time::sleep(Duration::from_secs(60)).await;
    hub.assert_state("switch.pump", "off");
    assert_eq!(hub.calls_to("switch", "toggle").len(), 2);
    assert_eq!(engine.rule_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_rule_rejects_zero_period() {
    let hub = TestHub::new();
    hub.set("light.kitchen", "off");
    let engine = hub.engine().await;

    let result = engine
        .entity("light.kitchen")
        .unwrap()
        .turn_on()
        .schedule_every(Duration::ZERO);
    assert!(matches!(result, Err(RuleError::InvalidPeriod)));
    assert_eq!(engine.rule_count(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(hub.calls().is_empty());
    hub.assert_state("light.kitchen", "off");
}

#[tokio::test(start_paused = true)]
async fn test_registration_errors() {
    let hub = TestHub::new();
    let engine = hub.engine().await;

    assert!(matches!(engine.entity("kitchen"), Err(RuleError::InvalidEntityId(_))));
    assert!(matches!(
        engine.entities(["light.ok", "Light.Bad"]),
        Err(RuleError::InvalidEntityId(_))
    ));

    let result = engine
        .entity("binary_sensor.motion")
        .unwrap()
        .when_state_change()
        .to("on")
        .use_entity("light.hall")
        .unwrap()
        .with_attribute("brightness", 10)
        .execute();
    assert!(matches!(result, Err(RuleError::MissingAction(_))));

    let result = engine
        .entity("binary_sensor.motion")
        .unwrap()
        .when_state_change()
        .use_entity("hall");
    assert!(matches!(result, Err(RuleError::InvalidEntityId(_))));
    assert_eq!(engine.rule_count(), 0);
}
