//! Apps shipped with the daemon

use chrono::NaiveTime;
use ha_rules::prelude::*;
use tracing::info;

pub fn default_apps(lights_off_at: NaiveTime) -> Vec<Box<dyn RulesApp>> {
    vec![
        Box::new(HallwayLights),
        Box::new(Doorbell),
        Box::new(LightsOffAtNight { at: lights_off_at }),
    ]
}

/// Hallway light follows the motion sensor, with a grace period before off
struct HallwayLights;

impl RulesApp for HallwayLights {
    fn name(&self) -> &str {
        "hallway_lights"
    }

    fn initialize(&self, engine: &RulesEngine) -> RuleResult<()> {
        engine
            .entity("binary_sensor.hallway_motion")?
            .when_state_change()
            .to("on")
            .use_entity("light.hallway")?
            .turn_on()
            .with_attribute("brightness", 180)
            .execute()?;

        engine
            .entity("binary_sensor.hallway_motion")?
            .when_state_change()
            .from("on")
            .to("off")
            .and_not_change_for(Duration::from_secs(300))
            .use_entity("light.hallway")?
            .turn_off()
            .execute()?;

        Ok(())
    }
}

/// Pause the living room and notify when someone rings
struct Doorbell;

impl RulesApp for Doorbell {
    fn name(&self) -> &str {
        "doorbell"
    }

    fn initialize(&self, engine: &RulesEngine) -> RuleResult<()> {
        let handle = engine.clone();
        engine
            .event("doorbell_pressed")
            .call(move |_, data| {
                let engine = handle.clone();
                async move {
                    info!(button = %data["button"], "Doorbell pressed");
                    engine
                        .entity("media_player.living_room")?
                        .pause()
                        .execute()
                        .await?;
                    engine.run_script("notify").await?;
                    Ok::<_, anyhow::Error>(())
                }
            })
            .execute()?;
        Ok(())
    }
}

struct LightsOffAtNight {
    at: NaiveTime,
}

impl RulesApp for LightsOffAtNight {
    fn name(&self) -> &str {
        "lights_off_at_night"
    }

    fn initialize(&self, engine: &RulesEngine) -> RuleResult<()> {
        let handle = engine.clone();
        engine.run_daily(self.at, move || {
            let engine = handle.clone();
            async move {
                let report = engine
                    .entities_where(|state| state.domain() == "light" && state.is_state("on"))
                    .turn_off()
                    .execute()
                    .await?;
                info!(lights = report.issued, "Turned off lights for the night");
                Ok::<_, anyhow::Error>(())
            }
        })?;
        Ok(())
    }
}
