//! Domain metadata: which service namespace handles an entity's commands
//! and which entity services a domain offers

/// Domain that runs scripts; each script is a service of this domain
pub const SCRIPT_DOMAIN: &str = "script";

/// Domain whose generic services act on any entity (used for groups)
pub const HOMEASSISTANT_DOMAIN: &str = "homeassistant";

/// Domains that only report state and accept no entity commands
pub static READONLY_DOMAINS: &[&str] = &[
    "sensor",
    "binary_sensor",
    "weather",
    "device_tracker",
    "sun",
    "zone",
    "person",
    "calendar",
    "event",
];

/// Media transport services understood by `media_player` entities
pub static MEDIA_SERVICES: &[&str] = &["media_play", "media_pause", "media_stop", "media_play_pause"];

const ON_OFF_SERVICES: &[&str] = &["turn_on", "turn_off", "toggle"];

pub fn is_readonly_domain(domain: &str) -> bool {
    READONLY_DOMAINS.contains(&domain)
}

/// The service domain a command for an entity of `entity_domain` is sent to
///
/// Groups have no services of their own; the hub handles them through the
/// generic `homeassistant` services.
pub fn service_domain(entity_domain: &str) -> &str {
    match entity_domain {
        "group" => HOMEASSISTANT_DOMAIN,
        other => other,
    }
}

/// Entity services a controllable domain offers, `None` for read-only domains
pub fn entity_services(domain: &str) -> Option<Vec<&'static str>> {
    if is_readonly_domain(domain) {
        return None;
    }
    let mut services = ON_OFF_SERVICES.to_vec();
    if domain == "media_player" {
        services.extend_from_slice(MEDIA_SERVICES);
    }
    Some(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_route_to_homeassistant() {
        assert_eq!(service_domain("group"), "homeassistant");
        assert_eq!(service_domain("light"), "light");
    }

    #[test]
    fn test_entity_services() {
        assert_eq!(entity_services("sensor"), None);
        assert_eq!(entity_services("switch").unwrap(), vec!["turn_on", "turn_off", "toggle"]);
        let media = entity_services("media_player").unwrap();
        assert!(media.contains(&"media_play_pause"));
        assert!(media.contains(&"toggle"));
    }
}
