//! The static entity adapter registry (§4.8): one row per domain entity,
//! giving the routing key prefix, the field sets the REST layer validates,
//! and the nested id-to-entity map the resolver consumes.
//!
//! Per-entity business validation beyond this is explicitly out of scope;
//! this registry exists so the REST router and resolver have something
//! uniform to drive off of.

/// One row of the registry.
pub struct EntityAdapter {
    pub name: &'static str,
    pub routing_prefix: &'static str,
    pub required_create_fields: &'static [&'static str],
    pub optional_update_fields: &'static [&'static str],
    /// `(field name in a reply item, target entity name)` for fields whose
    /// value is an id the resolver should inflate into a full object.
    pub id_fields: &'static [(&'static str, &'static str)],
}

pub const EQUIPMENT: EntityAdapter = EntityAdapter {
    name: "equipment",
    routing_prefix: "equipment",
    required_create_fields: &["name", "venue_id"],
    optional_update_fields: &["name", "venue_id", "state_id"],
    id_fields: &[("venue_id", "venue"), ("state_id", "state")],
};

pub const USER: EntityAdapter = EntityAdapter {
    name: "user",
    routing_prefix: "user",
    required_create_fields: &["name", "email"],
    optional_update_fields: &["name", "email"],
    id_fields: &[],
};

pub const VENUE: EntityAdapter = EntityAdapter {
    name: "venue",
    routing_prefix: "venue",
    required_create_fields: &["name", "address"],
    optional_update_fields: &["name", "address"],
    id_fields: &[],
};

pub const EVENT: EntityAdapter = EntityAdapter {
    name: "event",
    routing_prefix: "event",
    required_create_fields: &["name", "venue_id", "start_time"],
    optional_update_fields: &["name", "venue_id", "start_time", "end_time"],
    id_fields: &[("venue_id", "venue")],
};

pub const FILE: EntityAdapter = EntityAdapter {
    name: "file",
    routing_prefix: "file",
    required_create_fields: &["filename", "owner_id"],
    optional_update_fields: &["filename"],
    id_fields: &[("owner_id", "user")],
};

pub const STATE: EntityAdapter = EntityAdapter {
    name: "state",
    routing_prefix: "state",
    required_create_fields: &["label"],
    optional_update_fields: &["label"],
    id_fields: &[],
};

pub const TOPIC: EntityAdapter = EntityAdapter {
    name: "topic",
    routing_prefix: "topic",
    required_create_fields: &["name"],
    optional_update_fields: &["name"],
    id_fields: &[],
};

pub const SIGNUP: EntityAdapter = EntityAdapter {
    name: "signup",
    routing_prefix: "signup",
    required_create_fields: &["event_id", "user_id"],
    optional_update_fields: &[],
    id_fields: &[("event_id", "event"), ("user_id", "user")],
};

pub const ENT_STATE: EntityAdapter = EntityAdapter {
    name: "ent_state",
    routing_prefix: "ent_state",
    required_create_fields: &["entity_id", "state_id"],
    optional_update_fields: &["state_id"],
    id_fields: &[("state_id", "state")],
};

pub const REGISTRY: &[&EntityAdapter] = &[
    &EQUIPMENT, &USER, &VENUE, &EVENT, &FILE, &STATE, &TOPIC, &SIGNUP, &ENT_STATE,
];

pub fn lookup(name: &str) -> Option<&'static EntityAdapter> {
    REGISTRY.iter().copied().find(|adapter| adapter.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_entity_is_findable_by_name() {
        for adapter in REGISTRY {
            assert!(lookup(adapter.name).is_some());
        }
    }

    #[test]
    fn unknown_entity_is_absent() {
        assert!(lookup("not-a-real-entity").is_none());
    }
}
