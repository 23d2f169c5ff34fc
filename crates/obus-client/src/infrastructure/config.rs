//! TOML configuration for the client binary.
//!
//! A single file holds the client settings and a declarative description of
//! the bus the client talks to:
//!
//! ```toml
//! [client]
//! name = "obus-monitor"
//! server = "127.0.0.1:58000"
//!
//! [bus]
//! name = "audio"
//! crc = 0x1234
//!
//! [[bus.objects]]
//! name = "speaker"
//! uid = 1
//! enums = [{ name = "mode", items = { OFF = 0, ON = 1 } }]
//! properties = [
//!     { name = "volume", uid = 1, type = "uint8" },
//!     { name = "mode", uid = 2, type = "enum:mode" },
//!     { name = "levels", uid = 3, type = "array:int16" },
//! ]
//! ```
//!
//! # Field type strings
//!
//! `bool`, `uint8`, `int8`, `uint16`, `int16`, `uint32`, `int32`, `uint64`,
//! `int64`, `handle` (a `uint16`), `string`, `float`, `double`, or
//! `enum:<name>` naming one of the object's `enums`.  Prefix any of them with
//! `array:` for an array field.
//!
//! # Serde default values
//!
//! Every `[client]` key is optional; `#[serde(default = "...")]` helpers fill
//! in the missing ones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use obus_core::{
    BusDesc, BusEventDesc, DescriptorError, EnumDriver, FieldDesc, FieldRole, FieldType,
    MethodDesc, ObjectDesc, ObjectDescBuilder, StructDesc,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ARRAY_PREFIX: &str = "array:";
const ENUM_PREFIX: &str = "enum:";

/// Error type for loading the configuration and building the bus from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("field '{field}' has unknown type '{type_name}'")]
    UnknownType { field: String, type_name: String },

    #[error("field '{field}' refers to unknown enum '{name}'")]
    UnknownEnum { field: String, name: String },

    #[error("enum '{name}' has no item '{item}' for its default")]
    UnknownEnumDefault { name: String, item: String },

    /// Duplicate uids or names while building descriptor tables.
    #[error("invalid bus definition: {0}")]
    Descriptor(#[from] DescriptorError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    pub bus: BusConfig,
}

/// Connection and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Name sent to the server in the connection request.
    #[serde(default = "default_name")]
    pub name: String,
    /// Server address as `host:port`.
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_true")]
    pub autoreconnect: bool,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log every object add, remove, update and call ack.
    #[serde(default)]
    pub object_log: bool,
}

/// Declarative bus definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    pub name: String,
    /// Checksum of the bus definition, compared by the server on connect.
    pub crc: u32,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
    #[serde(default)]
    pub events: Vec<BusEventConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectConfig {
    pub name: String,
    pub uid: u16,
    #[serde(default)]
    pub enums: Vec<EnumConfig>,
    #[serde(default)]
    pub properties: Vec<FieldConfig>,
    #[serde(default)]
    pub methods: Vec<MethodConfig>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumConfig {
    pub name: String,
    pub items: BTreeMap<String, i32>,
    /// Item name; the lowest value when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldConfig {
    pub name: String,
    pub uid: u16,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodConfig {
    pub name: String,
    pub uid: u16,
    #[serde(default)]
    pub args: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventConfig {
    pub name: String,
    pub uid: u16,
    /// Names of the properties or method states this event may carry.
    #[serde(default)]
    pub updates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEventConfig {
    pub name: String,
    pub uid: u16,
}

// ── Default value functions (required by serde) ──────────────────────────────

fn default_name() -> String {
    "obus-client".to_string()
}
fn default_server() -> String {
    "127.0.0.1:58000".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            server: default_server(),
            autoreconnect: true,
            log_level: default_log_level(),
            object_log: false,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Loads a [`ClientConfig`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ClientConfig::from_toml_str(&content)
}

// ── Bus descriptor construction ───────────────────────────────────────────────

impl BusConfig {
    /// Builds the descriptor tables for this bus.
    pub fn to_bus_desc(&self) -> Result<BusDesc, ConfigError> {
        let mut desc = BusDesc::new(self.name.clone(), self.crc);
        for object in &self.objects {
            desc.add_object(object.to_object_desc()?)?;
        }
        for event in &self.events {
            desc.add_event(BusEventDesc::new(event.uid, event.name.clone()))?;
        }
        Ok(desc)
    }
}

impl ObjectConfig {
    fn to_object_desc(&self) -> Result<ObjectDesc, ConfigError> {
        let mut drivers = BTreeMap::new();
        for e in &self.enums {
            drivers.insert(e.name.as_str(), Arc::new(e.to_driver()?));
        }

        let mut builder = ObjectDescBuilder::new(self.uid, self.name.clone());
        for prop in &self.properties {
            builder = builder.property(prop.to_field_desc(FieldRole::Property, &drivers)?)?;
        }
        for method in &self.methods {
            let mut args = StructDesc::new();
            for arg in &method.args {
                args.add_field(arg.to_field_desc(FieldRole::Argument, &drivers)?)?;
            }
            builder = builder.method(MethodDesc::new(method.uid, method.name.clone(), args))?;
        }
        for event in &self.events {
            let updates: Vec<&str> = event.updates.iter().map(String::as_str).collect();
            builder = builder.event(event.uid, event.name.clone(), &updates)?;
        }
        Ok(builder.build()?)
    }
}

impl EnumConfig {
    fn to_driver(&self) -> Result<EnumDriver, ConfigError> {
        let mut items: Vec<(String, i32)> =
            self.items.iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by_key(|(_, v)| *v);

        let default = match &self.default {
            Some(item) => *self.items.get(item).ok_or_else(|| ConfigError::UnknownEnumDefault {
                name: self.name.clone(),
                item: item.clone(),
            })?,
            None => items.first().map_or(0, |(_, v)| *v),
        };
        Ok(EnumDriver::new(self.name.clone(), items, default))
    }
}

impl FieldConfig {
    fn to_field_desc(
        &self,
        role: FieldRole,
        drivers: &BTreeMap<&str, Arc<EnumDriver>>,
    ) -> Result<FieldDesc, ConfigError> {
        let (is_array, base) = match self.type_name.strip_prefix(ARRAY_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, self.type_name.as_str()),
        };

        let field = if let Some(enum_name) = base.strip_prefix(ENUM_PREFIX) {
            let driver = drivers
                .get(enum_name)
                .ok_or_else(|| ConfigError::UnknownEnum {
                    field: self.name.clone(),
                    name: enum_name.to_string(),
                })?;
            FieldDesc::new_enum(self.name.clone(), self.uid, role, Arc::clone(driver))
        } else {
            let field_type =
                FieldType::from_idl_name(base).ok_or_else(|| ConfigError::UnknownType {
                    field: self.name.clone(),
                    type_name: self.type_name.clone(),
                })?;
            FieldDesc::new(self.name.clone(), self.uid, field_type, role)
        };

        Ok(if is_array { field.array() } else { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [client]
        name = "monitor"
        server = "10.0.0.2:4000"
        object_log = true

        [bus]
        name = "media"
        crc = 0xABCD

        [[bus.objects]]
        name = "player"
        uid = 1
        enums = [{ name = "state", items = { IDLE = 0, PLAYING = 1, PAUSED = 2 } }]
        properties = [
            { name = "state", uid = 1, type = "enum:state" },
            { name = "title", uid = 2, type = "string" },
            { name = "history", uid = 3, type = "array:enum:state" },
            { name = "owner", uid = 4, type = "handle" },
        ]
        events = [{ name = "state_changed", uid = 1, updates = ["state", "method_state_play"] }]

        [[bus.objects.methods]]
        name = "play"
        uid = 10
        args = [{ name = "uri", uid = 1, type = "string" }]

        [[bus.events]]
        name = "resync"
        uid = 1
    "#;

    #[test]
    fn test_deserialize_sample_reads_every_section() {
        let cfg = ClientConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.client.name, "monitor");
        assert_eq!(cfg.client.server, "10.0.0.2:4000");
        assert!(cfg.client.object_log);
        assert_eq!(cfg.bus.crc, 0xABCD);
        assert_eq!(cfg.bus.objects[0].methods[0].args[0].type_name, "string");
    }

    #[test]
    fn test_missing_client_section_uses_defaults() {
        let cfg = ClientConfig::from_toml_str("[bus]\nname = \"b\"\ncrc = 1\n").unwrap();
        assert_eq!(cfg.client, ClientSettings::default());
        assert!(cfg.client.autoreconnect);
        assert_eq!(cfg.client.log_level, "info");
        assert!(cfg.bus.objects.is_empty());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result = ClientConfig::from_toml_str("[bus\nname=");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let cfg = ClientConfig::from_toml_str(SAMPLE).unwrap();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_to_bus_desc_builds_descriptor_tables() {
        // Arrange
        let cfg = ClientConfig::from_toml_str(SAMPLE).unwrap();

        // Act
        let desc = cfg.bus.to_bus_desc().unwrap();

        // Assert
        assert_eq!(desc.name, "media");
        let player = desc.find_object("player").unwrap();
        let fields = &player.struct_desc;
        assert!(fields.find_field("state").unwrap().is_enum());
        assert_eq!(fields.find_field("owner").unwrap().field_type, FieldType::U16);
        let history = fields.find_field("history").unwrap();
        assert!(history.is_array && history.is_enum());
        let state = fields.find_field("method_state_play").unwrap();
        assert_eq!(state.role, FieldRole::Method);
        let play = player.find_method("play").unwrap();
        assert!(play.args.find_field("uri").is_some());
        let event = player.find_event("state_changed").unwrap();
        assert!(event.updates(state.uid));
        assert!(desc.find_event("resync").is_some());
    }

    #[test]
    fn test_enum_default_is_lowest_value_unless_named() {
        let mut e = EnumConfig {
            name: "level".into(),
            items: BTreeMap::from([("HIGH".into(), 9), ("LOW".into(), -1)]),
            default: None,
        };
        assert_eq!(e.to_driver().unwrap().default_value(), -1);

        e.default = Some("HIGH".into());
        assert_eq!(e.to_driver().unwrap().default_value(), 9);

        e.default = Some("MID".into());
        assert!(matches!(e.to_driver(), Err(ConfigError::UnknownEnumDefault { .. })));
    }

    #[test]
    fn test_unknown_type_and_unknown_enum_are_rejected() {
        let bad_type = SAMPLE.replace(r#"type = "handle""#, r#"type = "text""#);
        let cfg = ClientConfig::from_toml_str(&bad_type).unwrap();
        assert!(matches!(cfg.bus.to_bus_desc(), Err(ConfigError::UnknownType { .. })));

        let bad_enum = SAMPLE.replace(r#"uid = 1, type = "enum:state""#, r#"uid = 1, type = "enum:mood""#);
        let cfg = ClientConfig::from_toml_str(&bad_enum).unwrap();
        assert!(matches!(cfg.bus.to_bus_desc(), Err(ConfigError::UnknownEnum { .. })));
    }

    #[test]
    fn test_duplicate_object_uid_is_a_descriptor_error() {
        let mut cfg = ClientConfig::from_toml_str(SAMPLE).unwrap();
        let mut twin = cfg.bus.objects[0].clone();
        twin.name = "twin".into();
        cfg.bus.objects.push(twin);
        assert!(matches!(cfg.bus.to_bus_desc(), Err(ConfigError::Descriptor(_))));
    }

    #[test]
    fn test_load_config_reports_missing_file_path() {
        let path = Path::new("/nonexistent/obus/client.toml");
        match load_config(path) {
            Err(ConfigError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_bundled_sample_config_builds() {
        let cfg = ClientConfig::from_toml_str(include_str!("../../config/monitor.toml")).unwrap();
        let desc = cfg.bus.to_bus_desc().unwrap();
        assert_eq!(desc.objects().count(), 2);
        assert!(desc.find_object("player").unwrap().find_method("pause").is_some());
    }
}
