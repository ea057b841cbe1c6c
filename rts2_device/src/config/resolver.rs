//! Layered configuration resolution (spec.md §6): built-in defaults, system
//! config file, user config file, explicit `--config`, environment
//! variables, command-line flags — in that priority order, lowest first.
//!
//! Grounded on the teacher's `config::config_parser::Config`: a flat
//! `key=value` file parsed into a `HashMap<String, String>` with typed
//! getters layered on top. Here the map is keyed `"section.key"` so it can
//! double as the `RTS2_<SECTION>_<KEY>` environment-variable mapping and
//! the `--show-config` dump format.
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::arg::{ConfigArgument, ConfigValueType, DeviceConfig};
use crate::error::DeviceError;

fn builtin_arguments() -> Vec<ConfigArgument> {
    vec![
        ConfigArgument {
            name: "name",
            short: Some('d'),
            long: "device",
            section: "device",
            value_type: ConfigValueType::String,
            default: None,
            help: "device name announced to centrald",
        },
        ConfigArgument {
            name: "port",
            short: Some('P'),
            long: "port",
            section: "device",
            value_type: ConfigValueType::Int,
            default: Some("0".to_string()),
            help: "listening port (0 = kernel-assigned)",
        },
        ConfigArgument {
            name: "server",
            short: Some('c'),
            long: "server",
            section: "centrald",
            value_type: ConfigValueType::String,
            default: Some("localhost".to_string()),
            help: "centrald host",
        },
        ConfigArgument {
            name: "server_port",
            short: Some('p'),
            long: "server-port",
            section: "centrald",
            value_type: ConfigValueType::Int,
            default: Some("617".to_string()),
            help: "centrald port",
        },
        ConfigArgument {
            name: "connection_timeout",
            short: None,
            long: "connection-timeout",
            section: "device",
            value_type: ConfigValueType::Float,
            default: Some("60.0".to_string()),
            help: "default per-command timeout in seconds",
        },
        ConfigArgument {
            name: "verbose",
            short: Some('v'),
            long: "verbose",
            section: "device",
            value_type: ConfigValueType::Bool,
            default: Some("false".to_string()),
            help: "verbose logging",
        },
        ConfigArgument {
            name: "debug",
            short: None,
            long: "debug",
            section: "device",
            value_type: ConfigValueType::Bool,
            default: Some("false".to_string()),
            help: "debug-level logging",
        },
        ConfigArgument {
            name: "log_file",
            short: None,
            long: "log-file",
            section: "device",
            value_type: ConfigValueType::String,
            default: None,
            help: "path to the log file; unset disables file logging",
        },
        ConfigArgument {
            name: "simulation",
            short: None,
            long: "simulation",
            section: "device",
            value_type: ConfigValueType::Bool,
            default: Some("false".to_string()),
            help: "run against simulated hardware",
        },
        ConfigArgument {
            name: "disable_device",
            short: None,
            long: "disable-device",
            section: "device",
            value_type: ConfigValueType::Bool,
            default: Some("false".to_string()),
            help: "start the device in a disabled/blocked state",
        },
    ]
}

pub struct ArgResolver {
    values: HashMap<String, String>,
    show_config: bool,
}

impl ArgResolver {
    /// Resolves final values from defaults, config files, environment, and
    /// `argv`, in that increasing-priority order.
    pub fn resolve(argv: &[String], extra: &DeviceConfig) -> Result<Self, DeviceError> {
        let builtins = builtin_arguments();
        let all_args: Vec<&ConfigArgument> = builtins.iter().chain(extra.arguments()).collect();

        let mut values = HashMap::new();
        for arg in &all_args {
            if let Some(default) = &arg.default {
                values.insert(arg.key(), default.clone());
            }
        }

        let no_system_config = argv.iter().any(|a| a == "--no-system-config");
        let no_user_config = argv.iter().any(|a| a == "--no-user-config");
        let explicit_config = find_flag_value(argv, "--config");

        if !no_system_config {
            merge_file_if_present(&mut values, Path::new("/etc/rts2/rts2.conf"));
        }
        if !no_user_config {
            if let Some(home) = std::env::var_os("HOME") {
                let home = PathBuf::from(home);
                merge_file_if_present(&mut values, &home.join(".rts2").join("rts2.conf"));
                merge_file_if_present(&mut values, &home.join(".rts2.conf"));
            }
        }
        if let Some(path) = &explicit_config {
            let contents = fs::read_to_string(path).map_err(|e| DeviceError::new_config_error(format!("reading --config {path}: {e}"), "CONFIG"))?;
            values.extend(parse_flat_config(&contents));
        }

        for arg in &all_args {
            let env_name = format!("RTS2_{}_{}", arg.section.to_uppercase(), arg.name.to_uppercase());
            if let Ok(val) = std::env::var(&env_name) {
                values.insert(arg.key(), val);
            }
        }

        apply_cli_flags(&mut values, argv, &all_args);

        let show_config = argv.iter().any(|a| a == "--show-config");

        Ok(ArgResolver { values, show_config })
    }

    pub fn show_config(&self) -> bool {
        self.show_config
    }

    /// `section.key = value` lines, sorted, for `--show-config`.
    pub fn dump(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| format!("{k} = {}", self.values[k])).collect()
    }

    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.values.get(&format!("{section}.{key}")).cloned()
    }

    pub fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_float(&self, section: &str, key: &str) -> Option<f64> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_string(section, key)?.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn device_name(&self) -> Result<String, DeviceError> {
        self.get_string("device", "name").ok_or_else(|| DeviceError::new_config_error("missing required -d/--device <name>", "CONFIG"))
    }

    pub fn listen_port(&self) -> u16 {
        self.get_int("device", "port").unwrap_or(0).clamp(0, u16::MAX as i64) as u16
    }

    pub fn centrald_addr(&self) -> Result<SocketAddr, DeviceError> {
        let host = self.get_string("centrald", "server").unwrap_or_else(|| "localhost".to_string());
        let port = self.get_int("centrald", "server_port").unwrap_or(617);
        use std::net::ToSocketAddrs;
        format!("{host}:{port}")
            .to_socket_addrs()
            .map_err(|e| DeviceError::new_config_error(format!("resolving centrald address {host}:{port}: {e}"), "CONFIG"))?
            .next()
            .ok_or_else(|| DeviceError::new_config_error(format!("could not resolve {host}:{port}"), "CONFIG"))
    }
}

fn merge_file_if_present(values: &mut HashMap<String, String>, path: &Path) {
    if let Ok(contents) = fs::read_to_string(path) {
        values.extend(parse_flat_config(&contents));
    }
}

/// Parses `section.key = value` (or bare `key = value`, assumed section
/// `device`) lines, skipping blanks and `#` comments.
fn parse_flat_config(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = if key.contains('.') { key.to_string() } else { format!("device.{key}") };
        map.insert(key, value.trim().to_string());
    }
    map
}

fn find_flag_value(argv: &[String], flag: &str) -> Option<String> {
    argv.iter().position(|a| a == flag).and_then(|i| argv.get(i + 1)).cloned()
}

fn apply_cli_flags(values: &mut HashMap<String, String>, argv: &[String], args: &[&ConfigArgument]) {
    let mut i = 0;
    while i < argv.len() {
        let token = &argv[i];
        let matched = args.iter().find(|a| {
            token == &format!("--{}", a.long) || a.short.is_some_and(|s| token == &format!("-{s}"))
        });
        if let Some(arg) = matched {
            let value = if arg.value_type == ConfigValueType::Bool {
                "true".to_string()
            } else if let Some(v) = argv.get(i + 1) {
                i += 1;
                v.clone()
            } else {
                i += 1;
                continue;
            };
            values.insert(arg.key(), value);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builtin_defaults_apply_when_nothing_else_is_set() {
        let extra = DeviceConfig::new();
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd"]), &extra).unwrap();
        assert_eq!(resolver.get_string("device", "name").as_deref(), Some("filterd"));
        assert_eq!(resolver.get_int("device", "port"), Some(0));
        assert_eq!(resolver.get_string("centrald", "server").as_deref(), Some("localhost"));
        assert_eq!(resolver.get_int("centrald", "server_port"), Some(617));
    }

    #[test]
    fn missing_device_name_is_an_error() {
        let extra = DeviceConfig::new();
        let resolver = ArgResolver::resolve(&argv(&[]), &extra).unwrap();
        assert!(resolver.device_name().is_err());
    }

    #[test]
    fn cli_flags_override_builtin_defaults() {
        let extra = DeviceConfig::new();
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd", "-P", "5555", "--verbose"]), &extra).unwrap();
        assert_eq!(resolver.listen_port(), 5555);
        assert_eq!(resolver.get_bool("device", "verbose"), Some(true));
    }

    #[test]
    fn env_vars_override_defaults_but_lose_to_cli_flags() {
        let extra = DeviceConfig::new();
        std::env::set_var("RTS2_CENTRALD_SERVER", "centrald.example.org");
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd"]), &extra).unwrap();
        assert_eq!(resolver.get_string("centrald", "server").as_deref(), Some("centrald.example.org"));

        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd", "-c", "other.example.org"]), &extra).unwrap();
        assert_eq!(resolver.get_string("centrald", "server").as_deref(), Some("other.example.org"));
        std::env::remove_var("RTS2_CENTRALD_SERVER");
    }

    #[test]
    fn extra_device_class_arguments_are_resolved_like_builtins() {
        let extra = DeviceConfig::new().add_argument("filter_count", None, "filter-count", "filterd", ConfigValueType::Int, Some("5"), "number of filters");
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd"]), &extra).unwrap();
        assert_eq!(resolver.get_int("filterd", "filter_count"), Some(5));

        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd", "--filter-count", "8"]), &extra).unwrap();
        assert_eq!(resolver.get_int("filterd", "filter_count"), Some(8));
    }

    #[test]
    fn show_config_flag_is_detected_and_dump_is_sorted() {
        let extra = DeviceConfig::new();
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd", "--show-config"]), &extra).unwrap();
        assert!(resolver.show_config());
        let dump = resolver.dump();
        let mut sorted = dump.clone();
        sorted.sort();
        assert_eq!(dump, sorted);
        assert!(dump.iter().any(|l| l.starts_with("device.name = filterd")));
    }

    #[test]
    fn parse_flat_config_defaults_bare_keys_to_device_section() {
        let parsed = parse_flat_config("name = filterd\ncentrald.server = somehost\n# a comment\n\nverbose=true\n");
        assert_eq!(parsed.get("device.name"), Some(&"filterd".to_string()));
        assert_eq!(parsed.get("centrald.server"), Some(&"somehost".to_string()));
        assert_eq!(parsed.get("device.verbose"), Some(&"true".to_string()));
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        let extra = DeviceConfig::new();
        let resolver = ArgResolver::resolve(&argv(&["-d", "filterd"]), &extra).unwrap();
        assert_eq!(resolver.get_bool("device", "verbose"), Some(false));
    }
}
