//! Typed extra command-line options a device class can contribute, in the
//! shape of the teacher's flat `key=value` config grammar
//! (`config::config_parser::Config`) generalized to a user-extensible set
//! of fields instead of one fixed struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValueType {
    String,
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone)]
pub struct ConfigArgument {
    pub name: &'static str,
    pub short: Option<char>,
    pub long: &'static str,
    pub section: &'static str,
    pub value_type: ConfigValueType,
    pub default: Option<String>,
    pub help: &'static str,
}

impl ConfigArgument {
    pub fn key(&self) -> String {
        format!("{}.{}", self.section, self.name)
    }
}

/// Builder a device-class author uses to register additional typed CLI
/// options before handing the result to `ArgResolver::resolve`.
#[derive(Default)]
pub struct DeviceConfig {
    pub(crate) extra_args: Vec<ConfigArgument>,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_argument(
        mut self,
        name: &'static str,
        short: Option<char>,
        long: &'static str,
        section: &'static str,
        value_type: ConfigValueType,
        default: Option<&str>,
        help: &'static str,
    ) -> Self {
        self.extra_args.push(ConfigArgument {
            name,
            short,
            long,
            section,
            value_type,
            default: default.map(str::to_string),
            help,
        });
        self
    }

    pub fn arguments(&self) -> &[ConfigArgument] {
        &self.extra_args
    }
}
