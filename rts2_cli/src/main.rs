//! A minimal filter-wheel-shaped device, wired up purely to exercise
//! `rts2_device::App` end to end. A real device class would replace the
//! value registration and hooks below with calls into its own hardware
//! driver; the runtime plumbing (config, network, dispatch) is unchanged.
use std::env;

use rts2_device::config::{ConfigValueType, DeviceConfig};
use rts2_device::App;
use rts2_proto::value::Value;

fn main() {
    let argv: Vec<String> = env::args().collect();

    let extra = DeviceConfig::new().add_argument(
        "filter_count",
        None,
        "filter-count",
        "filterd",
        ConfigValueType::Int,
        Some("5"),
        "number of filters in the wheel",
    );

    let app = match App::new(&argv, extra) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if app.config.show_config() {
        std::process::exit(app.show_config());
    }

    app.device.register_value(Value::new_integer("filter_num", "current filter position", Some(0)).with_writable(true));
    app.device
        .register_value(Value::new_double("filter_sleep", "seconds spent moving between filters", Some(2.0)).with_writable(true));
    app.device.register_value(Value::new_selection(
        "filter",
        "named filter wheel position",
        vec!["B".to_string(), "V".to_string(), "R".to_string(), "I".to_string(), "CLEAR".to_string()],
        4,
    ));

    std::process::exit(app.run());
}
