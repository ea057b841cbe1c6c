//! Application scaffolding: resolves configuration, wires up the
//! `Device`/`NetworkManager` pair, and runs until a signal asks it to stop
//! (spec.md §6/§7). Grounded on the teacher's `redis_node/src/main.rs`
//! load-then-start shape, generalized into a reusable type instead of a
//! free-standing `fn main`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rts2_logger::Logger;

use crate::config::{ArgResolver, DeviceConfig};
use crate::device::Device;
use crate::error::DeviceError;
use crate::netman::{InterestManager, NetworkManager};

/// Wires together configuration resolution, the device core, and the
/// network runtime. A device-class binary builds one of these, registers
/// its values/hooks on `.device()`, then calls `.run()`.
pub struct App {
    pub config: ArgResolver,
    pub device: Arc<Device>,
    pub network: Arc<NetworkManager>,
    interest: Arc<InterestManager>,
    shutdown: Arc<AtomicBool>,
}

impl App {
    /// Resolves configuration from `argv` and constructs the device/network
    /// pair. Does not bind the listener or connect to centrald yet — do
    /// that via `.run()`, after registering device-specific values.
    pub fn new(argv: &[String], extra_config: DeviceConfig) -> Result<Self, DeviceError> {
        let config = ArgResolver::resolve(argv, &extra_config)?;

        let logger = match config.get_string("device", "log_file") {
            Some(path) => Logger::new(&path),
            None => Logger::null(),
        };

        let device_name = config.device_name()?;
        let device = Arc::new(Device::new(logger.clone()));
        let network = NetworkManager::new(device.clone(), logger, device_name, 0);
        let interest = InterestManager::new(network.clone());

        Ok(App {
            config,
            device,
            network,
            interest,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Prints the resolved configuration as `section.key = value` lines and
    /// returns the process exit code, without starting any network I/O.
    pub fn show_config(&self) -> i32 {
        for line in self.config.dump() {
            println!("{line}");
        }
        0
    }

    /// Binds the listener, connects to centrald, starts the periodic
    /// sweeps, installs the Ctrl-C handler, and blocks until shutdown.
    /// Returns the process exit code per spec.md §7.
    pub fn run(self) -> i32 {
        if self.config.show_config() {
            return self.show_config();
        }

        let bind_addr = match format!("0.0.0.0:{}", self.config.listen_port()).parse() {
            Ok(a) => a,
            Err(_) => return 1,
        };
        if let Err(e) = self.network.listen(bind_addr) {
            self.network.logger.error(&e.to_string(), "APP");
            return 1;
        }

        let centrald_addr = match self.config.centrald_addr() {
            Ok(a) => a,
            Err(e) => {
                self.network.logger.error(&e.to_string(), "APP");
                return 1;
            }
        };
        if let Err(e) = self.network.connect_centrald(centrald_addr) {
            self.network.logger.error(&e.to_string(), "APP");
            return 1;
        }

        self.network.spawn_ticker();
        self.interest.spawn();

        let shutdown = self.shutdown.clone();
        let _ = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }

        self.network.shutdown("process shutting down");
        std::thread::sleep(Duration::from_secs(2));
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_requires_a_device_name() {
        let err = App::new(&argv(&[]), DeviceConfig::new()).unwrap_err();
        assert!(err.to_string().contains("device"));
    }

    #[test]
    fn new_succeeds_with_just_a_device_name() {
        let app = App::new(&argv(&["-d", "filterd"]), DeviceConfig::new()).unwrap();
        assert_eq!(app.network.listen_port(), 0);
    }

    #[test]
    fn show_config_prints_without_starting_the_network_runtime() {
        let app = App::new(&argv(&["-d", "filterd", "--show-config"]), DeviceConfig::new()).unwrap();
        assert!(app.config.show_config());
        assert_eq!(app.show_config(), 0);
    }
}
