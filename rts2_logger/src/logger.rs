//! Logger implementation used across the runtime to record connection,
//! command and device-state events.
use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{Receiver, Sender, channel},
    thread::spawn,
};

/// Sends formatted log lines to a background writer thread.
#[derive(Debug, Clone)]
pub struct Logger {
    pub logger: Sender<String>,
}

impl Logger {
    /// Spawns the writer thread and returns a handle that can be cloned and
    /// shared across connections/threads.
    ///
    /// # Parameters
    /// * `filename`: path of the log file to append to.
    pub fn new(filename: &str) -> Logger {
        let (logger, receiver) = channel();
        let filename = filename.to_string();

        spawn(move || {
            write_to_file(&filename, receiver);
        });

        Logger { logger }
    }

    /// A logger that discards everything, used when no log file was
    /// configured (e.g. `--show-config`).
    pub fn null() -> Self {
        let (sender, receiver) = channel::<String>();
        spawn(move || for _ in receiver {});
        Self { logger: sender }
    }

    /// Logs an informational message.
    ///
    /// # Parameters
    /// * `message`: text to record.
    /// * `module`: logical module tag emitting the message.
    pub fn info(&self, message: &str, module: &str) {
        self.log("INFO", message, module);
    }

    /// Logs an error message.
    pub fn error(&self, message: &str, module: &str) {
        self.log("ERROR", message, module);
    }

    /// Logs a warning message.
    pub fn warn(&self, message: &str, module: &str) {
        self.log("WARNING", message, module);
    }

    /// Logs a debug message with an attached displayable payload.
    pub fn debug<T: Display>(&self, message: &str, module: &str, data: T) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let log_message = format!("[DEBUG] - {timestamp} - {module}: {message} - {data}");
        self.send(&log_message);
    }

    fn log(&self, level: &str, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let log_message = format!("[{level}] - {timestamp} - {module}: {message}");
        self.send(&log_message);
    }

    fn send(&self, log_message: &str) {
        if self.logger.send(log_message.to_string()).is_err() {
            eprintln!("Error sending log message");
        }
    }
}

/// Drains the receiver and appends every message to `filename`.
fn write_to_file(filename: &str, receiver: Receiver<String>) {
    let file = OpenOptions::new().create(true).append(true).open(filename);

    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error opening log file: {e}");
            return;
        }
    };

    for message in receiver {
        if let Err(e) = writeln!(file, "{message}") {
            eprintln!("Error writing to log file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::remove_file, io::BufRead, thread::sleep, time::Duration};

    #[test]
    fn test_logger_writes_lines() {
        let logger = super::Logger::new("test_rts2_logger.log");

        logger.info("starting up", "test_module");
        sleep(Duration::from_millis(100));
        logger.error("something broke", "test_module");
        sleep(Duration::from_millis(100));
        logger.debug("exposure time", "test_module", 42);
        sleep(Duration::from_millis(100));

        let file = std::fs::File::open("test_rts2_logger.log").unwrap();
        let reader = std::io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert!(
                line.contains("[INFO]") || line.contains("[ERROR]") || line.contains("[DEBUG]")
            );
        }
        remove_file("test_rts2_logger.log").unwrap_or_default();
    }

    #[test]
    fn test_null_logger_never_blocks() {
        let logger = super::Logger::null();
        for i in 0..100 {
            logger.info(&format!("message {i}"), "test_module");
        }
    }
}
