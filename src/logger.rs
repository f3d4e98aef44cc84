use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

static MY_LOGGER: SimpleLogger = SimpleLogger;
struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let file = record.file().unwrap_or("<unknown file>");
        let line = record.line().unwrap_or(0);
        eprintln!(
            "{:5} ({}:{}) {}",
            record.level(),
            file,
            line,
            record.args()
        );
    }

    fn flush(&self) {}
}

pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&MY_LOGGER).map(|_| {
        log::set_max_level(max_level);
    })
}
