//! Bus selection for commands that talk to the controller.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use hifc_engine::{Engine, EngineBuilder, EngineConfig};
use hifc_transport::Bus;
use tracing::{debug, info};

use crate::cmd::{parse_int, BusArgs};
use crate::exit::{engine_error, CliResult};

/// Where the controller is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusSpec {
    I2c { path: PathBuf, address: u16 },
    Spi { path: PathBuf, speed_hz: Option<u32> },
}

impl BusSpec {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::I2c { path, .. } | Self::Spi { path, .. } => path,
        }
    }

    /// Open the device node and wrap it in the matching adapter.
    ///
    /// The returned line is software-driven; callers poll it by calling
    /// [`Engine::interrupt`].
    #[cfg(target_os = "linux")]
    pub fn open(&self) -> CliResult<Box<dyn Bus>> {
        use std::sync::Arc;

        use hifc_transport::{
            I2cDev, I2cTransport, InterruptLine, SoftInterruptLine, SpiDev, SpiDevConfig,
            SpiTransport,
        };

        use crate::exit::transport_error;

        let irq: Arc<dyn InterruptLine> = Arc::new(SoftInterruptLine::new());
        let bus: Box<dyn Bus> = match self {
            Self::I2c { path, address } => {
                let dev = I2cDev::open(path, *address)
                    .map_err(|err| transport_error("open failed", err))?;
                Box::new(I2cTransport::new(dev, irq))
            }
            Self::Spi { path, speed_hz } => {
                let mut config = SpiDevConfig::default();
                if let Some(hz) = speed_hz {
                    config.max_speed_hz = *hz;
                }
                let dev = SpiDev::open_with_config(path, config)
                    .map_err(|err| transport_error("open failed", err))?;
                Box::new(SpiTransport::new(dev, irq))
            }
        };
        debug!(bus = %self, "bus opened");
        Ok(bus)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(&self) -> CliResult<Box<dyn Bus>> {
        Err(crate::exit::CliError::new(
            crate::exit::TRANSPORT_ERROR,
            format!("{self}: bus devices are only supported on Linux"),
        ))
    }
}

impl fmt::Display for BusSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2c { path, address } => write!(f, "i2c:{}@0x{address:02x}", path.display()),
            Self::Spi {
                path,
                speed_hz: Some(hz),
            } => write!(f, "spi:{}@{hz}", path.display()),
            Self::Spi {
                path,
                speed_hz: None,
            } => write!(f, "spi:{}", path.display()),
        }
    }
}

/// Parse `i2c:/dev/i2c-N@ADDR` or `spi:/dev/spidevB.C[@HZ]`.
pub fn parse_bus_spec(input: &str) -> Result<BusSpec, String> {
    let (kind, rest) = input
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:PATH, got {input:?}"))?;
    let (path, param) = match rest.rsplit_once('@') {
        Some((path, param)) => (path, Some(param)),
        None => (rest, None),
    };
    if path.is_empty() {
        return Err("bus path must not be empty".to_string());
    }
    let path = PathBuf::from(path);

    match kind {
        "i2c" => {
            let param = param.ok_or("i2c bus needs a target address (PATH@ADDR)")?;
            let address = parse_int(param)?;
            // 10-bit addressing is the widest the adapter supports.
            let address = u16::try_from(address)
                .ok()
                .filter(|a| *a <= 0x3FF)
                .ok_or_else(|| format!("i2c address out of range: {param}"))?;
            Ok(BusSpec::I2c { path, address })
        }
        "spi" => {
            let speed_hz = param
                .map(|p| {
                    parse_int(p).and_then(|hz| {
                        u32::try_from(hz).map_err(|_| format!("spi speed out of range: {p}"))
                    })
                })
                .transpose()?;
            Ok(BusSpec::Spi { path, speed_hz })
        }
        other => Err(format!("unknown bus kind {other:?} (expected i2c or spi)")),
    }
}

/// Load the engine configuration named by `--config`, or the defaults.
pub fn load_config(args: &BusArgs) -> CliResult<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .map_err(|err| engine_error("config load failed", err)),
        None => Ok(EngineConfig::default()),
    }
}

/// Open the bus and start an engine on it.
pub fn start_engine(
    args: &BusArgs,
    config: EngineConfig,
    configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
) -> CliResult<Engine> {
    let bus = args.bus.open()?;
    let engine = configure(Engine::builder(bus).config(config))
        .start()
        .map_err(|err| engine_error("engine start failed", err))?;
    info!(bus = %args.bus, "engine started");
    Ok(engine)
}

/// Run `f` while a helper thread polls the interrupt line every `interval`.
///
/// The controller's line is not wired to this process, so passes are
/// triggered by polling. A pass with nothing pending costs one bitmap read.
pub fn with_poller<T>(engine: &Engine, interval: Duration, f: impl FnOnce() -> T) -> T {
    let stop = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::SeqCst) {
                if !engine.is_faulted() {
                    engine.interrupt();
                }
                thread::sleep(interval);
            }
        });
        let out = f();
        stop.store(true, Ordering::SeqCst);
        out
    })
}
