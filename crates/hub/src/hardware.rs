//! Async facade over the I/O board.
//!
//! The live backend is picked once at startup from `[hardware] mode`.  A
//! simulated board is always kept alongside it so a request flagged as "try"
//! can be served without touching real pins.  Board calls are blocking
//! (the DHT11 read bit-bangs for ~25 ms) and run on the blocking pool.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use terrarium_io::{Board, ClimateReading, HardwareError, SimulatedBoard};

use crate::config::{HardwareConfig, HardwareMode};

/// Attempts before a climate read gives up and reports -1/-1.
pub const CLIMATE_ATTEMPTS: usize = 10;

type SharedBoard = Arc<Mutex<dyn Board>>;

#[derive(Clone)]
pub struct Hardware {
    mode: HardwareMode,
    live: SharedBoard,
    sim: SharedBoard,
}

impl Hardware {
    /// Simulated board for both paths.
    pub fn simulated() -> Self {
        let sim: SharedBoard = Arc::new(Mutex::new(SimulatedBoard::new()));
        Self {
            mode: HardwareMode::Sim,
            live: Arc::clone(&sim),
            sim,
        }
    }

    /// A given live board next to the simulated one.
    #[cfg(test)]
    pub fn with_live(live: impl Board + 'static) -> Self {
        Self {
            mode: HardwareMode::Gpio,
            live: Arc::new(Mutex::new(live)),
            sim: Arc::new(Mutex::new(SimulatedBoard::new())),
        }
    }

    pub fn from_config(cfg: &HardwareConfig) -> Result<Self> {
        match cfg.mode {
            HardwareMode::Sim => {
                tracing::info!("hardware: simulated board");
                Ok(Self::simulated())
            }
            HardwareMode::Gpio => Self::gpio(cfg),
        }
    }

    #[cfg(feature = "gpio")]
    fn gpio(cfg: &HardwareConfig) -> Result<Self> {
        use anyhow::Context;
        use terrarium_io::{GpioBoard, GpioPins};

        let to_u8 = |pins: &[i64]| pins.iter().map(|&p| p as u8).collect::<Vec<_>>();
        let board = GpioBoard::new(&GpioPins {
            inputs: to_u8(&cfg.input_pins),
            outputs: to_u8(&cfg.output_pins),
            dht: cfg.dht_pin as u8,
            active_low: cfg.active_low,
        })
        .context("failed to initialise gpio board")?;

        Ok(Self {
            mode: HardwareMode::Gpio,
            live: Arc::new(Mutex::new(board)),
            sim: Arc::new(Mutex::new(SimulatedBoard::new())),
        })
    }

    #[cfg(not(feature = "gpio"))]
    fn gpio(_cfg: &HardwareConfig) -> Result<Self> {
        anyhow::bail!("hardware mode \"gpio\" needs a build with the `gpio` feature")
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    fn board(&self, try_mode: bool) -> SharedBoard {
        if try_mode {
            Arc::clone(&self.sim)
        } else {
            Arc::clone(&self.live)
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// The eight input lines, connector-pin order.
    pub async fn read_inputs(&self, try_mode: bool) -> Result<Vec<bool>, HardwareError> {
        run_blocking(self.board(try_mode), |b| b.read_inputs()).await?
    }

    /// One climate sample.  Simulated reads succeed first time; the live
    /// sensor gets [`CLIMATE_ATTEMPTS`] tries.
    pub async fn read_climate(&self, try_mode: bool) -> ClimateReading {
        let attempts = if try_mode { 1 } else { CLIMATE_ATTEMPTS };
        let result = run_blocking(self.board(try_mode), move |b| {
            (0..attempts)
                .map(|_| b.read_climate())
                .find(|r| r.valid)
                .unwrap_or_else(ClimateReading::invalid)
        })
        .await;

        match result {
            Ok(reading) => {
                if !reading.valid {
                    tracing::warn!(attempts, "climate sensor gave no valid reading");
                }
                reading
            }
            Err(e) => {
                tracing::error!(error = %e, "climate read failed");
                ClimateReading::invalid()
            }
        }
    }

    /// Drive the relay port on the live board.
    pub async fn write_outputs(&self, mask: u8) -> Result<(), HardwareError> {
        run_blocking(self.board(false), move |b| b.write_outputs(mask)).await?
    }
}

async fn run_blocking<T, F>(board: SharedBoard, f: F) -> Result<T, HardwareError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn Board) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = board
            .lock()
            .map_err(|_| HardwareError::Unavailable("board lock poisoned".to_string()))?;
        Ok(f(&mut *guard))
    })
    .await
    .map_err(|e| HardwareError::Unavailable(e.to_string()))?
}
